//! Explicit unregister handles for event listeners.

use std::fmt;

type Cancel = Box<dyn FnOnce() + Send>;

/// Handle returned by every listener registration.
///
/// Dropping a `Subscription` leaves the listener registered for the lifetime
/// of the context, the same as a page-lifetime event listener. Call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Default)]
pub struct Subscription {
    cancel: Vec<Cancel>,
}

impl Subscription {
    /// Wrap a cancellation callback.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: vec![Box::new(cancel)],
        }
    }

    /// A handle with nothing to cancel.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Combine two handles; unsubscribing the result cancels both.
    pub fn chain(mut self, mut other: Subscription) -> Self {
        self.cancel.append(&mut other.cancel);
        self
    }

    /// Remove the listener(s) this handle refers to.
    pub fn unsubscribe(self) {
        for cancel in self.cancel {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handles", &self.cancel.len())
            .finish()
    }
}
