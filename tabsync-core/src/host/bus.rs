//! In-process fan-out between simulated browsing contexts.
//!
//! Uses a tokio broadcast channel so one publish reaches every listener.
//! Each listener gets its own receiver and its own task, which plays the
//! role of the receiving tab's event loop: delivery is always scheduled,
//! never synchronous with the publisher. Lagging listeners drop frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::SyncError;
use crate::host::Listener;
use crate::subscription::Subscription;

/// Identifies one simulated context on a bus.
pub type ContextId = u64;

/// Statistics for monitoring bus health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_listeners: usize,
}

/// Lock-free counters, read via [`Bus::stats`].
#[derive(Default)]
struct AtomicBusStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

#[derive(Debug)]
struct Frame<T> {
    origin: ContextId,
    item: T,
}

/// A fan-out channel shared by every context of one simulated origin.
pub struct Bus<T> {
    sender: broadcast::Sender<Arc<Frame<T>>>,
    capacity: usize,
    next_context: AtomicU64,
    atomic_stats: Arc<AtomicBusStats>,
}

impl<T: Clone + Send + Sync + 'static> Bus<T> {
    /// Create a bus buffering up to `capacity` frames per listener.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
            next_context: AtomicU64::new(1),
            atomic_stats: Arc::new(AtomicBusStats::default()),
        }
    }

    /// Allocate an id for a new context.
    pub fn register_context(&self) -> ContextId {
        self.next_context.fetch_add(1, Ordering::Relaxed)
    }

    /// Send `item` from `origin` to every listener.
    ///
    /// Returns the number of listeners that will see the frame, including
    /// the publisher's own listeners (filtering happens on receipt).
    pub fn publish(&self, origin: ContextId, item: T) -> usize {
        let count = self
            .sender
            .send(Arc::new(Frame { origin, item }))
            .unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Deliver frames to `listener` on a spawned task.
    ///
    /// Frames published by `context` are skipped unless `include_own` is set.
    /// The receiver is attached before this returns, so nothing published
    /// afterwards is missed. Requires a running tokio runtime.
    pub fn listen(
        &self,
        context: ContextId,
        include_own: bool,
        listener: Listener<T>,
    ) -> Result<Subscription, SyncError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Channel(format!("no event loop to deliver on: {e}")))?;

        let mut receiver = self.sender.subscribe();
        let stats = self.atomic_stats.clone();

        let task = runtime.spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(frame) => {
                        if frame.origin == context && !include_own {
                            continue;
                        }
                        listener(frame.item.clone());
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        stats.messages_dropped.fetch_add(skipped, Ordering::Relaxed);
                        log::warn!("Context {context} lagged, dropped {skipped} frames");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(move || task.abort()))
    }

    /// Lock-free snapshot of the counters.
    pub fn stats(&self) -> BusStats {
        BusStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_listeners: self.sender.receiver_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
