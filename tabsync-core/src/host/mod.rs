//! Environment capabilities a strategy is built from.
//!
//! A [`Host`] bundles whatever the current context exposes: a window-like
//! event source, a key/value storage area, and a broadcast channel
//! constructor. Any of them may be missing; strategies check for what they
//! need and refuse construction otherwise.
//!
//! - [`memory`]: in-process hubs standing in for several tabs of one origin
//! - `web`: `web-sys` bindings, wasm32 only

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{StorageError, SyncError};
use crate::subscription::Subscription;

#[cfg(not(target_arch = "wasm32"))]
pub mod bus;
#[cfg(not(target_arch = "wasm32"))]
pub mod memory;
#[cfg(all(target_arch = "wasm32", feature = "web"))]
pub mod web;

/// Callback invoked for every inbound item.
pub type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A change notification raised by a storage area in another context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageEvent {
    /// `None` when the whole area was cleared.
    pub key: Option<String>,
    pub old_value: Option<String>,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

/// A shared key/value store (`localStorage`).
pub trait StorageArea: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// Source of cross-context storage change notifications (`window`).
pub trait StorageEventSource: Send + Sync {
    fn add_storage_listener(
        &self,
        listener: Listener<StorageEvent>,
    ) -> Result<Subscription, SyncError>;
}

/// An open pub/sub channel. Publishers never receive their own messages.
pub trait BroadcastChannel: Send + Sync {
    fn post_message(&self, message: &Value) -> Result<(), SyncError>;
    fn add_message_listener(&self, listener: Listener<Value>) -> Result<Subscription, SyncError>;
}

/// Constructor for named broadcast channels.
pub trait BroadcastChannelFactory: Send + Sync {
    fn open(&self, name: &str) -> Result<Arc<dyn BroadcastChannel>, SyncError>;
}

/// The capabilities exposed by one browsing context.
#[derive(Clone, Default)]
pub struct Host {
    pub window: Option<Arc<dyn StorageEventSource>>,
    pub local_storage: Option<Arc<dyn StorageArea>>,
    pub broadcast_channel: Option<Arc<dyn BroadcastChannelFactory>>,
}

impl Host {
    /// A host exposing nothing, as in a non-browser context.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The capabilities of the context this code is running in.
    ///
    /// On wasm32 with the `web` feature this inspects the browser globals;
    /// everywhere else it is [`Host::empty`].
    pub fn detect() -> Self {
        #[cfg(all(target_arch = "wasm32", feature = "web"))]
        {
            web::detect()
        }
        #[cfg(not(all(target_arch = "wasm32", feature = "web")))]
        {
            Self::empty()
        }
    }

    pub fn with_window(mut self, window: Arc<dyn StorageEventSource>) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_local_storage(mut self, storage: Arc<dyn StorageArea>) -> Self {
        self.local_storage = Some(storage);
        self
    }

    pub fn with_broadcast_channel(mut self, factory: Arc<dyn BroadcastChannelFactory>) -> Self {
        self.broadcast_channel = Some(factory);
        self
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("window", &self.window.is_some())
            .field("local_storage", &self.local_storage.is_some())
            .field("broadcast_channel", &self.broadcast_channel.is_some())
            .finish()
    }
}
