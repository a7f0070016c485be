//! Pluggable cross-tab transports.
//!
//! Every transport offers the same three capabilities: a static
//! `available(host)` check, [`Strategy::share`] to publish, and
//! [`Strategy::add_event_listener`] to receive messages from other tabs.
//!
//! - [`broadcast`]: `BroadcastChannel`, unbounded message size
//! - [`storage`]: `localStorage` writes + `storage` events, chunked
//! - [`select`]: picks the first available transport

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::host::Listener;
use crate::subscription::Subscription;

pub mod broadcast;
pub mod select;
pub mod storage;

pub use broadcast::{BroadcastChannelStrategy, ChannelConfig};
pub use select::{create_default_strategy, create_strategy, PREFERENCE_ORDER};
pub use storage::{ReceiveStats, StorageConfig, StorageStrategy};

/// Namespace used when none is configured.
pub const DEFAULT_KEY: &str = "shared-mutations";

/// The available transport variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    BroadcastChannel,
    LocalStorage,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BroadcastChannel => f.write_str("BroadcastChannel"),
            Self::LocalStorage => f.write_str("localStorage"),
        }
    }
}

/// A transport delivering JSON messages to sibling tabs of the same origin.
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Publish `message` to every other tab. Best effort: an `Err` means
    /// the message was not (fully) sent and will not be retried.
    fn share(&self, message: &Value) -> Result<(), SyncError>;

    /// Invoke `listener` once per message published by another instance.
    fn add_event_listener(&self, listener: Listener<Value>) -> Result<Subscription, SyncError>;
}
