//! # tabsync-core: Cross-tab store mutation sharing
//!
//! Keeps several instances of an application store, one per browser tab
//! of the same origin, in step by rebroadcasting selected mutations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   share(msg)    ┌──────────────┐   add_event_listener   ┌──────────────┐
//! │ Store (tab A)│ ──────────────► │   Strategy   │ ─────────────────────► │ Store (tab B)│
//! │  + Sharer    │                 │ Broadcast /  │                        │  + Sharer    │
//! └──────────────┘                 │ localStorage │                        └──────────────┘
//!                                  └──────┬───────┘
//!                                         │ built from
//!                                  ┌──────┴───────┐
//!                                  │     Host     │
//!                                  │ web / memory │
//!                                  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: mutation and envelope wire formats
//! - [`chunking`]: splitting and reassembling oversized messages
//! - [`host`]: environment capabilities (browser or in-memory)
//! - [`strategy`]: transports and their selection
//! - [`sharer`]: store adapter with loop prevention
//! - [`subscription`]: unregister handles

pub mod chunking;
pub mod error;
pub mod host;
pub mod protocol;
pub mod sharer;
pub mod strategy;
pub mod subscription;

// Re-exports for convenience
pub use error::{StorageError, SyncError};
pub use host::{Host, Listener, StorageEvent};
pub use protocol::{Envelope, Mutation, OriginId};
pub use sharer::{MutationHook, MutationSharer, Predicate, SharerOptions, Store};
pub use strategy::{
    create_default_strategy, create_strategy, BroadcastChannelStrategy, ChannelConfig,
    StorageConfig, StorageStrategy, Strategy, StrategyKind, DEFAULT_KEY, PREFERENCE_ORDER,
};
pub use subscription::Subscription;

#[cfg(not(target_arch = "wasm32"))]
pub use host::memory::{MemoryChannelHub, MemoryStorageHub, MemoryStorageOptions};
