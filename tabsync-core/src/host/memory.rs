//! In-memory stand-ins for browser transports.
//!
//! A hub models one origin; every context opened on it models one tab.
//!
//! ```text
//!               MemoryStorageHub (shared items + Bus<StorageEvent>)
//!                ┌─────────────┼─────────────┐
//!                ▼             ▼             ▼
//!           context 1      context 2      context 3
//!       (StorageArea + StorageEventSource per tab)
//! ```
//!
//! Storage contexts raise a [`StorageEvent`] on every value transition,
//! delivered to the *other* contexts only, as browsers do. Setting a key to
//! its current value raises nothing. Quota, disabled storage and engines
//! that also notify the writer can be simulated through
//! [`MemoryStorageOptions`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde_json::Value;

use crate::error::{StorageError, SyncError};
use crate::host::bus::{Bus, BusStats, ContextId};
use crate::host::{
    BroadcastChannel, BroadcastChannelFactory, Host, Listener, StorageArea, StorageEvent,
    StorageEventSource,
};
use crate::subscription::Subscription;

/// Default frames buffered per listener.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

// ─── Broadcast channels ─────────────────────────────────────────────

/// An origin's set of named broadcast channels.
///
/// Cloning shares the hub. Channels opened with the same name talk to each
/// other; a channel never hears its own posts.
#[derive(Clone)]
pub struct MemoryChannelHub {
    rooms: Arc<RwLock<HashMap<String, Arc<Bus<Value>>>>>,
    capacity: usize,
}

impl MemoryChannelHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// A host for one new tab exposing only this hub.
    pub fn host(&self) -> Host {
        Host::empty().with_broadcast_channel(Arc::new(self.clone()))
    }

    fn room(&self, name: &str) -> Arc<Bus<Value>> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(room) = rooms.get(name) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Bus::new(self.capacity)))
            .clone()
    }

    /// Counters for the named channel, if it was ever opened.
    pub fn stats(&self, name: &str) -> Option<BusStats> {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.get(name).map(|room| room.stats())
    }

    /// Number of distinct channel names opened so far.
    pub fn channel_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for MemoryChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastChannelFactory for MemoryChannelHub {
    fn open(&self, name: &str) -> Result<Arc<dyn BroadcastChannel>, SyncError> {
        let room = self.room(name);
        let context = room.register_context();
        Ok(Arc::new(MemoryChannel { context, room }))
    }
}

/// One tab's handle on a named channel.
pub struct MemoryChannel {
    context: ContextId,
    room: Arc<Bus<Value>>,
}

impl BroadcastChannel for MemoryChannel {
    fn post_message(&self, message: &Value) -> Result<(), SyncError> {
        let receivers = self.room.publish(self.context, message.clone());
        log::debug!("Channel context {} posted to {receivers} listeners", self.context);
        Ok(())
    }

    fn add_message_listener(&self, listener: Listener<Value>) -> Result<Subscription, SyncError> {
        self.room.listen(self.context, false, listener)
    }
}

// ─── Storage ────────────────────────────────────────────────────────

/// Behaviour knobs for a simulated storage area.
#[derive(Debug, Clone)]
pub struct MemoryStorageOptions {
    /// Maximum total bytes of keys plus values (None = unlimited)
    pub quota_bytes: Option<usize>,
    /// Reject every access, as privacy modes do
    pub disabled: bool,
    /// Also notify the writing context, as some older engines do
    pub notify_self: bool,
    /// Events buffered per listener before it starts dropping
    pub capacity: usize,
}

impl Default for MemoryStorageOptions {
    fn default() -> Self {
        Self {
            quota_bytes: None,
            disabled: false,
            notify_self: false,
            capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

struct StorageShared {
    items: Mutex<HashMap<String, String>>,
    events: Bus<StorageEvent>,
    options: MemoryStorageOptions,
}

/// An origin's `localStorage`, shared by every context opened on it.
#[derive(Clone)]
pub struct MemoryStorageHub {
    shared: Arc<StorageShared>,
}

impl MemoryStorageHub {
    pub fn new() -> Self {
        Self::with_options(MemoryStorageOptions::default())
    }

    pub fn with_options(options: MemoryStorageOptions) -> Self {
        Self {
            shared: Arc::new(StorageShared {
                items: Mutex::new(HashMap::new()),
                events: Bus::new(options.capacity),
                options,
            }),
        }
    }

    /// Open a new tab on this origin.
    pub fn context(&self) -> MemoryStorageContext {
        MemoryStorageContext {
            id: self.shared.events.register_context(),
            shared: self.shared.clone(),
        }
    }

    /// A host for one new tab exposing window and storage.
    pub fn host(&self) -> Host {
        let context = Arc::new(self.context());
        Host::empty()
            .with_window(context.clone())
            .with_local_storage(context)
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.shared.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BusStats {
        self.shared.events.stats()
    }
}

impl Default for MemoryStorageHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageShared {
    fn items(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.options.disabled {
            return Err(StorageError::Disabled);
        }
        Ok(())
    }
}

/// One tab's view of a [`MemoryStorageHub`].
#[derive(Clone)]
pub struct MemoryStorageContext {
    id: ContextId,
    shared: Arc<StorageShared>,
}

impl MemoryStorageContext {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Remove every key, notifying other contexts with a keyless event.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.shared.check_enabled()?;
        let had_items = {
            let mut items = self.shared.items();
            let had_items = !items.is_empty();
            items.clear();
            had_items
        };
        if had_items {
            self.shared.events.publish(self.id, StorageEvent::default());
        }
        Ok(())
    }
}

impl StorageArea for MemoryStorageContext {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.shared.check_enabled()?;
        Ok(self.shared.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.shared.check_enabled()?;

        let old_value = {
            let mut items = self.shared.items();
            if let Some(quota) = self.shared.options.quota_bytes {
                let used: usize = items
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                let needed = used + key.len() + value.len();
                if needed > quota {
                    return Err(StorageError::QuotaExceeded {
                        used: needed,
                        quota,
                    });
                }
            }
            items.insert(key.to_string(), value.to_string())
        };

        if old_value.as_deref() != Some(value) {
            self.shared.events.publish(
                self.id,
                StorageEvent {
                    key: Some(key.to_string()),
                    old_value,
                    new_value: Some(value.to_string()),
                },
            );
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.shared.check_enabled()?;
        let old_value = self.shared.items().remove(key);
        if old_value.is_some() {
            self.shared.events.publish(
                self.id,
                StorageEvent {
                    key: Some(key.to_string()),
                    old_value,
                    new_value: None,
                },
            );
        }
        Ok(())
    }
}

impl StorageEventSource for MemoryStorageContext {
    fn add_storage_listener(
        &self,
        listener: Listener<StorageEvent>,
    ) -> Result<Subscription, SyncError> {
        self.shared
            .events
            .listen(self.id, self.shared.options.notify_self, listener)
    }
}
