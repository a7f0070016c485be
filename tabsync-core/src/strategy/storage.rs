//! `localStorage` transport.
//!
//! ```text
//!  share(msg)                                   other tab
//!     │ JSON text                                   ▲
//!     ▼                                             │ join + parse
//!  split_into_parts (≤ 4096 UTF-16 units)    ChunkReassembler
//!     │                                             ▲
//!     ▼ per part                                    │ Envelope
//!  setItem("<key>##<n>", Envelope) ── storage event ┘
//!  removeItem("<key>##<n>")        ── storage event (empty, ignored)
//! ```
//!
//! Writing and immediately removing each key makes every part a value
//! transition, so a notification fires even when successive messages reuse
//! the same keys.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use uuid::{NoContext, Timestamp};

use crate::chunking::{split_into_parts, ChunkReassembler, Reassembly, MAX_PART_LEN};
use crate::error::SyncError;
use crate::host::{Host, Listener, StorageArea, StorageEvent, StorageEventSource};
use crate::protocol::{is_namespace_key, storage_key, Envelope, OriginId};
use crate::strategy::{Strategy, StrategyKind, DEFAULT_KEY};
use crate::subscription::Subscription;

/// Key written and removed by the availability check.
pub const PROBE_KEY: &str = "shared-mutations-test-key";

/// Storage transport configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Namespace prefix of every part key
    pub key: String,
    /// Maximum UTF-16 code units per stored part
    pub max_part_len: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            max_part_len: MAX_PART_LEN,
        }
    }
}

/// Counters for inbound traffic across all listeners of one strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub messages_delivered: u64,
    pub parts_buffered: u64,
    pub events_ignored: u64,
    pub self_echoes: u64,
    pub corrupt: u64,
}

#[derive(Default)]
struct AtomicReceiveStats {
    messages_delivered: AtomicU64,
    parts_buffered: AtomicU64,
    events_ignored: AtomicU64,
    self_echoes: AtomicU64,
    corrupt: AtomicU64,
}

impl AtomicReceiveStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReceiveStats {
        ReceiveStats {
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            parts_buffered: self.parts_buffered.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
            self_echoes: self.self_echoes.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
        }
    }
}

/// What one storage event amounted to.
#[derive(Debug, Clone, PartialEq)]
enum EventOutcome {
    /// Removal, cleared area, or a key outside the namespace.
    Ignored,
    /// Written by this very instance.
    SelfEcho,
    /// A part of a message that is not complete yet.
    Buffered,
    /// The final part arrived; the reassembled message.
    Delivered(Value),
    /// Unparseable envelope or message; dropped.
    Corrupt,
}

/// Inbound state for one registered listener.
struct Inbound {
    namespace: String,
    origin: OriginId,
    reassembler: Mutex<ChunkReassembler>,
    stats: Arc<AtomicReceiveStats>,
}

impl Inbound {
    fn handle(&self, event: &StorageEvent) -> EventOutcome {
        let (Some(key), Some(new_value)) = (event.key.as_deref(), event.new_value.as_deref())
        else {
            AtomicReceiveStats::bump(&self.stats.events_ignored);
            return EventOutcome::Ignored;
        };
        if new_value.is_empty() || !is_namespace_key(key, &self.namespace) {
            AtomicReceiveStats::bump(&self.stats.events_ignored);
            return EventOutcome::Ignored;
        }

        let envelope = match Envelope::decode(new_value) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::error!("Unable to parse shared message part under '{key}': {e}");
                AtomicReceiveStats::bump(&self.stats.corrupt);
                return EventOutcome::Corrupt;
            }
        };

        if envelope.author == self.origin {
            AtomicReceiveStats::bump(&self.stats.self_echoes);
            return EventOutcome::SelfEcho;
        }

        let reassembly = self
            .reassembler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);

        match reassembly {
            Reassembly::Pending { .. } => {
                AtomicReceiveStats::bump(&self.stats.parts_buffered);
                EventOutcome::Buffered
            }
            Reassembly::Rejected => {
                AtomicReceiveStats::bump(&self.stats.corrupt);
                EventOutcome::Corrupt
            }
            Reassembly::Complete(text) => match serde_json::from_str::<Value>(&text) {
                Ok(message) => {
                    AtomicReceiveStats::bump(&self.stats.messages_delivered);
                    EventOutcome::Delivered(message)
                }
                Err(e) => {
                    log::error!("Unable to parse shared message ({} bytes): {e}", text.len());
                    AtomicReceiveStats::bump(&self.stats.corrupt);
                    EventOutcome::Corrupt
                }
            },
        }
    }
}

pub struct StorageStrategy {
    window: Arc<dyn StorageEventSource>,
    storage: Arc<dyn StorageArea>,
    config: StorageConfig,
    origin: OriginId,
    message_counter: AtomicU64,
    stats: Arc<AtomicReceiveStats>,
}

impl StorageStrategy {
    /// Whether `host` has a window and a writable storage area.
    ///
    /// Writes and removes [`PROBE_KEY`]; any failure (quota, disabled
    /// storage, privacy mode) reports unavailable.
    pub fn available(host: &Host) -> bool {
        match (&host.window, &host.local_storage) {
            (Some(_), Some(storage)) => check_writable(storage.as_ref()),
            _ => false,
        }
    }

    pub fn new(config: StorageConfig, host: &Host) -> Result<Self, SyncError> {
        if config.max_part_len == 0 {
            return Err(SyncError::Configuration(
                "max_part_len must be at least 1".into(),
            ));
        }

        let unavailable = SyncError::Unavailable {
            strategy: StrategyKind::LocalStorage,
        };
        let (Some(window), Some(storage)) = (host.window.clone(), host.local_storage.clone())
        else {
            return Err(unavailable);
        };
        if !check_writable(storage.as_ref()) {
            return Err(unavailable);
        }

        let origin = OriginId::generate();
        log::debug!("Storage strategy '{}' ready as {origin}", config.key);
        Ok(Self {
            window,
            storage,
            config,
            origin,
            message_counter: AtomicU64::new(0),
            stats: Arc::new(AtomicReceiveStats::default()),
        })
    }

    /// This instance's author id.
    pub fn origin(&self) -> &OriginId {
        &self.origin
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Inbound counters summed over every listener.
    pub fn receive_stats(&self) -> ReceiveStats {
        self.stats.snapshot()
    }

    fn inbound(&self) -> Inbound {
        Inbound {
            namespace: self.config.key.clone(),
            origin: self.origin.clone(),
            reassembler: Mutex::new(ChunkReassembler::new()),
            stats: self.stats.clone(),
        }
    }
}

fn check_writable(storage: &dyn StorageArea) -> bool {
    let (secs, nanos) = Timestamp::now(NoContext).to_unix();
    let stamp = (secs * 1000 + u64::from(nanos) / 1_000_000).to_string();

    match storage
        .set_item(PROBE_KEY, &stamp)
        .and_then(|_| storage.remove_item(PROBE_KEY))
    {
        Ok(()) => true,
        Err(e) => {
            log::debug!("Storage availability check failed: {e}");
            false
        }
    }
}

impl Strategy for StorageStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LocalStorage
    }

    fn share(&self, message: &Value) -> Result<(), SyncError> {
        let raw = serde_json::to_string(message)?;
        let parts = split_into_parts(&raw, self.config.max_part_len);
        let total = parts.len();
        let counter = self.message_counter.fetch_add(1, Ordering::Relaxed) + 1;

        for (part, text) in parts.into_iter().enumerate() {
            let envelope = Envelope {
                author: self.origin.clone(),
                part,
                total,
                message_part: text.to_string(),
                message_counter: Some(counter),
            };
            let key = storage_key(&self.config.key, part);
            self.storage.set_item(&key, &envelope.encode()?)?;
            self.storage.remove_item(&key)?;
        }

        log::debug!("Shared message #{counter} in {total} part(s)");
        Ok(())
    }

    fn add_event_listener(&self, listener: Listener<Value>) -> Result<Subscription, SyncError> {
        let inbound = self.inbound();
        self.window
            .add_storage_listener(Arc::new(move |event: StorageEvent| {
                if let EventOutcome::Delivered(message) = inbound.handle(&event) {
                    listener(message);
                }
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Set(String, String),
        Remove(String),
    }

    #[derive(Default)]
    struct RecordingStorage {
        calls: Mutex<Vec<Call>>,
        broken: bool,
    }

    impl RecordingStorage {
        /// Calls made by `share`, excluding the availability check.
        fn shared_calls(&self) -> Vec<Call> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| match c {
                    Call::Set(k, _) | Call::Remove(k) => k != PROBE_KEY,
                })
                .cloned()
                .collect()
        }
    }

    impl StorageArea for RecordingStorage {
        fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.broken {
                return Err(StorageError::Host("setItem is not a function".into()));
            }
            self.calls
                .lock()
                .unwrap()
                .push(Call::Set(key.to_string(), value.to_string()));
            Ok(())
        }

        fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            self.calls.lock().unwrap().push(Call::Remove(key.to_string()));
            Ok(())
        }
    }

    /// Captures registered handlers so tests can fire events by hand.
    #[derive(Default)]
    struct CapturingWindow {
        handlers: Mutex<Vec<Listener<StorageEvent>>>,
    }

    impl CapturingWindow {
        fn fire(&self, key: &str, new_value: Option<&str>) {
            let handlers = self.handlers.lock().unwrap().clone();
            for handler in handlers {
                handler(StorageEvent {
                    key: Some(key.to_string()),
                    old_value: None,
                    new_value: new_value.map(str::to_string),
                });
            }
        }
    }

    impl StorageEventSource for CapturingWindow {
        fn add_storage_listener(
            &self,
            listener: Listener<StorageEvent>,
        ) -> Result<Subscription, SyncError> {
            self.handlers.lock().unwrap().push(listener);
            Ok(Subscription::noop())
        }
    }

    struct Fixture {
        storage: Arc<RecordingStorage>,
        window: Arc<CapturingWindow>,
        host: Host,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(RecordingStorage::default());
        let window = Arc::new(CapturingWindow::default());
        let host = Host::empty()
            .with_window(window.clone())
            .with_local_storage(storage.clone());
        Fixture {
            storage,
            window,
            host,
        }
    }

    fn keyed(key: &str) -> StorageConfig {
        StorageConfig {
            key: key.into(),
            ..StorageConfig::default()
        }
    }

    fn collect(strategy: &StorageStrategy) -> Arc<Mutex<Vec<Value>>> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        strategy
            .add_event_listener(Arc::new(move |message: Value| {
                sink.lock().unwrap().push(message);
            }))
            .unwrap();
        received
    }

    #[test]
    fn test_unavailable_without_window() {
        let host = Host::empty().with_local_storage(Arc::new(RecordingStorage::default()));
        assert!(!StorageStrategy::available(&host));
    }

    #[test]
    fn test_unavailable_without_storage() {
        let host = Host::empty().with_window(Arc::new(CapturingWindow::default()));
        assert!(!StorageStrategy::available(&host));
    }

    #[test]
    fn test_broken_storage_fails_construction() {
        let host = Host::empty()
            .with_window(Arc::new(CapturingWindow::default()))
            .with_local_storage(Arc::new(RecordingStorage {
                broken: true,
                ..RecordingStorage::default()
            }));
        assert!(!StorageStrategy::available(&host));
        assert!(matches!(
            StorageStrategy::new(StorageConfig::default(), &host),
            Err(SyncError::Unavailable {
                strategy: StrategyKind::LocalStorage
            })
        ));
    }

    #[test]
    fn test_availability_check_cleans_up() {
        let f = fixture();
        assert!(StorageStrategy::available(&f.host));
        let calls = f.storage.calls.lock().unwrap().clone();
        assert!(matches!(&calls[0], Call::Set(k, _) if k == PROBE_KEY));
        assert_eq!(calls[1], Call::Remove(PROBE_KEY.to_string()));
    }

    #[test]
    fn test_zero_part_len_is_configuration_error() {
        let f = fixture();
        let config = StorageConfig {
            max_part_len: 0,
            ..StorageConfig::default()
        };
        assert!(matches!(
            StorageStrategy::new(config, &f.host),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn test_share_sets_then_removes() {
        let f = fixture();
        let strategy = StorageStrategy::new(keyed("TEST-KEY"), &f.host).unwrap();
        strategy.share(&json!({"demo": "message"})).unwrap();

        let calls = f.storage.shared_calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            Call::Set(key, value) => {
                assert_eq!(key, "TEST-KEY##0");
                assert!(value.contains(r#""part":0"#));
                assert!(value.contains(r#""total":1"#));
            }
            other => panic!("expected setItem, got {other:?}"),
        }
        assert_eq!(calls[1], Call::Remove("TEST-KEY##0".into()));
    }

    #[test]
    fn test_long_message_is_split() {
        let f = fixture();
        let strategy = StorageStrategy::new(keyed("TEST-KEY"), &f.host).unwrap();
        let message = json!({"demo": "m".repeat(64 * 1024)});
        strategy.share(&message).unwrap();

        let raw_len = serde_json::to_string(&message).unwrap().len();
        let expected_parts = raw_len.div_ceil(MAX_PART_LEN);
        let calls = f.storage.shared_calls();
        assert_eq!(calls.len(), expected_parts * 2);

        for (part, pair) in calls.chunks(2).enumerate() {
            let key = format!("TEST-KEY##{part}");
            let Call::Set(set_key, value) = &pair[0] else {
                panic!("expected setItem first");
            };
            assert_eq!(set_key, &key);
            let envelope = Envelope::decode(value).unwrap();
            assert_eq!(envelope.part, part);
            assert_eq!(envelope.total, expected_parts);
            assert_eq!(envelope.author, *strategy.origin());
            assert_eq!(pair[1], Call::Remove(key));
        }
    }

    #[test]
    fn test_counter_is_per_instance() {
        let f = fixture();
        let a = StorageStrategy::new(keyed("K"), &f.host).unwrap();
        let b = StorageStrategy::new(keyed("K"), &f.host).unwrap();
        a.share(&json!(1)).unwrap();
        a.share(&json!(2)).unwrap();
        b.share(&json!(3)).unwrap();

        let counters: Vec<Option<u64>> = f
            .storage
            .shared_calls()
            .iter()
            .filter_map(|c| match c {
                Call::Set(_, v) => Some(Envelope::decode(v).unwrap().message_counter),
                Call::Remove(_) => None,
            })
            .collect();
        assert_eq!(counters, vec![Some(1), Some(2), Some(1)]);
    }

    #[test]
    fn test_ignores_other_keys() {
        let f = fixture();
        let strategy = StorageStrategy::new(keyed("TEST-KEY"), &f.host).unwrap();
        let received = collect(&strategy);
        f.window.fire("some-other-key", Some("1"));
        f.window.fire("other##0", Some("1"));
        assert!(received.lock().unwrap().is_empty());
        assert_eq!(strategy.receive_stats().events_ignored, 2);
    }

    #[test]
    fn test_ignores_empty_value() {
        let f = fixture();
        let strategy = StorageStrategy::new(keyed("TEST-KEY"), &f.host).unwrap();
        let received = collect(&strategy);
        f.window.fire("TEST-KEY##0", None);
        f.window.fire("TEST-KEY##0", Some(""));
        assert!(received.lock().unwrap().is_empty());
        assert_eq!(strategy.receive_stats().events_ignored, 2);
    }

    #[test]
    fn test_parses_split_message() {
        let f = fixture();
        let strategy = StorageStrategy::new(keyed("TEST-KEY"), &f.host).unwrap();
        let received = collect(&strategy);

        f.window.fire(
            "TEST-KEY##0",
            Some(r#"{"part":0,"total":2,"messagePart":"tr"}"#),
        );
        assert!(received.lock().unwrap().is_empty());

        f.window.fire(
            "TEST-KEY##1",
            Some(r#"{"part":1,"total":2,"messagePart":"ue"}"#),
        );
        assert_eq!(*received.lock().unwrap(), vec![json!(true)]);

        let stats = strategy.receive_stats();
        assert_eq!(stats.parts_buffered, 1);
        assert_eq!(stats.messages_delivered, 1);
    }

    #[test]
    fn test_ignores_own_messages() {
        let f = fixture();
        let strategy = StorageStrategy::new(keyed("TEST-KEY"), &f.host).unwrap();
        let received = collect(&strategy);
        strategy.share(&json!({"type": "increment"})).unwrap();

        let calls = f.storage.shared_calls();
        let Call::Set(key, value) = &calls[0] else {
            panic!("expected setItem");
        };
        f.window.fire(key, Some(value));

        assert!(received.lock().unwrap().is_empty());
        assert_eq!(strategy.receive_stats().self_echoes, 1);
    }

    #[test]
    fn test_corrupt_part_is_dropped() {
        let f = fixture();
        let strategy = StorageStrategy::new(keyed("TEST-KEY"), &f.host).unwrap();
        let received = collect(&strategy);

        f.window.fire("TEST-KEY##0", Some("definitely not json"));
        f.window.fire(
            "TEST-KEY##0",
            Some(r#"{"author":"x","part":0,"total":1,"messagePart":"{broken"}"#),
        );

        assert!(received.lock().unwrap().is_empty());
        assert_eq!(strategy.receive_stats().corrupt, 2);
    }

    #[test]
    fn test_each_listener_reassembles_independently() {
        let f = fixture();
        let strategy = StorageStrategy::new(keyed("TEST-KEY"), &f.host).unwrap();
        let first = collect(&strategy);
        let second = collect(&strategy);

        f.window.fire(
            "TEST-KEY##0",
            Some(r#"{"author":"x","part":0,"total":2,"messagePart":"[1"}"#),
        );
        f.window.fire(
            "TEST-KEY##1",
            Some(r#"{"author":"x","part":1,"total":2,"messagePart":"]"}"#),
        );

        assert_eq!(*first.lock().unwrap(), vec![json!([1])]);
        assert_eq!(*second.lock().unwrap(), vec![json!([1])]);
    }

    #[test]
    fn test_origins_differ_between_instances() {
        let f = fixture();
        let a = StorageStrategy::new(StorageConfig::default(), &f.host).unwrap();
        let b = StorageStrategy::new(StorageConfig::default(), &f.host).unwrap();
        assert_ne!(a.origin(), b.origin());
        assert_eq!(a.kind(), StrategyKind::LocalStorage);
        assert_eq!(a.config().key, DEFAULT_KEY);
    }
}
