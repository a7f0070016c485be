//! `BroadcastChannel` transport.
//!
//! Messages go to the channel as-is; the platform never echoes a post back
//! to the channel that sent it, so there is no loop prevention here.

use std::sync::Arc;

use serde_json::Value;

use crate::error::SyncError;
use crate::host::{BroadcastChannel, Host, Listener};
use crate::strategy::{Strategy, StrategyKind, DEFAULT_KEY};
use crate::subscription::Subscription;

/// Broadcast transport configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Channel name shared by every tab
    pub key: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
        }
    }
}

pub struct BroadcastChannelStrategy {
    channel: Arc<dyn BroadcastChannel>,
    key: String,
}

impl BroadcastChannelStrategy {
    /// Whether `host` exposes a broadcast channel constructor. No side effects.
    pub fn available(host: &Host) -> bool {
        host.broadcast_channel.is_some()
    }

    /// Open the configured channel on `host`.
    pub fn new(config: ChannelConfig, host: &Host) -> Result<Self, SyncError> {
        let factory = host
            .broadcast_channel
            .as_ref()
            .ok_or(SyncError::Unavailable {
                strategy: StrategyKind::BroadcastChannel,
            })?;

        let channel = factory.open(&config.key)?;
        log::debug!("Opened broadcast channel '{}'", config.key);
        Ok(Self {
            channel,
            key: config.key,
        })
    }

    /// Channel name.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Strategy for BroadcastChannelStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BroadcastChannel
    }

    fn share(&self, message: &Value) -> Result<(), SyncError> {
        self.channel.post_message(message)
    }

    fn add_event_listener(&self, listener: Listener<Value>) -> Result<Subscription, SyncError> {
        self.channel.add_message_listener(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BroadcastChannelFactory;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every call made against it.
    #[derive(Default)]
    struct FakeChannel {
        opened: Mutex<Vec<String>>,
        posted: Mutex<Vec<Value>>,
        listeners: Mutex<usize>,
    }

    impl BroadcastChannelFactory for Arc<FakeChannel> {
        fn open(&self, name: &str) -> Result<Arc<dyn BroadcastChannel>, SyncError> {
            self.opened.lock().unwrap().push(name.to_string());
            Ok(self.clone())
        }
    }

    impl BroadcastChannel for FakeChannel {
        fn post_message(&self, message: &Value) -> Result<(), SyncError> {
            self.posted.lock().unwrap().push(message.clone());
            Ok(())
        }

        fn add_message_listener(&self, _listener: Listener<Value>) -> Result<Subscription, SyncError> {
            *self.listeners.lock().unwrap() += 1;
            Ok(Subscription::noop())
        }
    }

    fn fake_host() -> (Arc<FakeChannel>, Host) {
        let fake = Arc::new(FakeChannel::default());
        let host = Host::empty().with_broadcast_channel(Arc::new(fake.clone()));
        (fake, host)
    }

    #[test]
    fn test_unavailable_without_constructor() {
        assert!(!BroadcastChannelStrategy::available(&Host::empty()));
        let result = BroadcastChannelStrategy::new(ChannelConfig::default(), &Host::empty());
        assert!(matches!(
            result,
            Err(SyncError::Unavailable {
                strategy: StrategyKind::BroadcastChannel
            })
        ));
    }

    #[test]
    fn test_respects_key() {
        let (fake, host) = fake_host();
        let config = ChannelConfig {
            key: "CUSTOM KEY".into(),
        };
        let strategy = BroadcastChannelStrategy::new(config, &host).unwrap();
        assert_eq!(strategy.key(), "CUSTOM KEY");
        assert_eq!(*fake.opened.lock().unwrap(), vec!["CUSTOM KEY".to_string()]);
    }

    #[test]
    fn test_default_key() {
        let (fake, host) = fake_host();
        BroadcastChannelStrategy::new(ChannelConfig::default(), &host).unwrap();
        assert_eq!(*fake.opened.lock().unwrap(), vec![DEFAULT_KEY.to_string()]);
    }

    #[test]
    fn test_share_posts_message_unchanged() {
        let (fake, host) = fake_host();
        let strategy = BroadcastChannelStrategy::new(ChannelConfig::default(), &host).unwrap();
        let message = json!({"demo": "message"});
        strategy.share(&message).unwrap();
        assert_eq!(*fake.posted.lock().unwrap(), vec![message]);
    }

    #[test]
    fn test_subscribes_to_messages() {
        let (fake, host) = fake_host();
        let strategy = BroadcastChannelStrategy::new(ChannelConfig::default(), &host).unwrap();
        strategy.add_event_listener(Arc::new(|_: Value| {})).unwrap();
        assert_eq!(*fake.listeners.lock().unwrap(), 1);
    }

    #[test]
    fn test_kind() {
        let (_fake, host) = fake_host();
        let strategy = BroadcastChannelStrategy::new(ChannelConfig::default(), &host).unwrap();
        assert_eq!(strategy.kind(), StrategyKind::BroadcastChannel);
    }
}
