//! One-shot transport selection at setup time.

use std::sync::Arc;

use crate::error::SyncError;
use crate::host::Host;
use crate::strategy::{
    BroadcastChannelStrategy, ChannelConfig, StorageConfig, StorageStrategy, Strategy,
    StrategyKind,
};

/// Default preference: `BroadcastChannel` first, `localStorage` as fallback.
pub const PREFERENCE_ORDER: [StrategyKind; 2] =
    [StrategyKind::BroadcastChannel, StrategyKind::LocalStorage];

/// Construct the first available strategy in [`PREFERENCE_ORDER`] with
/// default configuration.
pub fn create_default_strategy(host: &Host) -> Result<Arc<dyn Strategy>, SyncError> {
    create_strategy(host, &PREFERENCE_ORDER)
}

/// Construct the first strategy in `order` that `host` supports.
///
/// Fails with [`SyncError::NoStrategyAvailable`] when none does. There is no
/// later re-selection.
pub fn create_strategy(
    host: &Host,
    order: &[StrategyKind],
) -> Result<Arc<dyn Strategy>, SyncError> {
    for kind in order {
        let attempt: Result<Arc<dyn Strategy>, SyncError> = match kind {
            StrategyKind::BroadcastChannel => {
                BroadcastChannelStrategy::new(ChannelConfig::default(), host)
                    .map(|s| Arc::new(s) as Arc<dyn Strategy>)
            }
            StrategyKind::LocalStorage => StorageStrategy::new(StorageConfig::default(), host)
                .map(|s| Arc::new(s) as Arc<dyn Strategy>),
        };

        match attempt {
            Ok(strategy) => {
                log::debug!("Selected {kind} strategy");
                return Ok(strategy);
            }
            Err(e) => log::debug!("Skipping {kind} strategy: {e}"),
        }
    }

    log::error!("No cross-tab strategy available on {host:?}");
    Err(SyncError::NoStrategyAvailable)
}
