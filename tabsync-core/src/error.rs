//! Error types shared by every strategy and host.

use thiserror::Error;

use crate::strategy::StrategyKind;

/// Failures raised by a storage host (`localStorage` or its in-memory stand-in).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The write would exceed the storage quota.
    #[error("Storage quota exceeded ({used} of {quota} bytes)")]
    QuotaExceeded { used: usize, quota: usize },

    /// Storage exists but refuses access (privacy mode, blocked by policy).
    #[error("Storage is disabled")]
    Disabled,

    /// Any other error reported by the host environment.
    #[error("Storage host error: {0}")]
    Host(String),
}

/// Main error type for cross-tab sharing.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The transport cannot be constructed in this environment.
    #[error("{strategy} strategy not available")]
    Unavailable { strategy: StrategyKind },

    /// Every known transport is unavailable.
    #[error("No strategies available")]
    NoStrategyAvailable,

    /// A message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid setup arguments.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The storage host rejected an operation.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The broadcast channel host rejected an operation.
    #[error("Channel error: {0}")]
    Channel(String),
}
