//! JSON wire formats for shared mutations and storage envelopes.
//!
//! Mutation (any transport):
//! ```text
//! {"type": "increment", "payload": {...}}
//! ```
//!
//! Envelope (storage transport only), stored under `<namespace>##<part>`:
//! ```text
//! ┌────────┬──────┬───────┬─────────────┬────────────────┐
//! │ author │ part │ total │ messagePart │ messageCounter │
//! │ string │ int  │ int   │ string      │ int (optional) │
//! └────────┴──────┴───────┴─────────────┴────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SyncError;

/// Separator between the namespace and the part ordinal in storage keys.
pub const KEY_SEPARATOR: &str = "##";

/// An application-defined state change.
///
/// A `Null` payload stands for "no payload" and is left off the wire, so a
/// mutation committed without a payload comes back without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    #[serde(rename = "type")]
    pub mutation_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Mutation {
    pub fn new(mutation_type: impl Into<String>, payload: Value) -> Self {
        Self {
            mutation_type: mutation_type.into(),
            payload,
        }
    }

    /// A mutation with no payload.
    pub fn bare(mutation_type: impl Into<String>) -> Self {
        Self::new(mutation_type, Value::Null)
    }

    pub fn to_value(&self) -> Result<Value, SyncError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self, SyncError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize to JSON text.
    pub fn encode(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON text.
    pub fn decode(text: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Identifier unique to one strategy instance (one tab).
///
/// UUIDv7: millisecond timestamp followed by random bits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginId(String);

impl OriginId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OriginId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One physical unit written to the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Missing on hand-written envelopes; treated as an anonymous origin.
    #[serde(default)]
    pub author: OriginId,
    pub part: usize,
    pub total: usize,
    pub message_part: String,
    /// Sender-local message sequence, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_counter: Option<u64>,
}

impl Envelope {
    pub fn encode(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Storage key for one part of a message: `<namespace>##<part>`.
pub fn storage_key(namespace: &str, part: usize) -> String {
    format!("{namespace}{KEY_SEPARATOR}{part}")
}

/// Whether `key` is a part key under `namespace`.
pub fn is_namespace_key(key: &str, namespace: &str) -> bool {
    key.split_once(KEY_SEPARATOR)
        .is_some_and(|(prefix, _)| prefix == namespace)
}
