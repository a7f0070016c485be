//! Message chunking and reassembly for size-limited transports.
//!
//! A serialized message is cut into parts of at most [`MAX_PART_LEN`]
//! UTF-16 code units, the unit browser storage quotas and string lengths are
//! measured in. Each part travels in its own [`Envelope`] carrying the
//! author, ordinal and total part count. The receiver buffers parts in
//! arrival order and releases the joined text once `total` parts are in.
//!
//! Buffers are scoped per `(author, total)`, so chunked messages from
//! different tabs can interleave without merging. Two chunked messages from
//! the same author with the same part count must not interleave; a single
//! tab writes every part of a message before it returns from `share`. A
//! part 0 from an author means any earlier message from that author never
//! finished, so every buffer it still has is discarded.

use std::collections::HashMap;

use crate::protocol::{Envelope, OriginId};

/// Maximum UTF-16 code units per stored part.
pub const MAX_PART_LEN: usize = 4 * 1024;

/// Split `text` into parts of at most `max_len` UTF-16 code units.
///
/// Cuts on character boundaries, so a surrogate pair is never split and a
/// part may end one unit short. A text within the limit yields exactly one
/// part. A zero limit is treated as one; a single astral character then
/// still makes a part of its own.
pub fn split_into_parts(text: &str, max_len: usize) -> Vec<&str> {
    let max_len = max_len.max(1);
    let mut parts = Vec::with_capacity(text.len() / max_len + 1);
    let mut start = 0;
    let mut units = 0;

    for (idx, c) in text.char_indices() {
        let width = c.len_utf16();
        if units > 0 && units + width > max_len {
            parts.push(&text[start..idx]);
            start = idx;
            units = 0;
        }
        units += width;
    }

    if start < text.len() || parts.is_empty() {
        parts.push(&text[start..]);
    }
    parts
}

/// Outcome of feeding one envelope to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// More parts are needed.
    Pending { received: usize, total: usize },
    /// All parts arrived; the joined message text.
    Complete(String),
    /// The envelope declared an impossible total and was dropped.
    Rejected,
}

/// Accumulates envelope parts until a message is complete.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    buffers: HashMap<(OriginId, usize), Vec<String>>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one part. Returns the full text when it completes a message;
    /// the buffer for that message is cleared in the same step.
    pub fn push(&mut self, envelope: Envelope) -> Reassembly {
        let Envelope {
            author,
            part,
            total,
            message_part,
            ..
        } = envelope;

        if total == 0 || part >= total {
            log::warn!("Rejecting part {part} of {total} from '{author}'");
            return Reassembly::Rejected;
        }

        // Senders write part 0 first, so leftovers belong to unfinished messages.
        if part == 0 {
            self.evict(&author);
        }
        let key = (author, total);
        let buffer = self.buffers.entry(key.clone()).or_default();
        buffer.push(message_part);

        if buffer.len() < total {
            return Reassembly::Pending {
                received: buffer.len(),
                total,
            };
        }

        let parts = self.buffers.remove(&key).unwrap_or_default();
        Reassembly::Complete(parts.concat())
    }

    fn evict(&mut self, author: &OriginId) {
        let mut stale = 0;
        self.buffers.retain(|(owner, _), parts| {
            if owner == author {
                stale += parts.len();
                false
            } else {
                true
            }
        });
        if stale > 0 {
            log::warn!("Discarding {stale} stale parts from '{author}'");
        }
    }

    /// Number of messages with parts still outstanding.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }

    /// Drop every partial message.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
