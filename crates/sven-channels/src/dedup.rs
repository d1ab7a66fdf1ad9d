// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! TTL-guarded message-key dedup index (spec.md §3 `DedupEntry`, §4.8).
//!
//! Invariant: `processing ⊆ processed`. A key is added to both on
//! `acquire`, removed from `processing` on `release`, and removed from
//! `processed` only after it ages out of the TTL window (best-effort —
//! not durable across process restarts, spec.md §1 Non-goals).
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::message::MessageContext;

/// Default TTL a dedup key is remembered for after being released.
pub const DEFAULT_TTL_MS: i64 = 60_000;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Compute the dedup key for a message: the transport's `message_id` when
/// present, otherwise a stable hash of `(channel, chat_id, text, timestamp)`.
///
/// spec.md §4.8 leaves the synthesized-hash choice to the implementer; we
/// use SHA-256 over a delimiter-joined tuple rather than language-default
/// hashing so the key is stable across process restarts and platforms.
pub fn dedup_key(ctx: &MessageContext) -> String {
    if let Some(id) = &ctx.message_id {
        if !id.is_empty() {
            return format!("{}:{}:{}", ctx.channel, ctx.chat_id, id);
        }
    }
    let mut hasher = Sha256::new();
    hasher.update(ctx.channel.as_bytes());
    hasher.update(b"\0");
    hasher.update(ctx.chat_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(ctx.text.as_bytes());
    hasher.update(b"\0");
    hasher.update(ctx.timestamp.to_le_bytes());
    format!("{}:{}:synth:{:x}", ctx.channel, ctx.chat_id, hasher.finalize())
}

struct Inner {
    /// key → time it was added to `processed`.
    processed: HashMap<String, i64>,
    processing: HashSet<String>,
}

/// Shared, mutex-guarded dedup index. Reads are cheap; mutations are
/// serialized — see spec.md §5 "Dedup index: shared; mutations under a
/// mutex; reads are cheap."
pub struct DedupIndex {
    inner: Mutex<Inner>,
    ttl_ms: i64,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL_MS)
    }

    pub fn with_ttl(ttl_ms: i64) -> Self {
        Self {
            inner: Mutex::new(Inner { processed: HashMap::new(), processing: HashSet::new() }),
            ttl_ms,
        }
    }

    /// Try to acquire the processing lock for `key`. Returns `false` if the
    /// key has already been seen (either currently processing or processed
    /// within the TTL window) — the caller should treat this as a duplicate
    /// and skip the message.
    pub fn acquire(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.processed.contains_key(key) {
            return false;
        }
        inner.processed.insert(key.to_string(), now_ms());
        inner.processing.insert(key.to_string());
        true
    }

    /// Release the processing lock for `key`. The key remains in `processed`
    /// until it ages out of the TTL window.
    pub fn release(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.processing.remove(key);
    }

    pub fn is_processing(&self, key: &str) -> bool {
        self.inner.lock().unwrap().processing.contains(key)
    }

    pub fn is_processed(&self, key: &str) -> bool {
        self.inner.lock().unwrap().processed.contains_key(key)
    }

    /// Drop `processed` entries older than the TTL. Intended to run on a
    /// periodic background tick (spec.md §3 "removed from `processed` after
    /// a TTL ... by periodic cleanup").
    pub fn cleanup(&self) {
        let cutoff = now_ms() - self.ttl_ms;
        let mut inner = self.inner.lock().unwrap();
        inner.processed.retain(|_, t| *t >= cutoff);
    }

    #[cfg(test)]
    fn processed_len(&self) -> usize {
        self.inner.lock().unwrap().processed.len()
    }
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new()
    }
}
