// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bounded, queryable ring of structured diagnostic events.
//!
//! Every component in the runtime (scheduler, registry, router, cron) emits
//! through a shared [`DiagnosticBus`] rather than writing to its own log —
//! this is the one place a CLI `/analyze` or `/stats` surface can query
//! across the whole process.
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default cap on stored events before oldest entries are dropped.
pub const DEFAULT_MAX_EVENTS: usize = 10_000;
/// Default retention window in milliseconds (24h).
pub const DEFAULT_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Outcome tag shared by a few event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Skipped,
    Error,
}

/// Tagged diagnostic event payloads (spec.md §4.1 event-type list).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ModelUsage {
        session_key: String,
        input_tokens: u32,
        output_tokens: u32,
        cache_read: u32,
        cache_write: u32,
    },
    ToolCall {
        session_key: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
    },
    Error {
        session_key: Option<String>,
        message: String,
    },
    SessionState {
        session_key: String,
        prev_state: String,
        state: String,
    },
    MessageProcessed {
        session_key: String,
        outcome: Outcome,
        duration_ms: u64,
        reason: Option<String>,
    },
    MessageQueued {
        session_key: String,
        outcome: Outcome,
        reason: Option<String>,
    },
    SessionStuck {
        session_key: String,
        running_ms: u64,
    },
    QueueLaneEnqueue {
        session_key: String,
        depth: usize,
    },
    QueueLaneDequeue {
        session_key: String,
        depth: usize,
    },
    RunAttempt {
        session_key: String,
        attempt: u32,
    },
    DiagnosticHeartbeat,
    WebhookReceived {
        channel: String,
    },
    WebhookProcessed {
        channel: String,
        duration_ms: u64,
    },
    WebhookError {
        channel: String,
        message: String,
    },
}

impl EventKind {
    fn type_name(&self) -> &'static str {
        match self {
            EventKind::ModelUsage { .. } => "model.usage",
            EventKind::ToolCall { .. } => "tool.call",
            EventKind::Error { .. } => "error",
            EventKind::SessionState { .. } => "session.state",
            EventKind::MessageProcessed { .. } => "message.processed",
            EventKind::MessageQueued { .. } => "message.queued",
            EventKind::SessionStuck { .. } => "session.stuck",
            EventKind::QueueLaneEnqueue { .. } => "queue.lane.enqueue",
            EventKind::QueueLaneDequeue { .. } => "queue.lane.dequeue",
            EventKind::RunAttempt { .. } => "run.attempt",
            EventKind::DiagnosticHeartbeat => "diagnostic.heartbeat",
            EventKind::WebhookReceived { .. } => "webhook.received",
            EventKind::WebhookProcessed { .. } => "webhook.processed",
            EventKind::WebhookError { .. } => "webhook.error",
        }
    }

    fn is_error(&self) -> bool {
        matches!(
            self,
            EventKind::Error { .. }
                | EventKind::WebhookError { .. }
                | EventKind::MessageProcessed { outcome: Outcome::Error, .. }
        )
    }

    fn session_key(&self) -> Option<&str> {
        match self {
            EventKind::ModelUsage { session_key, .. }
            | EventKind::ToolCall { session_key, .. }
            | EventKind::SessionState { session_key, .. }
            | EventKind::MessageProcessed { session_key, .. }
            | EventKind::MessageQueued { session_key, .. }
            | EventKind::SessionStuck { session_key, .. }
            | EventKind::QueueLaneEnqueue { session_key, .. }
            | EventKind::QueueLaneDequeue { session_key, .. }
            | EventKind::RunAttempt { session_key, .. } => Some(session_key),
            EventKind::Error { session_key, .. } => session_key.as_deref(),
            _ => None,
        }
    }
}

/// A stamped, stored diagnostic event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    pub seq: u64,
    pub ts: i64,
    pub channel: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Criteria for [`DiagnosticBus::query`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub types: Option<Vec<&'static str>>,
    pub session_key: Option<String>,
    pub channel: Option<String>,
    pub since_ts: Option<i64>,
    pub until_ts: Option<i64>,
    pub errors_only: bool,
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(&self, ev: &DiagnosticEvent) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&ev.kind.type_name()) {
                return false;
            }
        }
        if let Some(key) = &self.session_key {
            if ev.kind.session_key() != Some(key.as_str()) {
                return false;
            }
        }
        if let Some(channel) = &self.channel {
            if ev.channel.as_deref() != Some(channel.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since_ts {
            if ev.ts < since {
                return false;
            }
        }
        if let Some(until) = self.until_ts {
            if ev.ts > until {
                return false;
            }
        }
        if self.errors_only && !ev.kind.is_error() {
            return false;
        }
        true
    }
}

/// Query result envelope.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub events: Vec<DiagnosticEvent>,
    pub total: usize,
    pub has_more: bool,
}

/// Aggregate counts for one event type, returned by [`DiagnosticBus::stats`].
#[derive(Debug, Clone)]
pub struct EventTypeStats {
    pub type_name: &'static str,
    pub count: usize,
    pub first_ts: i64,
    pub last_ts: i64,
    pub error_count: usize,
}

struct Inner {
    events: VecDeque<DiagnosticEvent>,
    next_seq: u64,
    enabled: bool,
    max_events: usize,
    retention_ms: i64,
}

/// Bounded, subscribable, queryable event ring. Cheap to clone (the sender
/// half of the broadcast channel and the event store are both shared).
pub struct DiagnosticBus {
    inner: Mutex<Inner>,
    tx: broadcast::Sender<DiagnosticEvent>,
}

impl DiagnosticBus {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_EVENTS, DEFAULT_RETENTION_MS)
    }

    pub fn with_limits(max_events: usize, retention_ms: i64) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                next_seq: 1,
                enabled: true,
                max_events,
                retention_ms,
            }),
            tx,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().unwrap().enabled = enabled;
    }

    /// Stamp and store `kind`; returns the stamped event whether or not the
    /// bus is currently enabled (a disabled bus still hands the caller a
    /// consistent event, it just doesn't retain or broadcast it).
    pub fn emit(&self, kind: EventKind, channel: Option<String>) -> DiagnosticEvent {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let event = DiagnosticEvent { seq, ts: now_ms(), channel, kind };

        if event.kind.is_error() {
            tracing::error!(seq = event.seq, kind = event.kind.type_name(), "diagnostic event");
        } else {
            tracing::debug!(seq = event.seq, kind = event.kind.type_name(), "diagnostic event");
        }

        if !inner.enabled {
            return event;
        }

        inner.events.push_back(event.clone());
        Self::prune(&mut inner);

        // broadcast::Sender::send is infallible from the producer's point of
        // view: Err only means there are no receivers, which is fine.
        let _ = self.tx.send(event.clone());

        event
    }

    fn prune(inner: &mut Inner) {
        while inner.events.len() > inner.max_events {
            inner.events.pop_front();
        }
        let cutoff = now_ms() - inner.retention_ms;
        while inner.events.front().map(|e| e.ts < cutoff).unwrap_or(false) {
            inner.events.pop_front();
        }
    }

    /// Subscribe to the live event stream. A lagging subscriber misses
    /// events rather than blocking the producer (tokio broadcast semantics).
    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.tx.subscribe()
    }

    pub fn query(&self, filter: &EventFilter) -> QueryResult {
        let inner = self.inner.lock().unwrap();
        let matched: Vec<&DiagnosticEvent> =
            inner.events.iter().filter(|e| filter.matches(e)).collect();
        let total = matched.len();
        let limit = filter.limit.unwrap_or(total);
        let events: Vec<DiagnosticEvent> = matched.into_iter().rev().take(limit).rev().cloned().collect();
        let has_more = events.len() < total;
        QueryResult { events, total, has_more }
    }

    pub fn stats(&self) -> Vec<EventTypeStats> {
        use std::collections::HashMap;
        let inner = self.inner.lock().unwrap();
        let mut agg: HashMap<&'static str, EventTypeStats> = HashMap::new();
        for ev in inner.events.iter() {
            let entry = agg.entry(ev.kind.type_name()).or_insert_with(|| EventTypeStats {
                type_name: ev.kind.type_name(),
                count: 0,
                first_ts: ev.ts,
                last_ts: ev.ts,
                error_count: 0,
            });
            entry.count += 1;
            entry.first_ts = entry.first_ts.min(ev.ts);
            entry.last_ts = entry.last_ts.max(ev.ts);
            if ev.kind.is_error() {
                entry.error_count += 1;
            }
        }
        let mut out: Vec<EventTypeStats> = agg.into_values().collect();
        out.sort_by_key(|s| s.type_name);
        out
    }

    pub fn recent_errors(&self, n: usize) -> Vec<DiagnosticEvent> {
        let inner = self.inner.lock().unwrap();
        inner
            .events
            .iter()
            .rev()
            .filter(|e| e.kind.is_error())
            .take(n)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.events.clear();
    }
}

impl Default for DiagnosticBus {
    fn default() -> Self {
        Self::new()
    }
}
