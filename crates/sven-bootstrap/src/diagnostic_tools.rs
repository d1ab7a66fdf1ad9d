// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `diagnostic_*` tool family (spec.md §4.3 table, §4.1): the model-facing
//! surface over `sven_core::diagnostic::DiagnosticBus`.
//!
//! Lives here rather than in `sven-tools` because `sven-core` already
//! depends on `sven-tools` for the `Tool`/`ToolRegistry` types; a tool
//! wrapping `DiagnosticBus` inside `sven-tools` would create a cycle.
//! `sven-bootstrap` already depends on both crates, so this is the natural
//! home — grounded on `sven-tools::builtin::update_memory`'s thin-wrapper
//! shape, generalized to the bus's query/stats/emit surface.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sven_core::diagnostic::{DiagnosticBus, EventFilter, EventKind, Outcome};
use sven_tools::policy::ApprovalPolicy;
use sven_tools::{Tool, ToolCall, ToolOutput};

fn parse_outcome(s: &str) -> Option<Outcome> {
    match s {
        "completed" => Some(Outcome::Completed),
        "skipped" => Some(Outcome::Skipped),
        "error" => Some(Outcome::Error),
        _ => None,
    }
}

/// Emit an arbitrary diagnostic event on behalf of the model — used for
/// webhook/cron adapters the model itself drives, or to annotate a session
/// with a custom state transition.
pub struct DiagnosticEmitTool {
    pub bus: Arc<DiagnosticBus>,
}

#[async_trait]
impl Tool for DiagnosticEmitTool {
    fn name(&self) -> &str {
        "diagnostic_emit"
    }
    fn description(&self) -> &str {
        "Emit a diagnostic event. 'kind' is one of message_queued, session_state, \
         webhook_received, webhook_processed, webhook_error. Fields depend on kind: \
         session_key, outcome (completed|skipped|error), reason, prev_state, state, \
         channel, duration_ms, message."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "kind": {
                    "type": "string",
                    "enum": ["message_queued", "session_state", "webhook_received", "webhook_processed", "webhook_error"]
                },
                "session_key": { "type": "string" },
                "outcome": { "type": "string", "enum": ["completed", "skipped", "error"] },
                "reason": { "type": "string" },
                "prev_state": { "type": "string" },
                "state": { "type": "string" },
                "channel": { "type": "string" },
                "duration_ms": { "type": "integer" },
                "message": { "type": "string" }
            },
            "required": ["kind"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let kind_name = match call.args.get("kind").and_then(|v| v.as_str()) {
            Some(k) => k,
            None => return ToolOutput::err(&call.id, "missing 'kind' argument"),
        };
        let str_field = |name: &str| call.args.get(name).and_then(|v| v.as_str()).map(str::to_string);
        let channel = str_field("channel");

        let kind = match kind_name {
            "message_queued" => {
                let Some(session_key) = str_field("session_key") else {
                    return ToolOutput::err(&call.id, "missing 'session_key' argument");
                };
                let outcome = match call.args.get("outcome").and_then(|v| v.as_str()).and_then(parse_outcome) {
                    Some(o) => o,
                    None => return ToolOutput::err(&call.id, "missing or invalid 'outcome' argument"),
                };
                EventKind::MessageQueued { session_key, outcome, reason: str_field("reason") }
            }
            "session_state" => {
                let (Some(session_key), Some(prev_state), Some(state)) =
                    (str_field("session_key"), str_field("prev_state"), str_field("state"))
                else {
                    return ToolOutput::err(&call.id, "session_state requires session_key, prev_state, state");
                };
                EventKind::SessionState { session_key, prev_state, state }
            }
            "webhook_received" => {
                let Some(ch) = channel.clone() else {
                    return ToolOutput::err(&call.id, "missing 'channel' argument");
                };
                EventKind::WebhookReceived { channel: ch }
            }
            "webhook_processed" => {
                let Some(ch) = channel.clone() else {
                    return ToolOutput::err(&call.id, "missing 'channel' argument");
                };
                let duration_ms = call.args.get("duration_ms").and_then(|v| v.as_u64()).unwrap_or(0);
                EventKind::WebhookProcessed { channel: ch, duration_ms }
            }
            "webhook_error" => {
                let (Some(ch), Some(message)) = (channel.clone(), str_field("message")) else {
                    return ToolOutput::err(&call.id, "webhook_error requires channel and message");
                };
                EventKind::WebhookError { channel: ch, message }
            }
            other => return ToolOutput::err(&call.id, format!("unsupported kind '{other}'")),
        };

        let event = self.bus.emit(kind, channel);
        ToolOutput::ok(&call.id, serde_json::to_string(&event).unwrap_or_default())
    }
}

/// Query the event ring with optional filters.
pub struct DiagnosticQueryTool {
    pub bus: Arc<DiagnosticBus>,
}

#[async_trait]
impl Tool for DiagnosticQueryTool {
    fn name(&self) -> &str {
        "diagnostic_query"
    }
    fn description(&self) -> &str {
        "Query recent diagnostic events. Optional filters: types (array of event type \
         strings like \"tool.call\"), session_key, channel, since_ts, until_ts, \
         errors_only, limit."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "types": { "type": "array", "items": { "type": "string" } },
                "session_key": { "type": "string" },
                "channel": { "type": "string" },
                "since_ts": { "type": "integer" },
                "until_ts": { "type": "integer" },
                "errors_only": { "type": "boolean" },
                "limit": { "type": "integer" }
            },
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        const KNOWN_TYPES: &[&str] = &[
            "model.usage",
            "tool.call",
            "error",
            "session.state",
            "message.processed",
            "message.queued",
            "session.stuck",
            "queue.lane.enqueue",
            "queue.lane.dequeue",
            "run.attempt",
            "diagnostic.heartbeat",
            "webhook.received",
            "webhook.processed",
            "webhook.error",
        ];
        let types = call.args.get("types").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .filter_map(|s| KNOWN_TYPES.iter().find(|k| **k == s).copied())
                .collect()
        });
        let filter = EventFilter {
            types,
            session_key: call.args.get("session_key").and_then(|v| v.as_str()).map(str::to_string),
            channel: call.args.get("channel").and_then(|v| v.as_str()).map(str::to_string),
            since_ts: call.args.get("since_ts").and_then(|v| v.as_i64()),
            until_ts: call.args.get("until_ts").and_then(|v| v.as_i64()),
            errors_only: call.args.get("errors_only").and_then(|v| v.as_bool()).unwrap_or(false),
            limit: call.args.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize),
        };
        let result = self.bus.query(&filter);
        ToolOutput::ok(
            &call.id,
            json!({
                "events": result.events,
                "total": result.total,
                "has_more": result.has_more,
            })
            .to_string(),
        )
    }
}

/// Per-event-type aggregate counts.
pub struct DiagnosticStatsTool {
    pub bus: Arc<DiagnosticBus>,
}

#[async_trait]
impl Tool for DiagnosticStatsTool {
    fn name(&self) -> &str {
        "diagnostic_stats"
    }
    fn description(&self) -> &str {
        "Return aggregate counts (count, first/last timestamp, error count) per event type."
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let stats = self.bus.stats();
        let payload: Vec<Value> = stats
            .into_iter()
            .map(|s| {
                json!({
                    "type_name": s.type_name,
                    "count": s.count,
                    "first_ts": s.first_ts,
                    "last_ts": s.last_ts,
                    "error_count": s.error_count,
                })
            })
            .collect();
        ToolOutput::ok(&call.id, json!(payload).to_string())
    }
}

/// Recent error events plus whether the bus is currently enabled.
pub struct DiagnosticStatusTool {
    pub bus: Arc<DiagnosticBus>,
}

#[async_trait]
impl Tool for DiagnosticStatusTool {
    fn name(&self) -> &str {
        "diagnostic_status"
    }
    fn description(&self) -> &str {
        "Return the most recent error events (up to 'limit', default 20)."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "limit": { "type": "integer" } },
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).unwrap_or(20) as usize;
        let errors = self.bus.recent_errors(limit);
        ToolOutput::ok(&call.id, serde_json::to_string(&errors).unwrap_or_default())
    }
}

/// Human-readable rollup combining stats + recent errors — the tool-facing
/// equivalent of a CLI `/diagnostics` summary.
pub struct DiagnosticReportTool {
    pub bus: Arc<DiagnosticBus>,
}

#[async_trait]
impl Tool for DiagnosticReportTool {
    fn name(&self) -> &str {
        "diagnostic_report"
    }
    fn description(&self) -> &str {
        "Generate a human-readable summary of event-type counts and the 5 most recent errors."
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let stats = self.bus.stats();
        let mut lines = Vec::new();
        for s in &stats {
            lines.push(format!("{}: {} events ({} errors)", s.type_name, s.count, s.error_count));
        }
        let errors = self.bus.recent_errors(5);
        if !errors.is_empty() {
            lines.push(String::new());
            lines.push("recent errors:".to_string());
            for e in &errors {
                lines.push(format!("  seq={} ts={} {:?}", e.seq, e.ts, e.kind));
            }
        }
        if lines.is_empty() {
            lines.push("no diagnostic events recorded".to_string());
        }
        ToolOutput::ok(&call.id, lines.join("\n"))
    }
}
