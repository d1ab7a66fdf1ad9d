// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `cron_*`/`reminder_*` tool family (spec.md §4.3 table, §4.7): the
//! model-facing surface over `sven_scheduler::CronScheduler`.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sven_scheduler::{CronScheduler, JobPatch, Schedule, SessionTarget};

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

fn parse_schedule(v: &Value) -> Result<Schedule, String> {
    let kind = v.get("kind").and_then(|k| k.as_str()).ok_or("schedule.kind is required")?;
    match kind {
        "at" => {
            let at_ms = v.get("at_ms").and_then(|x| x.as_i64()).ok_or("schedule.at_ms is required")?;
            Ok(Schedule::At { at_ms })
        }
        "every" => {
            let interval_ms = v
                .get("interval_ms")
                .and_then(|x| x.as_i64())
                .ok_or("schedule.interval_ms is required")?;
            let anchor_ms = v.get("anchor_ms").and_then(|x| x.as_i64());
            Ok(Schedule::Every { interval_ms, anchor_ms })
        }
        "cron" => {
            let expr = v
                .get("expr")
                .and_then(|x| x.as_str())
                .ok_or("schedule.expr is required")?
                .to_string();
            let tz = v.get("tz").and_then(|x| x.as_str()).unwrap_or("UTC").to_string();
            Ok(Schedule::Cron { expr, tz })
        }
        other => Err(format!("unknown schedule kind '{other}'")),
    }
}

fn parse_target(v: &Value) -> Option<SessionTarget> {
    Some(SessionTarget {
        channel: v.get("channel")?.as_str()?.to_string(),
        chat_id: v.get("chat_id")?.as_str()?.to_string(),
    })
}

pub struct CronCreateTool {
    pub scheduler: Arc<CronScheduler>,
}

#[async_trait]
impl Tool for CronCreateTool {
    fn name(&self) -> &str {
        "cron_create"
    }
    fn description(&self) -> &str {
        "Create a persistent time-triggered job. 'schedule' is one of \
         {kind:\"at\", at_ms}, {kind:\"every\", interval_ms, anchor_ms?}, or \
         {kind:\"cron\", expr, tz?}. 'session_target' is {channel, chat_id}."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "schedule": { "type": "object" },
                "payload": { "type": "string" },
                "session_target": { "type": "object" }
            },
            "required": ["schedule", "payload", "session_target"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(schedule_v) = call.args.get("schedule") else {
            return ToolOutput::err(&call.id, "missing 'schedule' argument");
        };
        let schedule = match parse_schedule(schedule_v) {
            Ok(s) => s,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        let payload = match call.args.get("payload").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'payload' argument"),
        };
        let Some(target) = call.args.get("session_target").and_then(parse_target) else {
            return ToolOutput::err(&call.id, "missing or invalid 'session_target'");
        };
        let name = call.args.get("name").and_then(|v| v.as_str()).map(str::to_string);
        match self.scheduler.create_job(name, schedule, payload, target).await {
            Ok(job) => ToolOutput::ok(&call.id, serde_json::to_string(&job).unwrap_or_default()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct CronListTool {
    pub scheduler: Arc<CronScheduler>,
}

#[async_trait]
impl Tool for CronListTool {
    fn name(&self) -> &str {
        "cron_list"
    }
    fn description(&self) -> &str {
        "List all cron jobs, ascending by creation time."
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let jobs = self.scheduler.list_jobs().await;
        ToolOutput::ok(&call.id, serde_json::to_string(&jobs).unwrap_or_default())
    }
}

pub struct CronUpdateTool {
    pub scheduler: Arc<CronScheduler>,
}

#[async_trait]
impl Tool for CronUpdateTool {
    fn name(&self) -> &str {
        "cron_update"
    }
    fn description(&self) -> &str {
        "Patch an existing cron job's name/schedule/payload/enabled fields by id."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "name": { "type": "string" },
                "schedule": { "type": "object" },
                "payload": { "type": "string" },
                "enabled": { "type": "boolean" }
            },
            "required": ["id"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match call.args.get("id").and_then(|v| v.as_str()) {
            Some(i) => i,
            None => return ToolOutput::err(&call.id, "missing 'id' argument"),
        };
        let schedule = match call.args.get("schedule") {
            Some(v) => match parse_schedule(v) {
                Ok(s) => Some(s),
                Err(e) => return ToolOutput::err(&call.id, e),
            },
            None => None,
        };
        let patch = JobPatch {
            name: call.args.get("name").and_then(|v| v.as_str()).map(str::to_string),
            schedule,
            payload: call.args.get("payload").and_then(|v| v.as_str()).map(str::to_string),
            enabled: call.args.get("enabled").and_then(|v| v.as_bool()),
        };
        match self.scheduler.update_job(id, patch).await {
            Ok(Some(job)) => ToolOutput::ok(&call.id, serde_json::to_string(&job).unwrap_or_default()),
            Ok(None) => ToolOutput::err(&call.id, format!("no cron job with id '{id}'")),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct CronRemoveTool {
    pub scheduler: Arc<CronScheduler>,
}

#[async_trait]
impl Tool for CronRemoveTool {
    fn name(&self) -> &str {
        "cron_remove"
    }
    fn description(&self) -> &str {
        "Remove a cron job by id. Returns false if it did not exist."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match call.args.get("id").and_then(|v| v.as_str()) {
            Some(i) => i,
            None => return ToolOutput::err(&call.id, "missing 'id' argument"),
        };
        match self.scheduler.remove_job(id).await {
            Ok(removed) => ToolOutput::ok(&call.id, json!({"removed": removed}).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct CronRunTool {
    pub scheduler: Arc<CronScheduler>,
}

#[async_trait]
impl Tool for CronRunTool {
    fn name(&self) -> &str {
        "cron_run"
    }
    fn description(&self) -> &str {
        "Fire a cron job immediately, bypassing its schedule. Returns false if unknown."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match call.args.get("id").and_then(|v| v.as_str()) {
            Some(i) => i,
            None => return ToolOutput::err(&call.id, "missing 'id' argument"),
        };
        match self.scheduler.run_job(id).await {
            Ok(ran) => ToolOutput::ok(&call.id, json!({"ran": ran}).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct CronRunsTool {
    pub scheduler: Arc<CronScheduler>,
}

#[async_trait]
impl Tool for CronRunsTool {
    fn name(&self) -> &str {
        "cron_runs"
    }
    fn description(&self) -> &str {
        "List a cron job's run history, most recent first, optionally limited to 'limit' entries."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["id"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match call.args.get("id").and_then(|v| v.as_str()) {
            Some(i) => i,
            None => return ToolOutput::err(&call.id, "missing 'id' argument"),
        };
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);
        match self.scheduler.get_job_runs(id, limit).await {
            Ok(runs) => ToolOutput::ok(&call.id, serde_json::to_string(&runs).unwrap_or_default()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct ReminderSetTool {
    pub scheduler: Arc<CronScheduler>,
}

#[async_trait]
impl Tool for ReminderSetTool {
    fn name(&self) -> &str {
        "reminder_set"
    }
    fn description(&self) -> &str {
        "Set a one-shot reminder that fires at 'trigger_at_ms' in the given channel/target."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "trigger_at_ms": { "type": "integer" },
                "channel": { "type": "string" },
                "session_target": { "type": "object" }
            },
            "required": ["text", "trigger_at_ms", "session_target"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let text = match call.args.get("text").and_then(|v| v.as_str()) {
            Some(t) => t.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'text' argument"),
        };
        let trigger_at_ms = match call.args.get("trigger_at_ms").and_then(|v| v.as_i64()) {
            Some(t) => t,
            None => return ToolOutput::err(&call.id, "missing 'trigger_at_ms' argument"),
        };
        let Some(target) = call.args.get("session_target").and_then(parse_target) else {
            return ToolOutput::err(&call.id, "missing or invalid 'session_target'");
        };
        let channel = call
            .args
            .get("channel")
            .and_then(|v| v.as_str())
            .unwrap_or(target.channel.as_str())
            .to_string();
        match self.scheduler.set_reminder(text, trigger_at_ms, channel, target).await {
            Ok(reminder) => ToolOutput::ok(&call.id, serde_json::to_string(&reminder).unwrap_or_default()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct ReminderListTool {
    pub scheduler: Arc<CronScheduler>,
}

#[async_trait]
impl Tool for ReminderListTool {
    fn name(&self) -> &str {
        "reminder_list"
    }
    fn description(&self) -> &str {
        "List reminders, ascending by trigger time. 'include_fired' defaults to false."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "include_fired": { "type": "boolean" } },
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let include_fired = call.args.get("include_fired").and_then(|v| v.as_bool()).unwrap_or(false);
        let reminders = self.scheduler.list_reminders(include_fired).await;
        ToolOutput::ok(&call.id, serde_json::to_string(&reminders).unwrap_or_default())
    }
}

pub struct ReminderCancelTool {
    pub scheduler: Arc<CronScheduler>,
}

#[async_trait]
impl Tool for ReminderCancelTool {
    fn name(&self) -> &str {
        "reminder_cancel"
    }
    fn description(&self) -> &str {
        "Cancel a pending reminder by id. Returns false if it did not exist."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match call.args.get("id").and_then(|v| v.as_str()) {
            Some(i) => i,
            None => return ToolOutput::err(&call.id, "missing 'id' argument"),
        };
        match self.scheduler.cancel_reminder(id).await {
            Ok(cancelled) => ToolOutput::ok(&call.id, json!({"cancelled": cancelled}).to_string()),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use sven_scheduler::JobSink;

    use super::*;

    struct NoopSink;
    #[async_trait]
    impl JobSink for NoopSink {
        async fn fire(&self, _target: &SessionTarget, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "c1".into(), name: name.into(), args }
    }

    #[tokio::test]
    async fn create_then_list_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = CronScheduler::new(dir.path(), Arc::new(NoopSink)).unwrap();
        let create = CronCreateTool { scheduler: scheduler.clone() };
        let out = create
            .execute(&call(
                "cron_create",
                json!({
                    "schedule": {"kind": "every", "interval_ms": 60000},
                    "payload": "ping",
                    "session_target": {"channel": "console", "chat_id": "local"}
                }),
            ))
            .await;
        assert!(!out.is_error);

        let list = CronListTool { scheduler };
        let listed = list.execute(&call("cron_list", json!({}))).await;
        assert!(listed.content.contains("ping"));
    }

    #[tokio::test]
    async fn create_rejects_unknown_schedule_kind() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = CronScheduler::new(dir.path(), Arc::new(NoopSink)).unwrap();
        let create = CronCreateTool { scheduler };
        let out = create
            .execute(&call(
                "cron_create",
                json!({
                    "schedule": {"kind": "weird"},
                    "payload": "ping",
                    "session_target": {"channel": "console", "chat_id": "local"}
                }),
            ))
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn reminder_set_then_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = CronScheduler::new(dir.path(), Arc::new(NoopSink)).unwrap();
        let set = ReminderSetTool { scheduler: scheduler.clone() };
        let out = set
            .execute(&call(
                "reminder_set",
                json!({
                    "text": "stand up",
                    "trigger_at_ms": 9999999999_i64,
                    "session_target": {"channel": "console", "chat_id": "local"}
                }),
            ))
            .await;
        assert!(!out.is_error);
        let v: Value = serde_json::from_str(&out.content).unwrap();
        let id = v["id"].as_str().unwrap().to_string();

        let cancel = ReminderCancelTool { scheduler };
        let cancelled = cancel.execute(&call("reminder_cancel", json!({"id": id}))).await;
        assert!(cancelled.content.contains("true"));
    }
}
