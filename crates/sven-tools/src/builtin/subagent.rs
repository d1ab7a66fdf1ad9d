// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `subagent_*` tool family (spec.md §4.3 table, §4.6): the model-facing
//! surface over [`crate::supervisor::SubAgentSupervisor`].
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::policy::ApprovalPolicy;
use crate::supervisor::{CreateParams, SubAgentSupervisor};
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct SubAgentCreateTool {
    pub supervisor: Arc<SubAgentSupervisor>,
    pub work_dir: String,
}

#[async_trait]
impl Tool for SubAgentCreateTool {
    fn name(&self) -> &str {
        "subagent_create"
    }
    fn description(&self) -> &str {
        "Spawn a fresh agent instance in an isolated child process to work on 'task'. \
         Returns immediately with the sub-agent's id and pending status; use \
         subagent_wait to block until it finishes."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "task": { "type": "string" },
                "model": { "type": "string" },
                "timeout_ms": { "type": "integer" },
                "max_lines": { "type": "integer" }
            },
            "required": ["task"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let task = match call.args.get("task").and_then(|v| v.as_str()) {
            Some(t) => t.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'task' argument"),
        };
        let params = CreateParams {
            name: call.args.get("name").and_then(|v| v.as_str()).map(str::to_string),
            task,
            model: call.args.get("model").and_then(|v| v.as_str()).map(str::to_string),
            timeout_ms: call.args.get("timeout_ms").and_then(|v| v.as_u64()).unwrap_or(60_000),
            max_lines: call.args.get("max_lines").and_then(|v| v.as_u64()).unwrap_or(100) as usize,
            work_dir: self.work_dir.clone(),
        };
        let sub_agent = self.supervisor.create(params).await;
        ToolOutput::ok(&call.id, serde_json::to_string(&sub_agent).unwrap_or_default())
    }
}

pub struct SubAgentWaitTool {
    pub supervisor: Arc<SubAgentSupervisor>,
}

#[async_trait]
impl Tool for SubAgentWaitTool {
    fn name(&self) -> &str {
        "subagent_wait"
    }
    fn description(&self) -> &str {
        "Block until the given sub-agent reaches a terminal status, or until \
         'timeout_ms' elapses (returns the sub-agent's current state in that case)."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "timeout_ms": { "type": "integer" }
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
        let timeout_ms = call.args.get("timeout_ms").and_then(|v| v.as_u64());
        match self.supervisor.wait_for(id, timeout_ms).await {
            Some(sub_agent) => ToolOutput::ok(&call.id, serde_json::to_string(&sub_agent).unwrap_or_default()),
            None => ToolOutput::err(&call.id, format!("unknown sub-agent id '{id}'")),
        }
    }
}

pub struct SubAgentStopTool {
    pub supervisor: Arc<SubAgentSupervisor>,
}

#[async_trait]
impl Tool for SubAgentStopTool {
    fn name(&self) -> &str {
        "subagent_stop"
    }
    fn description(&self) -> &str {
        "Request early termination of a running sub-agent. Returns false if it was \
         already terminal or unknown."
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
        let stopped = self.supervisor.stop(id).await;
        ToolOutput::ok(&call.id, json!({"stopped": stopped}).to_string())
    }
}

pub struct SubAgentListTool {
    pub supervisor: Arc<SubAgentSupervisor>,
}

#[async_trait]
impl Tool for SubAgentListTool {
    fn name(&self) -> &str {
        "subagent_list"
    }
    fn description(&self) -> &str {
        "List tracked sub-agents, optionally filtered by a substring of their name."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "name_filter": { "type": "string" } },
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let filter = call.args.get("name_filter").and_then(|v| v.as_str());
        let list = self.supervisor.list(filter).await;
        ToolOutput::ok(&call.id, serde_json::to_string(&list).unwrap_or_default())
    }
}

pub struct SubAgentStatusTool {
    pub supervisor: Arc<SubAgentSupervisor>,
}

#[async_trait]
impl Tool for SubAgentStatusTool {
    fn name(&self) -> &str {
        "subagent_status"
    }
    fn description(&self) -> &str {
        "Get the current state of a single sub-agent by id."
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
        match self.supervisor.status(id).await {
            Some(sub_agent) => ToolOutput::ok(&call.id, serde_json::to_string(&sub_agent).unwrap_or_default()),
            None => ToolOutput::err(&call.id, format!("unknown sub-agent id '{id}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::sync::Arc;

    use super::*;
    use crate::supervisor::{CreateParams, SubAgentSpawner};
    use std::process::Stdio;
    use tokio::process::Command;

    struct EchoSpawner;
    impl SubAgentSpawner for EchoSpawner {
        fn build_command(&self, params: &CreateParams) -> Command {
            let mut cmd = Command::new("bash");
            cmd.arg("-c").arg(format!("echo {}", params.task));
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            cmd.kill_on_drop(true);
            cmd
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "s1".into(), name: name.into(), args }
    }

    #[tokio::test]
    async fn create_then_wait_roundtrip() {
        let supervisor = Arc::new(SubAgentSupervisor::with_spawner(Arc::new(EchoSpawner)));
        let create = SubAgentCreateTool { supervisor: supervisor.clone(), work_dir: ".".into() };
        let created = create.execute(&call("subagent_create", json!({"task": "hi"}))).await;
        assert!(!created.is_error);
        let v: Value = serde_json::from_str(&created.content).unwrap();
        let id = v["id"].as_str().unwrap().to_string();

        let wait = SubAgentWaitTool { supervisor: supervisor.clone() };
        let waited = wait.execute(&call("subagent_wait", json!({"id": id, "timeout_ms": 5000}))).await;
        assert!(waited.content.contains("completed"));
    }

    #[tokio::test]
    async fn status_unknown_id_is_error() {
        let supervisor = Arc::new(SubAgentSupervisor::with_spawner(Arc::new(EchoSpawner)));
        let tool = SubAgentStatusTool { supervisor };
        let out = tool.execute(&call("subagent_status", json!({"id": "nope"}))).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn list_returns_created_entries() {
        let supervisor = Arc::new(SubAgentSupervisor::with_spawner(Arc::new(EchoSpawner)));
        let create = SubAgentCreateTool { supervisor: supervisor.clone(), work_dir: ".".into() };
        create.execute(&call("subagent_create", json!({"task": "x"}))).await;
        let list = SubAgentListTool { supervisor };
        let out = list.execute(&call("subagent_list", json!({}))).await;
        assert!(out.content.contains("sa-"));
    }
}
