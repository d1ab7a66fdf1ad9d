// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `approval_*` tool family (spec.md §4.3 table): lets the model inspect
//! and manage its own shell-command allowlist and policy through
//! [`crate::approval::ApprovalEngine`].
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::approval::{ApprovalEngine, AskMode, PolicyPatch, SecurityLevel};
use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

fn parse_security(s: &str) -> Option<SecurityLevel> {
    match s {
        "deny" => Some(SecurityLevel::Deny),
        "allowlist" => Some(SecurityLevel::Allowlist),
        "full" => Some(SecurityLevel::Full),
        _ => None,
    }
}

fn parse_ask(s: &str) -> Option<AskMode> {
    match s {
        "off" => Some(AskMode::Off),
        "on_miss" => Some(AskMode::OnMiss),
        "always" => Some(AskMode::Always),
        _ => None,
    }
}

/// Analyze a command string without deciding — useful for the model to
/// preview how a command would be segmented before running it.
pub struct ApprovalAnalyzeTool {
    pub approval: Arc<ApprovalEngine>,
}

#[async_trait]
impl Tool for ApprovalAnalyzeTool {
    fn name(&self) -> &str {
        "approval_analyze"
    }
    fn description(&self) -> &str {
        "Parse a shell command string into its pipe/connective-separated segments \
         without deciding whether it would be allowed. Useful to preview segmentation."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolOutput::err(&call.id, "missing 'command' argument"),
        };
        let analysis = crate::approval::parse_command(command);
        let segments: Vec<Value> = analysis
            .segments
            .iter()
            .map(|s| json!({"binary": s.binary, "args": s.args, "text": s.text}))
            .collect();
        ToolOutput::ok(&call.id, json!({"segments": segments}).to_string())
    }
}

/// Run the full decision (without executing) — what a `bash` call would
/// resolve to right now.
pub struct ApprovalCheckTool {
    pub approval: Arc<ApprovalEngine>,
}

#[async_trait]
impl Tool for ApprovalCheckTool {
    fn name(&self) -> &str {
        "approval_check"
    }
    fn description(&self) -> &str {
        "Check what decision (allow/ask/deny) the current approval policy would make \
         for a shell command, without running it."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolOutput::err(&call.id, "missing 'command' argument"),
        };
        let result = self.approval.decide(command);
        ToolOutput::ok(
            &call.id,
            json!({
                "decision": format!("{:?}", result.decision).to_lowercase(),
                "reason": result.reason,
                "matched_entries": result.matched_entries.iter().map(|e| &e.pattern).collect::<Vec<_>>(),
            })
            .to_string(),
        )
    }
}

/// CRUD over allowlist entries: `op` is one of `add`/`remove`/`update`/`list`.
pub struct ApprovalAllowlistTool {
    pub approval: Arc<ApprovalEngine>,
}

#[async_trait]
impl Tool for ApprovalAllowlistTool {
    fn name(&self) -> &str {
        "approval_allowlist"
    }
    fn description(&self) -> &str {
        "Manage the shell command allowlist. 'op' is add, remove, update, or list. \
         add/update take 'pattern' (glob with * and ?) and optional 'description'; \
         remove/update take 'id'."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "op": { "type": "string", "enum": ["add", "remove", "update", "list"] },
                "id": { "type": "string" },
                "pattern": { "type": "string" },
                "description": { "type": "string" }
            },
            "required": ["op"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let op = match call.args.get("op").and_then(|v| v.as_str()) {
            Some(o) => o,
            None => return ToolOutput::err(&call.id, "missing 'op' argument"),
        };
        match op {
            "list" => {
                let entries = self.approval.get_allowlist();
                ToolOutput::ok(&call.id, serde_json::to_string(&entries).unwrap_or_default())
            }
            "add" => {
                let pattern = match call.args.get("pattern").and_then(|v| v.as_str()) {
                    Some(p) => p,
                    None => return ToolOutput::err(&call.id, "missing 'pattern' argument"),
                };
                let description = call
                    .args
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                match self.approval.add_allowlist(pattern, description) {
                    Ok(entry) => ToolOutput::ok(&call.id, serde_json::to_string(&entry).unwrap_or_default()),
                    Err(e) => ToolOutput::err(&call.id, e.to_string()),
                }
            }
            "remove" => {
                let id = match call.args.get("id").and_then(|v| v.as_str()) {
                    Some(i) => i,
                    None => return ToolOutput::err(&call.id, "missing 'id' argument"),
                };
                let removed = self.approval.remove_allowlist(id);
                ToolOutput::ok(&call.id, json!({"removed": removed}).to_string())
            }
            "update" => {
                let id = match call.args.get("id").and_then(|v| v.as_str()) {
                    Some(i) => i,
                    None => return ToolOutput::err(&call.id, "missing 'id' argument"),
                };
                let pattern = call.args.get("pattern").and_then(|v| v.as_str()).map(str::to_string);
                let description = call
                    .args
                    .get("description")
                    .map(|v| v.as_str().map(str::to_string));
                match self.approval.update_allowlist(id, pattern, description) {
                    Some(entry) => ToolOutput::ok(&call.id, serde_json::to_string(&entry).unwrap_or_default()),
                    None => ToolOutput::err(&call.id, format!("no allowlist entry with id '{id}'")),
                }
            }
            other => ToolOutput::err(&call.id, format!("unknown op '{other}'")),
        }
    }
}

/// Get or patch the current `security`/`ask`/`ask_fallback`/`auto_allow_skills` policy.
pub struct ApprovalPolicyTool {
    pub approval: Arc<ApprovalEngine>,
}

#[async_trait]
impl Tool for ApprovalPolicyTool {
    fn name(&self) -> &str {
        "approval_policy"
    }
    fn description(&self) -> &str {
        "Get or set the approval policy. With no fields set, returns the current policy. \
         Fields: security (deny|allowlist|full), ask (off|on_miss|always), \
         ask_fallback (deny|allowlist|full), auto_allow_skills (bool)."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "security": { "type": "string", "enum": ["deny", "allowlist", "full"] },
                "ask": { "type": "string", "enum": ["off", "on_miss", "always"] },
                "ask_fallback": { "type": "string", "enum": ["deny", "allowlist", "full"] },
                "auto_allow_skills": { "type": "boolean" }
            },
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let has_patch = call.args.as_object().map(|o| !o.is_empty()).unwrap_or(false);
        if has_patch {
            let mut patch = PolicyPatch::default();
            if let Some(s) = call.args.get("security").and_then(|v| v.as_str()) {
                match parse_security(s) {
                    Some(v) => patch.security = Some(v),
                    None => return ToolOutput::err(&call.id, format!("invalid security '{s}'")),
                }
            }
            if let Some(a) = call.args.get("ask").and_then(|v| v.as_str()) {
                match parse_ask(a) {
                    Some(v) => patch.ask = Some(v),
                    None => return ToolOutput::err(&call.id, format!("invalid ask '{a}'")),
                }
            }
            if let Some(af) = call.args.get("ask_fallback").and_then(|v| v.as_str()) {
                match parse_security(af) {
                    Some(v) => patch.ask_fallback = Some(v),
                    None => return ToolOutput::err(&call.id, format!("invalid ask_fallback '{af}'")),
                }
            }
            if let Some(aas) = call.args.get("auto_allow_skills").and_then(|v| v.as_bool()) {
                patch.auto_allow_skills = Some(aas);
            }
            self.approval.set_policy(patch);
        }
        let policy = self.approval.policy();
        ToolOutput::ok(&call.id, serde_json::to_string(&policy).unwrap_or_default())
    }
}
