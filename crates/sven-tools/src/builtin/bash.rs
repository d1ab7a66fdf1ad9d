// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `bash` tool: the Approval-Engine-gated shell command used by the
//! multi-channel agent runtime (spec.md §4.2/§4.3). Distinct from
//! [`super::shell::ShellTool`], which predates the Approval Engine and is
//! kept as-is for the TUI/CI entry points that have no allowlist/policy
//! concept — this tool reuses its process-spawning and output-capping
//! idiom but routes every command through [`crate::approval::ApprovalEngine`]
//! first.
use std::sync::Arc;

#[cfg(unix)]
use libc;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::approval::{ApprovalEngine, Decision};
use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

use super::shell::head_tail_truncate;

pub struct BashTool {
    pub timeout_secs: u64,
    pub approval: Arc<ApprovalEngine>,
}

impl BashTool {
    pub fn new(approval: Arc<ApprovalEngine>) -> Self {
        Self { timeout_secs: 30, approval }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command, gated by the approval allowlist and security policy.\n\
         'command' parameter is required. Commands matching the safe-bins set or the\n\
         configured allowlist run immediately; everything else is asked about or denied\n\
         depending on the current ApprovalPolicy.\n\
         Output is capped at ~20 KB; when larger, the first 100 and last 100 lines are\n\
         preserved with an omission marker in the middle."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute."
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to cwd)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'command' argument"),
        };

        let verdict = self.approval.decide(&command);
        let decision = match verdict.decision {
            Decision::Allow => Decision::Allow,
            Decision::Deny => Decision::Deny,
            Decision::Ask => self.approval.resolve_ask_fallback(),
        };
        if decision != Decision::Allow {
            return ToolOutput::err(
                &call.id,
                format!(
                    "command denied by approval policy: {} ({})",
                    verdict.reason,
                    if decision == Decision::Ask { "ask" } else { "deny" }
                ),
            );
        }

        let workdir = call.args.get("workdir").and_then(|v| v.as_str()).map(str::to_string);
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %command, "executing bash tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        if let Some(wd) = &workdir {
            cmd.current_dir(wd);
        }

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(timeout), cmd.output()).await;

        match result {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.is_empty() {
                    content.push_str(&head_tail_truncate(&stdout));
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&head_tail_truncate(&stderr));
                }
                if content.is_empty() {
                    content = format!("[exit {}]", output.status.code().unwrap_or(-1));
                }
                let code = output.status.code().unwrap_or(-1);
                if code == 0 {
                    ToolOutput::ok(&call.id, content)
                } else {
                    ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("timeout after {timeout}s")),
        }
    }
}
