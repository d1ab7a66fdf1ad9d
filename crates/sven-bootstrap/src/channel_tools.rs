// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Registers the multi-channel-agentd-specific tool families (approval,
//! bash, sub-agent, cron, memory, diagnostic) onto a [`ToolRegistry`].
//!
//! Kept separate from [`crate::registry::build_tool_registry`] rather than
//! folding into [`crate::context::ToolSetProfile`] — that enum and its
//! existing `Full`/`SubAgent` variants are shared by the TUI/CI entry
//! points, which have no approval engine, cron scheduler, or diagnostic bus
//! concept. Calling this afterward on the same registry is additive and
//! leaves those call sites untouched.
use std::sync::Arc;

use sven_core::diagnostic::DiagnosticBus;
use sven_scheduler::CronScheduler;
use sven_tools::approval::ApprovalEngine;
use sven_tools::supervisor::SubAgentSupervisor;
use sven_tools::{
    ApprovalAllowlistTool, ApprovalAnalyzeTool, ApprovalCheckTool, ApprovalPolicyTool, BashTool,
    CronCreateTool, CronListTool, CronRemoveTool, CronRunTool, CronRunsTool, CronUpdateTool,
    MemoryAppendTool, MemoryGetTool, MemoryIndex, MemoryIngestTool, MemorySearchTool,
    MemoryStatsTool, ReminderCancelTool, ReminderListTool, ReminderSetTool, SubAgentCreateTool,
    SubAgentListTool, SubAgentStatusTool, SubAgentStopTool, SubAgentWaitTool, ToolRegistry,
};

use crate::diagnostic_tools::{
    DiagnosticEmitTool, DiagnosticQueryTool, DiagnosticReportTool, DiagnosticStatsTool,
    DiagnosticStatusTool,
};

/// Shared singletons the multi-channel agentd wires once at startup and
/// hands to every per-session `Agent`'s registry.
pub struct ChannelToolDeps {
    pub approval: Arc<ApprovalEngine>,
    pub bus: Arc<DiagnosticBus>,
    pub cron: Arc<CronScheduler>,
    pub supervisor: Arc<SubAgentSupervisor>,
    pub memory: Arc<MemoryIndex>,
    pub work_dir: String,
}

/// Converts the loaded `sven_config::ApprovalConfig` (plain strings, kept
/// dependency-free of `sven-tools`) into the engine's typed `ApprovalConfig`.
/// Falls back to the engine's own defaults on an unrecognised value rather
/// than failing startup over a config typo.
pub fn approval_config_from(cfg: &sven_config::ApprovalConfig) -> sven_tools::approval::ApprovalConfig {
    let value = serde_json::json!({
        "security": cfg.security,
        "ask": cfg.ask,
        "ask_fallback": cfg.ask_fallback,
        "auto_allow_skills": cfg.auto_allow_skills,
    });
    serde_json::from_value(value).unwrap_or_default()
}

/// Register every channel-runtime tool family onto `reg`. Panics on a
/// duplicate name, matching the `.expect("duplicate tool name")` discipline
/// [`crate::registry::build_tool_registry`] already uses — these names are
/// fixed and distinct from the existing built-ins by construction.
pub fn register_channel_tools(reg: &mut ToolRegistry, deps: &ChannelToolDeps) {
    reg.register(BashTool::new(deps.approval.clone())).expect("duplicate tool name");

    reg.register(ApprovalAnalyzeTool { approval: deps.approval.clone() }).expect("duplicate tool name");
    reg.register(ApprovalCheckTool { approval: deps.approval.clone() }).expect("duplicate tool name");
    reg.register(ApprovalAllowlistTool { approval: deps.approval.clone() }).expect("duplicate tool name");
    reg.register(ApprovalPolicyTool { approval: deps.approval.clone() }).expect("duplicate tool name");

    reg.register(SubAgentCreateTool { supervisor: deps.supervisor.clone(), work_dir: deps.work_dir.clone() })
        .expect("duplicate tool name");
    reg.register(SubAgentWaitTool { supervisor: deps.supervisor.clone() }).expect("duplicate tool name");
    reg.register(SubAgentStopTool { supervisor: deps.supervisor.clone() }).expect("duplicate tool name");
    reg.register(SubAgentListTool { supervisor: deps.supervisor.clone() }).expect("duplicate tool name");
    reg.register(SubAgentStatusTool { supervisor: deps.supervisor.clone() }).expect("duplicate tool name");

    reg.register(CronCreateTool { scheduler: deps.cron.clone() }).expect("duplicate tool name");
    reg.register(CronListTool { scheduler: deps.cron.clone() }).expect("duplicate tool name");
    reg.register(CronUpdateTool { scheduler: deps.cron.clone() }).expect("duplicate tool name");
    reg.register(CronRemoveTool { scheduler: deps.cron.clone() }).expect("duplicate tool name");
    reg.register(CronRunTool { scheduler: deps.cron.clone() }).expect("duplicate tool name");
    reg.register(CronRunsTool { scheduler: deps.cron.clone() }).expect("duplicate tool name");
    reg.register(ReminderSetTool { scheduler: deps.cron.clone() }).expect("duplicate tool name");
    reg.register(ReminderListTool { scheduler: deps.cron.clone() }).expect("duplicate tool name");
    reg.register(ReminderCancelTool { scheduler: deps.cron.clone() }).expect("duplicate tool name");

    reg.register(MemorySearchTool { index: deps.memory.clone() }).expect("duplicate tool name");
    reg.register(MemoryGetTool { index: deps.memory.clone() }).expect("duplicate tool name");
    reg.register(MemoryAppendTool { index: deps.memory.clone() }).expect("duplicate tool name");
    reg.register(MemoryIngestTool { index: deps.memory.clone() }).expect("duplicate tool name");
    reg.register(MemoryStatsTool { index: deps.memory.clone() }).expect("duplicate tool name");

    reg.register(DiagnosticEmitTool { bus: deps.bus.clone() }).expect("duplicate tool name");
    reg.register(DiagnosticQueryTool { bus: deps.bus.clone() }).expect("duplicate tool name");
    reg.register(DiagnosticStatsTool { bus: deps.bus.clone() }).expect("duplicate tool name");
    reg.register(DiagnosticStatusTool { bus: deps.bus.clone() }).expect("duplicate tool name");
    reg.register(DiagnosticReportTool { bus: deps.bus.clone() }).expect("duplicate tool name");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sven_scheduler::{JobSink, SessionTarget};

    struct NoopSink;
    #[async_trait]
    impl JobSink for NoopSink {
        async fn fire(&self, _target: &SessionTarget, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registers_every_channel_tool_without_collision() {
        let dir = tempfile::tempdir().unwrap();
        let deps = ChannelToolDeps {
            approval: Arc::new(ApprovalEngine::new(Default::default())),
            bus: Arc::new(DiagnosticBus::new()),
            cron: CronScheduler::new(dir.path(), Arc::new(NoopSink)).unwrap(),
            supervisor: Arc::new(SubAgentSupervisor::new()),
            memory: Arc::new(MemoryIndex::new(dir.path())),
            work_dir: dir.path().to_string_lossy().into_owned(),
        };
        let mut reg = ToolRegistry::new();
        register_channel_tools(&mut reg, &deps);
        assert!(reg.get("bash").is_some());
        assert!(reg.get("cron_create").is_some());
        assert!(reg.get("diagnostic_report").is_some());
        assert!(reg.get("memory_search").is_some());
        assert!(reg.get("subagent_create").is_some());
    }
}
