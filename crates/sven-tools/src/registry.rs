// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sven_config::AgentMode;

use crate::{Tool, ToolCall, ToolOutput};

/// A tool schema – mirrors sven_model::ToolSchema but keeps tools crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Errors a registration or dispatch may fail with.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a tool named '{0}' is already registered")]
    DuplicateName(String),
}

/// Per-family dispatch timeout: shell commands get the longest budget,
/// sub-agent waits even longer, network fetches a short one, and
/// pure-compute tools (the default) run with no wall-clock ceiling.
fn default_timeout(name: &str) -> Duration {
    match name {
        "bash" | "run_terminal_command" => Duration::from_secs(30),
        "subagent_create" | "subagent_wait" => Duration::from_secs(60),
        "web_fetch" | "web_search" => Duration::from_secs(10),
        _ => Duration::from_secs(0),
    }
}

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

// SAFETY: ToolRegistry is Sync because:
// - HashMap<String, Arc<dyn Tool>> is Sync (String is Sync, Arc<T: Send + Sync> is Sync)
// - Tools implement Send + Sync (required by the Tool trait)
// - No interior mutability exists after construction (all methods take &self)
// - Parallel tool execution is safe because tools are immutable after registration
unsafe impl Sync for ToolRegistry {}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool. Fails with [`RegistryError::DuplicateName`] rather
    /// than silently overwriting an existing registration — the registry
    /// invariant is that `name` is unique.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce schemas for ALL registered tools (mode-unfiltered).
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| ToolSchema {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        }).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Produce schemas only for tools available in the given mode.
    pub fn schemas_for_mode(&self, mode: AgentMode) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Dispatch a call by name. Every handler is run under a per-family
    /// timeout and panic isolation: an unhandled panic or a timeout is
    /// caught and mapped to `{isError: true}` rather than propagating, so
    /// the registry always returns a structured result.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = call.id.clone();
        let name = call.name.clone();

        let tool = match self.tools.get(&call.name) {
            Some(t) => t.clone(),
            None => return ToolOutput::err(&id, format!("unknown tool: {name}")),
        };

        let timeout = default_timeout(&name);
        let owned_call = call.clone();
        let join = tokio::spawn(async move { tool.execute(&owned_call).await });

        let joined = if timeout.is_zero() {
            join.await
        } else {
            match tokio::time::timeout(timeout, join).await {
                Ok(joined) => joined,
                Err(_) => {
                    return ToolOutput::err(
                        &id,
                        format!("tool '{name}' exceeded its {timeout:?} timeout"),
                    );
                }
            }
        };

        match joined {
            Ok(output) => output,
            Err(join_err) => {
                ToolOutput::err(&id, format!("tool '{name}' panicked: {join_err}"))
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn names_for_mode(&self, mode: AgentMode) -> Vec<String> {
        let mut names: Vec<String> = self.tools.values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self { Self::new() }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
