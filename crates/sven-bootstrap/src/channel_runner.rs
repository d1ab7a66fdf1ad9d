// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bridges the Session Scheduler's [`TurnRunner`] contract to an actual
//! `sven_core::Agent` turn-use loop, one `Agent` instance per session key.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sven_channels::{CancelToken, HistoryRole, HistoryTurn, MessageContext, SessionKey, TurnRunner};
use sven_config::Config;
use sven_core::diagnostic::{DiagnosticBus, EventKind};
use sven_core::events::AgentEvent;
use sven_core::{Agent, AgentRuntimeContext};
use sven_model::ModelProvider;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::channel_tools::{register_channel_tools, ChannelToolDeps};
use crate::context::ToolSetProfile;
use crate::registry::build_tool_registry;

/// Builds and caches a live `Agent` per `SessionKey`, running each turn and
/// translating its event stream into diagnostic-bus emissions. Owned by
/// whatever process wires together the Ingress Router and Session Scheduler
/// (normally `main.rs`'s `run_serve`).
pub struct AgentTurnRunner {
    config: Arc<Config>,
    model: Arc<dyn ModelProvider>,
    runtime: AgentRuntimeContext,
    bus: Arc<DiagnosticBus>,
    channel_tools: Arc<ChannelToolDeps>,
    agents: Mutex<HashMap<SessionKey, Agent>>,
}

impl AgentTurnRunner {
    pub fn new(
        config: Arc<Config>,
        model: Arc<dyn ModelProvider>,
        runtime: AgentRuntimeContext,
        bus: Arc<DiagnosticBus>,
        channel_tools: Arc<ChannelToolDeps>,
    ) -> Arc<Self> {
        Arc::new(Self { config, model, runtime, bus, channel_tools, agents: Mutex::new(HashMap::new()) })
    }

    async fn build_agent(&self) -> Agent {
        let mode_lock = Arc::new(Mutex::new(self.config.agent.default_mode));
        let (tool_event_tx, tool_event_rx) = mpsc::channel(64);
        let todos = Arc::new(Mutex::new(Vec::new()));
        let task_depth = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut registry = build_tool_registry(
            &self.config,
            self.model.clone(),
            ToolSetProfile::Full { question_tx: None, todos, task_depth },
            mode_lock.clone(),
            tool_event_tx,
            self.runtime.clone(),
        );
        register_channel_tools(&mut registry, &self.channel_tools);

        let context_window = self.model.catalog_context_window().unwrap_or(128_000) as usize;

        Agent::new(
            self.model.clone(),
            Arc::new(registry),
            Arc::new(self.config.agent.clone()),
            self.runtime.clone(),
            mode_lock,
            tool_event_rx,
            context_window,
        )
    }
}

#[async_trait]
impl TurnRunner for AgentTurnRunner {
    async fn run_turn(
        &self,
        ctx: MessageContext,
        mut history: Vec<HistoryTurn>,
        cancel: CancelToken,
    ) -> anyhow::Result<(String, Vec<HistoryTurn>)> {
        let key = ctx.session_key();
        let mut agents = self.agents.lock().await;
        if !agents.contains_key(&key) {
            let agent = self.build_agent().await;
            agents.insert(key.clone(), agent);
        }
        let agent = agents.get_mut(&key).expect("just inserted");

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        // Bridge the cooperative `CancelToken` (polled, spec.md §5) into the
        // one-shot signal `submit_with_cancel` expects.
        let watcher_cancel = cancel.clone();
        let watcher = tokio::spawn(async move {
            loop {
                if watcher_cancel.is_cancelled() {
                    let _ = cancel_tx.send(());
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        });

        let session_key_s = key.to_string();
        let channel = ctx.channel.clone();
        let bus = Arc::clone(&self.bus);
        let drain = tokio::spawn(async move {
            let mut final_text = String::new();
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::TextComplete(text) => final_text = text,
                    AgentEvent::ToolCallFinished { tool_name, is_error, .. } => {
                        bus.emit(
                            EventKind::ToolCall {
                                session_key: session_key_s.clone(),
                                tool_name,
                                success: !is_error,
                                duration_ms: 0,
                            },
                            Some(channel.clone()),
                        );
                    }
                    AgentEvent::TokenUsage { input, output, context_total: _, cache_read, cache_write } => {
                        bus.emit(
                            EventKind::ModelUsage {
                                session_key: session_key_s.clone(),
                                input_tokens: input,
                                output_tokens: output,
                                cache_read,
                                cache_write,
                            },
                            Some(channel.clone()),
                        );
                    }
                    AgentEvent::Error(message) => {
                        bus.emit(
                            EventKind::Error { session_key: Some(session_key_s.clone()), message },
                            Some(channel.clone()),
                        );
                    }
                    AgentEvent::Aborted { partial_text } => {
                        final_text = partial_text;
                    }
                    _ => {}
                }
            }
            final_text
        });

        let result = agent.submit_with_cancel(&ctx.text, tx, cancel_rx).await;
        watcher.abort();
        let final_text = drain.await.unwrap_or_default();
        result?;

        history.push(HistoryTurn { role: HistoryRole::User, content: ctx.text.clone() });
        history.push(HistoryTurn { role: HistoryRole::Assistant, content: final_text.clone() });

        Ok((final_text, history))
    }
}
