// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Fires cron jobs and reminders into the Ingress Router as synthesized
//! `MessageContext`s on the reserved `"cron"` transport channel.
use std::sync::Arc;

use async_trait::async_trait;
use sven_channels::{ChatType, IngressRouter, MessageContext};
use sven_scheduler::{JobSink, SessionTarget};

pub struct RouterJobSink {
    router: Arc<IngressRouter>,
}

impl RouterJobSink {
    pub fn new(router: Arc<IngressRouter>) -> Arc<Self> {
        Arc::new(Self { router })
    }
}

#[async_trait]
impl JobSink for RouterJobSink {
    async fn fire(&self, target: &SessionTarget, text: &str) -> anyhow::Result<()> {
        self.router.on_message(MessageContext {
            channel: target.channel.clone(),
            chat_type: ChatType::Direct,
            chat_id: target.chat_id.clone(),
            user_id: "cron".into(),
            user_name: None,
            message_id: None,
            text: text.to_string(),
            reply_to: None,
            timestamp: now_ms(),
            mentioned: true,
        });
        Ok(())
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
