// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Telegram transport, built on `teloxide`. Feature-gated (`telegram`).
use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatId;

use crate::message::{ChatType, MessageContext};
use crate::router::{Adapter, IngressRouter};

const CHANNEL: &str = "telegram";

pub struct TelegramAdapter {
    bot: Bot,
    router: std::sync::Mutex<Option<Arc<IngressRouter>>>,
}

impl TelegramAdapter {
    pub fn new(token: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { bot: Bot::new(token.into()), router: std::sync::Mutex::new(None) })
    }

    pub fn attach_router(&self, router: Arc<IngressRouter>) {
        *self.router.lock().unwrap() = Some(router);
    }
}

#[async_trait]
impl Adapter for TelegramAdapter {
    fn channel(&self) -> &str {
        CHANNEL
    }

    async fn send(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        let id: i64 = chat_id.parse()?;
        self.bot.send_message(ChatId(id), text).await?;
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let Some(router) = self.router.lock().unwrap().clone() else {
            anyhow::bail!("TelegramAdapter started without a router attached");
        };
        let bot = self.bot.clone();
        tokio::spawn(async move {
            let handler = Update::filter_message().endpoint(
                move |_bot: Bot, msg: Message| {
                    let router = Arc::clone(&router);
                    async move {
                        if let Some(ctx) = to_message_context(&msg) {
                            router.on_message(ctx);
                        }
                        respond(())
                    }
                },
            );
            Dispatcher::builder(bot, handler).build().dispatch().await;
        });
        Ok(())
    }
}

fn to_message_context(msg: &Message) -> Option<MessageContext> {
    let text = msg.text()?.to_string();
    let chat_type = if msg.chat.is_private() {
        ChatType::Direct
    } else if msg.chat.is_channel() {
        ChatType::Channel
    } else {
        ChatType::Group
    };
    let mentioned = msg
        .entities()
        .map(|entities| {
            entities
                .iter()
                .any(|e| matches!(e.kind, teloxide::types::MessageEntityKind::Mention))
        })
        .unwrap_or(false);
    Some(MessageContext {
        channel: CHANNEL.into(),
        chat_type,
        chat_id: msg.chat.id.0.to_string(),
        user_id: msg.from().map(|u| u.id.0.to_string()).unwrap_or_default(),
        user_name: msg.from().and_then(|u| u.username.clone()),
        message_id: Some(msg.id.0.to_string()),
        text,
        reply_to: msg.reply_to_message().map(|m| m.id.0.to_string()),
        timestamp: msg.date.timestamp_millis(),
        mentioned,
    })
}
