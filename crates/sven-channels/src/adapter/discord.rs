// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Discord transport, built on `serenity`. Feature-gated (`discord`).
use std::sync::Arc;

use async_trait::async_trait;
use serenity::async_trait as serenity_async_trait;
use serenity::model::channel::Message;
use serenity::model::gateway::GatewayIntents;
use serenity::model::id::ChannelId;
use serenity::prelude::*;

use crate::message::{ChatType, MessageContext};
use crate::router::{Adapter, IngressRouter};

const CHANNEL: &str = "discord";

struct Handler {
    router: Arc<IngressRouter>,
    bot_user_id: std::sync::Mutex<Option<u64>>,
}

#[serenity_async_trait]
impl EventHandler for Handler {
    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let mentioned = self
            .bot_user_id
            .lock()
            .unwrap()
            .map(|id| msg.mentions.iter().any(|u| u.id.0 == id))
            .unwrap_or(false);
        self.router.on_message(MessageContext {
            channel: CHANNEL.into(),
            chat_type: if msg.guild_id.is_some() { ChatType::Group } else { ChatType::Direct },
            chat_id: msg.channel_id.0.to_string(),
            user_id: msg.author.id.0.to_string(),
            user_name: Some(msg.author.name.clone()),
            message_id: Some(msg.id.0.to_string()),
            text: msg.content.clone(),
            reply_to: msg.referenced_message.as_ref().map(|m| m.id.0.to_string()),
            timestamp: msg.timestamp.unix_timestamp() * 1000,
            mentioned,
        });
    }

    async fn ready(&self, _ctx: Context, ready: serenity::model::gateway::Ready) {
        *self.bot_user_id.lock().unwrap() = Some(ready.user.id.0);
    }
}

pub struct DiscordAdapter {
    token: String,
    http: std::sync::OnceLock<Arc<serenity::http::Http>>,
    router: std::sync::Mutex<Option<Arc<IngressRouter>>>,
}

impl DiscordAdapter {
    pub fn new(token: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { token: token.into(), http: std::sync::OnceLock::new(), router: std::sync::Mutex::new(None) })
    }

    pub fn attach_router(&self, router: Arc<IngressRouter>) {
        *self.router.lock().unwrap() = Some(router);
    }
}

#[async_trait]
impl Adapter for DiscordAdapter {
    fn channel(&self) -> &str {
        CHANNEL
    }

    async fn send(&self, chat_id: &str, text: &str) -> anyhow::Result<()> {
        let http = self.http.get().ok_or_else(|| anyhow::anyhow!("discord adapter not started"))?;
        let channel_id: u64 = chat_id.parse()?;
        ChannelId(channel_id).say(http, text).await?;
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let Some(router) = self.router.lock().unwrap().clone() else {
            anyhow::bail!("DiscordAdapter started without a router attached");
        };
        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;
        let handler = Handler { router, bot_user_id: std::sync::Mutex::new(None) };
        let mut client = Client::builder(&self.token, intents).event_handler(handler).await?;
        let _ = self.http.set(Arc::clone(&client.http));
        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                tracing::error!(error = %e, "discord client terminated");
            }
        });
        Ok(())
    }
}
