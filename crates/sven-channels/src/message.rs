// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The normalized inbound event every transport adapter converges on.
use serde::{Deserialize, Serialize};

/// The kind of chat scope a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Direct,
    Group,
    Channel,
}

/// A normalized inbound event, converted from whatever wire shape the
/// originating transport adapter speaks.
///
/// Invariant: `message_id` is stable for retransmissions of the same
/// logical message on the same transport (the adapter's job, not the
/// router's — see [`crate::dedup`] for how a missing id is handled).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContext {
    /// Stable transport id, e.g. "console", "telegram", "discord", "cron".
    pub channel: String,
    pub chat_type: ChatType,
    /// Opaque scope identifier within the channel (DM id, group id, ...).
    pub chat_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    /// Opaque, ideally transport-assigned unique id for this message.
    pub message_id: Option<String>,
    pub text: String,
    pub reply_to: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Whether the bot/agent was explicitly mentioned (relevant for group
    /// chats under a `mention-only` group policy).
    pub mentioned: bool,
}

impl MessageContext {
    /// `(channel, chat_id)` — the key the session scheduler serializes on.
    pub fn session_key(&self) -> SessionKey {
        SessionKey {
            channel: self.channel.clone(),
            chat_id: self.chat_id.clone(),
        }
    }
}

/// `(channel, chatId)` — spec.md §3 "Session key".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub channel: String,
    pub chat_id: String,
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.channel, self.chat_id)
    }
}

/// Group-chat visibility policy the router applies before scheduling a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupPolicy {
    /// Process every group/channel message.
    All,
    /// Only process group/channel messages that mention the agent.
    #[default]
    MentionOnly,
    /// Never process group/channel messages (direct chats only).
    None,
}

impl GroupPolicy {
    /// Whether `ctx` should be admitted under this policy.
    pub fn admits(&self, ctx: &MessageContext) -> bool {
        if ctx.chat_type == ChatType::Direct {
            return true;
        }
        match self {
            GroupPolicy::All => true,
            GroupPolicy::MentionOnly => ctx.mentioned,
            GroupPolicy::None => false,
        }
    }
}
