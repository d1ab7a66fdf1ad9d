// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Messaging channel integrations: ingress/dedup/scheduling plumbing plus
//! the transport adapters that sit on top of it.
pub mod adapter;
pub mod cancel;
pub mod dedup;
pub mod history;
pub mod message;
pub mod router;
pub mod scheduler;

pub use cancel::CancelToken;
pub use dedup::{dedup_key, DedupIndex};
pub use history::{compact, HistoryRole, HistoryTurn};
pub use message::{ChatType, GroupPolicy, MessageContext, SessionKey};
pub use router::{reply_sink, Adapter, IngressRouter, HEARTBEAT_OK};
pub use scheduler::{Job, SchedulerConfig, SessionScheduler, SubmitError, TurnRunner};
