// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-session bounded conversation history (spec.md §3 `Session.history`).
use serde::{Deserialize, Serialize};

/// Default cap on the number of retained `{role, content}` turns per session.
pub const DEFAULT_HISTORY_CAP: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: HistoryRole,
    pub content: String,
}

/// Drop the oldest `user`→`assistant` pair until `history.len() <= cap`.
///
/// spec.md §4.4 "Failure semantics": history never gets compacted to a
/// dangling tool exchange — we always remove in role-paired units, and the
/// oldest retained pair is therefore always a clean `user`→`assistant` pair
/// (spec.md §8 property 4).
pub fn compact(history: &mut Vec<HistoryTurn>, cap: usize) {
    while history.len() > cap {
        // The oldest pair starts at index 0 if it's a user turn; otherwise
        // (a stray leading assistant turn from a prior bug/resume) drop just
        // that one turn so we always make forward progress.
        if history.first().map(|t| t.role) == Some(HistoryRole::User) && history.len() >= 2 {
            history.remove(0);
            history.remove(0);
        } else {
            history.remove(0);
        }
    }
}
