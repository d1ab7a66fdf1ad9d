// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persisted job and run record shapes (spec.md §4.7, §6 "Persisted state format").
use serde::{Deserialize, Serialize};

/// `at`/`every`/`cron` schedule kinds (spec.md §4.7 "Scheduling semantics").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fires once at `at_ms`; `enabled` flips to `false` after firing.
    At { at_ms: i64 },
    /// `next = max(now, anchor ?? now)` rounded up to the next multiple of
    /// `interval_ms` from `anchor`; re-armed after each fire.
    Every { interval_ms: i64, anchor_ms: Option<i64> },
    /// Cron expression in IANA timezone `tz`, minute granularity.
    Cron { expr: String, tz: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: Option<String>,
    pub schedule: Schedule,
    /// Opaque text handed to the session target as the synthesized message.
    pub payload: String,
    /// `(channel, chatId)` the fired job's synthesized message targets.
    pub session_target: SessionTarget,
    pub enabled: bool,
    pub created_at_ms: i64,
    pub next_run_at_ms: Option<i64>,
    pub run_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTarget {
    pub channel: String,
    pub chat_id: String,
}

/// Patch for `updateJob`; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobPatch {
    pub name: Option<String>,
    pub schedule: Option<Schedule>,
    pub payload: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// One line of a job's `.cron/runs/<jobId>.jsonl` append log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub job_id: String,
    pub attempt: u64,
    pub status: RunStatus,
    pub ran_at_ms: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub text: String,
    pub trigger_at_ms: i64,
    pub channel: String,
    pub target: SessionTarget,
    pub fired: bool,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub job_count: usize,
    pub enabled_job_count: usize,
    pub reminder_count: usize,
    pub pending_reminder_count: usize,
    pub total_run_count: u64,
}
