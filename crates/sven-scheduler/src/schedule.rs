// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Next-fire computation for the three schedule kinds (spec.md §4.7).
use std::str::FromStr;

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;

use crate::types::Schedule;

/// Compute the next fire time (epoch ms) for `schedule`, given `now_ms` and
/// whether the job has already fired at least once (`after_ms`, the prior
/// `next_run_at_ms` — only meaningful for `Every`).
pub fn next_run_after(schedule: &Schedule, now_ms: i64) -> Option<i64> {
    match schedule {
        // Due or not, `at` always reports its own timestamp; the caller
        // compares against `now` to decide whether to fire.
        Schedule::At { at_ms } => Some(*at_ms),
        Schedule::Every { interval_ms, anchor_ms } => {
            if *interval_ms <= 0 {
                return None;
            }
            let anchor = anchor_ms.unwrap_or(now_ms);
            let base = anchor.max(now_ms);
            let remainder = (base - anchor).rem_euclid(*interval_ms);
            let next = if remainder == 0 { base } else { base + (*interval_ms - remainder) };
            Some(next)
        }
        Schedule::Cron { expr, tz } => {
            let schedule = cron::Schedule::from_str(expr).ok()?;
            let zone: Tz = tz.parse().unwrap_or(chrono_tz::UTC);
            let now_in_tz = zone.timestamp_millis_opt(now_ms).single()?;
            let next = schedule.after(&now_in_tz).next()?;
            Some(next.with_timezone(&Utc).timestamp_millis())
        }
    }
}
