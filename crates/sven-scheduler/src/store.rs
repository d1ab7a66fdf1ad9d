// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Filesystem-persisted job/reminder table (spec.md §6 workspace layout
//! `.cron/{jobs.json, runs/<jobId>.jsonl}`).
//!
//! Writes are atomic: serialize to a sibling `.tmp` file, `fsync`, then
//! `rename` over the target. A reader never observes a half-written file.
use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{CronJob, JobRun, Reminder};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    jobs: Vec<CronJob>,
    #[serde(default)]
    reminders: Vec<Reminder>,
}

pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    /// `base_dir` is the workspace root; state lives under `base_dir/.cron`.
    pub fn new(base_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = base_dir.as_ref().join(".cron");
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(dir.join("runs"))?;
        Ok(Self { dir })
    }

    fn jobs_path(&self) -> PathBuf {
        self.dir.join("jobs.json")
    }

    fn run_log_path(&self, job_id: &str) -> PathBuf {
        self.dir.join("runs").join(format!("{job_id}.jsonl"))
    }

    pub fn load(&self) -> anyhow::Result<(HashMap<String, CronJob>, HashMap<String, Reminder>)> {
        let path = self.jobs_path();
        if !path.exists() {
            return Ok((HashMap::new(), HashMap::new()));
        }
        let raw = std::fs::read_to_string(&path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        let jobs = snapshot.jobs.into_iter().map(|j| (j.id.clone(), j)).collect();
        let reminders = snapshot.reminders.into_iter().map(|r| (r.id.clone(), r)).collect();
        Ok((jobs, reminders))
    }

    pub fn save(&self, jobs: &HashMap<String, CronJob>, reminders: &HashMap<String, Reminder>) -> anyhow::Result<()> {
        let mut job_list: Vec<CronJob> = jobs.values().cloned().collect();
        job_list.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        let mut reminder_list: Vec<Reminder> = reminders.values().cloned().collect();
        reminder_list.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));

        let snapshot = Snapshot { jobs: job_list, reminders: reminder_list };
        let body = serde_json::to_string_pretty(&snapshot)?;

        let target = self.jobs_path();
        let tmp = target.with_extension("json.tmp");
        {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(body.as_bytes())?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Append one run record to `.cron/runs/<jobId>.jsonl`.
    pub fn append_run(&self, run: &JobRun) -> anyhow::Result<()> {
        let path = self.run_log_path(&run.job_id);
        let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(run)?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    pub fn get_runs(&self, job_id: &str, limit: Option<usize>) -> anyhow::Result<Vec<JobRun>> {
        let path = self.run_log_path(job_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path)?;
        let mut runs: Vec<JobRun> = raw.lines().filter_map(|l| serde_json::from_str(l).ok()).collect();
        if let Some(limit) = limit {
            let start = runs.len().saturating_sub(limit);
            runs = runs.split_off(start);
        }
        Ok(runs)
    }
}
