// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Cron Scheduler (spec.md §4.7): persistent time-triggered jobs fired
//! against the ingress path.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::schedule::next_run_after;
use crate::store::JobStore;
use crate::types::{CronJob, JobPatch, JobRun, Reminder, RunStatus, Schedule, SchedulerStats, SessionTarget};

/// How often the background tick checks for due jobs/reminders.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Fires a job's synthesized message against the ingress path. Implemented
/// by whatever owns the `IngressRouter` (decoupling the scheduler crate
/// from `sven-channels`).
#[async_trait]
pub trait JobSink: Send + Sync + 'static {
    async fn fire(&self, target: &SessionTarget, text: &str) -> anyhow::Result<()>;
}

struct State {
    jobs: HashMap<String, CronJob>,
    reminders: HashMap<String, Reminder>,
}

pub struct CronScheduler {
    store: JobStore,
    state: Mutex<State>,
    sink: Arc<dyn JobSink>,
    running: std::sync::atomic::AtomicBool,
}

impl CronScheduler {
    pub fn new(base_dir: impl AsRef<std::path::Path>, sink: Arc<dyn JobSink>) -> anyhow::Result<Arc<Self>> {
        let store = JobStore::new(base_dir)?;
        let (jobs, reminders) = store.load()?;
        Ok(Arc::new(Self {
            store,
            state: Mutex::new(State { jobs, reminders }),
            sink,
            running: std::sync::atomic::AtomicBool::new(true),
        }))
    }

    /// Spawn the background tick task. Returns its `JoinHandle` so the
    /// caller can await clean shutdown after calling [`Self::stop`].
    pub fn spawn_tick(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                if !this.running.load(std::sync::atomic::Ordering::SeqCst) {
                    break;
                }
                this.tick().await;
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    async fn tick(&self) {
        let now = now_ms();

        // Due jobs, ascending createdAt (spec.md §4.7 "Ordering").
        let due_jobs: Vec<CronJob> = {
            let state = self.state.lock().await;
            let mut due: Vec<CronJob> = state
                .jobs
                .values()
                .filter(|j| j.enabled && j.next_run_at_ms.map(|t| t <= now).unwrap_or(false))
                .cloned()
                .collect();
            due.sort_by_key(|j| j.created_at_ms);
            due
        };

        for job in due_jobs {
            self.run_job_now(&job.id).await;
        }

        let due_reminders: Vec<Reminder> = {
            let state = self.state.lock().await;
            state.reminders.values().filter(|r| !r.fired && r.trigger_at_ms <= now).cloned().collect()
        };
        for reminder in due_reminders {
            let _ = self.sink.fire(&reminder.target, &reminder.text).await;
            let mut state = self.state.lock().await;
            if let Some(r) = state.reminders.get_mut(&reminder.id) {
                r.fired = true;
            }
            let _ = self.store.save(&state.jobs, &state.reminders);
        }
    }

    pub async fn create_job(
        &self,
        name: Option<String>,
        schedule: Schedule,
        payload: String,
        session_target: SessionTarget,
    ) -> anyhow::Result<CronJob> {
        let now = now_ms();
        let next_run_at_ms = next_run_after(&schedule, now);
        let job = CronJob {
            id: Uuid::new_v4().to_string(),
            name,
            schedule,
            payload,
            session_target,
            enabled: true,
            created_at_ms: now,
            next_run_at_ms,
            run_count: 0,
        };
        let mut state = self.state.lock().await;
        state.jobs.insert(job.id.clone(), job.clone());
        self.store.save(&state.jobs, &state.reminders)?;
        Ok(job)
    }

    pub async fn update_job(&self, id: &str, patch: JobPatch) -> anyhow::Result<Option<CronJob>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(id) else { return Ok(None) };
        if let Some(name) = patch.name {
            job.name = Some(name);
        }
        if let Some(schedule) = patch.schedule {
            job.next_run_at_ms = next_run_after(&schedule, now_ms());
            job.schedule = schedule;
        }
        if let Some(payload) = patch.payload {
            job.payload = payload;
        }
        if let Some(enabled) = patch.enabled {
            job.enabled = enabled;
        }
        let updated = job.clone();
        self.store.save(&state.jobs, &state.reminders)?;
        Ok(Some(updated))
    }

    pub async fn remove_job(&self, id: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        let removed = state.jobs.remove(id).is_some();
        if removed {
            self.store.save(&state.jobs, &state.reminders)?;
        }
        Ok(removed)
    }

    pub async fn get_job(&self, id: &str) -> Option<CronJob> {
        self.state.lock().await.jobs.get(id).cloned()
    }

    pub async fn list_jobs(&self) -> Vec<CronJob> {
        let mut jobs: Vec<CronJob> = self.state.lock().await.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at_ms);
        jobs
    }

    /// Immediate ad-hoc fire, bypassing the schedule (spec.md `runJob`).
    pub async fn run_job(&self, id: &str) -> anyhow::Result<bool> {
        if self.get_job(id).await.is_none() {
            return Ok(false);
        }
        self.run_job_now(id).await;
        Ok(true)
    }

    async fn run_job_now(&self, id: &str) {
        let (target, payload) = {
            let state = self.state.lock().await;
            let Some(job) = state.jobs.get(id) else { return };
            (job.session_target.clone(), job.payload.clone())
        };

        let result = self.sink.fire(&target, &payload).await;
        let attempt;
        let status;
        let error;
        match &result {
            Ok(()) => {
                status = RunStatus::Succeeded;
                error = None;
            }
            Err(e) => {
                status = RunStatus::Failed;
                error = Some(e.to_string());
            }
        }

        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(id) else { return };
        job.run_count += 1;
        attempt = job.run_count;

        // Failure does not block the schedule (spec.md §4.7 "Failure"):
        // `nextRunAt` advances regardless of handler success.
        match &job.schedule {
            Schedule::At { .. } => {
                job.enabled = false;
                job.next_run_at_ms = None;
            }
            other => job.next_run_at_ms = next_run_after(other, now_ms()),
        }

        let _ = self.store.save(&state.jobs, &state.reminders);
        drop(state);
        let _ = self.store.append_run(&JobRun { job_id: id.to_string(), attempt, status, ran_at_ms: now_ms(), error });
    }

    pub async fn get_job_runs(&self, id: &str, limit: Option<usize>) -> anyhow::Result<Vec<JobRun>> {
        self.store.get_runs(id, limit)
    }

    pub async fn set_reminder(
        &self,
        text: String,
        trigger_at_ms: i64,
        channel: String,
        target: SessionTarget,
    ) -> anyhow::Result<Reminder> {
        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            text,
            trigger_at_ms,
            channel,
            target,
            fired: false,
            created_at_ms: now_ms(),
        };
        let mut state = self.state.lock().await;
        state.reminders.insert(reminder.id.clone(), reminder.clone());
        self.store.save(&state.jobs, &state.reminders)?;
        Ok(reminder)
    }

    pub async fn list_reminders(&self, include_fired: bool) -> Vec<Reminder> {
        let mut reminders: Vec<Reminder> = self
            .state
            .lock()
            .await
            .reminders
            .values()
            .filter(|r| include_fired || !r.fired)
            .cloned()
            .collect();
        reminders.sort_by_key(|r| r.trigger_at_ms);
        reminders
    }

    pub async fn cancel_reminder(&self, id: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        let removed = state.reminders.remove(id).is_some();
        if removed {
            self.store.save(&state.jobs, &state.reminders)?;
        }
        Ok(removed)
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        let state = self.state.lock().await;
        SchedulerStats {
            job_count: state.jobs.len(),
            enabled_job_count: state.jobs.values().filter(|j| j.enabled).count(),
            reminder_count: state.reminders.len(),
            pending_reminder_count: state.reminders.values().filter(|r| !r.fired).count(),
            total_run_count: state.jobs.values().map(|j| j.run_count).sum(),
        }
    }
}
