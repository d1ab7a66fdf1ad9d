// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Sub-agent Supervisor (spec.md §4.6): spawns a fresh agent instance as an
//! OS child process for an isolated task, captures its output, enforces a
//! timeout, and tracks lifecycle state.
//!
//! Grounded on [`crate::builtin::shell::ShellTool::execute`]'s process-
//! spawning idiom (`tokio::process::Command`, `setsid()` via `pre_exec`,
//! null stdin, `kill_on_drop`, head/tail output capping), generalized from a
//! one-shot `bash -c` call into a supervised, trackable child whose own
//! binary re-enters as `--subagent`.
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

#[cfg(unix)]
use libc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// Output retained per sub-agent during the run (spec.md §4.6 "Output
/// policy"): only the last `maxLines` line records, not the full transcript.
const DEFAULT_MAX_LINES: usize = 100;

/// Final captured-result ceiling shared with the Turn Driver's tool-output
/// truncation discipline (spec.md §4.5, §4.6 "10 KB driver ceiling").
const RESULT_CEILING_BYTES: usize = 10_000;

/// Grace period between a graceful stop signal and SIGKILL (spec.md §4.6
/// "Timeout policy").
const GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAgentStatus {
    Pending,
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl SubAgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// Sub-agent lifecycle record (spec.md §3/§4.6 `SubAgent`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgent {
    pub id: String,
    pub name: String,
    pub status: SubAgentStatus,
    pub task: String,
    pub pid: Option<u32>,
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    pub logs: Vec<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub work_dir: String,
}

/// Parameters to [`SubAgentSupervisor::create`] (spec.md §4.6 `create`).
#[derive(Debug, Clone)]
pub struct CreateParams {
    pub name: Option<String>,
    pub task: String,
    pub model: Option<String>,
    pub timeout_ms: u64,
    pub max_lines: usize,
    pub work_dir: String,
}

impl Default for CreateParams {
    fn default() -> Self {
        Self {
            name: None,
            task: String::new(),
            model: None,
            timeout_ms: 60_000,
            max_lines: DEFAULT_MAX_LINES,
            work_dir: ".".to_string(),
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct Handle {
    record: SubAgent,
    /// Signalled when the background driver task transitions the record to
    /// a terminal status; `waitFor` awaits this rather than polling.
    done: Arc<Notify>,
}

/// Builds the `std::process::Command` used to re-invoke this binary as a
/// headless sub-agent. Kept as a trait so tests can substitute a stub
/// process instead of re-execing the real `sven` binary.
pub trait SubAgentSpawner: Send + Sync {
    fn build_command(&self, params: &CreateParams) -> Command;
}

/// Default spawner: re-invokes `std::env::current_exe()` with `--subagent`
/// (spec.md SPEC_FULL.md §6 "same entry point as a plain headless run").
pub struct ExecSelfSpawner;

impl SubAgentSpawner for ExecSelfSpawner {
    fn build_command(&self, params: &CreateParams) -> Command {
        let exe = std::env::current_exe().unwrap_or_else(|_| "sven".into());
        let mut cmd = Command::new(exe);
        cmd.arg("--subagent").arg("--task").arg(&params.task);
        if let Some(model) = &params.model {
            cmd.arg("--model").arg(model);
        }
        cmd.current_dir(&params.work_dir);
        cmd.env_clear();
        cmd.envs(std::env::vars().filter(|(k, _)| k == "PATH" || k == "HOME"));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        cmd
    }
}

/// Tracks every sub-agent spawned by this process (spec.md §4.6).
pub struct SubAgentSupervisor {
    handles: Mutex<HashMap<String, Handle>>,
    spawner: Arc<dyn SubAgentSpawner>,
    next_id: std::sync::atomic::AtomicU64,
}

impl SubAgentSupervisor {
    pub fn new() -> Self {
        Self::with_spawner(Arc::new(ExecSelfSpawner))
    }

    pub fn with_spawner(spawner: Arc<dyn SubAgentSpawner>) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            spawner,
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn fresh_id(&self) -> String {
        let n = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("sa-{n}")
    }

    /// Spawn a sub-agent and return its initial record immediately; the run
    /// proceeds in a background task (spec.md §4.6 `pending → starting →
    /// running → terminal`).
    pub async fn create(self: &Arc<Self>, params: CreateParams) -> SubAgent {
        let id = self.fresh_id();
        let name = params.name.clone().unwrap_or_else(|| id.clone());
        let record = SubAgent {
            id: id.clone(),
            name,
            status: SubAgentStatus::Pending,
            task: params.task.clone(),
            pid: None,
            start_time_ms: now_ms(),
            end_time_ms: None,
            logs: Vec::new(),
            result: None,
            error: None,
            work_dir: params.work_dir.clone(),
        };
        let done = Arc::new(Notify::new());
        self.handles.lock().await.insert(
            id.clone(),
            Handle { record: record.clone(), done: done.clone() },
        );

        let supervisor = Arc::clone(self);
        let timeout = Duration::from_millis(params.timeout_ms);
        tokio::spawn(async move {
            supervisor.drive(id, params, timeout, done).await;
        });

        record
    }

    async fn set_status(&self, id: &str, status: SubAgentStatus) {
        let mut handles = self.handles.lock().await;
        if let Some(h) = handles.get_mut(id) {
            h.record.status = status;
        }
    }

    async fn push_log_line(&self, id: &str, line: String, max_lines: usize) {
        let mut handles = self.handles.lock().await;
        if let Some(h) = handles.get_mut(id) {
            h.record.logs.push(line);
            if h.record.logs.len() > max_lines {
                let overflow = h.record.logs.len() - max_lines;
                h.record.logs.drain(0..overflow);
            }
        }
    }

    /// Record the terminal outcome of a run. A no-op if the sub-agent is
    /// already in a terminal state (spec.md §4.6 "a terminated sub-agent is
    /// immutable") — in particular, `stop()` racing the child's natural exit
    /// must not have its `Stopped` sink state overwritten by the `drive`
    /// task's own `Completed`/`Failed` conclusion.
    async fn finish(
        &self,
        id: &str,
        status: SubAgentStatus,
        result: Option<String>,
        error: Option<String>,
        done: &Notify,
    ) {
        let mut handles = self.handles.lock().await;
        if let Some(h) = handles.get_mut(id) {
            if h.record.status.is_terminal() {
                drop(handles);
                done.notify_waiters();
                return;
            }
            h.record.status = status;
            h.record.result = result;
            h.record.error = error;
            h.record.end_time_ms = Some(now_ms());
        }
        drop(handles);
        done.notify_waiters();
    }

    async fn drive(
        self: Arc<Self>,
        id: String,
        params: CreateParams,
        timeout: Duration,
        done: Arc<Notify>,
    ) {
        self.set_status(&id, SubAgentStatus::Starting).await;

        let mut cmd = self.spawner.build_command(&params);
        let child: Child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                self.finish(
                    &id,
                    SubAgentStatus::Failed,
                    None,
                    Some(format!("spawn error: {e}")),
                    &done,
                )
                .await;
                return;
            }
        };

        let pid = child.id();
        {
            let mut handles = self.handles.lock().await;
            if let Some(h) = handles.get_mut(&id) {
                h.record.pid = pid;
                h.record.status = SubAgentStatus::Running;
            }
        }

        match tokio::time::timeout(timeout, self.run_to_completion(&id, child, params.max_lines)).await {
            Ok(Ok((code, combined))) => {
                if code == 0 {
                    self.finish(&id, SubAgentStatus::Completed, Some(combined), None, &done)
                        .await;
                } else {
                    self.finish(
                        &id,
                        SubAgentStatus::Failed,
                        Some(combined.clone()),
                        Some(format!("exit code {code}")),
                        &done,
                    )
                    .await;
                }
            }
            Ok(Err(e)) => {
                self.finish(&id, SubAgentStatus::Failed, None, Some(e), &done).await;
            }
            Err(_) => {
                // Wall-clock expiry: graceful signal, then force-kill after grace.
                self.terminate_on_timeout(&id, pid).await;
                self.finish(
                    &id,
                    SubAgentStatus::Failed,
                    None,
                    Some("timeout".to_string()),
                    &done,
                )
                .await;
            }
        }
    }

    async fn run_to_completion(
        &self,
        id: &str,
        mut child: Child,
        max_lines: usize,
    ) -> Result<(i32, String), String> {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let id_out = id.to_string();
        let id_err = id.to_string();

        let stdout_task = {
            let this_logs: Vec<String> = Vec::new();
            let _ = this_logs;
            stdout.map(|s| {
                let mut reader = BufReader::new(s).lines();
                let id = id_out;
                async move {
                    let mut collected = Vec::new();
                    while let Ok(Some(line)) = reader.next_line().await {
                        collected.push((id.clone(), line));
                    }
                    collected
                }
            })
        };
        let stderr_task = stderr.map(|s| {
            let mut reader = BufReader::new(s).lines();
            let id = id_err;
            async move {
                let mut collected = Vec::new();
                while let Ok(Some(line)) = reader.next_line().await {
                    collected.push((id.clone(), format!("[stderr] {line}")));
                }
                collected
            }
        });

        let (out_lines, err_lines) = tokio::join!(
            async { if let Some(t) = stdout_task { t.await } else { Vec::new() } },
            async { if let Some(t) = stderr_task { t.await } else { Vec::new() } },
        );

        let mut combined = String::new();
        for (_, line) in out_lines.iter().chain(err_lines.iter()) {
            self.push_log_line(id, line.clone(), max_lines).await;
            combined.push_str(line);
            combined.push('\n');
        }
        if combined.len() > RESULT_CEILING_BYTES {
            let tail_start = combined.len() - RESULT_CEILING_BYTES;
            combined = format!("...[truncated]...\n{}", &combined[tail_start..]);
        }

        let status = child.wait().await.map_err(|e| format!("wait error: {e}"))?;
        Ok((status.code().unwrap_or(-1), combined))
    }

    async fn terminate_on_timeout(&self, id: &str, pid: Option<u32>) {
        warn!(sub_agent = %id, "sub-agent wall-clock timeout, sending graceful stop");
        #[cfg(unix)]
        if let Some(pid) = pid {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        tokio::time::sleep(GRACE_PERIOD).await;
        #[cfg(unix)]
        if let Some(pid) = pid {
            unsafe {
                libc::kill(pid as i32, libc::SIGKILL);
            }
        }
        debug!(sub_agent = %id, "sub-agent force-killed after grace period");
    }

    /// Request early termination (spec.md §4.6 `stop(id) -> bool`). Returns
    /// `false` if the sub-agent is unknown or already terminal.
    pub async fn stop(&self, id: &str) -> bool {
        let pid = {
            let handles = self.handles.lock().await;
            match handles.get(id) {
                Some(h) if !h.record.status.is_terminal() => h.record.pid,
                _ => return false,
            }
        };
        #[cfg(unix)]
        if let Some(pid) = pid {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = pid;

        let mut handles = self.handles.lock().await;
        if let Some(h) = handles.get_mut(id) {
            if !h.record.status.is_terminal() {
                h.record.status = SubAgentStatus::Stopped;
                h.record.end_time_ms = Some(now_ms());
                h.done.notify_waiters();
                return true;
            }
        }
        false
    }

    pub async fn status(&self, id: &str) -> Option<SubAgent> {
        self.handles.lock().await.get(id).map(|h| h.record.clone())
    }

    pub async fn list(&self, name_filter: Option<&str>) -> Vec<SubAgent> {
        let handles = self.handles.lock().await;
        handles
            .values()
            .filter(|h| name_filter.map(|f| h.record.name.contains(f)).unwrap_or(true))
            .map(|h| h.record.clone())
            .collect()
    }

    /// Block until `id` reaches a terminal status, or `timeout_ms` elapses
    /// (spec.md §4.6 `waitFor`; "on a terminal sub-agent returns
    /// immediately").
    pub async fn wait_for(&self, id: &str, timeout_ms: Option<u64>) -> Option<SubAgent> {
        let notify = {
            let handles = self.handles.lock().await;
            let h = handles.get(id)?;
            if h.record.status.is_terminal() {
                return Some(h.record.clone());
            }
            h.done.clone()
        };

        let wait_fut = notify.notified();
        match timeout_ms {
            Some(ms) => {
                let _ = tokio::time::timeout(Duration::from_millis(ms), wait_fut).await;
            }
            None => wait_fut.await,
        }
        self.status(id).await
    }

    /// Human-readable roll-up across all tracked sub-agents (spec.md §4.6
    /// `generateReport`).
    pub async fn generate_report(&self) -> String {
        let handles = self.handles.lock().await;
        if handles.is_empty() {
            return "no sub-agents tracked".to_string();
        }
        let mut lines = Vec::new();
        for h in handles.values() {
            let dur = h
                .record
                .end_time_ms
                .map(|end| format!("{}ms", end - h.record.start_time_ms))
                .unwrap_or_else(|| "running".to_string());
            lines.push(format!(
                "{} [{}] status={:?} dur={} task={:?}",
                h.record.id, h.record.name, h.record.status, dur, h.record.task
            ));
        }
        lines.sort();
        lines.join("\n")
    }
}

impl Default for SubAgentSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoSpawner;
    impl SubAgentSpawner for EchoSpawner {
        fn build_command(&self, params: &CreateParams) -> Command {
            let mut cmd = Command::new("bash");
            cmd.arg("-c").arg(format!("echo {}", params.task));
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            cmd.kill_on_drop(true);
            cmd
        }
    }

    struct SleepSpawner;
    impl SubAgentSpawner for SleepSpawner {
        fn build_command(&self, _params: &CreateParams) -> Command {
            let mut cmd = Command::new("bash");
            cmd.arg("-c").arg("sleep 30");
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            cmd.kill_on_drop(true);
            cmd
        }
    }

    struct FailSpawner;
    impl SubAgentSpawner for FailSpawner {
        fn build_command(&self, _params: &CreateParams) -> Command {
            let mut cmd = Command::new("bash");
            cmd.arg("-c").arg("exit 7");
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            cmd.kill_on_drop(true);
            cmd
        }
    }

    #[tokio::test]
    async fn create_and_wait_for_completion() {
        let sup = Arc::new(SubAgentSupervisor::with_spawner(Arc::new(EchoSpawner)));
        let created = sup
            .create(CreateParams { task: "42".into(), ..Default::default() })
            .await;
        assert_eq!(created.status, SubAgentStatus::Pending);

        let finished = sup.wait_for(&created.id, Some(5_000)).await.unwrap();
        assert_eq!(finished.status, SubAgentStatus::Completed);
        assert!(finished.result.unwrap().contains("42"));
    }

    #[tokio::test]
    async fn wait_for_terminal_returns_immediately() {
        let sup = Arc::new(SubAgentSupervisor::with_spawner(Arc::new(EchoSpawner)));
        let created = sup.create(CreateParams::default()).await;
        sup.wait_for(&created.id, Some(5_000)).await;
        let again = sup.wait_for(&created.id, Some(0)).await.unwrap();
        assert!(again.status.is_terminal());
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed() {
        let sup = Arc::new(SubAgentSupervisor::with_spawner(Arc::new(FailSpawner)));
        let created = sup.create(CreateParams::default()).await;
        let finished = sup.wait_for(&created.id, Some(5_000)).await.unwrap();
        assert_eq!(finished.status, SubAgentStatus::Failed);
        assert_eq!(finished.error.as_deref(), Some("exit code 7"));
    }

    #[tokio::test]
    async fn stop_marks_stopped_and_is_idempotent_on_terminal() {
        let sup = Arc::new(SubAgentSupervisor::with_spawner(Arc::new(SleepSpawner)));
        let created = sup.create(CreateParams::default()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sup.stop(&created.id).await);
        assert!(!sup.stop(&created.id).await);
    }

    #[tokio::test]
    async fn stop_status_survives_the_childs_own_exit() {
        // spec.md §4.6: "stopped" and "failed" are both sink states; a
        // terminated sub-agent is immutable. Once `stop()` has transitioned
        // the record to `Stopped`, the `drive` task observing the SIGTERM'd
        // child's exit must not overwrite it with `Failed`.
        let sup = Arc::new(SubAgentSupervisor::with_spawner(Arc::new(SleepSpawner)));
        let created = sup.create(CreateParams::default()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sup.stop(&created.id).await);

        // Give `drive`'s `run_to_completion` plenty of time to observe the
        // SIGTERM'd child exit and call `finish()`.
        tokio::time::sleep(Duration::from_millis(500)).await;

        let status = sup.status(&created.id).await.unwrap();
        assert_eq!(status.status, SubAgentStatus::Stopped);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn list_filters_by_name_substring() {
        let sup = Arc::new(SubAgentSupervisor::with_spawner(Arc::new(EchoSpawner)));
        sup.create(CreateParams { name: Some("alpha".into()), ..Default::default() })
            .await;
        sup.create(CreateParams { name: Some("beta".into()), ..Default::default() })
            .await;
        let filtered = sup.list(Some("alp")).await;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "alpha");
    }

    #[tokio::test]
    async fn generate_report_lists_all() {
        let sup = Arc::new(SubAgentSupervisor::with_spawner(Arc::new(EchoSpawner)));
        let a = sup.create(CreateParams::default()).await;
        sup.wait_for(&a.id, Some(5_000)).await;
        let report = sup.generate_report().await;
        assert!(report.contains(&a.id));
    }
}
