//! Indexing job state and progress reporting.
//!
//! One [`ProgressTracker`] per service instance records the phase and
//! counters of the running pass. [`ProgressTracker::try_start`] is the
//! single-flight gate: it hands out a [`PassGuard`] only when no other pass
//! is active. The guard drives the phase machine
//!
//! ```text
//! idle → loading → filtering → embedding → storing → cleanup → idle
//!                        (any active phase) → error
//! ```
//!
//! and moves the tracker to `error` if it is dropped before the pass
//! finishes.
//!
//! Every change is also pushed to a [`ProgressReporter`]. The CLI uses the
//! stderr reporters (human lines or JSON lines); the server uses
//! [`NoProgress`] and polls [`ProgressTracker::snapshot`] instead. Progress
//! goes to **stderr** so stdout stays parseable for scripts.

use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::error::IndexError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Idle,
    Loading,
    Filtering,
    Embedding,
    Storing,
    Cleanup,
    Error,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Idle => "idle",
            JobPhase::Loading => "loading",
            JobPhase::Filtering => "filtering",
            JobPhase::Embedding => "embedding",
            JobPhase::Storing => "storing",
            JobPhase::Cleanup => "cleanup",
            JobPhase::Error => "error",
        }
    }

    /// The only phase a running pass may move to next.
    pub fn successor(&self) -> Option<JobPhase> {
        match self {
            JobPhase::Idle | JobPhase::Error => Some(JobPhase::Loading),
            JobPhase::Loading => Some(JobPhase::Filtering),
            JobPhase::Filtering => Some(JobPhase::Embedding),
            JobPhase::Embedding => Some(JobPhase::Storing),
            JobPhase::Storing => Some(JobPhase::Cleanup),
            JobPhase::Cleanup => Some(JobPhase::Idle),
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, JobPhase::Idle | JobPhase::Error)
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEvent {
    pub phase: JobPhase,
    pub current: u64,
    pub total: u64,
    pub last_path: Option<String>,
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Human-friendly progress on stderr: `index  embedding  1,234 / 5,000`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &ProgressEvent) {
        let line = match event.phase {
            JobPhase::Loading => "index  loading...\n".to_string(),
            JobPhase::Idle => "index  done\n".to_string(),
            JobPhase::Error => "index  failed\n".to_string(),
            phase => format!(
                "index  {}  {} / {}\n",
                phase,
                format_number(event.current),
                format_number(event.total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "phase": event.phase,
            "current": event.current,
            "total": event.total,
            "last_path": event.last_path,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}': expected off, human, or json",
                other
            )),
        }
    }
}

#[derive(Debug)]
struct JobState {
    phase: JobPhase,
    current: u64,
    total: u64,
    started_at: Option<Instant>,
    last_path: Option<String>,
    error: Option<String>,
}

impl JobState {
    fn idle() -> Self {
        Self {
            phase: JobPhase::Idle,
            current: 0,
            total: 0,
            started_at: None,
            last_path: None,
            error: None,
        }
    }

    fn event(&self) -> ProgressEvent {
        ProgressEvent {
            phase: self.phase,
            current: self.current,
            total: self.total,
            last_path: self.last_path.clone(),
        }
    }
}

/// Point-in-time view of a running or failed pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: JobPhase,
    pub current: u64,
    pub total: u64,
    pub elapsed_seconds: f64,
    pub last_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the progress operation returns: the bare string `"idle"`, or a
/// snapshot object.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProgressReport {
    Idle(&'static str),
    Running(ProgressSnapshot),
}

impl ProgressReport {
    pub fn idle() -> Self {
        ProgressReport::Idle("idle")
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ProgressReport::Idle(_))
    }
}

pub struct ProgressTracker {
    state: Mutex<JobState>,
    reporter: Box<dyn ProgressReporter>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::with_reporter(Box::new(NoProgress))
    }

    pub fn with_reporter(reporter: Box<dyn ProgressReporter>) -> Self {
        Self {
            state: Mutex::new(JobState::idle()),
            reporter,
        }
    }

    // State updates are single assignments, so a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the tracker for a new pass, resetting counters and entering
    /// `loading`. Fails with [`IndexError::AlreadyRunning`] if a pass is active.
    pub fn try_start(self: &Arc<Self>) -> Result<PassGuard, IndexError> {
        let event = {
            let mut state = self.lock();
            if state.phase.is_active() {
                return Err(IndexError::AlreadyRunning);
            }
            *state = JobState::idle();
            state.phase = JobPhase::Loading;
            state.started_at = Some(Instant::now());
            state.event()
        };
        self.reporter.report(&event);

        Ok(PassGuard {
            tracker: Arc::clone(self),
            finished: false,
        })
    }

    pub fn is_running(&self) -> bool {
        self.lock().phase.is_active()
    }

    pub fn phase(&self) -> JobPhase {
        self.lock().phase
    }

    pub fn snapshot(&self) -> ProgressReport {
        let state = self.lock();
        if state.phase == JobPhase::Idle {
            return ProgressReport::idle();
        }
        let elapsed = state
            .started_at
            .map(|t| (t.elapsed().as_secs_f64() * 100.0).round() / 100.0)
            .unwrap_or(0.0);
        ProgressReport::Running(ProgressSnapshot {
            phase: state.phase,
            current: state.current,
            total: state.total,
            elapsed_seconds: elapsed,
            last_path: state.last_path.clone(),
            error: state.error.clone(),
        })
    }

    fn update(&self, f: impl FnOnce(&mut JobState)) {
        let event = {
            let mut state = self.lock();
            f(&mut state);
            state.event()
        };
        self.reporter.report(&event);
    }
}

/// Exclusive handle on the tracker for the duration of one pass.
pub struct PassGuard {
    tracker: Arc<ProgressTracker>,
    finished: bool,
}

impl PassGuard {
    /// Move to the next phase with a fresh `0 / total` counter.
    pub fn enter(&self, phase: JobPhase, total: u64) {
        self.tracker.update(|state| {
            debug_assert_eq!(
                state.phase.successor(),
                Some(phase),
                "phase {} cannot follow {}",
                phase,
                state.phase
            );
            state.phase = phase;
            state.current = 0;
            state.total = total;
        });
    }

    /// Count one unit of work in the current phase.
    pub fn step(&self, path: &str) {
        self.tracker.update(|state| {
            state.current += 1;
            state.last_path = Some(path.to_string());
        });
    }

    /// Advance the counter by `n` units at once (e.g. one embedding batch).
    pub fn step_by(&self, n: u64, last_path: Option<&str>) {
        self.tracker.update(|state| {
            state.current += n;
            if let Some(p) = last_path {
                state.last_path = Some(p.to_string());
            }
        });
    }

    /// Complete the pass: `cleanup → idle`.
    pub fn finish(mut self) {
        self.finished = true;
        self.tracker.update(|state| {
            state.phase = JobPhase::Idle;
            state.error = None;
        });
    }

    /// Abort the pass, recording `message`.
    pub fn fail(mut self, message: impl Into<String>) {
        self.finished = true;
        let message = message.into();
        self.tracker.update(|state| {
            state.phase = JobPhase::Error;
            state.error = Some(message);
        });
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.update(|state| {
                state.phase = JobPhase::Error;
                state.error = Some("indexing pass ended unexpectedly".to_string());
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects every event for assertions.
    struct Recorder(Arc<Mutex<Vec<ProgressEvent>>>);

    impl ProgressReporter for Recorder {
        fn report(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn phases_run_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let tracker = Arc::new(ProgressTracker::with_reporter(Box::new(Recorder(
            events.clone(),
        ))));

        let guard = tracker.try_start().unwrap();
        guard.enter(JobPhase::Filtering, 3);
        guard.enter(JobPhase::Embedding, 2);
        guard.step_by(2, Some("b.rs"));
        guard.enter(JobPhase::Storing, 2);
        guard.step("a.rs");
        guard.step("b.rs");
        guard.enter(JobPhase::Cleanup, 0);
        guard.finish();

        let phases: Vec<JobPhase> = events.lock().unwrap().iter().map(|e| e.phase).collect();
        let mut distinct = phases.clone();
        distinct.dedup();
        assert_eq!(
            distinct,
            vec![
                JobPhase::Loading,
                JobPhase::Filtering,
                JobPhase::Embedding,
                JobPhase::Storing,
                JobPhase::Cleanup,
                JobPhase::Idle
            ]
        );
        assert!(tracker.snapshot().is_idle());
    }

    #[test]
    fn second_pass_is_rejected_while_running() {
        let tracker = Arc::new(ProgressTracker::new());
        let guard = tracker.try_start().unwrap();
        assert!(matches!(tracker.try_start(), Err(IndexError::AlreadyRunning)));
        guard.enter(JobPhase::Filtering, 0);
        guard.enter(JobPhase::Embedding, 0);
        guard.enter(JobPhase::Storing, 0);
        guard.enter(JobPhase::Cleanup, 0);
        guard.finish();
        assert!(tracker.try_start().is_ok());
    }

    #[test]
    fn snapshot_reports_counters() {
        let tracker = Arc::new(ProgressTracker::new());
        let guard = tracker.try_start().unwrap();
        guard.enter(JobPhase::Filtering, 10);
        guard.enter(JobPhase::Embedding, 4);
        guard.step_by(2, Some("src/lib.rs"));

        match tracker.snapshot() {
            ProgressReport::Running(snap) => {
                assert_eq!(snap.phase, JobPhase::Embedding);
                assert_eq!(snap.current, 2);
                assert_eq!(snap.total, 4);
                assert_eq!(snap.last_path.as_deref(), Some("src/lib.rs"));
                assert!(snap.error.is_none());
            }
            other => panic!("expected running snapshot, got {other:?}"),
        }
        guard.fail("boom");
    }

    #[test]
    fn failure_and_drop_enter_error() {
        let tracker = Arc::new(ProgressTracker::new());
        tracker.try_start().unwrap().fail("embedding exhausted");
        match tracker.snapshot() {
            ProgressReport::Running(snap) => {
                assert_eq!(snap.phase, JobPhase::Error);
                assert_eq!(snap.error.as_deref(), Some("embedding exhausted"));
            }
            other => panic!("expected error snapshot, got {other:?}"),
        }

        // Error is not active: a new pass may start, and dropping it unfinished errors again
        {
            let _guard = tracker.try_start().unwrap();
        }
        assert_eq!(tracker.phase(), JobPhase::Error);
    }

    #[test]
    fn idle_serializes_as_bare_string() {
        let json = serde_json::to_value(ProgressReport::idle()).unwrap();
        assert_eq!(json, serde_json::json!("idle"));
    }
}
