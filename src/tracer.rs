//! Structured, persisted per-run tracing (SPEC_FULL.md §4.3).
//!
//! This is distinct from the `tracing` crate's operational spans/events: a
//! [`Trace`] is the durable, serializable record of one research run,
//! consumed by external tooling; `tracing` spans are ephemeral and only
//! active when the embedding binary installs a subscriber.

use crate::error::{Error, Result};
use crate::state::{RunState, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// One named, timed interval covering a single stage invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub name: String,
    pub step: u32,
    /// Monotonic seconds since an arbitrary epoch, for duration math only.
    pub started_at: f64,
    pub ended_at: f64,
    pub duration_ms: f64,
    pub status: SpanStatus,
    pub metadata: HashMap<String, Value>,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Success,
    Error,
}

/// Complete record of one research run: all spans plus summary stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub run_id: String,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub spans: Vec<Span>,

    pub status: RunStatus,
    pub n_rounds: u32,
    pub n_sources: usize,
    pub estimated_cost_usd: f64,
    pub final_report_chars: usize,
    pub total_duration_ms: f64,
    /// Derived: `total_duration_ms` exceeds the configured slow-run threshold.
    /// Supplemented from `config.py`'s `slow_run_threshold_seconds`, consumed
    /// by the out-of-scope dashboard; carried here so downstream tooling
    /// doesn't need to recompute it.
    pub is_slow: bool,
}

/// A handle to an in-flight span. Finishing happens exactly once, either
/// explicitly via [`SpanGuard::finish_ok`]/[`SpanGuard::finish_err`] or,
/// if the guard is dropped without either being called, implicitly on
/// `Drop` with `status = error` — the scoped-acquisition contract in
/// SPEC_FULL.md §4.3 requires that a span is *always* finished, and that an
/// unhandled failure (including an early return or panic unwind through the
/// scope) marks it as an error rather than silently leaving it open.
pub struct SpanGuard<'a> {
    tracer: &'a Tracer,
    index: usize,
    started: Instant,
    finished: bool,
}

impl<'a> SpanGuard<'a> {
    /// Attach a metadata value to the span. Overwrites any existing key.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(v) = serde_json::to_value(value) {
            self.tracer
                .with_span_mut(self.index, |span| {
                    span.metadata.insert(key.into(), v);
                });
        }
    }

    /// Finish the span successfully. Idempotent: a second call is a no-op.
    pub fn finish_ok(mut self) {
        self.finish(SpanStatus::Success, String::new());
    }

    /// Finish the span as an error with the given detail.
    pub fn finish_err(mut self, error: impl Into<String>) {
        self.finish(SpanStatus::Error, error.into());
    }

    fn finish(&mut self, status: SpanStatus, error: String) {
        if self.finished {
            return;
        }
        self.finished = true;
        let ended_at = self.started.elapsed().as_secs_f64();
        self.tracer.with_span_mut(self.index, |span| {
            span.ended_at = span.started_at + ended_at;
            span.duration_ms = (ended_at * 1000.0 * 100.0).round() / 100.0;
            span.status = status;
            span.error = error;
        });
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(SpanStatus::Error, "span dropped without finishing".to_string());
        }
    }
}

/// Collects spans for one run and persists the resulting [`Trace`] to disk.
pub struct Tracer {
    run_id: String,
    query: String,
    run_started: Instant,
    wall_started_at: DateTime<Utc>,
    spans: std::sync::Mutex<Vec<Span>>,
    step_counter: std::sync::atomic::AtomicU32,
}

impl Tracer {
    pub fn new(query: impl Into<String>) -> Self {
        Self::with_run_id(query, uuid::Uuid::new_v4().simple().to_string()[..12].to_string())
    }

    pub fn with_run_id(query: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            query: query.into(),
            run_started: Instant::now(),
            wall_started_at: Utc::now(),
            spans: std::sync::Mutex::new(Vec::new()),
            step_counter: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Enter a named span. The returned guard must be finished (explicitly
    /// or via `Drop`) before the trace can be meaningfully read back.
    pub fn span(&self, name: impl Into<String>) -> SpanGuard<'_> {
        let step = self
            .step_counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        let started_at = self.run_started.elapsed().as_secs_f64();
        let span = Span {
            name: name.into(),
            step,
            started_at,
            ended_at: started_at,
            duration_ms: 0.0,
            status: SpanStatus::Success,
            metadata: HashMap::new(),
            error: String::new(),
        };
        let index = {
            let mut spans = self.spans.lock().expect("tracer mutex poisoned");
            spans.push(span);
            spans.len() - 1
        };
        SpanGuard {
            tracer: self,
            index,
            started: Instant::now(),
            finished: false,
        }
    }

    fn with_span_mut(&self, index: usize, f: impl FnOnce(&mut Span)) {
        let mut spans = self.spans.lock().expect("tracer mutex poisoned");
        if let Some(span) = spans.get_mut(index) {
            f(span);
        }
    }

    /// Build the final [`Trace`] from summary stats pulled off `state`.
    /// `slow_run_threshold_seconds` drives `Trace::is_slow`.
    pub fn finish(&self, state: &RunState, slow_run_threshold_seconds: f64) -> Trace {
        let total_duration_ms = (self.run_started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;
        Trace {
            run_id: self.run_id.clone(),
            query: self.query.clone(),
            started_at: self.wall_started_at,
            completed_at: state.completed_at.or(Some(Utc::now())),
            spans: self.spans.lock().expect("tracer mutex poisoned").clone(),
            status: state.status,
            n_rounds: state.rounds_completed,
            n_sources: state.total_sources(),
            estimated_cost_usd: state.estimated_cost_usd,
            final_report_chars: state.final_report.chars().count(),
            total_duration_ms,
            is_slow: total_duration_ms / 1000.0 > slow_run_threshold_seconds,
        }
    }
}

impl Trace {
    /// Write this trace to `{log_dir}/traces/{run_id}.json`, creating parent
    /// directories as needed. Returns the path written.
    pub fn save(&self, log_dir: &Path) -> Result<PathBuf> {
        let dir = log_dir.join("traces");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", self.run_id));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Trace> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunState;

    #[test]
    fn span_finished_ok_records_success() {
        let tracer = Tracer::new("q");
        let span = tracer.span("planner");
        span.set_metadata("subqueries", vec!["a", "b"]);
        span.finish_ok();

        let mut state = RunState::new("q");
        state.record_success("report".into(), vec!["https://a.example".into()]);
        let trace = tracer.finish(&state, 300.0);
        assert_eq!(trace.spans.len(), 1);
        assert_eq!(trace.spans[0].name, "planner");
        assert_eq!(trace.spans[0].status, SpanStatus::Success);
        assert_eq!(trace.spans[0].step, 1);
    }

    #[test]
    fn span_dropped_without_finishing_is_recorded_as_error() {
        let tracer = Tracer::new("q");
        {
            let _span = tracer.span("researcher");
            // dropped here without finish_ok/finish_err
        }
        let state = RunState::new("q");
        let trace = tracer.finish(&state, 300.0);
        assert_eq!(trace.spans[0].status, SpanStatus::Error);
        assert!(!trace.spans[0].error.is_empty());
    }

    #[test]
    fn span_finish_err_captures_message_and_never_panics_on_double_finish() {
        let tracer = Tracer::new("q");
        let span = tracer.span("reflector");
        span.finish_err("BoomError: exploded");
        let state = RunState::new("q");
        let trace = tracer.finish(&state, 300.0);
        assert_eq!(trace.spans[0].status, SpanStatus::Error);
        assert_eq!(trace.spans[0].error, "BoomError: exploded");
    }

    #[test]
    fn steps_are_monotonic_in_issue_order() {
        let tracer = Tracer::new("q");
        tracer.span("planner").finish_ok();
        tracer.span("researcher").finish_ok();
        tracer.span("reflector").finish_ok();
        let state = RunState::new("q");
        let trace = tracer.finish(&state, 300.0);
        let steps: Vec<u32> = trace.spans.iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![1, 2, 3]);
    }

    #[test]
    fn trace_round_trips_through_json() {
        let tracer = Tracer::with_run_id("q", "abc123456789");
        tracer.span("planner").finish_ok();
        let mut state = RunState::new("q");
        state.record_success("report text".into(), vec!["https://a.example".into()]);
        let trace = tracer.finish(&state, 300.0);

        let dir = tempfile::tempdir().unwrap();
        let path = trace.save(dir.path()).unwrap();
        let loaded = Trace::load(&path).unwrap();
        assert_eq!(loaded.run_id, trace.run_id);
        assert_eq!(loaded.spans.len(), trace.spans.len());
        assert_eq!(loaded.status, trace.status);
    }

    #[test]
    fn is_slow_flag_reflects_threshold() {
        let tracer = Tracer::new("q");
        let state = RunState::new("q");
        let trace = tracer.finish(&state, 0.0);
        assert!(trace.is_slow);
        let trace = tracer.finish(&state, 10_000.0);
        assert!(!trace.is_slow);
    }
}
