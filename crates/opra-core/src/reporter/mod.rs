//! Reporter sink and per-worker handles.
//!
//! A [`ReporterSink`] owns the suite. Each worker obtains its own
//! [`ReporterHandle`], which buffers the events of the case it is running and
//! commits the finished node to the sink on `end_case`. Events of different
//! cases therefore never interleave, and the sink lock is taken once per node
//! rather than once per event.
//!
//! Every step is also mirrored to `tracing`.

mod html;
mod json;

pub use html::HtmlReportRenderer;
pub use json::JsonReportRenderer;

use crate::binder::Iteration;
use crate::context::RunContext;
use crate::dispatcher::{RequestPlan, RequestSummary, ResponseRecord, ResponseSummary};
use crate::error::{HarnessError, Result};
use crate::registry::Category;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Severity of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepLevel {
    Pass,
    Fail,
    Skip,
    Info,
    Warn,
    Debug,
    Request,
    Response,
}

impl fmt::Display for StepLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepLevel::Pass => "PASS",
            StepLevel::Fail => "FAIL",
            StepLevel::Skip => "SKIP",
            StepLevel::Info => "INFO",
            StepLevel::Warn => "WARN",
            StepLevel::Debug => "DEBUG",
            StepLevel::Request => "REQUEST",
            StepLevel::Response => "RESPONSE",
        };
        f.write_str(s)
    }
}

/// Terminal status of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Pass,
    Fail,
    Skip,
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseStatus::Pass => write!(f, "PASS"),
            CaseStatus::Fail => write!(f, "FAIL"),
            CaseStatus::Skip => write!(f, "SKIP"),
        }
    }
}

/// Lifecycle state of the case a handle is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseState {
    Idle,
    Running,
    Passed,
    Failed,
    Skipped,
    Retrying,
}

/// Structured report events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReportEvent {
    SuiteStart {
        name: String,
        at: DateTime<Local>,
    },
    SuiteEnd {
        at: DateTime<Local>,
    },
    CaseStart {
        case: String,
        iteration: String,
        attempt: u32,
    },
    CaseEnd {
        status: CaseStatus,
        error: Option<String>,
    },
    Step {
        level: StepLevel,
        message: String,
        detail: Option<String>,
    },
    RequestLog(RequestSummary),
    ResponseLog(ResponseSummary),
}

/// Report node of one attempt, from `CaseStart` to `CaseEnd`.
#[derive(Debug, Clone, Serialize)]
pub struct CaseNode {
    pub id: u64,
    pub handle: u64,
    pub case: String,
    pub qualified_name: String,
    pub label: String,
    pub authors: Vec<String>,
    pub categories: Vec<Category>,
    pub attempt: u32,
    pub status: CaseStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Local>,
    pub duration_ms: u64,
    pub events: Vec<ReportEvent>,
}

impl CaseNode {
    /// Steps of the given level.
    pub fn steps(&self, level: StepLevel) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(move |e| match e {
            ReportEvent::Step { level: l, message, .. } if *l == level => Some(message.as_str()),
            _ => None,
        })
    }

    pub fn has_failed_step(&self) -> bool {
        self.steps(StepLevel::Fail).next().is_some()
    }
}

/// Finished suite as handed to renderers.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub name: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub cases: Vec<CaseNode>,
}

impl SuiteReport {
    pub fn count(&self, status: CaseStatus) -> usize {
        self.cases.iter().filter(|c| c.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(CaseStatus::Pass)
    }

    pub fn failed(&self) -> usize {
        self.count(CaseStatus::Fail)
    }

    pub fn skipped(&self) -> usize {
        self.count(CaseStatus::Skip)
    }

    pub fn total(&self) -> usize {
        self.cases.len()
    }

    /// Copy holding only failed nodes.
    pub fn failed_only(&self) -> SuiteReport {
        SuiteReport {
            name: format!("{} (failed)", self.name),
            cases: self
                .cases
                .iter()
                .filter(|c| c.status == CaseStatus::Fail)
                .cloned()
                .collect(),
            ..self.clone()
        }
    }

    /// Flat event stream: suite start, every node in commit order, suite end.
    pub fn event_stream(&self) -> Vec<ReportEvent> {
        let mut events = vec![ReportEvent::SuiteStart {
            name: self.name.clone(),
            at: self.started_at,
        }];
        for node in &self.cases {
            events.extend(node.events.iter().cloned());
        }
        events.push(ReportEvent::SuiteEnd {
            at: self.finished_at,
        });
        events
    }
}

/// Renders a finished suite to files.
pub trait ReportRenderer: Send + Sync {
    /// Writes the report(s) and returns the paths written.
    fn render(&self, report: &SuiteReport, ctx: &RunContext) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Default)]
struct SinkState {
    suite: Option<(String, DateTime<Local>)>,
    ended: bool,
    open_handles: usize,
    completed: Vec<CaseNode>,
}

/// Suite-wide collector of committed case nodes.
#[derive(Clone, Default)]
pub struct ReporterSink {
    state: Arc<Mutex<SinkState>>,
    next_id: Arc<AtomicU64>,
}

impl ReporterSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SinkState>> {
        self.state
            .lock()
            .map_err(|_| HarnessError::Reporter("reporter state poisoned".to_string()))
    }

    /// Opens the suite. Must precede every handle.
    pub fn start_suite(&self, name: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.suite.is_some() {
            return Err(HarnessError::Reporter(format!(
                "suite already started, cannot start '{}'",
                name
            )));
        }
        state.suite = Some((name.to_string(), Local::now()));
        info!(suite = %name, "Suite started");
        Ok(())
    }

    /// Issues a handle for one worker.
    pub fn handle(&self) -> Result<ReporterHandle> {
        let mut state = self.lock()?;
        if state.suite.is_none() || state.ended {
            return Err(HarnessError::Reporter(
                "reporter handle requested outside an open suite".to_string(),
            ));
        }
        state.open_handles += 1;
        Ok(ReporterHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            sink: self.clone(),
            node: None,
            state: CaseState::Idle,
            started: None,
        })
    }

    /// Closes the suite once every handle has been released.
    pub fn end_suite(&self) -> Result<SuiteReport> {
        let mut state = self.lock()?;
        let Some((name, started_at)) = state.suite.clone() else {
            return Err(HarnessError::Reporter("suite was never started".to_string()));
        };
        if state.ended {
            return Err(HarnessError::Reporter("suite already ended".to_string()));
        }
        if state.open_handles > 0 {
            return Err(HarnessError::Reporter(format!(
                "{} reporter handle(s) still open at suite end",
                state.open_handles
            )));
        }
        state.ended = true;
        let report = SuiteReport {
            name,
            started_at,
            finished_at: Local::now(),
            cases: std::mem::take(&mut state.completed),
        };
        info!(
            suite = %report.name,
            passed = report.passed(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Suite finished"
        );
        Ok(report)
    }

    fn commit(&self, mut node: CaseNode) -> Result<()> {
        let mut state = self.lock()?;
        node.id = state.completed.len() as u64;
        state.completed.push(node);
        Ok(())
    }

    fn release(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.open_handles = state.open_handles.saturating_sub(1);
        }
    }
}

/// A worker's exclusive view of the reporter.
pub struct ReporterHandle {
    id: u64,
    sink: ReporterSink,
    node: Option<CaseNode>,
    state: CaseState,
    started: Option<Instant>,
}

impl ReporterHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> CaseState {
        self.state
    }

    /// Opens the node for an attempt.
    pub fn start_case(&mut self, iteration: &Iteration) -> Result<()> {
        if let Some(open) = &self.node {
            return Err(HarnessError::Reporter(format!(
                "case '{}' started while '{}' is still running",
                iteration, open.label
            )));
        }
        let descriptor = &iteration.descriptor;
        let label = iteration.to_string();
        info!(case = %label, "Case started");

        self.node = Some(CaseNode {
            id: 0,
            handle: self.id,
            case: descriptor.method_name.clone(),
            qualified_name: descriptor.qualified_name.clone(),
            label: label.clone(),
            authors: descriptor.authors.clone(),
            categories: descriptor.categories.clone(),
            attempt: iteration.attempt,
            status: CaseStatus::Pass,
            error: None,
            started_at: Local::now(),
            duration_ms: 0,
            events: vec![ReportEvent::CaseStart {
                case: descriptor.method_name.clone(),
                iteration: label,
                attempt: iteration.attempt,
            }],
        });
        self.started = Some(Instant::now());
        self.state = CaseState::Running;
        Ok(())
    }

    /// Records a step on the running case.
    pub fn step(&mut self, level: StepLevel, message: impl Into<String>, detail: Option<String>) {
        let message = message.into();
        let case = self.node.as_ref().map_or("-", |n| n.label.as_str());
        trace_step(level, case, &message);

        match self.node.as_mut() {
            Some(node) => node.events.push(ReportEvent::Step {
                level,
                message,
                detail,
            }),
            None => debug!(%level, %message, "Step outside a case dropped"),
        }
    }

    pub fn pass(&mut self, message: impl Into<String>) {
        self.step(StepLevel::Pass, message, None);
    }

    pub fn fail(&mut self, message: impl Into<String>, detail: Option<String>) {
        self.step(StepLevel::Fail, message, detail);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.step(StepLevel::Info, message, None);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.step(StepLevel::Warn, message, None);
    }

    pub fn skip(&mut self, message: impl Into<String>) {
        self.step(StepLevel::Skip, message, None);
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.step(StepLevel::Debug, message, None);
    }

    pub fn log_request(&mut self, plan: &RequestPlan) {
        let summary = plan.summary();
        trace_step(
            StepLevel::Request,
            self.current_label(),
            &format!("{} {}", summary.method, summary.url),
        );
        if let Some(node) = self.node.as_mut() {
            node.events.push(ReportEvent::RequestLog(summary));
        }
    }

    pub fn log_response(&mut self, response: &ResponseRecord) {
        let summary = response.summary();
        trace_step(
            StepLevel::Response,
            self.current_label(),
            &format!("status {} in {} ms", summary.status, summary.elapsed_ms),
        );
        if let Some(node) = self.node.as_mut() {
            node.events.push(ReportEvent::ResponseLog(summary));
        }
    }

    /// Whether the running case has recorded a Fail step.
    pub fn has_failures(&self) -> bool {
        self.node.as_ref().is_some_and(CaseNode::has_failed_step)
    }

    /// Whether the running case has recorded a Skip step.
    pub fn has_skips(&self) -> bool {
        self.node
            .as_ref()
            .is_some_and(|n| n.steps(StepLevel::Skip).next().is_some())
    }

    /// Closes the running case and commits its node.
    ///
    /// An error is recorded as a final Fail step before the `CaseEnd`.
    pub fn end_case(&mut self, status: CaseStatus, error: Option<&HarnessError>) -> Result<()> {
        let Some(mut node) = self.node.take() else {
            return Err(HarnessError::Reporter(
                "end_case called with no running case".to_string(),
            ));
        };

        let error_text = error.map(|e| e.to_string());
        if let Some(text) = &error_text {
            trace_step(StepLevel::Fail, &node.label, text);
            node.events.push(ReportEvent::Step {
                level: StepLevel::Fail,
                message: text.clone(),
                detail: error.map(|e| format!("{:?}", e)),
            });
        }

        node.status = status;
        node.error = error_text.clone();
        node.duration_ms = self
            .started
            .take()
            .map_or(0, |s| s.elapsed().as_millis() as u64);
        node.events.push(ReportEvent::CaseEnd {
            status,
            error: error_text,
        });

        self.state = match status {
            CaseStatus::Pass => CaseState::Passed,
            CaseStatus::Fail => CaseState::Failed,
            CaseStatus::Skip => CaseState::Skipped,
        };
        info!(case = %node.label, %status, duration_ms = node.duration_ms, "Case finished");
        self.sink.commit(node)
    }

    /// Moves a failed case into the retrying state.
    pub fn mark_retrying(&mut self) {
        if self.state == CaseState::Failed {
            self.state = CaseState::Retrying;
        }
    }

    fn current_label(&self) -> &str {
        self.node.as_ref().map_or("-", |n| n.label.as_str())
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        if self.node.is_some() {
            let aborted = HarnessError::Reporter("case aborted before completion".to_string());
            if let Err(e) = self.end_case(CaseStatus::Fail, Some(&aborted)) {
                error!(error = %e, "Could not commit aborted case");
            }
        }
        self.sink.release();
    }
}

fn trace_step(level: StepLevel, case: &str, message: &str) {
    match level {
        StepLevel::Pass | StepLevel::Info | StepLevel::Request | StepLevel::Response => {
            info!(case = %case, %level, "{}", message);
        }
        StepLevel::Warn | StepLevel::Skip => warn!(case = %case, %level, "{}", message),
        StepLevel::Fail => error!(case = %case, %level, "{}", message),
        StepLevel::Debug => debug!(case = %case, "{}", message),
    }
}
