//! Parallel execution of a scheduled suite.
//!
//! Each selected case becomes one task on a bounded worker pool. The task
//! owns a [`ReporterHandle`] and runs the case's iterations sequentially,
//! retrying failed ones within the [`RetryPolicy`] bound.
//!
//! Outcome rules per attempt:
//! - `Err` from the body, or any Fail step, fails the attempt.
//! - Otherwise a Skip step makes it Skipped, else Passed.
//! - A fatal error (missing configuration, reporter misuse) cancels the run;
//!   in-flight iterations finish and the error is returned after the join.

use crate::binder::{self, Iteration};
use crate::case::CaseContext;
use crate::context::RunContext;
use crate::datasource::{DataSource, TestDataSet};
use crate::dispatcher::Dispatcher;
use crate::error::{HarnessError, Result};
use crate::registry::TestRegistry;
use crate::reporter::{CaseStatus, ReporterHandle, ReporterSink, SuiteReport};
use crate::results::ResultRecorder;
use crate::retry::RetryPolicy;
use crate::runner_list::RunnerList;
use crate::scheduler::{Schedule, ScheduledCase};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Worker pool size when none is configured.
pub const DEFAULT_WORKERS: usize = 4;

/// Runs registered cases against a runner list.
pub struct Engine {
    run: Arc<RunContext>,
    registry: Arc<TestRegistry>,
    dispatcher: Arc<Dispatcher>,
    data: Arc<TestDataSet>,
    retry: RetryPolicy,
    workers: usize,
    data_source: Option<Arc<dyn DataSource>>,
    results: Option<ResultRecorder>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        run: Arc<RunContext>,
        registry: Arc<TestRegistry>,
        dispatcher: Arc<Dispatcher>,
        data: Arc<TestDataSet>,
    ) -> Self {
        let retry = RetryPolicy::new(run.retry_enabled);
        Self {
            run,
            registry,
            dispatcher,
            data,
            retry,
            workers: DEFAULT_WORKERS,
            data_source: None,
            results: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the pool size; values below one are raised to one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Source for ad-hoc lookups from case bodies.
    pub fn with_data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.data_source = Some(source);
        self
    }

    /// Records every terminal status in the execution history table.
    pub fn with_results(mut self, results: ResultRecorder) -> Self {
        self.results = Some(results);
        self
    }

    /// Token that stops scheduling further cases and iterations.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs one suite: selection, parallel execution, report collection.
    pub async fn run(&self, runner: &RunnerList) -> Result<SuiteReport> {
        let sink = ReporterSink::new();
        let suite_name = format!("{} - {}", self.run.run_manager, self.run.service_name);
        sink.start_suite(&suite_name)?;

        let schedule = Schedule::select(&self.registry, runner);
        info!(
            suite = %suite_name,
            cases = schedule.len(),
            workers = self.workers,
            retry = self.retry.enabled,
            "Starting execution"
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut fatal: Option<HarnessError> = None;

        for scheduled in schedule.into_cases() {
            let permit = tokio::select! {
                () = self.cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.map_err(|_| {
                    HarnessError::Reporter("worker pool closed".to_string())
                })?,
            };
            let handle = match sink.handle() {
                Ok(handle) => handle,
                Err(e) => {
                    self.cancel.cancel();
                    fatal = Some(e);
                    break;
                }
            };

            let worker = self.worker();
            tasks.spawn(async move {
                let _permit = permit;
                worker.run_case(scheduled, handle).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, kind = %e.kind(), "Run aborted");
                    self.cancel.cancel();
                    fatal.get_or_insert(e);
                }
                Err(e) => warn!(error = %e, "Case task ended abnormally"),
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        sink.end_suite()
    }

    fn worker(&self) -> Worker {
        Worker {
            run: Arc::clone(&self.run),
            dispatcher: Arc::clone(&self.dispatcher),
            data: Arc::clone(&self.data),
            retry: self.retry,
            data_source: self.data_source.clone(),
            results: self.results.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// State a case task needs, detached from the engine's lifetime.
struct Worker {
    run: Arc<RunContext>,
    dispatcher: Arc<Dispatcher>,
    data: Arc<TestDataSet>,
    retry: RetryPolicy,
    data_source: Option<Arc<dyn DataSource>>,
    results: Option<ResultRecorder>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run_case(&self, scheduled: ScheduledCase, mut handle: ReporterHandle) -> Result<()> {
        let body = scheduled.case.body();
        let mut controller = self.retry.controller();

        for first in binder::iterations(&scheduled, &self.data) {
            controller.reset();
            let mut iteration = first;

            loop {
                if self.cancel.is_cancelled() {
                    debug!(case = %iteration, "Cancelled before start");
                    return Ok(());
                }
                controller.begin_attempt();
                handle.start_case(&iteration)?;

                let outcome = {
                    let mut ctx = CaseContext {
                        iteration: &iteration,
                        run: &self.run,
                        dispatcher: &self.dispatcher,
                        reporter: &mut handle,
                        data_source: self.data_source.as_deref(),
                    };
                    body.run(&mut ctx).await
                };

                let error = outcome.err();
                let status = if error.is_some() || handle.has_failures() {
                    CaseStatus::Fail
                } else if handle.has_skips() {
                    CaseStatus::Skip
                } else {
                    CaseStatus::Pass
                };
                handle.end_case(status, error.as_ref())?;

                let retryable = match error {
                    Some(e) if e.is_fatal() => {
                        self.cancel.cancel();
                        return Err(e);
                    }
                    Some(e) => e.is_retryable(),
                    None => true,
                };
                if status == CaseStatus::Fail && controller.should_retry(retryable) {
                    handle.mark_retrying();
                    info!(case = %iteration, "Retrying failed iteration");
                    iteration = iteration.next_attempt();
                    continue;
                }

                self.record(&iteration, status).await;
                break;
            }
        }
        Ok(())
    }

    async fn record(&self, iteration: &Iteration, status: CaseStatus) {
        let Some(results) = &self.results else {
            return;
        };
        if let Err(e) = results
            .persist(
                iteration.descriptor.method_name.clone(),
                status,
                chrono::Local::now(),
            )
            .await
        {
            warn!(case = %iteration, error = %e, "Could not record execution result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CaseBody;
    use crate::config::ConfigRegistry;
    use crate::datasource::{DataRow, Database, SqliteDatabase};
    use crate::dispatcher::TokenStore;
    use crate::registry::TestCase;
    use crate::reporter::StepLevel;
    use crate::reporter::tests::sample_context;
    use crate::runner_list::RunnerEntry;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Fails with the produced error until `passes_on` attempts have been made.
    struct Flaky {
        calls: AtomicU32,
        passes_on: u32,
        error: fn() -> HarnessError,
    }

    impl Flaky {
        fn new(passes_on: u32, error: fn() -> HarnessError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                passes_on,
                error,
            }
        }
    }

    #[async_trait]
    impl CaseBody for Flaky {
        async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < self.passes_on {
                return Err((self.error)());
            }
            ctx.reporter.pass("recovered");
            Ok(())
        }
    }

    struct SoftFail;

    #[async_trait]
    impl CaseBody for SoftFail {
        async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
            ctx.reporter.fail("status mismatch", None);
            ctx.reporter.info("kept going");
            Ok(())
        }
    }

    struct Skipper;

    #[async_trait]
    impl CaseBody for Skipper {
        async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
            ctx.reporter.skip("not applicable in this environment");
            Ok(())
        }
    }

    /// Records the `ndc` column of every row it sees.
    struct RowRecorder(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl CaseBody for RowRecorder {
        async fn run(&self, ctx: &mut CaseContext<'_>) -> Result<()> {
            let ndc = ctx.value_or("ndc", "<none>");
            self.0.lock().unwrap().push(ndc);
            Ok(())
        }
    }

    /// Tracks how many bodies run at once.
    struct Gauge {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CaseBody for Gauge {
        async fn run(&self, _ctx: &mut CaseContext<'_>) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dispatcher() -> Arc<Dispatcher> {
        let config = ConfigRegistry::from_pairs([("auth_type", "basic"), ("log_response", "no")]);
        Arc::new(Dispatcher::from_config(Arc::new(config), Arc::new(TokenStore::new())).unwrap())
    }

    fn engine(cases: Vec<TestCase>, data: TestDataSet) -> Engine {
        let mut registry = TestRegistry::new();
        registry.register_all(cases);
        Engine::new(
            Arc::new(sample_context(Path::new("/work"))),
            Arc::new(registry),
            dispatcher(),
            Arc::new(data),
        )
    }

    fn runner(names: &[&str]) -> RunnerList {
        RunnerList::new(
            "Smoke",
            names
                .iter()
                .enumerate()
                .map(|(i, name)| RunnerEntry::new(*name, true, i as i64, 1))
                .collect(),
        )
    }

    fn transport() -> HarnessError {
        HarnessError::Transport("HTTP 500".to_string())
    }

    #[tokio::test]
    async fn test_retry_recovers_on_second_attempt() {
        let engine = engine(
            vec![TestCase::new("TC_Flaky", Flaky::new(2, transport))],
            TestDataSet::empty("QA"),
        )
        .with_retry(RetryPolicy::new(true));

        let report = engine.run(&runner(&["TC_Flaky"])).await.unwrap();
        let attempts: Vec<(u32, CaseStatus)> =
            report.cases.iter().map(|c| (c.attempt, c.status)).collect();
        assert_eq!(attempts, [(1, CaseStatus::Fail), (2, CaseStatus::Pass)]);
    }

    #[tokio::test]
    async fn test_retry_disabled_runs_once() {
        let engine = engine(
            vec![TestCase::new("TC_Flaky", Flaky::new(2, transport))],
            TestDataSet::empty("QA"),
        )
        .with_retry(RetryPolicy::disabled());

        let report = engine.run(&runner(&["TC_Flaky"])).await.unwrap();
        assert_eq!(report.total(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.cases[0].error.as_deref(), Some("transport error: HTTP 500"));
    }

    #[tokio::test]
    async fn test_templating_errors_are_not_retried() {
        let engine = engine(
            vec![TestCase::new(
                "TC_Payload",
                Flaky::new(3, || HarnessError::Templating("bad template".into())),
            )],
            TestDataSet::empty("QA"),
        )
        .with_retry(RetryPolicy::new(true));

        let report = engine.run(&runner(&["TC_Payload"])).await.unwrap();
        assert_eq!(report.total(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let engine = engine(
            vec![TestCase::new("TC_Down", Flaky::new(u32::MAX, transport))],
            TestDataSet::empty("QA"),
        )
        .with_retry(RetryPolicy::new(true).with_max_attempts(3));

        let report = engine.run(&runner(&["TC_Down"])).await.unwrap();
        assert_eq!(report.total(), 3);
        assert_eq!(report.failed(), 3);
    }

    #[tokio::test]
    async fn test_soft_fail_and_skip_statuses() {
        let engine = engine(
            vec![
                TestCase::new("TC_Soft", SoftFail),
                TestCase::new("TC_Skip", Skipper),
            ],
            TestDataSet::empty("QA"),
        );

        let report = engine.run(&runner(&["TC_Soft", "TC_Skip"])).await.unwrap();
        let soft = report.cases.iter().find(|c| c.case == "TC_Soft").unwrap();
        assert_eq!(soft.status, CaseStatus::Fail);
        assert_eq!(soft.steps(StepLevel::Info).collect::<Vec<_>>(), ["kept going"]);
        let skip = report.cases.iter().find(|c| c.case == "TC_Skip").unwrap();
        assert_eq!(skip.status, CaseStatus::Skip);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_run() {
        let engine = engine(
            vec![TestCase::new(
                "TC_Config",
                Flaky::new(2, || HarnessError::MissingConfig("open_erx_base_url".into())),
            )],
            TestDataSet::empty("QA"),
        )
        .with_retry(RetryPolicy::new(true));

        let err = engine.run(&runner(&["TC_Config"])).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(engine.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_iterations_follow_bound_rows() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let data = TestDataSet {
            environment: "QA".to_string(),
            groups: vec![(
                "rx".to_string(),
                vec![
                    DataRow::from_pairs([("testcasename", "TC_Rows"), ("execute", "yes"), ("ndc", "A")]),
                    DataRow::from_pairs([("testcasename", "TC_Rows"), ("execute", "no"), ("ndc", "B")]),
                    DataRow::from_pairs([("testcasename", "tc_rows"), ("execute", "yes"), ("ndc", "C")]),
                ],
            )],
        };
        let engine = engine(vec![TestCase::new("TC_Rows", RowRecorder(seen.clone()))], data);
        let list = RunnerList::new("Smoke", vec![RunnerEntry::new("TC_Rows", true, 1, 2)]);

        let report = engine.run(&list).await.unwrap();
        assert_eq!(report.passed(), 4);
        assert_eq!(*seen.lock().unwrap(), ["A", "C", "A", "C"]);
    }

    #[tokio::test]
    async fn test_pool_size_bounds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let names: Vec<String> = (0..8).map(|i| format!("TC_{}", i)).collect();
        let cases = names
            .iter()
            .map(|name| {
                TestCase::new(
                    name.as_str(),
                    Gauge {
                        active: active.clone(),
                        peak: peak.clone(),
                    },
                )
            })
            .collect();
        let engine = engine(cases, TestDataSet::empty("QA")).with_workers(3);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        let report = engine.run(&runner(&refs)).await.unwrap();
        assert_eq!(report.passed(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_empty_runner_list_yields_empty_report() {
        let engine = engine(vec![TestCase::new("TC_A", SoftFail)], TestDataSet::empty("QA"));
        let report = engine.run(&RunnerList::new("Smoke", Vec::new())).await.unwrap();
        assert_eq!(report.total(), 0);
    }

    #[tokio::test]
    async fn test_terminal_statuses_are_recorded() {
        let db = Arc::new(SqliteDatabase::in_memory().unwrap());
        let engine = engine(
            vec![TestCase::new("TC_Flaky", Flaky::new(2, transport))],
            TestDataSet::empty("QA"),
        )
        .with_retry(RetryPolicy::new(true))
        .with_results(ResultRecorder::new(db.clone()).unwrap());

        engine.run(&runner(&["TC_Flaky"])).await.unwrap();
        let rows = db
            .query("SELECT test_method_name, test_status FROM test_execution_reports")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("test_status").as_deref(), Some("PASS"));
    }
}
