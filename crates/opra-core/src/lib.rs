//! # opra-core
//!
//! Test-execution engine of the OPRA API test harness.
//!
//! A run is driven by three inputs: a properties file, a runner list naming
//! the cases to execute, and environment-scoped test data. Registered case
//! bodies exercise remote HTTP services through the dispatcher and record
//! their checks on a per-worker reporter handle.
//!
//! ```text
//!   config.properties ──► ConfigRegistry ──► RunContext
//!                                  │
//!   runner list ──► Schedule ◄── TestRegistry
//!                      │
//!                      ▼
//!   test data ──► Engine (worker pool) ──► CaseBody ──► Dispatcher ──► HTTP
//!                      │                      │
//!                      │                      └──► Verifier ──┐
//!                      ▼                                      ▼
//!                 ReporterSink ◄──────────────────── ReporterHandle
//!                      │
//!                      ▼
//!            HTML / JSON reports, email summary, result history
//! ```

pub mod assertions;
pub mod binder;
pub mod case;
pub mod config;
pub mod context;
pub mod datasource;
pub mod dispatcher;
pub mod email;
pub mod engine;
mod error;
pub mod generators;
pub mod payloads;
pub mod registry;
pub mod reporter;
pub mod results;
pub mod retry;
pub mod runner_list;
pub mod scheduler;
mod service;
pub mod templater;

pub use assertions::{MAX_LIMIT, Verifier};
pub use binder::Iteration;
pub use case::{CaseBody, CaseContext};
pub use config::{ConfigKey, ConfigRegistry};
pub use context::{HarnessPaths, RunContext, RunMode};
pub use datasource::{
    DataRow, DataSource, Database, QueryCatalog, SqlDataSource, SqliteDatabase, TestDataCache,
    TestDataSet, load_test_data,
};
pub use dispatcher::{
    Auth, AuthKind, Dispatcher, HttpMethod, RequestPlan, ResponseRecord, TokenStore,
};
pub use email::{EmailSettings, EmailSummary, LogMailer, Mailer};
pub use engine::Engine;
pub use error::{ErrorKind, HarnessError, Result};
pub use registry::{Category, TestCase, TestCaseDescriptor, TestRegistry};
pub use reporter::{
    CaseStatus, HtmlReportRenderer, JsonReportRenderer, ReportRenderer, ReporterHandle,
    ReporterSink, StepLevel, SuiteReport,
};
pub use results::ResultRecorder;
pub use retry::RetryPolicy;
pub use runner_list::{RunnerEntry, RunnerList};
pub use scheduler::Schedule;
pub use service::Service;
pub use templater::Replacements;
