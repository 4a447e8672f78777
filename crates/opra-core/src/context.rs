//! Per-run context.
//!
//! Everything that identifies the current run (environment, run-manager,
//! service label, flags and on-disk locations) lives in a [`RunContext`] value
//! that is built once from the configuration and handed to every component.

use crate::config::{ConfigKey, ConfigRegistry};
use crate::error::{HarnessError, Result};
use chrono::{DateTime, Local};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

static UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"));

/// Where the harness reads its SQL from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Database on the tester's machine; an unreachable database aborts the run.
    Local,
    /// Shared database; when unreachable the cached JSON files are used.
    Remote,
}

impl FromStr for RunMode {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(RunMode::Local),
            "remote" => Ok(RunMode::Remote),
            other => Err(HarnessError::MissingConfig(format!(
                "run_mode must be 'local' or 'remote', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Local => write!(f, "local"),
            RunMode::Remote => write!(f, "remote"),
        }
    }
}

/// On-disk layout of a harness project, relative to its root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessPaths {
    pub root: PathBuf,
    pub test_data_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub generated_dir: PathBuf,
    pub report_dir: PathBuf,
}

impl HarnessPaths {
    /// Standard layout: `testdata/`, `payloads/`, `payloads/generated/`, `reports/`.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            test_data_dir: root.join("testdata"),
            templates_dir: root.join("payloads"),
            generated_dir: root.join("payloads").join("generated"),
            report_dir: root.join("reports"),
            root,
        }
    }

    /// The SQL queries document.
    pub fn queries_file(&self) -> PathBuf {
        self.test_data_dir.join("queries.json")
    }

    /// Template path for a payload name such as `appointment`.
    pub fn template(&self, name: &str) -> PathBuf {
        self.templates_dir.join(format!("{}.json", name))
    }

    /// Output path for a generated payload.
    pub fn generated(&self, name: &str) -> PathBuf {
        self.generated_dir.join(format!("{}.json", name))
    }
}

/// Identity, flags and paths of one harness run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub environment: String,
    pub run_manager: String,
    pub service_name: String,
    pub run_mode: RunMode,
    pub retry_enabled: bool,
    pub log_response: bool,
    pub override_reports: bool,
    pub paths: HarnessPaths,
    pub started_at: DateTime<Local>,
}

impl RunContext {
    /// Builds the context from configuration, failing on any missing key.
    pub fn from_config(config: &ConfigRegistry, root: &Path) -> Result<Self> {
        Ok(Self {
            environment: config.get(ConfigKey::Env)?.to_string(),
            run_manager: config.get(ConfigKey::RunManager)?.to_string(),
            service_name: config.get(ConfigKey::ServiceName)?.to_string(),
            run_mode: config.get(ConfigKey::RunMode)?.parse()?,
            retry_enabled: config.flag(ConfigKey::Retry)?,
            log_response: config.flag(ConfigKey::LogResponse)?,
            override_reports: config.flag(ConfigKey::OverrideReports)?,
            paths: HarnessPaths::under(root),
            started_at: Local::now(),
        })
    }

    /// Per-environment test-data document, e.g. `testdata/QA_testdata.json`.
    pub fn test_data_file(&self) -> PathBuf {
        self.paths
            .test_data_dir
            .join(format!("{}_testdata.json", sanitize(&self.environment)))
    }

    /// Per-run-manager runner list, e.g. `testdata/Smoke_testcase.json`.
    pub fn runner_list_file(&self) -> PathBuf {
        self.paths
            .test_data_dir
            .join(format!("{}_testcase.json", sanitize(&self.run_manager)))
    }

    /// Main report path: `<run_manager>_<service>_<yyyy-MM-dd_HH-mm-ss>.html`.
    ///
    /// With `override_reports` the timestamp is dropped so every run
    /// replaces the previous report.
    pub fn report_file(&self, extension: &str) -> PathBuf {
        let stem = format!(
            "{}_{}",
            sanitize(&self.run_manager),
            sanitize(&self.service_name)
        );
        let name = if self.override_reports {
            format!("{}.{}", stem, extension)
        } else {
            format!("{}_{}.{}", stem, self.timestamp_label(), extension)
        };
        self.paths.report_dir.join(name)
    }

    /// Failed-only report path beside the main report.
    pub fn failed_report_file(&self) -> PathBuf {
        let main = self.report_file("html");
        let stem = main
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        main.with_file_name(format!("{}_failed.html", stem))
    }

    /// Run start formatted as `yyyy-MM-dd_HH-mm-ss`.
    pub fn timestamp_label(&self) -> String {
        self.started_at.format("%Y-%m-%d_%H-%M-%S").to_string()
    }
}

fn sanitize(label: &str) -> String {
    UNSAFE_FILE_CHARS.replace_all(label.trim(), "_").into_owned()
}
