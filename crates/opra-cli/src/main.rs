//! # opra
//!
//! Command-line runner of the OPRA API test harness.
//!
//! Loads the properties file, resolves the runner list and test data (from
//! the SQL database when reachable, otherwise from the cached JSON files),
//! runs the selected cases on a worker pool and writes the reports.
//!
//! ## Usage
//!
//! ```bash
//! # Run with config/config.properties in the current directory
//! opra
//!
//! # Override environment and run-manager, 8 workers, JSON report only
//! opra --env QA --run-manager Smoke --workers 8 --report json
//!
//! # List the bundled cases
//! opra --list
//! ```

mod display;
mod suites;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use opra_core::engine::DEFAULT_WORKERS;
use opra_core::{
    ConfigKey, ConfigRegistry, DataSource, Dispatcher, EmailSettings, EmailSummary, Engine,
    HtmlReportRenderer, JsonReportRenderer, LogMailer, Mailer, QueryCatalog, ReportRenderer,
    ResultRecorder, RetryPolicy, RunContext, RunMode, RunnerList, SqlDataSource, SqliteDatabase,
    TestDataCache, TestDataSet, TokenStore, load_test_data,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Where the runner list is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RunnerSource {
    /// Runner-list queries, written through to the JSON file
    #[default]
    Database,
    /// The JSON file only
    Json,
}

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    /// Main and failed-only HTML reports
    Html,
    /// JSON report
    Json,
    /// HTML and JSON
    #[default]
    Both,
}

impl ReportFormat {
    fn renderers(self) -> Vec<Box<dyn ReportRenderer>> {
        match self {
            ReportFormat::Html => vec![Box::new(HtmlReportRenderer)],
            ReportFormat::Json => vec![Box::new(JsonReportRenderer)],
            ReportFormat::Both => vec![Box::new(HtmlReportRenderer), Box::new(JsonReportRenderer)],
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "opra", version, about = "Data-driven API test runner")]
struct Cli {
    /// Path to the properties file
    #[arg(short, long, default_value = "config/config.properties")]
    config: PathBuf,

    /// Project root holding testdata/, payloads/ and reports/
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Override the `env` key
    #[arg(long)]
    env: Option<String>,

    /// Override the `runmanager` key
    #[arg(long)]
    run_manager: Option<String>,

    /// Worker pool size
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// List the bundled cases without running them
    #[arg(long)]
    list: bool,

    /// Runner-list source
    #[arg(long, value_enum, default_value_t = RunnerSource::Database)]
    runner_source: RunnerSource,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Both)]
    report: ReportFormat,

    /// Open the main report in the default browser when done
    #[arg(long)]
    open_report: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if cli.list {
        display::print_cases(&suites::registry(), listed_runner(&cli).as_ref());
        return Ok(());
    }

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let ctx = Arc::new(
        RunContext::from_config(&config, &cli.root).context("Failed to build run context")?,
    );
    display::print_header(&ctx);

    let source = open_data_source(&config, &ctx)?;
    let runner = resolve_runner_list(cli.runner_source, source.as_ref(), &ctx);

    let cache = TestDataCache::new();
    let loader = {
        let source = source.clone();
        let environment = ctx.environment.clone();
        let file = ctx.test_data_file();
        move || load_test_data(source.as_ref(), &environment, &file)
    };
    let data = match cache.get_or_load(&ctx.environment, loader).await {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "No test data available; cases run once with empty rows");
            Arc::new(TestDataSet::empty(&ctx.environment))
        }
    };

    let dispatcher = Dispatcher::from_config(Arc::clone(&config), Arc::new(TokenStore::new()))
        .context("Failed to configure dispatcher")?;
    let mut engine = Engine::new(
        Arc::clone(&ctx),
        Arc::new(suites::registry()),
        Arc::new(dispatcher),
        data,
    )
    .with_retry(RetryPolicy::from_config(&config)?)
    .with_workers(cli.workers);

    if let Some(source) = &source {
        match ResultRecorder::new(Arc::clone(source.database())) {
            Ok(results) => engine = engine.with_results(results),
            Err(e) => warn!(error = %e, "Execution history will not be recorded"),
        }
        engine = engine.with_data_source(Arc::new(source.clone()) as Arc<dyn DataSource>);
    }

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; letting in-flight iterations finish");
            cancel.cancel();
        }
    });

    let report = engine.run(&runner).await.context("Run aborted")?;

    let mut written = Vec::new();
    for renderer in cli.report.renderers() {
        written.extend(
            renderer
                .render(&report, &ctx)
                .context("Failed to write report")?,
        );
    }

    send_summary(&config, &report, &ctx, &written)?;
    display::print_summary(&report, &written);

    if cli.open_report
        && let Some(main) = written.first()
        && let Err(e) = open::that(main)
    {
        eprintln!("{} Could not open report: {}", "Warning:".yellow(), e);
    }
    Ok(())
}

/// Runner list for `--list`, read from the JSON file when the config allows.
fn listed_runner(cli: &Cli) -> Option<RunnerList> {
    let config = load_config(cli).ok()?;
    let ctx = RunContext::from_config(&config, &cli.root).ok()?;
    RunnerList::load(&ctx.runner_list_file(), &ctx.run_manager).ok()
}

fn load_config(cli: &Cli) -> Result<Arc<ConfigRegistry>> {
    let mut config = ConfigRegistry::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(env) = &cli.env {
        config = config.with_override(ConfigKey::Env, env.as_str());
    }
    if let Some(run_manager) = &cli.run_manager {
        config = config.with_override(ConfigKey::RunManager, run_manager.as_str());
    }
    config.validate_required()?;
    info!(keys = config.len(), "Configuration loaded");
    Ok(Arc::new(config))
}

/// SQLite file named by `db_url`, relative paths resolved against the root.
fn database_path(db_url: &str, root: &Path) -> PathBuf {
    let raw = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .unwrap_or(db_url);
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Opens the query catalog and database.
///
/// In local mode an unusable database aborts the run; in remote mode the
/// run continues on the cached JSON files.
fn open_data_source(config: &ConfigRegistry, ctx: &RunContext) -> Result<Option<SqlDataSource>> {
    let local = ctx.run_mode == RunMode::Local;

    let Some(db_url) = config.get_optional(ConfigKey::DbUrl) else {
        if local {
            bail!("db_url is required in local run mode");
        }
        warn!("db_url not set; using cached test data files");
        return Ok(None);
    };

    let opened = QueryCatalog::load(&ctx.paths.queries_file()).and_then(|catalog| {
        let db = SqliteDatabase::open(&database_path(db_url, &ctx.paths.root))?;
        Ok(SqlDataSource::new(catalog, Arc::new(db)))
    });
    match opened {
        Ok(source) => Ok(Some(source)),
        Err(e) if local => Err(e).context("Database unavailable in local run mode"),
        Err(e) => {
            warn!(error = %e, "Database unavailable; using cached test data files");
            Ok(None)
        }
    }
}

/// Runner list from the database (persisted to disk) or the JSON file.
/// Any failure leaves an empty list, which selects nothing.
fn resolve_runner_list(
    kind: RunnerSource,
    source: Option<&SqlDataSource>,
    ctx: &RunContext,
) -> RunnerList {
    let file = ctx.runner_list_file();

    if kind == RunnerSource::Database
        && let Some(source) = source
    {
        match RunnerList::from_database(
            &ctx.run_manager,
            source.catalog(),
            source.database().as_ref(),
        ) {
            Ok(list) => {
                if let Err(e) = list.write(&file) {
                    warn!(error = %e, "Could not persist runner list");
                }
                return list;
            }
            Err(e) => warn!(error = %e, "Runner-list queries failed; reading the file"),
        }
    }

    RunnerList::load(&file, &ctx.run_manager).unwrap_or_else(|e| {
        warn!(error = %e, "No runner list available; nothing will run");
        RunnerList::new(ctx.run_manager.clone(), Vec::new())
    })
}

fn send_summary(
    config: &ConfigRegistry,
    report: &opra_core::SuiteReport,
    ctx: &RunContext,
    written: &[PathBuf],
) -> Result<()> {
    let Some(settings) = EmailSettings::from_config(config)? else {
        return Ok(());
    };
    let attachments = written
        .iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == "html"))
        .take(1)
        .cloned()
        .collect();
    let summary = EmailSummary::build(&settings, report, ctx, attachments);
    if let Err(e) = LogMailer.send(&settings, &summary) {
        warn!(error = %e, "Email summary not sent");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opra_core::RunnerEntry;
    use tempfile::TempDir;

    fn context(root: &Path) -> RunContext {
        let config = ConfigRegistry::from_pairs([
            ("env", "QA"),
            ("runmanager", "Smoke"),
            ("service_name", "ERX"),
            ("run_mode", "remote"),
            ("retry", "no"),
            ("log_response", "no"),
            ("override_reports", "no"),
        ]);
        RunContext::from_config(&config, root).unwrap()
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["opra"]);
        assert_eq!(cli.config, PathBuf::from("config/config.properties"));
        assert_eq!(cli.workers, DEFAULT_WORKERS);
        assert_eq!(cli.runner_source, RunnerSource::Database);
        assert_eq!(cli.report, ReportFormat::Both);
        assert!(!cli.list && !cli.open_report);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "opra",
            "--env",
            "UAT",
            "--run-manager",
            "Nightly",
            "-w",
            "8",
            "--report",
            "json",
            "--runner-source",
            "json",
        ]);
        assert_eq!(cli.env.as_deref(), Some("UAT"));
        assert_eq!(cli.run_manager.as_deref(), Some("Nightly"));
        assert_eq!(cli.workers, 8);
        assert_eq!(cli.report.renderers().len(), 1);
        assert_eq!(cli.runner_source, RunnerSource::Json);
    }

    #[test]
    fn test_database_path_resolution() {
        let root = Path::new("/work");
        assert_eq!(database_path("data/opra.db", root), Path::new("/work/data/opra.db"));
        assert_eq!(database_path("sqlite:///tmp/x.db", root), Path::new("/tmp/x.db"));
        assert_eq!(database_path("/abs/y.db", root), Path::new("/abs/y.db"));
    }

    #[test]
    fn test_remote_mode_without_database_falls_back() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let config = ConfigRegistry::default();
        assert!(open_data_source(&config, &ctx).unwrap().is_none());
    }

    #[test]
    fn test_local_mode_requires_database() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(dir.path());
        ctx.run_mode = RunMode::Local;
        assert!(open_data_source(&ConfigRegistry::default(), &ctx).is_err());
    }

    #[test]
    fn test_runner_list_falls_back_to_file_then_empty() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());

        let empty = resolve_runner_list(RunnerSource::Database, None, &ctx);
        assert!(empty.is_empty());

        RunnerList::new("Smoke", vec![RunnerEntry::new("TC001", true, 1, 1)])
            .write(&ctx.runner_list_file())
            .unwrap();
        let list = resolve_runner_list(RunnerSource::Json, None, &ctx);
        assert_eq!(list.len(), 1);
        assert!(list.entry_for("tc001").is_some());
    }

    #[test]
    fn test_bundled_registry_is_not_empty() {
        assert!(!suites::registry().is_empty());
    }
}
