//! Machine-readable report.

use super::{ReportRenderer, SuiteReport};
use crate::context::RunContext;
use crate::error::{HarnessError, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Writes the suite, its totals and the flat event stream as pretty JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReportRenderer;

#[derive(Serialize)]
struct Totals {
    total: usize,
    passed: usize,
    failed: usize,
    skipped: usize,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    environment: &'a str,
    run_manager: &'a str,
    service: &'a str,
    totals: Totals,
    #[serde(flatten)]
    suite: &'a SuiteReport,
}

impl ReportRenderer for JsonReportRenderer {
    fn render(&self, report: &SuiteReport, ctx: &RunContext) -> Result<Vec<PathBuf>> {
        let path = ctx.report_file("json");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HarnessError::Reporter(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let document = JsonReport {
            environment: &ctx.environment,
            run_manager: &ctx.run_manager,
            service: &ctx.service_name,
            totals: Totals {
                total: report.total(),
                passed: report.passed(),
                failed: report.failed(),
                skipped: report.skipped(),
            },
            suite: report,
        };
        let text = serde_json::to_string_pretty(&document)
            .map_err(|e| HarnessError::Reporter(format!("cannot serialize report: {}", e)))?;
        std::fs::write(&path, text).map_err(|e| {
            HarnessError::Reporter(format!("cannot write {}: {}", path.display(), e))
        })?;

        info!(path = %path.display(), "JSON report written");
        Ok(vec![path])
    }
}
