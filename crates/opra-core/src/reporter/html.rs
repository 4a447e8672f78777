//! Human-readable HTML reports.
//!
//! Two files per run: the full report and a copy restricted to failed nodes.
//! Each node renders as a collapsible `<details>` block listing its steps,
//! request and response logs in commit order.

use super::{CaseNode, CaseStatus, ReportEvent, ReportRenderer, StepLevel, SuiteReport};
use crate::context::RunContext;
use crate::error::{HarnessError, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table.totals td,table.totals th{padding:4px 12px;text-align:left}\
details{border:1px solid #ccc;border-radius:4px;margin:6px 0;padding:6px}\
summary{cursor:pointer;font-weight:bold}\
.pass{color:#2e7d32}.fail{color:#c62828}.skip{color:#9e9e9e}\
.info{color:#1565c0}.warn{color:#ef6c00}.debug{color:#616161}\
pre{background:#f5f5f5;padding:6px;overflow-x:auto;white-space:pre-wrap}\
ul.steps{list-style:none;padding-left:0}";

/// Writes `<report>.html` and `<report>_failed.html`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlReportRenderer;

impl ReportRenderer for HtmlReportRenderer {
    fn render(&self, report: &SuiteReport, ctx: &RunContext) -> Result<Vec<PathBuf>> {
        let main = ctx.report_file("html");
        let failed = ctx.failed_report_file();

        write_file(&main, &render_document(report, ctx))?;
        write_file(&failed, &render_document(&report.failed_only(), ctx))?;

        info!(
            report = %main.display(),
            failed = %failed.display(),
            "HTML reports written"
        );
        Ok(vec![main, failed])
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            HarnessError::Reporter(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    std::fs::write(path, contents)
        .map_err(|e| HarnessError::Reporter(format!("cannot write {}: {}", path.display(), e)))
}

/// Renders a whole report page.
pub(crate) fn render_document(report: &SuiteReport, ctx: &RunContext) -> String {
    let mut out = String::new();
    let title = escape(&format!("{} - {}", report.name, ctx.service_name));
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title>\
         <style>{STYLE}</style></head><body>\n<h1>{title}</h1>\n"
    );

    let _ = write!(
        out,
        "<table class=\"totals\">\
         <tr><th>Environment</th><td>{}</td></tr>\
         <tr><th>Run manager</th><td>{}</td></tr>\
         <tr><th>Run mode</th><td>{}</td></tr>\
         <tr><th>Started</th><td>{}</td></tr>\
         <tr><th>Finished</th><td>{}</td></tr>\
         <tr><th>Total</th><td>{}</td></tr>\
         <tr><th class=\"pass\">Passed</th><td>{}</td></tr>\
         <tr><th class=\"fail\">Failed</th><td>{}</td></tr>\
         <tr><th class=\"skip\">Skipped</th><td>{}</td></tr>\
         </table>\n",
        escape(&ctx.environment),
        escape(&ctx.run_manager),
        ctx.run_mode,
        report.started_at.format("%Y-%m-%d %H:%M:%S"),
        report.finished_at.format("%Y-%m-%d %H:%M:%S"),
        report.total(),
        report.passed(),
        report.failed(),
        report.skipped(),
    );

    if report.cases.is_empty() {
        out.push_str("<p>No cases to show.</p>\n");
    }
    for node in &report.cases {
        render_node(&mut out, node);
    }
    out.push_str("</body></html>\n");
    out
}

fn render_node(out: &mut String, node: &CaseNode) {
    let class = status_class(node.status);
    let open = if node.status == CaseStatus::Fail { " open" } else { "" };
    let _ = write!(
        out,
        "<details{open}><summary><span class=\"{class}\">{}</span> {} <small>({} ms)</small></summary>\n",
        node.status,
        escape(&node.label),
        node.duration_ms,
    );

    let mut meta = Vec::new();
    if !node.authors.is_empty() {
        meta.push(format!("Authors: {}", escape(&node.authors.join(", "))));
    }
    if !node.categories.is_empty() {
        let categories: Vec<&str> = node.categories.iter().map(|c| c.as_str()).collect();
        meta.push(format!("Categories: {}", categories.join(", ")));
    }
    if !meta.is_empty() {
        let _ = writeln!(out, "<p><small>{}</small></p>", meta.join(" | "));
    }

    out.push_str("<ul class=\"steps\">\n");
    for event in &node.events {
        match event {
            ReportEvent::Step {
                level,
                message,
                detail,
            } => {
                let _ = write!(
                    out,
                    "<li><span class=\"{}\">{}</span> {}",
                    level_class(*level),
                    level,
                    escape(message)
                );
                if let Some(detail) = detail {
                    let _ = write!(out, "<pre>{}</pre>", escape(detail));
                }
                out.push_str("</li>\n");
            }
            ReportEvent::RequestLog(request) => {
                let mut text = format!("{} {}\nAuth: {}\n", request.method, request.url, request.auth);
                for (name, value) in &request.headers {
                    let _ = writeln!(text, "{}: {}", name, value);
                }
                if !request.query.is_empty() {
                    let pairs: Vec<String> =
                        request.query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                    let _ = writeln!(text, "Query: {}", pairs.join("&"));
                }
                if let Some(body) = &request.body {
                    let _ = write!(text, "\n{}", body);
                }
                let _ = writeln!(out, "<li><span class=\"info\">REQUEST</span><pre>{}</pre></li>", escape(&text));
            }
            ReportEvent::ResponseLog(response) => {
                let mut text = format!("Status {} in {} ms\n", response.status, response.elapsed_ms);
                for (name, value) in &response.headers {
                    let _ = writeln!(text, "{}: {}", name, value);
                }
                let _ = write!(text, "\n{}", response.body);
                let _ = writeln!(out, "<li><span class=\"info\">RESPONSE</span><pre>{}</pre></li>", escape(&text));
            }
            ReportEvent::CaseStart { .. }
            | ReportEvent::CaseEnd { .. }
            | ReportEvent::SuiteStart { .. }
            | ReportEvent::SuiteEnd { .. } => {}
        }
    }
    out.push_str("</ul>\n</details>\n");
}

fn status_class(status: CaseStatus) -> &'static str {
    match status {
        CaseStatus::Pass => "pass",
        CaseStatus::Fail => "fail",
        CaseStatus::Skip => "skip",
    }
}

fn level_class(level: StepLevel) -> &'static str {
    match level {
        StepLevel::Pass => "pass",
        StepLevel::Fail => "fail",
        StepLevel::Skip => "skip",
        StepLevel::Warn => "warn",
        StepLevel::Debug => "debug",
        StepLevel::Info | StepLevel::Request | StepLevel::Response => "info",
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::tests::{sample_context, sample_report};
    use tempfile::TempDir;

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_writes_main_and_failed_reports() {
        let dir = TempDir::new().unwrap();
        let ctx = sample_context(dir.path());
        let paths = HtmlReportRenderer.render(&sample_report(), &ctx).unwrap();
        assert_eq!(paths, vec![ctx.report_file("html"), ctx.failed_report_file()]);

        let main = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(main.contains("TC_Search"));
        assert!(main.contains("TC_Detail"));
        assert!(main.contains("Expected &lt;tag&gt; &amp; got none"));
        assert!(!main.contains("<tag>"));

        let failed = std::fs::read_to_string(&paths[1]).unwrap();
        assert!(failed.contains("TC_Detail"));
        assert!(!failed.contains("TC_Search"));
    }

    #[test]
    fn test_empty_report_renders_placeholder() {
        let dir = TempDir::new().unwrap();
        let ctx = sample_context(dir.path());
        let mut no_cases = sample_report();
        no_cases.cases.clear();
        assert!(render_document(&no_cases, &ctx).contains("No cases to show."));
    }
}
