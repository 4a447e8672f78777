//! Terminal output for the runner.

use colored::Colorize;
use opra_core::{CaseStatus, RunContext, RunnerList, SuiteReport, TestRegistry};
use std::path::PathBuf;

pub fn print_header(ctx: &RunContext) {
    println!(
        "\n{} {}",
        "OPRA API Test Harness".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("{}", "━".repeat(40).dimmed());
    println!(
        "{}",
        format!(
            "env: {}  run-manager: {}  service: {}  mode: {}",
            ctx.environment, ctx.run_manager, ctx.service_name, ctx.run_mode
        )
        .dimmed()
    );
}

/// Lists registered cases with authors, categories and, when a runner list
/// is available, whether it selects them.
pub fn print_cases(registry: &TestRegistry, runner: Option<&RunnerList>) {
    println!("{}\n", "Registered cases:".bold());
    for case in registry.cases() {
        let categories: Vec<&str> = case
            .descriptor
            .categories
            .iter()
            .map(|c| c.as_str())
            .collect();
        let marker = match runner.map(|r| r.entry_for(case.name())) {
            Some(Some(entry)) if entry.is_executable() => "●".green(),
            Some(_) => "○".dimmed(),
            None => " ".normal(),
        };
        println!(
            "  {} {}  {}",
            marker,
            case.name().cyan(),
            categories.join(", ").dimmed()
        );
        if !case.descriptor.authors.is_empty() {
            println!("      by {}", case.descriptor.authors.join(", ").dimmed());
        }
        if !case.descriptor.description.is_empty() {
            println!("      {}", case.descriptor.description.dimmed());
        }
    }
    println!(
        "\n  {}",
        format!(
            "Total: {} case{}",
            registry.len(),
            if registry.len() == 1 { "" } else { "s" }
        )
        .dimmed()
    );
    if let Some(runner) = runner {
        println!(
            "  {}",
            format!("● selected by run-manager '{}'", runner.run_manager).dimmed()
        );
    }
}

pub fn print_summary(report: &SuiteReport, written: &[PathBuf]) {
    println!();
    for node in &report.cases {
        let status = match node.status {
            CaseStatus::Pass => "PASS".green().bold(),
            CaseStatus::Fail => "FAIL".red().bold(),
            CaseStatus::Skip => "SKIP".yellow().bold(),
        };
        println!(
            "  {}  {} {}",
            status,
            node.label,
            format!("({} ms)", node.duration_ms).dimmed()
        );
        if let Some(error) = &node.error {
            println!("        {}", error.red());
        }
    }

    println!("{}", "━".repeat(40).dimmed());
    let failed = report.failed();
    let line = format!(
        "{} total, {} passed, {} failed, {} skipped",
        report.total(),
        report.passed(),
        failed,
        report.skipped()
    );
    if failed == 0 {
        println!("{}", line.green().bold());
    } else {
        println!("{}", line.red().bold());
    }

    for path in written {
        println!("{}", format!("Report written: {}", path.display()).dimmed());
    }
}
