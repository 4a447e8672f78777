//! Binds scheduled cases to their test-data rows.

use crate::datasource::{DataRow, TestDataSet};
use crate::registry::TestCaseDescriptor;
use crate::scheduler::ScheduledCase;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One execution attempt of a case with one data row.
#[derive(Debug, Clone)]
pub struct Iteration {
    pub descriptor: Arc<TestCaseDescriptor>,
    pub row: DataRow,
    /// Zero-based invocation of the case.
    pub invocation: u32,
    /// Zero-based index of the row among the case's bound rows.
    pub row_index: usize,
    /// One-based attempt number.
    pub attempt: u32,
}

impl Iteration {
    /// Same iteration, next attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

impl fmt::Display for Iteration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [run {}, row {}",
            self.descriptor.method_name,
            self.invocation + 1,
            self.row_index + 1
        )?;
        if self.attempt > 1 {
            write!(f, ", attempt {}", self.attempt)?;
        }
        write!(f, "]")
    }
}

/// Rows bound to `descriptor`: matching `testcasename` (ignoring case),
/// `execute == yes`, duplicates removed. Never empty: with no match a single
/// empty row is returned.
pub fn bind_rows(descriptor: &TestCaseDescriptor, data: &TestDataSet) -> Vec<DataRow> {
    let mut rows: Vec<DataRow> = Vec::new();
    for row in data.all_rows() {
        let matches_case = row
            .test_case_name()
            .is_some_and(|name| name.trim().eq_ignore_ascii_case(&descriptor.method_name));
        if matches_case && row.is_executable() && !rows.contains(row) {
            rows.push(row.clone());
        }
    }

    if rows.is_empty() {
        debug!(case = %descriptor.method_name, "No data rows bound; running once with an empty row");
        rows.push(DataRow::new());
    } else {
        debug!(case = %descriptor.method_name, rows = rows.len(), "Bound data rows");
    }
    rows
}

/// Every first-attempt iteration of a scheduled case:
/// `invocation_count × bound rows`, invocation-major.
pub fn iterations(scheduled: &ScheduledCase, data: &TestDataSet) -> Vec<Iteration> {
    let descriptor = Arc::clone(&scheduled.case.descriptor);
    let rows = bind_rows(&descriptor, data);

    (0..scheduled.invocation_count)
        .flat_map(|invocation| {
            let descriptor = Arc::clone(&descriptor);
            rows.iter().enumerate().map(move |(row_index, row)| Iteration {
                descriptor: Arc::clone(&descriptor),
                row: row.clone(),
                invocation,
                row_index,
                attempt: 1,
            })
        })
        .collect()
}
