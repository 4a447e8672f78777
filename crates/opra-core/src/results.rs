//! Execution history stored in the test database.

use crate::datasource::Database;
use crate::error::{HarnessError, Result};
use crate::reporter::CaseStatus;
use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::debug;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS test_execution_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_method_name TEXT NOT NULL,
    test_status TEXT NOT NULL,
    execution_timestamp TEXT NOT NULL
)";

const INSERT_RESULT: &str = "INSERT INTO test_execution_reports \
    (test_method_name, test_status, execution_timestamp) VALUES (?1, ?2, ?3)";

/// Appends terminal case statuses to `test_execution_reports`.
#[derive(Clone)]
pub struct ResultRecorder {
    db: Arc<dyn Database>,
}

impl ResultRecorder {
    /// Creates the table if needed.
    pub fn new(db: Arc<dyn Database>) -> Result<Self> {
        db.execute(CREATE_TABLE, &[])?;
        Ok(Self { db })
    }

    pub fn record(&self, case: &str, status: CaseStatus, at: DateTime<Local>) -> Result<()> {
        let status = status.to_string();
        let at = at.format("%Y-%m-%d %H:%M:%S").to_string();
        self.db.execute(INSERT_RESULT, &[case, &status, &at])?;
        debug!(case = %case, status = %status, "Recorded execution result");
        Ok(())
    }

    /// [`ResultRecorder::record`] on the blocking pool, for async callers.
    pub async fn persist(
        &self,
        case: impl Into<String>,
        status: CaseStatus,
        at: DateTime<Local>,
    ) -> Result<()> {
        let recorder = self.clone();
        let case = case.into();
        tokio::task::spawn_blocking(move || recorder.record(&case, status, at))
            .await
            .map_err(|e| HarnessError::Query(format!("result recording task failed: {}", e)))?
    }
}
