//! SQL-backed test data.
//!
//! Queries are kept in a JSON catalog grouped by purpose:
//!
//! ```json
//! { "selectqueries":     { "prescriptions": "SELECT ..." },
//!   "runnerlistqueries": { "testCaseLists": "SELECT ..." } }
//! ```
//!
//! Results are returned as [`DataRow`]s and materialized once per run into
//! the per-environment test-data document `{ ENV: { group: [rows] } }`.

use crate::config::is_yes;
use crate::error::{HarnessError, Result};
use crate::templater::{read_document, write_document};
use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Column holding the case a data row belongs to.
pub const TEST_CASE_COLUMN: &str = "testcasename";
/// Column holding the row's `yes|no` execute flag.
pub const EXECUTE_COLUMN: &str = "execute";

/// Ordered mapping of column name to scalar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataRow(Map<String, Value>);

impl DataRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a row from string pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// String form of a column: strings as-is, other scalars via their JSON text.
    pub fn text(&self, column: &str) -> Option<String> {
        self.0.get(column).map(value_text)
    }

    /// The `testcasename` column, if any.
    pub fn test_case_name(&self) -> Option<String> {
        self.text(TEST_CASE_COLUMN)
    }

    /// Whether the row's execute flag is `yes`.
    pub fn is_executable(&self) -> bool {
        self.text(EXECUTE_COLUMN).is_some_and(|v| is_yes(&v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Row as `column → string`.
    pub fn to_string_map(&self) -> HashMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), value_text(v)))
            .collect()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Text of a JSON value as it appears to testers: strings unquoted.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A database connection able to run read queries.
///
/// Implementations are synchronous; the engine calls them outside any shared
/// lock.
pub trait Database: Send + Sync {
    /// Runs `sql` and returns every row labelled by column name.
    fn query(&self, sql: &str) -> Result<Vec<DataRow>>;

    /// Runs a statement with positional text parameters, returning affected rows.
    fn execute(&self, sql: &str, params: &[&str]) -> Result<usize>;
}

/// SQLite implementation of [`Database`].
pub struct SqliteDatabase {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteDatabase {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path).map_err(|e| {
            HarnessError::Query(format!("cannot open database {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Opened SQLite database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(rusqlite::Connection::open_in_memory()?),
        })
    }

    /// Runs a batch of statements, e.g. schema setup.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| HarnessError::Query("database connection poisoned".to_string()))
    }
}

impl Database for SqliteDatabase {
    fn query(&self, sql: &str) -> Result<Vec<DataRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut data = DataRow::new();
            for (idx, column) in columns.iter().enumerate() {
                data.insert(column.clone(), sql_value(row.get_ref(idx)?));
            }
            out.push(data);
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[&str]) -> Result<usize> {
        let conn = self.lock()?;
        let affected = conn.execute(sql, rusqlite::params_from_iter(params.iter()))?;
        Ok(affected)
    }
}

fn sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Returns the first row of `sql` as `column → string`, or an empty map.
pub fn first_row(db: &dyn Database, sql: &str) -> Result<HashMap<String, String>> {
    Ok(db
        .query(sql)?
        .into_iter()
        .next()
        .map(|row| row.to_string_map())
        .unwrap_or_default())
}

/// Query groups in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryGroup {
    Select,
    RunnerList,
}

impl QueryGroup {
    fn key(self) -> &'static str {
        match self {
            QueryGroup::Select => "selectqueries",
            QueryGroup::RunnerList => "runnerlistqueries",
        }
    }
}

/// Named SQL strings loaded from the queries document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCatalog {
    selectqueries: Vec<(String, String)>,
    runnerlistqueries: Vec<(String, String)>,
}

impl QueryCatalog {
    /// Loads the catalog, keeping query order as written.
    pub fn load(path: &Path) -> Result<Self> {
        let doc = read_document(path)
            .map_err(|e| HarnessError::Query(format!("cannot load query catalog: {}", e)))?;
        Self::from_value(&doc)
    }

    pub fn from_value(doc: &Value) -> Result<Self> {
        let group = |g: QueryGroup| -> Result<Vec<(String, String)>> {
            let Some(entries) = doc.get(g.key()) else {
                return Ok(Vec::new());
            };
            let entries = entries.as_object().ok_or_else(|| {
                HarnessError::Query(format!("'{}' must be an object of named queries", g.key()))
            })?;
            entries
                .iter()
                .map(|(name, sql)| {
                    sql.as_str()
                        .map(|s| (name.clone(), s.to_string()))
                        .ok_or_else(|| {
                            HarnessError::Query(format!("query '{}' is not a string", name))
                        })
                })
                .collect()
        };
        Ok(Self {
            selectqueries: group(QueryGroup::Select)?,
            runnerlistqueries: group(QueryGroup::RunnerList)?,
        })
    }

    /// Queries of one group in document order.
    pub fn group(&self, group: QueryGroup) -> &[(String, String)] {
        match group {
            QueryGroup::Select => &self.selectqueries,
            QueryGroup::RunnerList => &self.runnerlistqueries,
        }
    }

    /// SQL for a named select query.
    pub fn select(&self, name: &str) -> Option<&str> {
        self.selectqueries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, sql)| sql.as_str())
    }
}

/// Source of rows by query name.
pub trait DataSource: Send + Sync {
    fn rows(&self, query_name: &str) -> Result<Vec<DataRow>>;
}

/// [`DataSource`] that runs catalog queries against a [`Database`].
#[derive(Clone)]
pub struct SqlDataSource {
    catalog: Arc<QueryCatalog>,
    db: Arc<dyn Database>,
}

impl SqlDataSource {
    pub fn new(catalog: QueryCatalog, db: Arc<dyn Database>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            db,
        }
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Runs every select query and assembles the environment's test data.
    pub fn materialize(&self, environment: &str) -> Result<TestDataSet> {
        let mut groups = Vec::new();
        for (name, sql) in self.catalog.group(QueryGroup::Select) {
            let rows = self.db.query(sql)?;
            debug!(group = %name, rows = rows.len(), "Materialized query group");
            groups.push((name.clone(), rows));
        }
        info!(
            env = %environment,
            groups = groups.len(),
            "Materialized test data from database"
        );
        Ok(TestDataSet {
            environment: environment.to_string(),
            groups,
        })
    }
}

impl DataSource for SqlDataSource {
    fn rows(&self, query_name: &str) -> Result<Vec<DataRow>> {
        let sql = self.catalog.select(query_name).ok_or_else(|| {
            HarnessError::Query(format!("no select query named '{}'", query_name))
        })?;
        self.db.query(sql)
    }
}

/// Test data of one environment, grouped by query name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestDataSet {
    pub environment: String,
    pub groups: Vec<(String, Vec<DataRow>)>,
}

impl TestDataSet {
    /// An empty set, used when no data could be loaded.
    pub fn empty(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            groups: Vec::new(),
        }
    }

    /// Every row of every group, in group order.
    pub fn all_rows(&self) -> impl Iterator<Item = &DataRow> {
        self.groups.iter().flat_map(|(_, rows)| rows.iter())
    }

    pub fn group(&self, name: &str) -> Option<&[DataRow]> {
        self.groups
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, rows)| rows.as_slice())
    }

    pub fn row_count(&self) -> usize {
        self.groups.iter().map(|(_, rows)| rows.len()).sum()
    }

    /// Document form `{ ENV: { group: [rows] } }`.
    pub fn to_document(&self) -> Value {
        let groups: Map<String, Value> = self
            .groups
            .iter()
            .map(|(name, rows)| {
                let rows = rows
                    .iter()
                    .map(|row| Value::Object(row.as_map().clone()))
                    .collect();
                (name.clone(), Value::Array(rows))
            })
            .collect();
        let mut doc = Map::new();
        doc.insert(self.environment.clone(), Value::Object(groups));
        Value::Object(doc)
    }

    /// Parses the environment's section of a test-data document.
    pub fn from_document(doc: &Value, environment: &str) -> Result<Self> {
        let section = doc
            .get(environment)
            .and_then(Value::as_object)
            .ok_or_else(|| {
                HarnessError::Query(format!("no test data for environment '{}'", environment))
            })?;

        let mut groups = Vec::new();
        for (name, rows) in section {
            let rows: Vec<DataRow> = serde_json::from_value(rows.clone()).map_err(|e| {
                HarnessError::Query(format!("test-data group '{}' is malformed: {}", name, e))
            })?;
            groups.push((name.clone(), rows));
        }
        Ok(Self {
            environment: environment.to_string(),
            groups,
        })
    }

    pub fn load(path: &Path, environment: &str) -> Result<Self> {
        let doc = read_document(path)
            .map_err(|e| HarnessError::Query(format!("cannot load test data: {}", e)))?;
        Self::from_document(&doc, environment)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_document(path, &self.to_document())?;
        Ok(())
    }
}

/// Per-environment test data, built at most once per process.
///
/// Concurrent callers for the same environment wait for the single builder
/// and then share its result. The map lock is only held to find the cell.
#[derive(Default)]
pub struct TestDataCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<TestDataSet>>>>>,
}

impl TestDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached set for `environment`, running `load` if absent.
    ///
    /// `load` runs on the blocking pool since it queries the database and
    /// touches the file system.
    pub async fn get_or_load<F>(&self, environment: &str, load: F) -> Result<Arc<TestDataSet>>
    where
        F: FnOnce() -> Result<TestDataSet> + Send + 'static,
    {
        let cell = {
            let mut cells = self
                .cells
                .lock()
                .map_err(|_| HarnessError::Query("test-data cache poisoned".to_string()))?;
            cells.entry(environment.to_string()).or_default().clone()
        };
        let data = cell
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(load)
                    .await
                    .map_err(|e| HarnessError::Query(format!("test-data load task failed: {}", e)))?
                    .map(Arc::new)
            })
            .await?;
        Ok(data.clone())
    }

    /// Returns the set if already built.
    pub fn get(&self, environment: &str) -> Option<Arc<TestDataSet>> {
        let cells = self.cells.lock().ok()?;
        cells.get(environment).and_then(|cell| cell.get().cloned())
    }
}

/// Loads the environment's test data, preferring the database and falling
/// back to the JSON file on disk when the query run fails.
pub fn load_test_data(
    source: Option<&SqlDataSource>,
    environment: &str,
    file: &Path,
) -> Result<TestDataSet> {
    if let Some(source) = source {
        match source.materialize(environment) {
            Ok(data) => {
                if let Err(e) = data.write(file) {
                    warn!(error = %e, "Could not persist materialized test data");
                }
                return Ok(data);
            }
            Err(e) => warn!(error = %e, "Test-data queries failed, using cached file"),
        }
    }
    TestDataSet::load(file, environment)
}
