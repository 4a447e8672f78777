//! Runner list: which cases a run-manager executes, in what priority and how
//! many times.
//!
//! The on-disk document is keyed by run-manager label:
//!
//! ```json
//! { "Smoke": { "testCaseLists": [
//!     { "testcasename": "TC001_Search", "execute": "yes",
//!       "priority": "1", "count": "1", "testdescription": "..." } ] } }
//! ```
//!
//! Priority and count are written as strings; numbers are accepted on read.

use crate::config::is_yes;
use crate::datasource::{DataRow, Database, QueryCatalog, QueryGroup, value_text};
use crate::error::{HarnessError, Result};
use crate::templater::{read_document, write_document};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

/// Section key holding the entries under a run-manager.
pub const ENTRIES_KEY: &str = "testCaseLists";

/// Selection record for one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerEntry {
    #[serde(rename = "testcasename")]
    pub name: String,

    #[serde(default)]
    pub execute: String,

    #[serde(
        default,
        serialize_with = "int_as_string",
        deserialize_with = "int_from_string_or_number"
    )]
    pub priority: i64,

    #[serde(
        default = "default_count",
        serialize_with = "int_as_string",
        deserialize_with = "int_from_string_or_number"
    )]
    pub count: i64,

    #[serde(rename = "testdescription", default)]
    pub description: String,
}

fn default_count() -> i64 {
    1
}

impl RunnerEntry {
    pub fn new(name: impl Into<String>, execute: bool, priority: i64, count: i64) -> Self {
        Self {
            name: name.into(),
            execute: if execute { "yes" } else { "no" }.to_string(),
            priority,
            count,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether the execute flag is `yes`.
    pub fn is_executable(&self) -> bool {
        is_yes(&self.execute)
    }

    /// Invocation count, never below one.
    pub fn invocation_count(&self) -> u32 {
        u32::try_from(self.count.max(1)).unwrap_or(u32::MAX)
    }

    fn from_fields(fields: &Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(fields.clone()))
            .map_err(|e| HarnessError::Query(format!("malformed runner entry: {}", e)))
    }
}

fn int_as_string<S: Serializer>(value: &i64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

fn int_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| D::Error::custom(format!("expected integer, got {}", n))),
        Value::String(s) if s.trim().is_empty() => Ok(0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i64)
            .ok_or_else(|| D::Error::custom(format!("expected integer, got '{}'", s))),
        Value::Null => Ok(0),
        other => Err(D::Error::custom(format!("expected integer, got {}", other))),
    }
}

/// Runner list for one run-manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerList {
    pub run_manager: String,
    entries: Vec<RunnerEntry>,
}

impl RunnerList {
    pub fn new(run_manager: impl Into<String>, entries: Vec<RunnerEntry>) -> Self {
        Self {
            run_manager: run_manager.into(),
            entries,
        }
    }

    /// Entries in document order.
    pub fn entries(&self) -> &[RunnerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entry whose name matches `case_name` case-insensitively.
    pub fn entry_for(&self, case_name: &str) -> Option<&RunnerEntry> {
        self.entries
            .iter()
            .find(|e| e.name.trim().eq_ignore_ascii_case(case_name.trim()))
    }

    /// Reads the run-manager's section from a runner-list document.
    pub fn from_document(doc: &Value, run_manager: &str) -> Result<Self> {
        let section = doc.get(run_manager).ok_or_else(|| {
            HarnessError::Query(format!(
                "runner list has no section for run-manager '{}'",
                run_manager
            ))
        })?;
        let entries = match section.get(ENTRIES_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(list) => serde_json::from_value(list.clone()).map_err(|e| {
                HarnessError::Query(format!("malformed runner list for '{}': {}", run_manager, e))
            })?,
        };
        Ok(Self::new(run_manager, entries))
    }

    /// Loads the runner list file.
    pub fn load(path: &Path, run_manager: &str) -> Result<Self> {
        let doc = read_document(path)
            .map_err(|e| HarnessError::Query(format!("cannot load runner list: {}", e)))?;
        let list = Self::from_document(&doc, run_manager)?;
        debug!(
            path = %path.display(),
            run_manager = %run_manager,
            entries = list.len(),
            "Loaded runner list"
        );
        Ok(list)
    }

    /// Document form `{ run_manager: { "testCaseLists": [...] } }`.
    pub fn to_document(&self) -> Result<Value> {
        let entries = serde_json::to_value(&self.entries)
            .map_err(|e| HarnessError::Templating(format!("cannot encode runner list: {}", e)))?;
        let mut section = Map::new();
        section.insert(ENTRIES_KEY.to_string(), entries);
        let mut doc = Map::new();
        doc.insert(self.run_manager.clone(), Value::Object(section));
        Ok(Value::Object(doc))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_document(path, &self.to_document()?)?;
        info!(path = %path.display(), entries = self.len(), "Wrote runner list");
        Ok(())
    }

    /// Builds entries from query rows. Every value is normalized to text.
    pub fn from_rows(run_manager: impl Into<String>, rows: &[DataRow]) -> Result<Self> {
        let entries = rows
            .iter()
            .map(|row| {
                let fields: Map<String, Value> = row
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), Value::String(value_text(v))))
                    .collect();
                RunnerEntry::from_fields(&fields)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(run_manager, entries))
    }

    /// Runs every `runnerlistqueries` query and concatenates their rows.
    pub fn from_database(
        run_manager: &str,
        catalog: &QueryCatalog,
        db: &dyn Database,
    ) -> Result<Self> {
        let queries = catalog.group(QueryGroup::RunnerList);
        if queries.is_empty() {
            return Err(HarnessError::Query(
                "query catalog has no runnerlistqueries".to_string(),
            ));
        }
        let mut rows = Vec::new();
        for (name, sql) in queries {
            let found = db.query(sql)?;
            debug!(query = %name, rows = found.len(), "Ran runner-list query");
            rows.extend(found);
        }
        Self::from_rows(run_manager, &rows)
    }

    /// Builds entries from a sheet whose first row names the fields.
    pub fn from_sheet(run_manager: impl Into<String>, sheet: &Sheet) -> Result<Self> {
        let Some((header, body)) = sheet.rows.split_first() else {
            return Ok(Self::new(run_manager, Vec::new()));
        };
        let names: Vec<String> = header
            .iter()
            .map(|cell| cell.as_text().trim().to_lowercase())
            .collect();

        let mut entries = Vec::new();
        for row in body {
            if row.iter().all(Cell::is_blank) {
                continue;
            }
            let fields: Map<String, Value> = names
                .iter()
                .enumerate()
                .filter(|(_, name)| !name.is_empty())
                .map(|(idx, name)| {
                    let text = row.get(idx).map(Cell::as_text).unwrap_or_default();
                    (name.clone(), Value::String(text))
                })
                .collect();
            entries.push(RunnerEntry::from_fields(&fields)?);
        }
        Ok(Self::new(run_manager, entries))
    }
}

/// One spreadsheet cell as delivered by a workbook reader.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Blank,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Cached result of a formula cell.
    Formula(String),
}

impl Cell {
    /// Cell text. Whole numbers render without a fractional part.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Blank => String::new(),
            Cell::Text(s) | Cell::Formula(s) => s.clone(),
            Cell::Number(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
            Cell::Bool(b) => b.to_string(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Blank => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// A worksheet as rows of cells. The workbook reader lives outside the harness.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub rows: Vec<Vec<Cell>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::SqliteDatabase;
    use serde_json::json;

    fn sample_doc() -> Value {
        json!({
            "Smoke": {"testCaseLists": [
                {"testcasename": "TC_A", "execute": "yes", "priority": "2", "count": "1", "testdescription": "a"},
                {"testcasename": "TC_C", "execute": "YES", "priority": 1, "count": "2"},
                {"testcasename": "TC_B", "execute": "no", "priority": "", "count": "1"}
            ]},
            "Full": {"testCaseLists": []}
        })
    }

    #[test]
    fn test_from_document_keeps_order_and_parses_ints() {
        let list = RunnerList::from_document(&sample_doc(), "Smoke").unwrap();
        let names: Vec<_> = list.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["TC_A", "TC_C", "TC_B"]);

        let c = list.entry_for("tc_c").unwrap();
        assert_eq!(c.priority, 1);
        assert_eq!(c.invocation_count(), 2);
        assert!(c.is_executable());
        assert!(!list.entry_for("TC_B").unwrap().is_executable());
        assert_eq!(list.entry_for("TC_B").unwrap().priority, 0);
    }

    #[test]
    fn test_missing_section_is_query_error() {
        let err = RunnerList::from_document(&sample_doc(), "Nightly").unwrap_err();
        assert!(matches!(err, HarnessError::Query(_)));
        assert!(RunnerList::from_document(&sample_doc(), "Full").unwrap().is_empty());
    }

    #[test]
    fn test_non_integer_priority_is_rejected() {
        let doc = json!({"Smoke": {"testCaseLists": [{"testcasename": "X", "priority": "high"}]}});
        assert!(RunnerList::from_document(&doc, "Smoke").is_err());
    }

    #[test]
    fn test_written_document_uses_string_integers() {
        let list = RunnerList::new(
            "Smoke",
            vec![RunnerEntry::new("TC001", true, 3, 2).with_description("drug search")],
        );
        let doc = list.to_document().unwrap();
        assert_eq!(
            doc,
            json!({"Smoke": {"testCaseLists": [{
                "testcasename": "TC001", "execute": "yes",
                "priority": "3", "count": "2", "testdescription": "drug search"
            }]}})
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Smoke_testcase.json");
        list.write(&path).unwrap();
        assert_eq!(RunnerList::load(&path, "Smoke").unwrap(), list);
    }

    #[test]
    fn test_from_sheet_normalizes_whole_numbers() {
        let sheet = Sheet {
            rows: vec![
                vec![
                    Cell::Text("TestCaseName".into()),
                    Cell::Text("Execute".into()),
                    Cell::Text("Priority".into()),
                    Cell::Text("Count".into()),
                    Cell::Text("TestDescription".into()),
                ],
                vec![
                    Cell::Text("TC001".into()),
                    Cell::Text("yes".into()),
                    Cell::Number(2.0),
                    Cell::Formula("3".into()),
                    Cell::Number(1.5),
                ],
                vec![Cell::Blank, Cell::Text("  ".into())],
                vec![Cell::Text("TC002".into()), Cell::Text("no".into())],
            ],
        };
        let list = RunnerList::from_sheet("Smoke", &sheet).unwrap();
        assert_eq!(list.len(), 2);
        let first = &list.entries()[0];
        assert_eq!(first.priority, 2);
        assert_eq!(first.count, 3);
        assert_eq!(first.description, "1.5");
        assert_eq!(list.entries()[1].name, "TC002");
        assert_eq!(list.entries()[1].priority, 0);
        assert_eq!(Cell::Number(7.0).as_text(), "7");
    }

    #[test]
    fn test_from_database_rows() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE runner (TestCaseName TEXT, Execute TEXT, Priority INTEGER, Count INTEGER, TestDescription TEXT);
             INSERT INTO runner VALUES ('TC009', 'yes', 4, 2, 'labs');",
        )
        .unwrap();
        let catalog = QueryCatalog::from_value(&json!({
            "runnerlistqueries": {"testCaseLists": "SELECT * FROM runner"}
        }))
        .unwrap();

        let list = RunnerList::from_database("Nightly", &catalog, &db).unwrap();
        assert_eq!(list.entries(), [RunnerEntry::new("TC009", true, 4, 2).with_description("labs")]);

        let empty = QueryCatalog::default();
        assert!(RunnerList::from_database("Nightly", &empty, &db).is_err());
    }
}
