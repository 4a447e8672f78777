//! Response predicates.
//!
//! Every predicate records exactly one Pass or Fail step on the reporter and
//! returns whether it held. Structured-body predicates (JSON and XML) also
//! require status 200 and a latency below [`MAX_LIMIT`].

use crate::datasource::value_text;
use crate::dispatcher::ResponseRecord;
use crate::error::{HarnessError, Result};
use crate::reporter::ReporterHandle;
use serde_json::{Map, Value};
use std::time::Duration;

/// Latency ceiling for validating predicates.
pub const MAX_LIMIT: Duration = Duration::from_millis(2000);

/// Predicate kit bound to one reporter handle.
pub struct Verifier<'a> {
    reporter: &'a mut ReporterHandle,
}

impl<'a> Verifier<'a> {
    pub fn new(reporter: &'a mut ReporterHandle) -> Self {
        Self { reporter }
    }

    fn record(&mut self, passed: bool, message: String, detail: Option<String>) -> bool {
        if passed {
            self.reporter.pass(message);
        } else {
            self.reporter.fail(message, detail);
        }
        passed
    }

    pub fn status_equals(&mut self, response: &ResponseRecord, expected: u16) -> bool {
        let passed = response.status == expected;
        self.record(
            passed,
            format!(
                "Status code: expected {}, actual {}",
                expected, response.status
            ),
            (!passed).then(|| response.body_text()),
        )
    }

    /// Trimmed body equals trimmed `expected`.
    pub fn body_equals(&mut self, response: &ResponseRecord, expected: &str) -> bool {
        let actual = response.body_text();
        let passed = actual.trim() == expected.trim();
        self.record(
            passed,
            format!("Response body equals '{}'", expected.trim()),
            (!passed).then_some(actual),
        )
    }

    /// Body is empty or whitespace only.
    pub fn body_empty(&mut self, response: &ResponseRecord) -> bool {
        let actual = response.body_text();
        let passed = actual.trim().is_empty();
        self.record(
            passed,
            "Response body is empty".to_string(),
            (!passed).then_some(actual),
        )
    }

    pub fn body_contains(&mut self, response: &ResponseRecord, expected: &str) -> bool {
        let actual = response.body_text();
        let passed = actual.contains(expected);
        self.record(
            passed,
            format!("Response body contains '{}'", expected),
            (!passed).then_some(actual),
        )
    }

    pub fn content_type_starts_with(&mut self, response: &ResponseRecord, prefix: &str) -> bool {
        let actual = response.content_type.clone().unwrap_or_default();
        let passed = actual
            .to_lowercase()
            .starts_with(&prefix.to_lowercase());
        self.record(
            passed,
            format!("Content-Type starts with '{}' (actual '{}')", prefix, actual),
            None,
        )
    }

    pub fn header_equals(&mut self, response: &ResponseRecord, name: &str, expected: &str) -> bool {
        let actual = response.header(name);
        let passed = actual == Some(expected);
        self.record(
            passed,
            format!(
                "Header '{}': expected '{}', actual '{}'",
                name,
                expected,
                actual.unwrap_or("<absent>")
            ),
            None,
        )
    }

    /// Whether `expected` is among the values of every field named `key` in `body`.
    pub fn json_key_search(&mut self, key: &str, expected: &str, body: &str) -> bool {
        let (passed, detail) = match serde_json::from_str::<Value>(body) {
            Ok(doc) => {
                let found = json_key_values(&doc, key);
                let passed = found.iter().any(|v| v == expected);
                (passed, (!passed).then(|| format!("values found: {:?}", found)))
            }
            Err(e) => (false, Some(format!("body is not JSON: {}", e))),
        };
        self.record(
            passed,
            format!("JSON key '{}' has value '{}'", key, expected),
            detail,
        )
    }

    /// Every `key → expected` pair is found by key search; list values
    /// require each element. Also requires status 200 within [`MAX_LIMIT`].
    pub fn json_multi_verify(
        &mut self,
        response: &ResponseRecord,
        expected: &Map<String, Value>,
    ) -> bool {
        let mut problems = response_problems(response);
        match response.json() {
            Ok(doc) => {
                for (key, wanted) in expected {
                    let found = json_key_values(&doc, key);
                    let wanted: Vec<String> = match wanted {
                        Value::Array(items) => items.iter().map(value_text).collect(),
                        other => vec![value_text(other)],
                    };
                    for value in wanted {
                        if !found.contains(&value) {
                            problems.push(format!("'{}' lacks value '{}'", key, value));
                        }
                    }
                }
            }
            Err(e) => problems.push(e.to_string()),
        }
        let passed = problems.is_empty();
        self.record(
            passed,
            format!("JSON response matches {} expected key(s)", expected.len()),
            (!passed).then(|| problems.join("; ")),
        )
    }

    /// Value at a dotted path (`data.items.0.id`) equals `expected`.
    pub fn json_path_equals(&mut self, response: &ResponseRecord, path: &str, expected: &str) -> bool {
        let mut problems = response_problems(response);
        match response.json() {
            Ok(doc) => match json_path(&doc, path) {
                Some(value) if value_text(value) == expected => {}
                Some(value) => problems.push(format!("actual '{}'", value_text(value))),
                None => problems.push("path not found".to_string()),
            },
            Err(e) => problems.push(e.to_string()),
        }
        let passed = problems.is_empty();
        self.record(
            passed,
            format!("JSON path '{}' equals '{}'", path, expected),
            (!passed).then(|| problems.join("; ")),
        )
    }

    /// For every `tag` element, the text of its first `child_tag` child
    /// contains `expected`, ignoring case. Fails when no `tag` element exists.
    pub fn xml_tag_attribute_contains(
        &mut self,
        response: &ResponseRecord,
        tag: &str,
        child_tag: &str,
        expected: &str,
    ) -> bool {
        let mut problems = response_problems(response);
        let body = response.body_text();
        match roxmltree::Document::parse(&body) {
            Ok(doc) => {
                let values = xml_child_texts(&doc, tag, child_tag);
                if values.is_empty() {
                    problems.push(format!("no <{}> elements", tag));
                }
                let needle = expected.to_lowercase();
                for value in values {
                    match value {
                        Some(text) if text.to_lowercase().contains(&needle) => {}
                        Some(text) => problems.push(format!("'{}' lacks '{}'", text, expected)),
                        None => problems.push(format!("<{}> without <{}>", tag, child_tag)),
                    }
                }
            }
            Err(e) => problems.push(format!("body is not XML: {}", e)),
        }
        let passed = problems.is_empty();
        self.record(
            passed,
            format!("Every <{}>/<{}> contains '{}'", tag, child_tag, expected),
            (!passed).then(|| problems.join("; ")),
        )
    }

    /// The first `tag` element exists and has no child elements.
    pub fn xml_list_empty(&mut self, response: &ResponseRecord, tag: &str) -> bool {
        let mut problems = response_problems(response);
        let body = response.body_text();
        match roxmltree::Document::parse(&body) {
            Ok(doc) => {
                let first = doc
                    .descendants()
                    .find(|n| n.is_element() && n.tag_name().name() == tag);
                match first {
                    Some(node) if node.children().any(|c| c.is_element()) => {
                        problems.push(format!("<{}> has child elements", tag));
                    }
                    Some(_) => {}
                    None => problems.push(format!("no <{}> element", tag)),
                }
            }
            Err(e) => problems.push(format!("body is not XML: {}", e)),
        }
        let passed = problems.is_empty();
        self.record(
            passed,
            format!("<{}> list is empty", tag),
            (!passed).then(|| problems.join("; ")),
        )
    }
}

/// Converts a predicate result into an `AssertionFailure` for `?` use.
pub fn ensure(condition: bool, message: impl Into<String>) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(HarnessError::Assertion(message.into()))
    }
}

/// String form of every value whose field name is `key`, at any depth.
pub fn json_key_values(doc: &Value, key: &str) -> Vec<String> {
    let mut found = Vec::new();
    collect_key_values(doc, key, &mut found);
    found
}

fn collect_key_values(node: &Value, key: &str, found: &mut Vec<String>) {
    match node {
        Value::Object(fields) => {
            for (name, value) in fields {
                if name == key {
                    found.push(value_text(value));
                }
                collect_key_values(value, key, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_key_values(item, key, found);
            }
        }
        _ => {}
    }
}

/// Resolves a dotted path; numeric segments index arrays.
pub fn json_path<'v>(doc: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .try_fold(doc, |node, segment| match node {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Object(fields) => fields.get(segment),
            _ => None,
        })
}

fn xml_child_texts(doc: &roxmltree::Document<'_>, tag: &str, child_tag: &str) -> Vec<Option<String>> {
    doc.descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == tag)
        .map(|n| {
            n.children()
                .find(|c| c.is_element() && c.tag_name().name() == child_tag)
                .map(|c| c.text().unwrap_or_default().trim().to_string())
        })
        .collect()
}

fn response_problems(response: &ResponseRecord) -> Vec<String> {
    let mut problems = Vec::new();
    if response.status != 200 {
        problems.push(format!("status {} is not 200", response.status));
    }
    if response.elapsed >= MAX_LIMIT {
        problems.push(format!(
            "response time {} ms exceeds {} ms",
            response.elapsed_ms(),
            MAX_LIMIT.as_millis()
        ));
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Iteration;
    use crate::datasource::DataRow;
    use crate::registry::TestCaseDescriptor;
    use crate::reporter::{ReportEvent, ReporterSink, StepLevel, SuiteReport};
    use serde_json::json;
    use std::sync::Arc;

    /// Runs `check` inside a single case and returns the committed report.
    fn with_verifier(check: impl FnOnce(&mut Verifier<'_>)) -> SuiteReport {
        let sink = ReporterSink::new();
        sink.start_suite("assertions").unwrap();
        let mut handle = sink.handle().unwrap();
        handle
            .start_case(&Iteration {
                descriptor: Arc::new(TestCaseDescriptor::new("TC")),
                row: DataRow::new(),
                invocation: 0,
                row_index: 0,
                attempt: 1,
            })
            .unwrap();
        check(&mut Verifier::new(&mut handle));
        handle
            .end_case(crate::reporter::CaseStatus::Pass, None)
            .unwrap();
        drop(handle);
        sink.end_suite().unwrap()
    }

    fn step_levels(report: &SuiteReport) -> Vec<StepLevel> {
        report.cases[0]
            .events
            .iter()
            .filter_map(|e| match e {
                ReportEvent::Step { level, .. } => Some(*level),
                _ => None,
            })
            .collect()
    }

    fn ok(body: &str) -> ResponseRecord {
        ResponseRecord::new(200, body).with_elapsed(Duration::from_millis(120))
    }

    #[test]
    fn test_json_key_search() {
        let body = r#"{"x": {"k": "v1"}, "y": [{"k": "v2"}]}"#;
        let report = with_verifier(|v| {
            assert!(v.json_key_search("k", "v2", body));
            assert!(!v.json_key_search("k", "v3", body));
        });
        assert_eq!(step_levels(&report), [StepLevel::Pass, StepLevel::Fail]);
    }

    #[test]
    fn test_json_key_search_round_trips_any_value() {
        for value in [json!("s"), json!(42), json!(true), json!(null), json!([1, 2]), json!({"a": 1})] {
            let body = json!({"outer": [{"k": value.clone()}]}).to_string();
            with_verifier(|v| assert!(v.json_key_search("k", &value_text(&value), &body)));
        }
    }

    #[test]
    fn test_xml_tag_attribute_contains() {
        let body = "<r><Drug><BrandName>AcmeFoo</BrandName></Drug><Drug><BrandName>acmeBar</BrandName></Drug></r>";
        with_verifier(|v| {
            assert!(v.xml_tag_attribute_contains(&ok(body), "Drug", "BrandName", "acme"));
            assert!(!v.xml_tag_attribute_contains(&ok(body), "Drug", "BrandName", "foo"));
            assert!(!v.xml_tag_attribute_contains(&ok(body), "Pharmacy", "Name", "acme"));
            assert!(!v.xml_tag_attribute_contains(
                &ResponseRecord::new(500, body),
                "Drug",
                "BrandName",
                "acme"
            ));
        });
    }

    #[test]
    fn test_xml_list_empty() {
        with_verifier(|v| {
            assert!(v.xml_list_empty(&ok("<r><Drugs>\n  </Drugs></r>"), "Drugs"));
            assert!(!v.xml_list_empty(&ok("<r><Drugs><Drug/></Drugs></r>"), "Drugs"));
            assert!(!v.xml_list_empty(&ok("<r/>"), "Drugs"));
            assert!(!v.xml_list_empty(&ok("not xml"), "Drugs"));
        });
    }

    #[test]
    fn test_json_multi_verify_enforces_status_and_latency() {
        let body = r#"{"items": [{"ndc": "1"}, {"ndc": "2"}], "count": 2}"#;
        let expected = json!({"ndc": ["1", "2"], "count": 2});
        let expected = expected.as_object().unwrap();

        with_verifier(|v| {
            assert!(v.json_multi_verify(&ok(body), expected));
            assert!(!v.json_multi_verify(
                &ok(body).with_elapsed(Duration::from_millis(2000)),
                expected
            ));
            assert!(!v.json_multi_verify(&ResponseRecord::new(201, body), expected));
            let missing = json!({"ndc": ["3"]});
            assert!(!v.json_multi_verify(&ok(body), missing.as_object().unwrap()));
        });
    }

    #[test]
    fn test_body_predicates() {
        let report = with_verifier(|v| {
            assert!(v.body_equals(&ok("  done \n"), "done"));
            assert!(v.body_empty(&ok(" \n\t")));
            assert!(!v.body_empty(&ok("x")));
            assert!(v.body_contains(&ok("abc"), "b"));
            assert!(v.status_equals(&ResponseRecord::new(404, ""), 404));
        });
        assert_eq!(step_levels(&report).len(), 5);
    }

    #[test]
    fn test_header_and_content_type() {
        let resp = ok("{}").with_header("Content-Type", "Application/JSON; charset=utf-8");
        with_verifier(|v| {
            assert!(v.content_type_starts_with(&resp, "application/json"));
            assert!(v.header_equals(&resp, "content-type", "Application/JSON; charset=utf-8"));
            assert!(!v.header_equals(&resp, "x-trace", "1"));
        });
    }

    #[test]
    fn test_json_path() {
        let doc = json!({"data": {"items": [{"id": "a"}, {"id": 7}]}});
        assert_eq!(json_path(&doc, "data.items.1.id"), Some(&json!(7)));
        assert_eq!(json_path(&doc, "data.items.9.id"), None);
        with_verifier(|v| {
            assert!(v.json_path_equals(&ok(&doc.to_string()), "data.items.0.id", "a"));
            assert!(!v.json_path_equals(&ok(&doc.to_string()), "data.missing", "a"));
        });
    }

    #[test]
    fn test_ensure() {
        assert!(ensure(true, "fine").is_ok());
        assert!(matches!(ensure(false, "nope"), Err(HarnessError::Assertion(_))));
    }
}
