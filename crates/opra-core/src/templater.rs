//! JSON payload templater.
//!
//! A template is an ordinary JSON document. Applying a replacement map walks
//! the document and overwrites the value of every object field whose name is
//! a key of the map. Field order is preserved and output is pretty-printed
//! with two-space indentation.
//!
//! Two strategies are offered:
//!
//! - [`Strategy::Generate`] (shallow-by-key): a matched field takes the mapped
//!   value wholesale, whatever its shape.
//! - [`Strategy::Update`] (deep-first-match): a matched field is replaced
//!   wholesale and its new subtree is not visited again.
//!
//! Scalars inside arrays have no field name, so neither strategy matches them
//! on their own.

use crate::error::{HarnessError, Result};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, trace};

/// Replacement map from field name to new value.
pub type Replacements = Map<String, Value>;

/// How matched fields are rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Generate,
    Update,
}

/// Returns a copy of `template` with `replacements` applied.
pub fn apply(template: &Value, replacements: &Replacements, strategy: Strategy) -> Value {
    let mut doc = template.clone();
    apply_in_place(&mut doc, replacements, strategy);
    doc
}

/// Applies `replacements` to `doc` in place.
///
/// Both strategies overwrite a matched field with the mapped value and do
/// not descend into it.
pub fn apply_in_place(doc: &mut Value, replacements: &Replacements, strategy: Strategy) {
    if replacements.is_empty() {
        return;
    }
    trace!(?strategy, keys = replacements.len(), "Applying replacements");
    replace_matching(doc, replacements);
}

fn replace_matching(doc: &mut Value, replacements: &Replacements) {
    match doc {
        Value::Object(fields) => {
            for (name, value) in fields.iter_mut() {
                match replacements.get(name) {
                    Some(replacement) => *value = replacement.clone(),
                    None => replace_matching(value, replacements),
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut().filter(|i| i.is_object() || i.is_array()) {
                replace_matching(item, replacements);
            }
        }
        _ => {}
    }
}

/// Serializes with two-space indentation.
pub fn to_pretty(doc: &Value) -> Result<String> {
    serde_json::to_string_pretty(doc)
        .map_err(|e| HarnessError::Templating(format!("cannot serialize document: {}", e)))
}

/// Parses template text.
pub fn parse(text: &str) -> Result<Value> {
    serde_json::from_str(text)
        .map_err(|e| HarnessError::Templating(format!("malformed JSON template: {}", e)))
}

/// Reads and parses a JSON document from disk.
pub fn read_document(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        HarnessError::Templating(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse(&text).map_err(|e| HarnessError::Templating(format!("{}: {}", path.display(), e)))
}

/// Writes a document pretty-printed, creating parent directories.
pub fn write_document(path: &Path, doc: &Value) -> Result<String> {
    let text = to_pretty(doc)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            HarnessError::Templating(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    std::fs::write(path, &text).map_err(|e| {
        HarnessError::Templating(format!("cannot write {}: {}", path.display(), e))
    })?;
    Ok(text)
}

/// Loads `input`, applies `replacements` with the generate strategy and
/// writes the result to `output`. Returns the written text.
pub fn generate_payload(input: &Path, output: &Path, replacements: &Replacements) -> Result<String> {
    render_file(input, output, replacements, Strategy::Generate)
}

/// Same as [`generate_payload`] with the update strategy.
pub fn update_payload(input: &Path, output: &Path, replacements: &Replacements) -> Result<String> {
    render_file(input, output, replacements, Strategy::Update)
}

fn render_file(
    input: &Path,
    output: &Path,
    replacements: &Replacements,
    strategy: Strategy,
) -> Result<String> {
    let template = read_document(input)?;
    let rendered = apply(&template, replacements, strategy);
    debug!(
        input = %input.display(),
        output = %output.display(),
        keys = replacements.len(),
        ?strategy,
        "Rendered payload template"
    );
    write_document(output, &rendered)
}

/// Builds a replacement map from string pairs, typing each value as a JSON
/// string.
pub fn replacements_from_pairs<I, K, V>(pairs: I) -> Replacements
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), Value::String(v.into())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Replacements {
        match value {
            Value::Object(m) => m,
            _ => unreachable!("test maps are objects"),
        }
    }

    #[test]
    fn test_generate_replaces_nested_and_array_objects() {
        let template = json!({"a": 1, "b": {"c": 2, "d": [{"c": 3}]}});
        let out = apply(&template, &map(json!({"c": 9})), Strategy::Generate);
        assert_eq!(out, json!({"a": 1, "b": {"c": 9, "d": [{"c": 9}]}}));
    }

    #[test]
    fn test_empty_map_is_identity() {
        let template = json!({"z": [1, {"y": null}], "a": {"b": true}});
        let out = apply(&template, &Replacements::new(), Strategy::Generate);
        assert_eq!(to_pretty(&out).unwrap(), to_pretty(&template).unwrap());
    }

    #[test]
    fn test_field_order_is_preserved() {
        let template = parse(r#"{"zeta": 1, "alpha": 2, "mid": {"y": 1, "b": 2}}"#).unwrap();
        let out = apply(&template, &map(json!({"b": 5})), Strategy::Generate);
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            r#"{"zeta":1,"alpha":2,"mid":{"y":1,"b":5}}"#
        );
    }

    #[test]
    fn test_collection_replacement_is_not_revisited() {
        let template = json!({"outer": {"id": 1}, "id": 0});
        let replacement = map(json!({"outer": {"id": "keep", "extra": true}, "id": 7}));
        for strategy in [Strategy::Generate, Strategy::Update] {
            let out = apply(&template, &replacement, strategy);
            assert_eq!(out, json!({"outer": {"id": "keep", "extra": true}, "id": 7}));
        }
    }

    #[test]
    fn test_matched_scalar_array_is_replaced_wholesale() {
        let template = json!({"codes": ["a", "b"], "mixed": [1, {"codes": ["x"]}]});
        let replacement = map(json!({"codes": "z"}));
        for strategy in [Strategy::Generate, Strategy::Update] {
            let out = apply(&template, &replacement, strategy);
            assert_eq!(out, json!({"codes": "z", "mixed": [1, {"codes": "z"}]}));
        }
    }

    #[test]
    fn test_update_does_not_revisit_replaced_subtree() {
        let template = json!({"codes": ["a", "b"]});
        let replacement = map(json!({"codes": {"codes": "inner"}}));
        let out = apply(&template, &replacement, Strategy::Update);
        assert_eq!(out, json!({"codes": {"codes": "inner"}}));
    }

    #[test]
    fn test_primitives_in_arrays_are_never_matched_by_value() {
        let template = json!({"tags": ["c", "d"]});
        let out = apply(&template, &map(json!({"c": 1})), Strategy::Update);
        assert_eq!(out, template);
    }

    #[test]
    fn test_pretty_output_uses_two_spaces() {
        let text = to_pretty(&json!({"a": {"b": 1}})).unwrap();
        assert_eq!(text, "{\n  \"a\": {\n    \"b\": 1\n  }\n}");
    }

    #[test]
    fn test_generate_payload_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("drug.json");
        let output = dir.path().join("out").join("drug.json");
        std::fs::write(&input, r#"{"drug": {"ndc": "0000", "qty": 1}}"#).unwrap();

        let written = generate_payload(
            &input,
            &output,
            &replacements_from_pairs([("ndc", "12345-678")]),
        )
        .unwrap();

        assert!(written.contains("\"ndc\": \"12345-678\""));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), written);
    }

    #[test]
    fn test_malformed_template_is_templating_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.json");
        std::fs::write(&input, "{\"a\": ").unwrap();
        let err = update_payload(&input, &dir.path().join("o.json"), &Replacements::new())
            .unwrap_err();
        assert!(matches!(err, HarnessError::Templating(_)));

        let missing = generate_payload(
            &dir.path().join("nope.json"),
            &dir.path().join("o.json"),
            &Replacements::new(),
        );
        assert!(matches!(missing, Err(HarnessError::Templating(_))));
    }
}
