//! Rewriters for the FHIR resources the suites post repeatedly.
//!
//! These operate on the canonical template documents. Nodes missing from a
//! template are left alone instead of being created.

use crate::error::Result;
use crate::templater::{read_document, write_document};
use chrono::{DateTime, FixedOffset, Local};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// `url` of the PaymentReconciliation extension that carries the patient.
pub const PATIENT_EXTENSION_URL: &str = "PaymentReconciliation#patient";

/// Values written into an Appointment template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFields {
    pub start: String,
    pub end: String,
    pub patient_id: String,
    pub practitioner_id: String,
    pub location_id: String,
    /// `appointmentType.coding[*].id`, left untouched when `None`.
    pub type_coding_id: Option<String>,
    /// `appointmentType.coding[*].code`, left untouched when `None`.
    pub type_coding_code: Option<String>,
}

/// Sets `start`/`end`, rewrites participant actor references by prefix and
/// optionally the appointment type coding.
pub fn rewrite_appointment(doc: &mut Value, fields: &AppointmentFields) {
    set_if_present(doc, "start", Value::String(fields.start.clone()));
    set_if_present(doc, "end", Value::String(fields.end.clone()));

    if let Some(participants) = doc.get_mut("participant").and_then(Value::as_array_mut) {
        for participant in participants {
            let Some(reference) = participant
                .get_mut("actor")
                .and_then(|actor| actor.get_mut("reference"))
            else {
                continue;
            };
            let current = reference.as_str().unwrap_or_default();
            let rewritten = if current.starts_with("Patient/") {
                format!("Patient/{}", fields.patient_id)
            } else if current.starts_with("Practitioner/") {
                format!("Practitioner/{}", fields.practitioner_id)
            } else if current.starts_with("Location/") {
                format!("Location/{}", fields.location_id)
            } else {
                continue;
            };
            *reference = Value::String(rewritten);
        }
    }

    if let Some(codings) = doc
        .get_mut("appointmentType")
        .and_then(|t| t.get_mut("coding"))
        .and_then(Value::as_array_mut)
    {
        for coding in codings {
            if let Some(id) = &fields.type_coding_id {
                set_if_present(coding, "id", Value::String(id.clone()));
            }
            if let Some(code) = &fields.type_coding_code {
                set_if_present(coding, "code", Value::String(code.clone()));
            }
        }
    }
}

/// Stamps `created`/`paymentDate` and points the patient extension at
/// `Patient/<patient_id>`.
pub fn rewrite_payment_reconciliation(
    doc: &mut Value,
    patient_id: &str,
    now: DateTime<FixedOffset>,
) {
    let stamp = Value::String(now.to_rfc3339());
    set_if_present(doc, "created", stamp.clone());
    set_if_present(doc, "paymentDate", stamp);

    let reference = format!("Patient/{}", patient_id);
    let Some(extensions) = doc.get_mut("extension").and_then(Value::as_array_mut) else {
        return;
    };
    for extension in extensions {
        if extension.get("url").and_then(Value::as_str) != Some(PATIENT_EXTENSION_URL) {
            continue;
        }
        if let Some(value_ref) = extension.get_mut("valueReference") {
            set_if_present(value_ref, "reference", Value::String(reference.clone()));
            set_if_present(value_ref, "display", Value::String(reference.clone()));
        }
    }
}

/// File form of [`rewrite_appointment`].
pub fn modify_appointment_file(
    input: &Path,
    output: &Path,
    fields: &AppointmentFields,
) -> Result<String> {
    let mut doc = read_document(input)?;
    rewrite_appointment(&mut doc, fields);
    debug!(output = %output.display(), "Wrote appointment payload");
    write_document(output, &doc)
}

/// File form of [`rewrite_payment_reconciliation`], stamped with the local time.
pub fn create_payment_reconciliation_file(
    input: &Path,
    output: &Path,
    patient_id: &str,
) -> Result<String> {
    let mut doc = read_document(input)?;
    rewrite_payment_reconciliation(&mut doc, patient_id, Local::now().fixed_offset());
    debug!(output = %output.display(), "Wrote payment reconciliation payload");
    write_document(output, &doc)
}

fn set_if_present(node: &mut Value, field: &str, value: Value) {
    if let Some(slot) = node.get_mut(field) {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn appointment() -> Value {
        json!({
            "resourceType": "Appointment",
            "start": "",
            "end": "",
            "appointmentType": {"coding": [{"id": "0", "code": "X", "system": "s"}]},
            "participant": [
                {"actor": {"reference": "Patient/1"}},
                {"actor": {"reference": "Practitioner/2"}},
                {"actor": {"reference": "Location/3"}},
                {"actor": {"display": "no reference"}},
                {"required": "required"}
            ]
        })
    }

    #[test]
    fn test_appointment_rewrite() {
        let mut doc = appointment();
        rewrite_appointment(
            &mut doc,
            &AppointmentFields {
                start: "2024-05-01T09:00:00Z".into(),
                end: "2024-05-01T09:30:00Z".into(),
                patient_id: "p-9".into(),
                practitioner_id: "dr-4".into(),
                location_id: "loc-7".into(),
                type_coding_id: Some("42".into()),
                type_coding_code: None,
            },
        );

        assert_eq!(doc["start"], "2024-05-01T09:00:00Z");
        assert_eq!(doc["end"], "2024-05-01T09:30:00Z");
        assert_eq!(doc["participant"][0]["actor"]["reference"], "Patient/p-9");
        assert_eq!(doc["participant"][1]["actor"]["reference"], "Practitioner/dr-4");
        assert_eq!(doc["participant"][2]["actor"]["reference"], "Location/loc-7");
        assert_eq!(doc["participant"][3], json!({"actor": {"display": "no reference"}}));
        assert_eq!(doc["appointmentType"]["coding"][0]["id"], "42");
        assert_eq!(doc["appointmentType"]["coding"][0]["code"], "X");
    }

    #[test]
    fn test_appointment_missing_nodes_are_tolerated() {
        let mut doc = json!({"resourceType": "Appointment"});
        rewrite_appointment(&mut doc, &AppointmentFields::default());
        assert_eq!(doc, json!({"resourceType": "Appointment"}));
    }

    #[test]
    fn test_payment_reconciliation_rewrite() {
        let mut doc = json!({
            "created": "old",
            "paymentDate": "old",
            "extension": [
                {"url": "other", "valueReference": {"reference": "Patient/0"}},
                {"url": PATIENT_EXTENSION_URL, "valueReference": {"reference": "Patient/0", "display": "x"}}
            ]
        });
        let now = DateTime::parse_from_rfc3339("2024-02-29T10:15:00+05:30").unwrap();
        rewrite_payment_reconciliation(&mut doc, "77", now);

        assert_eq!(doc["created"], "2024-02-29T10:15:00+05:30");
        assert_eq!(doc["paymentDate"], "2024-02-29T10:15:00+05:30");
        assert_eq!(doc["extension"][0]["valueReference"]["reference"], "Patient/0");
        assert_eq!(doc["extension"][1]["valueReference"]["reference"], "Patient/77");
        assert_eq!(doc["extension"][1]["valueReference"]["display"], "Patient/77");
    }

    #[test]
    fn test_payment_reconciliation_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("pr.json");
        std::fs::write(&input, r#"{"created": "", "amount": 10}"#).unwrap();
        let output = dir.path().join("generated").join("pr.json");

        let text = create_payment_reconciliation_file(&input, &output, "5").unwrap();
        let doc: Value = serde_json::from_str(&text).unwrap();
        assert!(DateTime::parse_from_rfc3339(doc["created"].as_str().unwrap()).is_ok());
        assert!(doc.get("paymentDate").is_none());
        assert_eq!(doc["amount"], 10);
    }
}
