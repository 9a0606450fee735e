//! Extraction and validation of the model's JSON payload.
//!
//! JSON-only output is requested from the model but not guaranteed: the
//! payload may be wrapped in prose or code fences, cut short, or missing
//! whole sections. Extraction fails loudly on anything unparsable and fills
//! structurally missing parts with typed empty defaults; it never invents a
//! value.

use serde_json::{Map, Value};
use tracing::debug;

use crate::backend::{FinishReason, ModelResponse};
use crate::error::{StructuringError, SNIPPET_CHARS};
use crate::record::{
    Medication, ObjectiveFindings, PatientInfo, Soapie, StructuredClinicalRecord, Vitals,
};

/// Returns at most `max` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Bounded excerpt of raw model output attached to diagnostics.
pub fn snippet(text: &str) -> String {
    truncate_chars(text, SNIPPET_CHARS)
}

/// Locates the span from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Turns a raw model response into a fully-typed record.
pub fn parse_model_response(
    response: &ModelResponse,
) -> Result<StructuredClinicalRecord, StructuringError> {
    if response.finish_reason == FinishReason::Truncated {
        return Err(StructuringError::OutputTruncated);
    }
    if response.text.trim().is_empty() {
        return Err(StructuringError::EmptyModelOutput);
    }

    let raw = response.text.as_str();
    let json = extract_json_object(raw).ok_or_else(|| StructuringError::MalformedModelOutput {
        message: "no JSON object found in model output".to_string(),
        snippet: snippet(raw),
    })?;

    let value: Value =
        serde_json::from_str(json).map_err(|err| StructuringError::MalformedModelOutput {
            message: err.to_string(),
            snippet: snippet(raw),
        })?;

    Ok(validate_record(&value))
}

/// Builds a record from any JSON value, defaulting every missing shape.
pub fn validate_record(value: &Value) -> StructuredClinicalRecord {
    let root = value.as_object();
    if get(root, "patient").is_none() {
        debug!("model output has no patient section; using empty defaults");
    }
    if get(root, "soapie").is_none() {
        debug!("model output has no soapie section; using empty defaults");
    }

    StructuredClinicalRecord {
        patient: validate_patient(get(root, "patient")),
        soapie: validate_soapie(get(root, "soapie")),
    }
}

/// Builds patient attributes from the `patient` section of model output.
pub fn validate_patient(value: Option<&Value>) -> PatientInfo {
    let obj = value.and_then(Value::as_object);
    PatientInfo {
        full_name: text(get(obj, "full_name")),
        age: text(get(obj, "age")),
        gender: text(get(obj, "gender")),
        room_number: text(get(obj, "room_number")),
        unit: text(get(obj, "unit")),
    }
}

fn validate_soapie(value: Option<&Value>) -> Soapie {
    let obj = value.and_then(Value::as_object);
    Soapie {
        subjective: text(get(obj, "S")),
        objective: validate_objective(get(obj, "O")),
        assessment: text(get(obj, "A")),
        interventions: text_list(get(obj, "I")),
        evaluation: text(get(obj, "E")),
        plan: text(get(obj, "P")),
    }
}

fn validate_objective(value: Option<&Value>) -> ObjectiveFindings {
    let obj = value.and_then(Value::as_object);
    let vitals = get(obj, "vitals").and_then(Value::as_object);
    ObjectiveFindings {
        vitals: Vitals {
            temperature: text(get(vitals, "temperature")),
            blood_pressure: text(get(vitals, "blood_pressure")),
            heart_rate: text(get(vitals, "heart_rate")),
            respiratory_rate: text(get(vitals, "respiratory_rate")),
            spo2: text(get(vitals, "spo2")),
            glycemia: text(get(vitals, "glycemia")),
        },
        exam: text(get(obj, "exam")),
        labs: text(get(obj, "labs")),
        medications: medications(get(obj, "medications")),
    }
}

fn get<'a>(obj: Option<&'a Map<String, Value>>, key: &str) -> Option<&'a Value> {
    obj.and_then(|map| map.get(key))
}

/// Scalar coercion: strings are trimmed, numbers and booleans keep their
/// literal form, anything else is treated as absent.
fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn text_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| text(Some(item)))
            .filter(|item| !item.is_empty())
            .collect(),
        Some(other) => {
            let single = text(Some(other));
            if single.is_empty() {
                Vec::new()
            } else {
                vec![single]
            }
        }
        None => Vec::new(),
    }
}

fn medication(value: &Value) -> Option<Medication> {
    let med = match value {
        Value::Object(obj) => Medication::Detailed {
            name: text(obj.get("name")),
            dose: text(obj.get("dose")),
            route: text(obj.get("route")),
        },
        other => Medication::Text(text(Some(other))),
    };
    (!med.is_blank()).then_some(med)
}

fn medications(value: Option<&Value>) -> Vec<Medication> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(medication).collect(),
        Some(other) => medication(other).into_iter().collect(),
        None => Vec::new(),
    }
}
