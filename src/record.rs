//! Typed clinical record produced by the structuring pipeline.
//!
//! Every field is always present: absent values are empty strings or empty
//! lists, never `null`. The serde derives cover records this crate already
//! produced (persisted or sent over the API); raw model output goes through
//! [`crate::extract::validate_record`] instead.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Placeholder names the upstream workflow stores when a patient has not yet
/// been identified. They are never treated as a trustworthy identity.
pub const PLACEHOLDER_NAMES: &[&str] = &["Patient non identifié", "Patient Inconnu"];

/// Returns `true` when `name` is one of the known unidentified-patient placeholders.
pub fn is_placeholder_name(name: &str) -> bool {
    let trimmed = name.trim();
    PLACEHOLDER_NAMES
        .iter()
        .any(|placeholder| placeholder.eq_ignore_ascii_case(trimmed))
}

/// Reads a text attribute the way stored records write it: `null` is empty,
/// numbers and booleans keep their literal text.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Patient attributes shared by the persisted record, the model extraction and
/// caller overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientInfo {
    #[serde(deserialize_with = "lenient_text")]
    pub full_name: String,
    #[serde(deserialize_with = "lenient_text")]
    pub age: String,
    #[serde(deserialize_with = "lenient_text")]
    pub gender: String,
    #[serde(deserialize_with = "lenient_text")]
    pub room_number: String,
    #[serde(deserialize_with = "lenient_text")]
    pub unit: String,
}

/// Bedside vital signs as dictated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vitals {
    pub temperature: String,
    pub blood_pressure: String,
    pub heart_rate: String,
    pub respiratory_rate: String,
    pub spo2: String,
    pub glycemia: String,
}

impl Vitals {
    /// Iterates over every vital sign value.
    pub fn values(&self) -> [&str; 6] {
        [
            self.temperature.as_str(),
            self.blood_pressure.as_str(),
            self.heart_rate.as_str(),
            self.respiratory_rate.as_str(),
            self.spo2.as_str(),
            self.glycemia.as_str(),
        ]
    }
}

/// A medication mention, either free text or broken down into parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Medication {
    Text(String),
    Detailed {
        #[serde(default)]
        name: String,
        #[serde(default)]
        dose: String,
        #[serde(default)]
        route: String,
    },
}

impl Medication {
    /// Returns `true` when the entry carries no text at all.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Detailed { name, dose, route } => {
                name.trim().is_empty() && dose.trim().is_empty() && route.trim().is_empty()
            }
        }
    }
}

/// The `O` (objective) section of a SOAPIE note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveFindings {
    pub vitals: Vitals,
    pub exam: String,
    pub labs: String,
    pub medications: Vec<Medication>,
}

/// Subjective, Objective, Assessment, Intervention, Evaluation, Plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Soapie {
    #[serde(rename = "S")]
    pub subjective: String,
    #[serde(rename = "O")]
    pub objective: ObjectiveFindings,
    #[serde(rename = "A")]
    pub assessment: String,
    #[serde(rename = "I")]
    pub interventions: Vec<String>,
    #[serde(rename = "E")]
    pub evaluation: String,
    #[serde(rename = "P")]
    pub plan: String,
}

/// Output unit of one transcription-processing request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredClinicalRecord {
    pub patient: PatientInfo,
    pub soapie: Soapie,
}

impl StructuredClinicalRecord {
    /// Fully-typed record with every leaf set to its empty default.
    ///
    /// Returned in degraded mode so operators can fall back to manual entry.
    pub fn skeleton() -> Self {
        Self::default()
    }

    /// Returns a copy with the patient sub-record replaced.
    pub fn with_patient(mut self, patient: PatientInfo) -> Self {
        self.patient = patient;
        self
    }
}
