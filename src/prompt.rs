//! Deterministic structuring instruction.
//!
//! The rules and schema are fixed; only the transcription varies between
//! requests, so identical input always produces an identical prompt.

use crate::error::StructuringError;

const STRUCTURING_RULES: &str = "\
Tu es un assistant de documentation infirmière. Structure la transcription ci-dessous \
au format SOAPIE.

RÈGLES STRICTES :
1. N'invente JAMAIS de données. Chaque valeur doit provenir de la transcription.
2. Si une information n'est pas mentionnée, laisse le champ vide (\"\" ou []) au lieu de deviner.
3. Corrige les fautes de transcription évidentes sans modifier le sens clinique.
4. Réponds UNIQUEMENT avec un objet JSON valide, sans texte avant ni après.";

const STRUCTURING_SCHEMA: &str = r#"{
  "patient": {
    "full_name": "",
    "age": "",
    "gender": "",
    "room_number": "",
    "unit": ""
  },
  "soapie": {
    "S": "",
    "O": {
      "vitals": {
        "temperature": "",
        "blood_pressure": "",
        "heart_rate": "",
        "respiratory_rate": "",
        "spo2": "",
        "glycemia": ""
      },
      "exam": "",
      "labs": "",
      "medications": [{"name": "", "dose": "", "route": ""}]
    },
    "A": "",
    "I": [],
    "E": "",
    "P": ""
  }
}"#;

/// Builds the full structuring prompt for a transcription.
///
/// Whitespace-only input is rejected before anything is sent to the model.
pub fn build_structuring_prompt(transcription: &str) -> Result<String, StructuringError> {
    let trimmed = transcription.trim();
    if trimmed.is_empty() {
        return Err(StructuringError::InvalidInput(
            "transcription is empty".to_string(),
        ));
    }

    Ok(format!(
        "{STRUCTURING_RULES}\n\nSCHÉMA JSON ATTENDU :\n{STRUCTURING_SCHEMA}\n\nTRANSCRIPTION :\n\"\"\"\n{trimmed}\n\"\"\""
    ))
}
