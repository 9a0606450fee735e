//! Emptiness audit of structuring results.
//!
//! Informational only: a record without clinical content is logged for
//! review but still flows through the pipeline unchanged.

use crate::record::{ObjectiveFindings, StructuredClinicalRecord};

fn filled(value: &str) -> bool {
    !value.trim().is_empty()
}

fn objective_has_content(objective: &ObjectiveFindings) -> bool {
    objective.vitals.values().into_iter().any(filled)
        || filled(&objective.exam)
        || filled(&objective.labs)
        || objective.medications.iter().any(|med| !med.is_blank())
}

/// Returns `true` when any SOAPIE section carries clinical content.
///
/// Patient attributes are not considered: a record with only a name is
/// still an empty note.
pub fn has_content(record: &StructuredClinicalRecord) -> bool {
    let soapie = &record.soapie;
    filled(&soapie.subjective)
        || filled(&soapie.assessment)
        || filled(&soapie.plan)
        || filled(&soapie.evaluation)
        || soapie.interventions.iter().any(|item| filled(item))
        || objective_has_content(&soapie.objective)
}
