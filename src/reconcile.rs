//! Merge of patient attributes from the persisted record, the model
//! extraction and caller overrides.
//!
//! - `full_name`: persisted, unless empty or a placeholder; then override,
//!   then extracted, then the persisted placeholder.
//! - every other field: override, then extracted, then persisted, then `""`.
//!
//! A value counts only when it is non-empty after trimming. Placeholder
//! names never count as a name from any source. The merge is a pure
//! function of its three inputs.

use tracing::debug;

use crate::record::{is_placeholder_name, PatientInfo};

type Field = fn(&PatientInfo) -> &str;

fn filled(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn usable_name(value: &str) -> Option<&str> {
    filled(value).filter(|name| !is_placeholder_name(name))
}

/// First non-empty value of `field`, in the order given.
fn first_filled(sources: [Option<&PatientInfo>; 3], field: Field) -> String {
    sources
        .into_iter()
        .flatten()
        .find_map(|info| filled(field(info)))
        .unwrap_or_default()
        .to_string()
}

fn reconcile_name(
    persisted: Option<&PatientInfo>,
    extracted: Option<&PatientInfo>,
    overrides: Option<&PatientInfo>,
) -> String {
    let stored = persisted.map(|p| p.full_name.as_str()).unwrap_or_default();
    if let Some(name) = usable_name(stored) {
        if extracted.is_some_and(|e| usable_name(&e.full_name).is_some_and(|n| n != name)) {
            debug!("extracted name differs from the persisted identity; keeping persisted name");
        }
        return name.to_string();
    }

    let replacement = overrides
        .and_then(|o| usable_name(&o.full_name))
        .map(|name| ("override", name))
        .or_else(|| {
            extracted
                .and_then(|e| usable_name(&e.full_name))
                .map(|name| ("extracted", name))
        });

    match replacement {
        Some((source, name)) => {
            debug!(source, "persisted name missing or placeholder; using replacement");
            name.to_string()
        }
        // Retains the stored placeholder, or stays empty when nothing was stored.
        None => filled(stored).unwrap_or_default().to_string(),
    }
}

/// Merges the three patient sources into one record. Total: never fails.
pub fn reconcile_patient(
    persisted: Option<&PatientInfo>,
    extracted: Option<&PatientInfo>,
    overrides: Option<&PatientInfo>,
) -> PatientInfo {
    let order = [overrides, extracted, persisted];
    PatientInfo {
        full_name: reconcile_name(persisted, extracted, overrides),
        age: first_filled(order, |p| p.age.as_str()),
        gender: first_filled(order, |p| p.gender.as_str()),
        room_number: first_filled(order, |p| p.room_number.as_str()),
        unit: first_filled(order, |p| p.unit.as_str()),
    }
}
