//! Read side of the patient store.
//!
//! The pipeline only looks patients up; writing the merged record back is
//! the caller's job.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::record::PatientInfo;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read patient store {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("patient store {path:?} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Lookup contract consumed by the pipeline.
#[async_trait]
pub trait PatientStore: Send + Sync {
    /// Returns the persisted attributes of `patient_id`, or `None` if unknown.
    async fn find_patient(&self, patient_id: &str) -> Result<Option<PatientInfo>, StoreError>;
}

/// Store backed by a JSON object mapping patient ids to attributes.
///
/// The file is re-read on every lookup so external edits are visible
/// without a restart.
pub struct JsonFilePatientStore {
    path: PathBuf,
}

impl JsonFilePatientStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PatientStore for JsonFilePatientStore {
    async fn find_patient(&self, patient_id: &str) -> Result<Option<PatientInfo>, StoreError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        let parse_error = |source| StoreError::Parse {
            path: self.path.clone(),
            source,
        };
        // Only the requested entry is typed, so one bad record cannot hide the others.
        let mut patients: HashMap<String, serde_json::Value> =
            serde_json::from_str(&raw).map_err(parse_error)?;
        patients
            .remove(patient_id)
            .map(serde_json::from_value::<PatientInfo>)
            .transpose()
            .map_err(parse_error)
    }
}

/// In-process store, used when no file is configured and in tests.
#[derive(Default)]
pub struct MemoryPatientStore {
    patients: RwLock<HashMap<String, PatientInfo>>,
}

impl MemoryPatientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, patient_id: impl Into<String>, info: PatientInfo) {
        self.patients.write().await.insert(patient_id.into(), info);
    }
}

#[async_trait]
impl PatientStore for MemoryPatientStore {
    async fn find_patient(&self, patient_id: &str) -> Result<Option<PatientInfo>, StoreError> {
        Ok(self.patients.read().await.get(patient_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn json_store_finds_known_patients() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"p-1": {{"full_name": "Awa Diop", "room_number": "12"}}}}"#
        )
        .unwrap();

        let store = JsonFilePatientStore::new(file.path());
        let found = store.find_patient("p-1").await.unwrap().unwrap();
        assert_eq!(found.full_name, "Awa Diop");
        assert_eq!(found.room_number, "12");
        assert_eq!(found.unit, "");

        assert!(store.find_patient("p-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn json_store_tolerates_nulls_and_bad_neighbours() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "p-1": {{"full_name": "Awa Diop", "room_number": "12"}},
                "p-2": {{"full_name": "X", "age": null}},
                "p-3": "not a record"
            }}"#
        )
        .unwrap();

        let store = JsonFilePatientStore::new(file.path());
        let found = store.find_patient("p-1").await.unwrap().unwrap();
        assert_eq!(found.full_name, "Awa Diop");

        let with_null = store.find_patient("p-2").await.unwrap().unwrap();
        assert_eq!(with_null.age, "");

        assert!(matches!(
            store.find_patient("p-3").await,
            Err(StoreError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn json_store_reports_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePatientStore::new(dir.path().join("missing.json"));
        assert!(matches!(
            store.find_patient("p-1").await,
            Err(StoreError::Io { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let store = JsonFilePatientStore::new(file.path());
        assert!(matches!(
            store.find_patient("p-1").await,
            Err(StoreError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryPatientStore::new();
        store
            .insert(
                "p-1",
                PatientInfo {
                    full_name: "Mamadou Sarr".to_string(),
                    ..PatientInfo::default()
                },
            )
            .await;

        assert_eq!(
            store.find_patient("p-1").await.unwrap().unwrap().full_name,
            "Mamadou Sarr"
        );
        assert!(store.find_patient("other").await.unwrap().is_none());
    }
}
