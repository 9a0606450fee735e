//! Structuring and reconciliation pipeline.
//!
//! prompt → model (under retry and a whole-run deadline) → extraction and
//! validation → emptiness audit → patient reconciliation. Each run is
//! request-scoped; the pipeline holds only read-only dependencies and can be
//! shared across concurrent requests.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::has_content;
use crate::backend::{ModelError, ModelRequest, StructuringModel};
use crate::config::{
    AppConfig, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_TIMEOUT_FACTOR, DEFAULT_TIMEOUT_SECS,
};
use crate::error::StructuringError;
use crate::extract::parse_model_response;
use crate::prompt::build_structuring_prompt;
use crate::reconcile::reconcile_patient;
use crate::record::{PatientInfo, StructuredClinicalRecord};
use crate::retry::{RetryError, RetryPolicy};
use crate::store::PatientStore;

/// Generation and resilience settings of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub retry: RetryPolicy,
    /// Bound on one complete run: every attempt and every backoff wait.
    pub deadline: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            retry: RetryPolicy::default(),
            deadline: Duration::from_secs(
                DEFAULT_TIMEOUT_SECS * u64::from(DEFAULT_TIMEOUT_FACTOR),
            ),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            max_output_tokens: cfg.max_output_tokens,
            retry: cfg.retry,
            deadline: cfg.pipeline_deadline(),
        }
    }
}

/// Result of one structuring run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringOutcome {
    pub record: StructuredClinicalRecord,
    /// The model stayed unavailable; `record` is the empty skeleton.
    pub degraded: bool,
    /// Emptiness audit signal. Informational only.
    pub has_content: bool,
}

impl StructuringOutcome {
    fn degraded() -> Self {
        Self {
            record: StructuredClinicalRecord::skeleton(),
            degraded: true,
            has_content: false,
        }
    }
}

pub struct StructuringPipeline {
    model: Arc<dyn StructuringModel>,
    store: Option<Arc<dyn PatientStore>>,
    settings: PipelineSettings,
}

impl StructuringPipeline {
    pub fn new(model: Arc<dyn StructuringModel>, settings: PipelineSettings) -> Self {
        Self {
            model,
            store: None,
            settings,
        }
    }

    /// Attaches the patient store consulted by [`Self::process`].
    pub fn with_store(mut self, store: Arc<dyn PatientStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Structures a transcription into a fully-typed record.
    pub async fn structure(
        &self,
        transcription: &str,
    ) -> Result<StructuredClinicalRecord, StructuringError> {
        self.structure_with(transcription, &CancellationToken::new())
            .await
            .map(|outcome| outcome.record)
    }

    /// Structures a transcription, reporting degraded mode and the emptiness
    /// audit. `cancel` is honoured between model attempts.
    pub async fn structure_with(
        &self,
        transcription: &str,
        cancel: &CancellationToken,
    ) -> Result<StructuringOutcome, StructuringError> {
        let prompt = build_structuring_prompt(transcription)?;
        let request = ModelRequest {
            prompt,
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
            json_mode: true,
        };
        debug!(
            transcription_chars = transcription.chars().count(),
            "structuring transcription"
        );

        let request = &request;
        let model = &self.model;
        let invocation = self
            .settings
            .retry
            .run(cancel, ModelError::is_transient, |attempt| async move {
                debug!(attempt, "invoking structuring model");
                model.generate(request).await
            });

        let response = match tokio::time::timeout(self.settings.deadline, invocation).await {
            Ok(Ok(response)) => response,
            Ok(Err(RetryError::Exhausted {
                attempts,
                last_error,
            })) => {
                let err = StructuringError::TransientServiceUnavailable(last_error.to_string());
                warn!(
                    attempts,
                    error = %err,
                    degraded = true,
                    "structuring model unavailable after retries; returning empty skeleton"
                );
                return Ok(StructuringOutcome::degraded());
            }
            Ok(Err(RetryError::Terminal(err))) => {
                error!(error = %err, "structuring model call failed");
                return Err(StructuringError::ModelInvocationFailed(err.to_string()));
            }
            Ok(Err(RetryError::Cancelled)) => {
                info!("structuring cancelled by caller");
                return Err(StructuringError::Cancelled);
            }
            Err(_) => {
                warn!(
                    deadline_ms = self.settings.deadline.as_millis() as u64,
                    degraded = true,
                    "structuring deadline exceeded; returning empty skeleton"
                );
                return Ok(StructuringOutcome::degraded());
            }
        };

        let record = parse_model_response(&response).map_err(|err| {
            error!(
                code = err.code(),
                finish_reason = response.finish_reason.as_str(),
                response_chars = response.text.chars().count(),
                "structuring model output rejected"
            );
            err
        })?;

        let has_content = has_content(&record);
        if !has_content {
            warn!("structuring produced no clinical content; flagging for review");
        }
        info!(
            has_content,
            degraded = false,
            medications = record.soapie.objective.medications.len(),
            interventions = record.soapie.interventions.len(),
            "structuring complete"
        );

        Ok(StructuringOutcome {
            record,
            degraded: false,
            has_content,
        })
    }

    /// Structures a transcription and reconciles its patient attributes
    /// against the persisted record and caller overrides.
    ///
    /// The store is read first: when it fails the run stops with
    /// [`StructuringError::PatientStoreUnavailable`] before any model call,
    /// since an unreadable identity cannot be protected.
    pub async fn process(
        &self,
        transcription: &str,
        patient_id: Option<&str>,
        overrides: Option<&PatientInfo>,
        cancel: &CancellationToken,
    ) -> Result<StructuringOutcome, StructuringError> {
        let persisted = self.lookup_patient(patient_id).await?;
        let outcome = self.structure_with(transcription, cancel).await?;

        let patient = reconcile_patient(
            persisted.as_ref(),
            Some(&outcome.record.patient),
            overrides,
        );

        Ok(StructuringOutcome {
            record: outcome.record.with_patient(patient),
            ..outcome
        })
    }

    async fn lookup_patient(
        &self,
        patient_id: Option<&str>,
    ) -> Result<Option<PatientInfo>, StructuringError> {
        let (store, patient_id) = match (self.store.as_ref(), patient_id) {
            (Some(store), Some(id)) if !id.trim().is_empty() => (store, id.trim()),
            _ => return Ok(None),
        };

        match store.find_patient(patient_id).await {
            Ok(found) => {
                debug!(found = found.is_some(), "patient store lookup");
                Ok(found)
            }
            Err(err) => {
                warn!(error = %err, "patient store lookup failed");
                Err(StructuringError::PatientStoreUnavailable(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::backend::{FinishReason, ModelResponse};
    use crate::record::Medication;
    use crate::store::{JsonFilePatientStore, MemoryPatientStore};

    pub(crate) enum Step {
        Reply(Result<ModelResponse, ModelError>),
        Hang,
    }

    /// Fake model that replays a fixed script of answers.
    pub(crate) struct ScriptedModel {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
    }

    impl ScriptedModel {
        pub(crate) fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicU32::new(0),
            })
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StructuringModel for ScriptedModel {
        async fn generate(&self, _req: &ModelRequest) -> Result<ModelResponse, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(reply)) => reply,
                Some(Step::Hang) => std::future::pending().await,
                None => Err(ModelError::Failed("script exhausted".to_string())),
            }
        }
    }

    pub(crate) fn ok(text: &str) -> Step {
        Step::Reply(Ok(ModelResponse {
            text: text.to_string(),
            finish_reason: FinishReason::Normal,
        }))
    }

    pub(crate) fn busy() -> Step {
        Step::Reply(Err(ModelError::Unavailable(
            "model service returned 503 Service Unavailable: The model is overloaded.".to_string(),
        )))
    }

    const FULL_RESPONSE: &str = r#"Voici la note :
{
  "patient": {"full_name": "Mamadou Sarr", "age": "67", "gender": "M", "room_number": "3", "unit": "Médecine"},
  "soapie": {
    "S": "Dyspnée depuis deux jours",
    "O": {
      "vitals": {"temperature": "38.2", "blood_pressure": "14/9", "heart_rate": "102", "respiratory_rate": "24", "spo2": "91%", "glycemia": ""},
      "exam": "Crépitants bilatéraux",
      "labs": "",
      "medications": [{"name": "Furosémide", "dose": "40 mg", "route": "IV"}]
    },
    "A": "Décompensation cardiaque probable",
    "I": ["Oxygénothérapie 2 L/min", "Furosémide IV"],
    "E": "",
    "P": "Contrôle SpO2 dans 2 h"
  }
}"#;

    fn pipeline(model: Arc<ScriptedModel>) -> StructuringPipeline {
        StructuringPipeline::new(model, PipelineSettings::default())
    }

    #[tokio::test]
    async fn blank_input_is_rejected_before_any_call() {
        let model = ScriptedModel::new(vec![ok("{}")]);
        let err = pipeline(model.clone()).structure("   ").await.unwrap_err();

        assert!(matches!(err, StructuringError::InvalidInput(_)));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn structures_a_full_response() {
        let model = ScriptedModel::new(vec![ok(FULL_RESPONSE)]);
        let outcome = pipeline(model.clone())
            .structure_with("transcription", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.degraded);
        assert!(outcome.has_content);
        let record = outcome.record;
        assert_eq!(record.patient.full_name, "Mamadou Sarr");
        assert_eq!(record.soapie.objective.vitals.spo2, "91%");
        assert_eq!(
            record.soapie.objective.medications,
            vec![Medication::Detailed {
                name: "Furosémide".to_string(),
                dose: "40 mg".to_string(),
                route: "IV".to_string(),
            }]
        );
        assert_eq!(record.soapie.interventions.len(), 2);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn degrades_to_skeleton_after_three_transient_failures() {
        let model = ScriptedModel::new(vec![busy(), busy(), busy(), ok(FULL_RESPONSE)]);
        let outcome = pipeline(model.clone())
            .structure_with("transcription", &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.degraded);
        assert!(!outcome.has_content);
        assert_eq!(outcome.record, StructuredClinicalRecord::skeleton());
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_the_service_comes_back() {
        let model = ScriptedModel::new(vec![busy(), busy(), ok(FULL_RESPONSE)]);
        let record = pipeline(model.clone()).structure("transcription").await.unwrap();

        assert_eq!(record.patient.age, "67");
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn terminal_failures_surface_the_service_message() {
        let model = ScriptedModel::new(vec![Step::Reply(Err(ModelError::Failed(
            "model service returned 403 Forbidden: API key not valid".to_string(),
        )))]);
        let err = pipeline(model.clone()).structure("transcription").await.unwrap_err();

        match err {
            StructuringError::ModelInvocationFailed(message) => {
                assert!(message.contains("API key not valid"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn truncated_output_is_fatal() {
        let model = ScriptedModel::new(vec![Step::Reply(Ok(ModelResponse {
            text: "{\"patient\": {\"full_name\": \"Ma".to_string(),
            finish_reason: FinishReason::Truncated,
        }))]);
        let err = pipeline(model).structure("transcription").await.unwrap_err();
        assert!(matches!(err, StructuringError::OutputTruncated));
    }

    #[tokio::test]
    async fn empty_output_is_fatal() {
        let model = ScriptedModel::new(vec![ok("")]);
        let err = pipeline(model).structure("transcription").await.unwrap_err();
        assert!(matches!(err, StructuringError::EmptyModelOutput));
    }

    #[tokio::test]
    async fn malformed_output_surfaces_a_snippet() {
        let model = ScriptedModel::new(vec![ok("Sure, here is the data: {invalid json")]);
        let err = pipeline(model).structure("transcription").await.unwrap_err();

        assert!(matches!(err, StructuringError::MalformedModelOutput { .. }));
        assert!(err.snippet().unwrap().contains("Sure, here is the data"));
    }

    #[tokio::test]
    async fn empty_record_still_succeeds() {
        let model = ScriptedModel::new(vec![ok("{}")]);
        let outcome = pipeline(model)
            .structure_with("transcription", &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.degraded);
        assert!(!outcome.has_content);
        assert_eq!(outcome.record, StructuredClinicalRecord::skeleton());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_model_degrades_at_the_deadline() {
        let model = ScriptedModel::new(vec![Step::Hang]);
        let outcome = pipeline(model)
            .structure_with("transcription", &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.degraded);
    }

    #[tokio::test]
    async fn cancelled_run_makes_no_call() {
        let model = ScriptedModel::new(vec![ok("{}")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline(model.clone())
            .structure_with("transcription", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StructuringError::Cancelled));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn process_protects_the_persisted_identity() {
        let store = Arc::new(MemoryPatientStore::new());
        store
            .insert(
                "p-1",
                PatientInfo {
                    full_name: "Awa Diop".to_string(),
                    room_number: "12".to_string(),
                    ..PatientInfo::default()
                },
            )
            .await;
        let model = ScriptedModel::new(vec![ok(FULL_RESPONSE)]);
        let overrides = PatientInfo {
            room_number: "14".to_string(),
            ..PatientInfo::default()
        };

        let outcome = pipeline(model)
            .with_store(store)
            .process(
                "transcription",
                Some("p-1"),
                Some(&overrides),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let patient = outcome.record.patient;
        assert_eq!(patient.full_name, "Awa Diop");
        assert_eq!(patient.room_number, "14");
        assert_eq!(patient.age, "67");
        assert_eq!(patient.unit, "Médecine");
    }

    #[tokio::test(start_paused = true)]
    async fn process_keeps_persisted_data_in_degraded_mode() {
        let store = Arc::new(MemoryPatientStore::new());
        store
            .insert(
                "p-1",
                PatientInfo {
                    full_name: "Awa Diop".to_string(),
                    unit: "Cardiologie".to_string(),
                    ..PatientInfo::default()
                },
            )
            .await;
        let model = ScriptedModel::new(vec![busy(), busy(), busy()]);

        let outcome = pipeline(model)
            .with_store(store)
            .process("transcription", Some("p-1"), None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.degraded);
        assert_eq!(outcome.record.patient.full_name, "Awa Diop");
        assert_eq!(outcome.record.patient.unit, "Cardiologie");
        assert_eq!(outcome.record.soapie, StructuredClinicalRecord::skeleton().soapie);
    }

    #[tokio::test]
    async fn process_stops_when_the_store_cannot_be_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFilePatientStore::new(dir.path().join("absent.json")));
        let model = ScriptedModel::new(vec![ok(FULL_RESPONSE)]);

        let err = pipeline(model.clone())
            .with_store(store)
            .process("transcription", Some("p-1"), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StructuringError::PatientStoreUnavailable(_)));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn process_keeps_the_stored_name_beside_records_with_nulls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "p-1": {{"full_name": "Awa Diop", "room_number": "12"}},
                "p-2": {{"full_name": "X", "age": null}}
            }}"#
        )
        .unwrap();
        let store = Arc::new(JsonFilePatientStore::new(file.path()));
        let model = ScriptedModel::new(vec![ok(
            r#"{"patient": {"full_name": "Aminata Ndiaye"}, "soapie": {"S": "Douleur"}}"#,
        )]);

        let outcome = pipeline(model)
            .with_store(store)
            .process("transcription", Some("p-1"), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.record.patient.full_name, "Awa Diop");
        assert_eq!(outcome.record.patient.room_number, "12");
    }

    #[tokio::test]
    async fn concurrent_runs_are_independent() {
        let model = ScriptedModel::new(vec![ok(FULL_RESPONSE), ok("{}")]);
        let pipeline = pipeline(model.clone());

        let (cancel_a, cancel_b) = (CancellationToken::new(), CancellationToken::new());
        let (first, second) = tokio::join!(
            pipeline.structure_with("a", &cancel_a),
            pipeline.structure_with("b", &cancel_b)
        );

        let contents = [first.unwrap().has_content, second.unwrap().has_content];
        assert!(contents.contains(&true));
        assert!(contents.contains(&false));
        assert_eq!(model.calls(), 2);
    }
}
