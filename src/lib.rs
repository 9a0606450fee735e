//! Structuring and reconciliation of clinical transcriptions.
//!
//! A free-text transcription is turned into a [`StructuredClinicalRecord`]
//! (patient attributes plus a SOAPIE note) by an external structuring model,
//! and the patient attributes are merged with the persisted record and
//! operator overrides.

pub mod api;
pub mod audit;
pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod prompt;
pub mod reconcile;
pub mod record;
pub mod retry;
pub mod store;

pub use audit::has_content;
pub use backend::{FinishReason, ModelError, ModelRequest, ModelResponse, StructuringModel};
pub use error::StructuringError;
pub use pipeline::{PipelineSettings, StructuringOutcome, StructuringPipeline};
pub use reconcile::reconcile_patient;
pub use record::{Medication, PatientInfo, StructuredClinicalRecord};
pub use retry::RetryPolicy;
pub use store::PatientStore;
