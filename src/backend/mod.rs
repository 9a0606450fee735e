//! Backend abstraction for the external structuring model.
//!
//! The pipeline depends on the [`StructuringModel`] trait instead of a
//! concrete client, so it can run against a fake in tests. Implementations
//! make exactly one outbound call per invocation; retrying is the caller's
//! concern.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::AppError;

pub mod gemini;

/// Generation settings sent with every structuring request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    /// Full instruction plus transcription.
    pub prompt: String,
    /// Sampling temperature, pinned at or near zero.
    pub temperature: f32,
    /// Output-size ceiling in tokens.
    pub max_output_tokens: u32,
    /// Requests a JSON-typed response.
    pub json_mode: bool,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end of the response.
    Normal,
    /// Output hit the size ceiling; the text is incomplete.
    Truncated,
    /// Any other reason reported by the service (safety filter, recitation, ...).
    Other(String),
}

impl FinishReason {
    /// Returns the label used in logs.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Normal => "normal",
            Self::Truncated => "truncated",
            Self::Other(reason) => reason,
        }
    }
}

/// Raw model output before extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResponse {
    /// Generated text, possibly empty or wrapped in prose.
    pub text: String,
    /// Completion-reason flag.
    pub finish_reason: FinishReason,
}

/// Invocation failure, classified at the client boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    /// The service is overloaded or unreachable; retrying may succeed.
    #[error("{0}")]
    Unavailable(String),
    /// Any other failure (auth, quota, malformed request, bad payload).
    #[error("{0}")]
    Failed(String),
}

impl ModelError {
    /// Transient-classifier predicate used by the retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Contract implemented by structuring model clients.
#[async_trait]
pub trait StructuringModel: Send + Sync {
    /// Sends one request and returns the raw response.
    async fn generate(&self, req: &ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Builds the configured model client.
pub fn build_backend(cfg: &AppConfig) -> Result<Arc<dyn StructuringModel>, AppError> {
    Ok(Arc::new(gemini::GeminiBackend::new(cfg)?))
}
