//! Pipeline error taxonomy and HTTP error mapping for the service host.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Maximum number of characters of raw model output attached to diagnostics.
pub const SNIPPET_CHARS: usize = 1000;

/// Failures surfaced by the structuring pipeline.
///
/// Only [`StructuringError::TransientServiceUnavailable`] is recovered inside
/// the pipeline (retry, then degraded skeleton); every other variant reaches
/// the caller.
#[derive(Debug, thiserror::Error)]
pub enum StructuringError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("structuring model unavailable: {0}")]
    TransientServiceUnavailable(String),
    #[error("structuring model call failed: {0}")]
    ModelInvocationFailed(String),
    #[error("structuring model returned no text")]
    EmptyModelOutput,
    #[error("structuring model output was truncated at the output-size ceiling")]
    OutputTruncated,
    #[error("structuring model output is not valid JSON: {message}")]
    MalformedModelOutput { message: String, snippet: String },
    #[error("structuring was cancelled by the caller")]
    Cancelled,
    #[error("patient store unavailable: {0}")]
    PatientStoreUnavailable(String),
}

impl StructuringError {
    /// Stable machine-readable code for logs and API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::TransientServiceUnavailable(_) => "model_unavailable",
            Self::ModelInvocationFailed(_) => "model_invocation_failed",
            Self::EmptyModelOutput => "empty_model_output",
            Self::OutputTruncated => "output_truncated",
            Self::MalformedModelOutput { .. } => "malformed_model_output",
            Self::Cancelled => "cancelled",
            Self::PatientStoreUnavailable(_) => "patient_store_unavailable",
        }
    }

    /// Bounded raw-text snippet when the failure concerns model output.
    pub fn snippet(&self) -> Option<&str> {
        match self {
            Self::MalformedModelOutput { snippet, .. } => Some(snippet),
            _ => None,
        }
    }
}

/// Error model of the HTTP host.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{message}")]
    InvalidRequest {
        message: String,
        param: Option<String>,
        code: Option<String>,
    },
    #[error(transparent)]
    Structuring(#[from] StructuringError),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Creates a `401 Unauthorized` error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Creates an `invalid_request_error` payload with status `400`.
    pub fn invalid_request(
        message: impl Into<String>,
        param: Option<&str>,
        code: Option<&str>,
    ) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            param: param.map(ToOwned::to_owned),
            code: code.map(ToOwned::to_owned),
        }
    }

    /// Creates a configuration or start-up error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    param: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snippet: Option<String>,
}

fn structuring_status(err: &StructuringError) -> (StatusCode, &'static str) {
    match err {
        StructuringError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
        StructuringError::TransientServiceUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "upstream_error")
        }
        StructuringError::ModelInvocationFailed(_)
        | StructuringError::EmptyModelOutput
        | StructuringError::OutputTruncated
        | StructuringError::MalformedModelOutput { .. } => {
            (StatusCode::BAD_GATEWAY, "upstream_error")
        }
        StructuringError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
        StructuringError::PatientStoreUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "server_error")
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    message,
                    error_type: "authentication_error",
                    param: None,
                    code: Some("invalid_api_key".to_string()),
                    snippet: None,
                },
            ),
            AppError::InvalidRequest {
                message,
                param,
                code,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    message,
                    error_type: "invalid_request_error",
                    param,
                    code,
                    snippet: None,
                },
            ),
            AppError::Structuring(err) => {
                let (status, error_type) = structuring_status(&err);
                let param = matches!(err, StructuringError::InvalidInput(_))
                    .then(|| "transcription".to_string());
                (
                    status,
                    ErrorBody {
                        message: err.to_string(),
                        error_type,
                        param,
                        code: Some(err.code().to_string()),
                        snippet: err.snippet().map(ToOwned::to_owned),
                    },
                )
            }
            AppError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    message,
                    error_type: "server_error",
                    param: None,
                    code: Some("internal_error".to_string()),
                    snippet: None,
                },
            ),
        };

        (status, Json(ErrorPayload { error: body })).into_response()
    }
}
