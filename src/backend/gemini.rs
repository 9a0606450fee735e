//! Client for a Gemini-style `generateContent` endpoint.
//!
//! The client is stateless apart from the shared `reqwest::Client`, so one
//! instance serves concurrent pipeline runs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{FinishReason, ModelError, ModelRequest, ModelResponse, StructuringModel};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::extract::truncate_chars;

const ERROR_BODY_CHARS: usize = 200;

/// Remote structuring model reached over HTTPS.
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl GeminiBackend {
    /// Builds a client with the configured per-call timeout.
    pub fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        if cfg.model_api_key.trim().is_empty() {
            return Err(AppError::internal("structuring model API key is empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|err| AppError::internal(format!("failed to create HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: cfg.model_api_url.trim_end_matches('/').to_string(),
            model: cfg.model_name.clone(),
            api_key: cfg.model_api_key.clone(),
            timeout: cfg.request_timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

impl<'a> GenerateRequest<'a> {
    fn from_model_request(req: &'a ModelRequest) -> Self {
        Self {
            contents: [Content {
                role: "user",
                parts: [Part { text: &req.prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: req.temperature,
                max_output_tokens: req.max_output_tokens,
                response_mime_type: req.json_mode.then_some("application/json"),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

fn parse_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        None | Some("STOP") | Some("FINISH_REASON_UNSPECIFIED") => FinishReason::Normal,
        Some("MAX_TOKENS") => FinishReason::Truncated,
        Some(other) => FinishReason::Other(other.to_string()),
    }
}

fn into_model_response(payload: GenerateResponse) -> ModelResponse {
    let Some(candidate) = payload.candidates.into_iter().next() else {
        let reason = payload
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
            .unwrap_or_else(|| "NO_CANDIDATES".to_string());
        return ModelResponse {
            text: String::new(),
            finish_reason: FinishReason::Other(reason),
        };
    };

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    ModelResponse {
        text,
        finish_reason: parse_finish_reason(candidate.finish_reason.as_deref()),
    }
}

/// Classifies a non-success HTTP answer from the model service.
fn classify_failure(status: StatusCode, body: &str) -> ModelError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error)
        .ok();
    let message = match &detail {
        Some(detail) if !detail.message.is_empty() => detail.message.clone(),
        _ => truncate_chars(body.trim(), ERROR_BODY_CHARS),
    };
    let overloaded = detail.as_ref().is_some_and(|detail| {
        detail.status == "UNAVAILABLE" || detail.message.to_lowercase().contains("overloaded")
    });

    let summary = format!("model service returned {status}: {message}");
    if status == StatusCode::SERVICE_UNAVAILABLE || overloaded {
        ModelError::Unavailable(summary)
    } else {
        ModelError::Failed(summary)
    }
}

fn classify_transport(err: &reqwest::Error, timeout: Duration) -> ModelError {
    if err.is_timeout() {
        ModelError::Unavailable(format!(
            "model service did not answer within {}s",
            timeout.as_secs()
        ))
    } else if err.is_connect() {
        ModelError::Unavailable(format!("model service unreachable: {err}"))
    } else {
        ModelError::Failed(format!("model request failed: {err}"))
    }
}

#[async_trait]
impl StructuringModel for GeminiBackend {
    async fn generate(&self, req: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = GenerateRequest::from_model_request(req);
        debug!(
            model = %self.model,
            prompt_chars = req.prompt.chars().count(),
            "sending structuring request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| classify_transport(&err, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let payload = response
            .json::<GenerateResponse>()
            .await
            .map_err(|err| ModelError::Failed(format!("unreadable model service payload: {err}")))?;

        Ok(into_model_response(payload))
    }
}
