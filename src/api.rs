//! HTTP surface hosting the structuring pipeline.
//!
//! This module owns request parsing and authentication; structuring and
//! reconciliation are delegated to the library.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::pipeline::StructuringPipeline;
use crate::reconcile::reconcile_patient;
use crate::record::{PatientInfo, StructuredClinicalRecord};

/// Human-readable service name returned by health endpoints.
pub const APP_NAME: &str = "soapie-structurer";
/// Service version string returned by health endpoints.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state injected into all route handlers.
pub struct AppState {
    /// Runtime configuration loaded at startup.
    pub cfg: AppConfig,
    /// Structuring pipeline shared by all requests.
    pub pipeline: Arc<StructuringPipeline>,
    /// Cancelled on server shutdown; in-flight runs stop retrying.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(cfg: AppConfig, pipeline: Arc<StructuringPipeline>) -> Self {
        Self {
            cfg,
            pipeline,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Builds the Axum router for all public endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/structure", post(structure))
        .route("/v1/patients/reconcile", post(reconcile))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct StructureRequest {
    pub transcription: String,
    /// Id of the persisted patient, when known.
    #[serde(default)]
    pub patient_id: Option<String>,
    /// Operator-supplied patient attributes for this run.
    #[serde(default, rename = "override")]
    pub overrides: Option<PatientInfo>,
}

#[derive(Debug, Serialize)]
pub struct StructureResponse {
    pub record: StructuredClinicalRecord,
    pub degraded: bool,
    pub has_content: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub persisted: Option<PatientInfo>,
    #[serde(default)]
    pub extracted: Option<PatientInfo>,
    #[serde(default, rename = "override")]
    pub overrides: Option<PatientInfo>,
}

/// Status endpoint (`GET /health`).
pub async fn health(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    require_auth(&state.cfg, &headers)?;
    Ok(Json(json!({
        "status": "ok",
        "name": APP_NAME,
        "version": APP_VERSION,
        "model": state.cfg.model_name,
    })))
}

/// Structures a transcription (`POST /v1/structure`).
///
/// Degraded mode still answers `200` with `degraded: true` so the workflow
/// can continue with manual entry.
pub async fn structure(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<StructureRequest>, JsonRejection>,
) -> Result<Json<StructureResponse>, AppError> {
    require_auth(&state.cfg, &headers)?;
    let Json(req) = body.map_err(json_rejection)?;

    // Client disconnects drop this future; shutdown cancels through the token.
    let outcome = state
        .pipeline
        .process(
            &req.transcription,
            req.patient_id.as_deref(),
            req.overrides.as_ref(),
            &state.shutdown.child_token(),
        )
        .await?;

    Ok(Json(StructureResponse {
        record: outcome.record,
        degraded: outcome.degraded,
        has_content: outcome.has_content,
    }))
}

/// Merges patient attributes without structuring (`POST /v1/patients/reconcile`).
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ReconcileRequest>, JsonRejection>,
) -> Result<Json<PatientInfo>, AppError> {
    require_auth(&state.cfg, &headers)?;
    let Json(req) = body.map_err(json_rejection)?;

    Ok(Json(reconcile_patient(
        req.persisted.as_ref(),
        req.extracted.as_ref(),
        req.overrides.as_ref(),
    )))
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    AppError::invalid_request(
        format!("invalid JSON body: {}", rejection.body_text()),
        None,
        Some("invalid_json"),
    )
}

/// Enforces optional bearer-token authentication.
fn require_auth(cfg: &AppConfig, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected_api_key) = cfg.api_key.as_deref() else {
        return Ok(());
    };

    let Some(raw) = headers.get(header::AUTHORIZATION) else {
        return Err(AppError::unauthorized("missing bearer token"));
    };

    let value = raw
        .to_str()
        .map_err(|_| AppError::unauthorized("invalid authorization header"))?;

    let mut parts = value.split_whitespace();
    let scheme = parts
        .next()
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;
    let token = parts
        .next()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized("missing bearer token"));
    }

    if token != expected_api_key {
        return Err(AppError::unauthorized("invalid token"));
    }

    Ok(())
}
