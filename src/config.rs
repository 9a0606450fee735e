//! Configuration loading from environment variables.
//!
//! Values are validated early so startup fails fast with actionable errors.

use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::retry::RetryPolicy;

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;
pub const DEFAULT_TIMEOUT_FACTOR: u32 = 4;

/// Runtime configuration for the HTTP host and the structuring pipeline.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host interface to bind, for example `127.0.0.1`.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// Optional bearer token required by all endpoints.
    pub api_key: Option<String>,
    /// Base URL of the structuring model service.
    pub model_api_url: String,
    /// Model identifier sent to the service.
    pub model_name: String,
    /// Credential for the structuring model service.
    pub model_api_key: String,
    /// Sampling temperature, in `[0.0, 0.2]`.
    pub temperature: f32,
    /// Output-size ceiling requested from the model.
    pub max_output_tokens: u32,
    /// Timeout applied to a single model call.
    pub request_timeout: Duration,
    /// Backoff policy for transient model failures.
    pub retry: RetryPolicy,
    /// Whole-run deadline as a multiple of `request_timeout`.
    pub pipeline_timeout_factor: u32,
    /// Optional JSON file backing the read-only patient store.
    pub patient_store_path: Option<String>,
}

impl AppConfig {
    /// Builds configuration from environment variables.
    ///
    /// Variables:
    /// - `HOST` (default `127.0.0.1`)
    /// - `PORT` (default `8000`)
    /// - `API_KEY` (optional)
    /// - `STRUCTURING_API_URL` (default Gemini `v1beta` endpoint)
    /// - `STRUCTURING_MODEL` (default `gemini-2.0-flash`)
    /// - `STRUCTURING_API_KEY` (required)
    /// - `STRUCTURING_TEMPERATURE` (default `0.0`, max `0.2`)
    /// - `STRUCTURING_MAX_OUTPUT_TOKENS` (default `8192`)
    /// - `STRUCTURING_TIMEOUT_SECS` (default `60`)
    /// - `RETRY_MAX_ATTEMPTS` (default `3`)
    /// - `RETRY_BASE_DELAY_MS` (default `1000`)
    /// - `RETRY_MAX_DELAY_MS` (default `5000`)
    /// - `PIPELINE_TIMEOUT_FACTOR` (default `4`)
    /// - `PATIENT_STORE_PATH` (optional)
    pub fn from_env() -> Result<Self, AppError> {
        let host = env_str("HOST", "127.0.0.1");
        let port = env_u16("PORT", 8000)?;
        let model_api_key = env_opt("STRUCTURING_API_KEY").ok_or_else(|| {
            AppError::internal("STRUCTURING_API_KEY is required to reach the structuring model")
        })?;
        let temperature = env_f32_bounded("STRUCTURING_TEMPERATURE", 0.0, 0.0, 0.2)?;
        let max_output_tokens = env_u64_bounded(
            "STRUCTURING_MAX_OUTPUT_TOKENS",
            u64::from(DEFAULT_MAX_OUTPUT_TOKENS),
            1024,
            65536,
        )? as u32;
        let timeout_secs =
            env_u64_bounded("STRUCTURING_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS, 5, 600)?;
        let max_attempts =
            env_u64_bounded("RETRY_MAX_ATTEMPTS", u64::from(DEFAULT_MAX_ATTEMPTS), 1, 10)? as u32;
        let base_delay_ms =
            env_u64_bounded("RETRY_BASE_DELAY_MS", DEFAULT_BASE_DELAY_MS, 0, 60_000)?;
        let max_delay_ms = env_u64_bounded("RETRY_MAX_DELAY_MS", DEFAULT_MAX_DELAY_MS, 0, 60_000)?;
        if max_delay_ms < base_delay_ms {
            return Err(AppError::internal(format!(
                "invalid RETRY_MAX_DELAY_MS={max_delay_ms}; expected >= RETRY_BASE_DELAY_MS={base_delay_ms}"
            )));
        }
        let pipeline_timeout_factor = env_u64_bounded(
            "PIPELINE_TIMEOUT_FACTOR",
            u64::from(DEFAULT_TIMEOUT_FACTOR),
            1,
            10,
        )? as u32;

        Ok(Self {
            host,
            port,
            api_key: env_opt("API_KEY"),
            model_api_url: env_str("STRUCTURING_API_URL", DEFAULT_API_URL),
            model_name: env_str("STRUCTURING_MODEL", DEFAULT_MODEL),
            model_api_key,
            temperature,
            max_output_tokens,
            request_timeout: Duration::from_secs(timeout_secs),
            retry: RetryPolicy::new(
                max_attempts,
                Duration::from_millis(base_delay_ms),
                Duration::from_millis(max_delay_ms),
            ),
            pipeline_timeout_factor,
            patient_store_path: env_opt("PATIENT_STORE_PATH"),
        })
    }

    /// Upper bound for one complete structuring run, retries included.
    pub fn pipeline_deadline(&self) -> Duration {
        self.request_timeout * self.pipeline_timeout_factor
    }
}

fn env_str(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

fn env_u16(name: &str, default: u16) -> Result<u16, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<u16>().map_err(|_| {
        AppError::internal(format!("invalid {name}={raw:?}; expected integer 1-65535"))
    })?;
    if parsed == 0 {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected > 0"
        )));
    }
    Ok(parsed)
}

fn env_u64_bounded(name: &str, default: u64, min: u64, max: u64) -> Result<u64, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_u64_bounded(name, &raw, min, max)
}

fn env_f32_bounded(name: &str, default: f32, min: f32, max: f32) -> Result<f32, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_f32_bounded(name, &raw, min, max)
}

fn parse_u64_bounded(name: &str, raw: &str, min: u64, max: u64) -> Result<u64, AppError> {
    let parsed = raw.trim().parse::<u64>().map_err(|_| {
        AppError::internal(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        ))
    })?;
    if parsed < min || parsed > max {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        )));
    }
    Ok(parsed)
}

fn parse_f32_bounded(name: &str, raw: &str, min: f32, max: f32) -> Result<f32, AppError> {
    let parsed = raw.trim().parse::<f32>().map_err(|_| {
        AppError::internal(format!(
            "invalid {name}={raw:?}; expected float in range [{min}, {max}]"
        ))
    })?;
    if !parsed.is_finite() || parsed < min || parsed > max {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected float in range [{min}, {max}]"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 8000,
        api_key: None,
        model_api_url: "http://127.0.0.1:9".to_string(),
        model_name: DEFAULT_MODEL.to_string(),
        model_api_key: "test-key".to_string(),
        temperature: 0.0,
        max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        retry: RetryPolicy::default(),
        pipeline_timeout_factor: DEFAULT_TIMEOUT_FACTOR,
        patient_store_path: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_u64_bounded_accepts_in_range_values() {
        assert_eq!(parse_u64_bounded("RETRY_MAX_ATTEMPTS", "1", 1, 10).unwrap(), 1);
        assert_eq!(parse_u64_bounded("RETRY_MAX_ATTEMPTS", " 10 ", 1, 10).unwrap(), 10);
    }

    #[test]
    fn parse_u64_bounded_rejects_non_numeric_value() {
        assert!(parse_u64_bounded("RETRY_MAX_ATTEMPTS", "three", 1, 10).is_err());
    }

    #[test]
    fn parse_u64_bounded_rejects_out_of_range_values() {
        assert!(parse_u64_bounded("RETRY_MAX_ATTEMPTS", "0", 1, 10).is_err());
        assert!(parse_u64_bounded("RETRY_MAX_ATTEMPTS", "11", 1, 10).is_err());
    }

    #[test]
    fn parse_f32_bounded_rejects_hot_temperatures() {
        assert_eq!(
            parse_f32_bounded("STRUCTURING_TEMPERATURE", "0.1", 0.0, 0.2).unwrap(),
            0.1
        );
        assert!(parse_f32_bounded("STRUCTURING_TEMPERATURE", "0.7", 0.0, 0.2).is_err());
        assert!(parse_f32_bounded("STRUCTURING_TEMPERATURE", "NaN", 0.0, 0.2).is_err());
    }

    #[test]
    fn deadline_is_a_multiple_of_the_call_timeout() {
        let cfg = test_config();
        assert_eq!(cfg.pipeline_deadline(), Duration::from_secs(240));
    }
}
