use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::proposal::models::{ExtractionFailurePolicy, OutputContract};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Application configuration loaded from environment variables.
/// Fails at startup if a required variable is missing or a value does not parse.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub llm_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
    /// Response shape used when a request does not pass `?format=`.
    pub output_contract: OutputContract,
    pub extraction_failure_policy: ExtractionFailurePolicy,
    /// Directory for transient uploads. Created at startup.
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            openai_api_key: require_env("OPENAI_API_KEY")?,
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            temperature: parse_env("OPENAI_TEMPERATURE", 0.7)?,
            llm_timeout_secs: parse_env("LLM_TIMEOUT_SECS", 120)?,
            stream_idle_timeout_secs: parse_env("LLM_STREAM_IDLE_TIMEOUT_SECS", 60)?,
            output_contract: match std::env::var("OUTPUT_CONTRACT") {
                Ok(raw) => raw
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("OUTPUT_CONTRACT is invalid")?,
                Err(_) => OutputContract::default(),
            },
            extraction_failure_policy: match std::env::var("EXTRACTION_FAILURE_POLICY") {
                Ok(raw) => raw
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("EXTRACTION_FAILURE_POLICY is invalid")?,
                Err(_) => ExtractionFailurePolicy::default(),
            },
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("rfp-uploads")),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            port: parse_env("PORT", 8000)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: '{raw}'")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    /// Configuration for in-process tests: uploads go to `upload_dir`, no network.
    pub fn for_tests(upload_dir: PathBuf) -> Self {
        Config {
            openai_api_key: "test-key".to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            llm_timeout_secs: 5,
            stream_idle_timeout_secs: 5,
            output_contract: OutputContract::default(),
            extraction_failure_policy: ExtractionFailurePolicy::default(),
            upload_dir,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            port: 0,
            rust_log: "debug".to_string(),
        }
    }
}
