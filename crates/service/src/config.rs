use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

use sheetqc_core::DEFAULT_FEEDBACK_THRESHOLD;
use sheetqc_llm::{LlmProvider, ServiceLimits};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub provider: LlmProvider,
    pub model: String,
    pub feedback_threshold: f64,
    pub limits: ServiceLimits,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let provider_name = env::var("SHEETQC_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
        let provider = LlmProvider::from_str(&provider_name)
            .ok_or_else(|| anyhow!(format!("unknown provider {provider_name}")))?;
        let model =
            env::var("SHEETQC_MODEL").unwrap_or_else(|_| default_model(provider).to_string());
        let feedback_threshold = env::var("SHEETQC_FEEDBACK_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_FEEDBACK_THRESHOLD);

        let mut limits = ServiceLimits::default();
        if let Some(max_concurrent) = read_env("SHEETQC_MAX_CONCURRENT") {
            limits.max_concurrent = max_concurrent;
        }
        if let Some(queue_depth) = read_env("SHEETQC_QUEUE_DEPTH") {
            limits.queue_depth = queue_depth;
        }
        if let Some(timeout_secs) = read_env("SHEETQC_QUEUE_TIMEOUT_SECS") {
            limits.queue_timeout = Duration::from_secs(timeout_secs as u64);
        }
        if let Some(retries) = read_env("SHEETQC_RETRY_ATTEMPTS") {
            limits.retry_attempts = retries as u32;
        }

        Ok(Self {
            bind_addr: env::var("SHEETQC_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            db_path: env::var("SHEETQC_DB").unwrap_or_else(|_| "sheetqc.sqlite".to_string()),
            provider,
            model,
            feedback_threshold,
            limits,
        })
    }
}

fn default_model(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Gemini => "gemini-2.5-flash",
        LlmProvider::OpenAi => "gpt-4.1-mini",
        LlmProvider::Local => "local",
    }
}

fn read_env(var: &str) -> Option<usize> {
    env::var(var).ok().and_then(|v| v.parse().ok())
}
