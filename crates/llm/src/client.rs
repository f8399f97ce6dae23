use std::env;

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::runtime::Runtime;
use tokio::time::sleep;
use tracing::warn;

use crate::gate::ServiceLimits;
use crate::prompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAi,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "gemini" => Some(LlmProvider::Gemini),
            "openai" => Some(LlmProvider::OpenAi),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub prompt: String,
}

#[derive(Clone)]
enum ProviderConfig {
    Gemini(GeminiConfig),
    OpenAi(OpenAiConfig),
    Local,
}

#[derive(Clone)]
struct GeminiConfig {
    api_key: String,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

/// Text-generation collaborator. Carries its own retry/backoff policy from
/// the explicit limits struct; callers gate concurrency separately with a
/// `RequestGate`.
#[derive(Clone)]
pub struct FeedbackClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
    limits: ServiceLimits,
}

impl FeedbackClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>, limits: ServiceLimits) -> Result<Self> {
        let config = match provider {
            LlmProvider::Gemini => ProviderConfig::Gemini(GeminiConfig {
                api_key: read_api_key("GEMINI_API_KEY")?,
            }),
            LlmProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http: Client::new(),
            provider,
            model: model.into(),
            config,
            limits,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One text-generation call with retry + backoff. Transient transport
    /// failures and rate limiting are retried; the scoring path never is.
    pub async fn generate(&self, req: &LlmRequest) -> Result<String> {
        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..=self.limits.retry_attempts {
            if attempt > 0 {
                sleep(self.limits.retry_delay * attempt).await;
            }
            match self.generate_once(req).await {
                Ok(content) => return Ok(content),
                Err(err) => {
                    warn!(provider = self.provider.as_str(), attempt, "generation attempt failed: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("text generation failed")))
    }

    /// Blocking wrapper for synchronous callers.
    pub fn generate_blocking(&self, req: &LlmRequest) -> Result<String> {
        let rt = Runtime::new().context("failed to create tokio runtime")?;
        rt.block_on(self.generate(req))
    }

    async fn generate_once(&self, req: &LlmRequest) -> Result<String> {
        match &self.config {
            ProviderConfig::Gemini(cfg) => self.generate_gemini(cfg, req).await,
            ProviderConfig::OpenAi(cfg) => self.generate_openai(cfg, req).await,
            ProviderConfig::Local => Ok(prompt::synthesize_local_response(&req.prompt)),
        }
    }

    async fn generate_gemini(&self, cfg: &GeminiConfig, req: &LlmRequest) -> Result<String> {
        let payload = json!({
            "contents": [ { "parts": [ { "text": req.prompt } ] } ],
            "generationConfig": { "temperature": 0.3 },
        });
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, cfg.api_key
        );
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .context("gemini request failed")?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(anyhow!("gemini rate limited"));
        }
        let response = response
            .error_for_status()
            .context("gemini returned an error")?
            .json::<GeminiResponse>()
            .await
            .context("failed to decode gemini response")?;
        response
            .candidates
            .and_then(|mut c| c.pop())
            .and_then(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .find_map(|part| part.text)
            })
            .ok_or_else(|| anyhow!("missing text in Gemini response"))
    }

    async fn generate_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<String> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "messages": [ { "role": "user", "content": req.prompt } ],
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&cfg.api_key)
            .json(&payload)
            .send()
            .await
            .context("openai request failed")?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(anyhow!("openai rate limited"));
        }
        let response = response
            .error_for_status()
            .context("openai returned an error")?
            .json::<ChatResponse>()
            .await
            .context("failed to decode openai response")?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("missing text in OpenAI response"))
    }
}

fn read_api_key(var: &str) -> Result<String> {
    env::var(var).map_err(|_| anyhow!(format!("{var} is not set")))
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}
