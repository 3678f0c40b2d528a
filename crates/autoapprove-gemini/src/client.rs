//! Gemini `generateContent` client implementing [`LanguageModel`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use autoapprove_core::{LanguageModel, ModelError, ModelResult, PromptRequest, RetryPolicy};
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use crate::wire;

/// Connection and sampling settings shared by every model of one account.
#[derive(Clone)]
pub struct GeminiConfig {
    pub api_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub top_k: u32,
    pub top_p: f32,
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl GeminiConfig {
    pub fn new(api_url: &str, api_key: &str) -> Self {
        GeminiConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            top_k: 1,
            top_p: 0.1,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// One Gemini model behind the `generateContent` endpoint.
pub struct GeminiModel {
    model: String,
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiModel {
    pub fn new(model: &str, config: GeminiConfig) -> ModelResult<Self> {
        if model.trim().is_empty() {
            return Err(ModelError::Config("model name is empty".into()));
        }
        if config.api_key.trim().is_empty() {
            return Err(ModelError::Config("GEMINI_API_KEY is not set".into()));
        }
        let http = reqwest::Client::builder()
            .user_agent(format!("autoapprove/{}", autoapprove_core::VERSION))
            .timeout(config.timeout)
            .build()
            .map_err(|e| ModelError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(GeminiModel {
            model: model.trim().to_string(),
            config,
            http,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_url, self.model
        )
    }

    fn body(&self, request: &PromptRequest) -> wire::GenerateRequest {
        wire::GenerateRequest {
            system_instruction: (!request.system.is_empty())
                .then(|| wire::Content::text(None, &request.system)),
            contents: vec![wire::Content::text(Some("user"), &request.prompt)],
            generation_config: wire::GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                top_k: self.config.top_k,
                top_p: self.config.top_p,
            },
        }
    }

    async fn call(&self, url: &str, body: &wire::GenerateRequest) -> ModelResult<String> {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(classify_response(status, &text));
        }

        let parsed: wire::GenerateResponse =
            serde_json::from_str(&text).map_err(|e| ModelError::Decode(e.to_string()))?;
        if parsed.candidates.is_empty() {
            // A blocked prompt is refused by the API, not answered empty.
            if let Some(reason) = parsed.block_reason() {
                return Err(ModelError::Api {
                    status: 400,
                    message: format!("prompt blocked: {reason}"),
                });
            }
            return Err(ModelError::EmptyResponse);
        }
        match parsed.first_text() {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(ModelError::EmptyResponse),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ModelError {
        if err.is_timeout() {
            ModelError::Timeout(self.config.timeout)
        } else if err.is_decode() {
            ModelError::Decode(err.to_string())
        } else {
            ModelError::Transient(err.to_string())
        }
    }
}

fn classify_response(status: StatusCode, body: &str) -> ModelError {
    let detail = serde_json::from_str::<wire::ErrorEnvelope>(body)
        .map(|e| e.error)
        .unwrap_or_default();
    let message = match (detail.status.is_empty(), detail.message.is_empty()) {
        (_, true) => body.chars().take(200).collect(),
        (true, false) => detail.message,
        (false, false) => format!("{}: {}", detail.status, detail.message),
    };
    ModelError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, request: &PromptRequest) -> ModelResult<String> {
        let url = self.endpoint();
        let body = self.body(request);
        debug!(prompt_bytes = request.prompt.len(), "gemini request");
        let result = self
            .config
            .retry
            .run(&self.model, || self.call(&url, &body))
            .await;
        if let Err(err) = &result {
            warn!(event = "gemini.failed", model = %self.model, error = %err, "generation failed");
        }
        result
    }
}
