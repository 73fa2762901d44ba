use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    error::ProviderError,
    providers::VisionProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, TokenUsage},
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gemini-2.5-pro";

/// Endpoint, credentials and model name for an OpenAI-compatible chat API.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl OracleConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(300),
        }
    }

    /// Reads `MANIPQA_*` variables, falling back to the usual `OPENAI_*` names.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = env::var("MANIPQA_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map_err(|_| ProviderError::MissingApiKey("MANIPQA_API_KEY"))?;
        let mut config = Self::new(api_key);

        if let Ok(base_url) = env::var("MANIPQA_BASE_URL").or_else(|_| env::var("OPENAI_BASE_URL")) {
            config.base_url = base_url;
        }
        if let Ok(model) = env::var("MANIPQA_MODEL") {
            config.model = model;
        }
        if let Ok(timeout_ms) = env::var("MANIPQA_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = timeout_ms.parse::<u64>() {
                config.request_timeout = Duration::from_millis(ms);
            }
        }

        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Stateless client for `/chat/completions`; all settings come from [`OracleConfig`].
#[derive(Debug, Clone)]
pub struct OpenAI {
    client: Client,
    config: OracleConfig,
}

impl OpenAI {
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_config(OracleConfig::from_env()?)
    }

    pub fn from_config(config: OracleConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn with_default_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.config.api_key)
    }
}

#[derive(Debug, Serialize)]
struct OpenAIRequestBody {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorEnvelope {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

#[async_trait]
impl VisionProvider for OpenAI {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let CompletionRequest {
            model,
            messages,
            max_tokens,
            temperature,
        } = request;

        let model = if model.is_empty() {
            self.config.model.clone()
        } else {
            model
        };

        let body = OpenAIRequestBody {
            model,
            messages,
            max_tokens,
            temperature,
        };

        let builder = self
            .with_default_headers(self.client.post(self.endpoint("chat/completions")))
            .json(&body);

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            if let Ok(error) = serde_json::from_str::<OpenAIErrorEnvelope>(&text) {
                return Err(ProviderError::Provider(error.error.message));
            }

            return Err(ProviderError::Provider(format!("unexpected status {status}: {text}")));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::InvalidResponse("response did not contain any choices"))?;

        if choice.message.text().map_or(true, |text| text.trim().is_empty()) {
            return Err(ProviderError::InvalidResponse("response message was empty"));
        }

        Ok(CompletionResponse {
            message: choice.message,
            usage: parsed.usage,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
