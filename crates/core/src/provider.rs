use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Missing API key for {provider_name}: {env_var} environment variable is not set")]
    MissingApiKey {
        provider_name: String,
        env_var: &'static str,
    },

    #[error("{provider_name} does not offer an embeddings endpoint")]
    NoEmbeddings { provider_name: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    Grok,
    Openai,
    Gemini,
}

pub struct ProviderConfig {
    pub api_url: &'static str,
    pub model: &'static str,
    pub env_var: &'static str,
}

pub struct EmbeddingConfig {
    pub api_url: &'static str,
    pub model: &'static str,
}

impl Provider {
    pub fn config(&self) -> ProviderConfig {
        match self {
            Provider::Grok => ProviderConfig {
                api_url: "https://api.x.ai/v1/chat/completions",
                model: "grok-4-fast",
                env_var: "XAI_API_KEY",
            },
            Provider::Openai => ProviderConfig {
                api_url: "https://api.openai.com/v1/chat/completions",
                model: "gpt-5.1",
                env_var: "OPENAI_API_KEY",
            },
            Provider::Gemini => ProviderConfig {
                api_url: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
                model: "gemini-3-pro",
                env_var: "GEMINI_API_KEY",
            },
        }
    }

    pub fn embedding_config(&self) -> Option<EmbeddingConfig> {
        match self {
            Provider::Grok => None,
            Provider::Openai => Some(EmbeddingConfig {
                api_url: "https://api.openai.com/v1/embeddings",
                model: "text-embedding-3-small",
            }),
            Provider::Gemini => Some(EmbeddingConfig {
                api_url: "https://generativelanguage.googleapis.com/v1beta/openai/embeddings",
                model: "text-embedding-004",
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Grok => "Grok",
            Provider::Openai => "OpenAI",
            Provider::Gemini => "Gemini",
        }
    }

    /// Validate that the API key is set for this provider
    pub fn validate_api_key(&self) -> Result<String, ProviderError> {
        let config = self.config();
        std::env::var(config.env_var).map_err(|_| ProviderError::MissingApiKey {
            provider_name: self.name().to_string(),
            env_var: config.env_var,
        })
    }
}

/// Sampling parameters for one completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl CompletionParams {
    /// Few-shot generation of a single exercise.
    pub const GENERATION: CompletionParams = CompletionParams {
        max_tokens: 512,
        temperature: 0.5,
        top_p: 0.9,
    };

    /// Extraction of every exercise from a transcript.
    pub const EXTRACTION: CompletionParams = CompletionParams {
        max_tokens: 4096,
        temperature: 0.0,
        top_p: 1.0,
    };
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

/// A text-completion backend: one rendered prompt in, one string out.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<String, CompletionError>;

    /// Identifies the model in saved artifacts.
    fn model(&self) -> &str;
}

/// OpenAI-style chat-completions client for the configured [`Provider`].
pub struct ChatCompletionClient {
    provider: Provider,
    api_key: String,
    http: reqwest::Client,
}

impl ChatCompletionClient {
    pub fn new(provider: Provider, timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = provider.validate_api_key()?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            provider,
            api_key,
            http,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }
}

#[async_trait]
impl CompletionService for ChatCompletionClient {
    async fn complete(
        &self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<String, CompletionError> {
        let config = self.provider.config();
        debug!(
            provider = self.provider.name(),
            model = config.model,
            prompt_len = prompt.len(),
            "sending completion request"
        );

        let response = self
            .http
            .post(config.api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": config.model,
                "messages": [
                    {
                        "role": "user",
                        "content": prompt,
                    },
                ],
                "max_tokens": params.max_tokens,
                "temperature": params.temperature,
                "top_p": params.top_p,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Status {
                provider: self.provider.name(),
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        let response = response.json::<serde_json::Value>().await?;

        // Extract content from response
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CompletionError::InvalidResponse(format!("{:?}", response)))?;

        Ok(content.to_string())
    }

    fn model(&self) -> &str {
        self.provider.config().model
    }
}
