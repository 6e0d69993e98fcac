//! REST API client for the Ollama HTTP endpoints.
//!
//! Wraps streaming generation (`/api/generate`, `/api/chat`) and the
//! version probe (`/api/version`) using [`reqwest`], and exposes the
//! streaming calls through the [`Generator`] trait.

use async_trait::async_trait;
use immo_core::generation::{
    single_line, ChatMessage, FragmentStream, GenerationInput, GenerationOptions, GenerationRequest,
    Generator, GeneratorError,
};

use crate::messages::{ChatBody, GenerateBody, VersionResponse, WireMessage, WireOptions};
use crate::stream::fragment_stream;

/// Default address of a local Ollama server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// HTTP client for a single Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaApi {
    client: reqwest::Client,
    base_url: String,
}

/// Errors from the Ollama REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Ollama returned a non-2xx status code.
    #[error("Ollama API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Response body, folded onto one line.
        body: String,
    },
}

impl From<OllamaError> for GeneratorError {
    fn from(err: OllamaError) -> Self {
        match err {
            OllamaError::Request(e) => GeneratorError::Transport(e.to_string()),
            OllamaError::ApiError { status, body } => GeneratorError::Status { status, body },
        }
    }
}

impl OllamaApi {
    /// Create a new API client.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `http://localhost:11434`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query the server version. Used as a liveness probe.
    pub async fn version(&self) -> Result<String, OllamaError> {
        let response = self
            .client
            .get(format!("{}/api/version", self.base_url))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<VersionResponse>().await?.version)
    }

    /// Stream a single-prompt completion from `POST /api/generate`.
    pub async fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<FragmentStream, OllamaError> {
        let body = GenerateBody {
            model,
            prompt,
            stream: true,
            options: WireOptions::from(options),
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        Self::into_fragments(response).await
    }

    /// Stream a conversation reply from `POST /api/chat`.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<FragmentStream, OllamaError> {
        let body = ChatBody {
            model,
            messages: messages.iter().map(WireMessage::from).collect(),
            stream: true,
            options: WireOptions::from(options),
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        Self::into_fragments(response).await
    }

    // ---- private helpers ----

    async fn into_fragments(response: reqwest::Response) -> Result<FragmentStream, OllamaError> {
        let response = Self::ensure_success(response).await?;
        Ok(fragment_stream(response.bytes_stream()))
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`OllamaError::ApiError`]
    /// containing the status and the body folded onto one line.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, OllamaError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(OllamaError::ApiError {
                status: status.as_u16(),
                body: single_line(&body),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaApi {
    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, GeneratorError> {
        let stream = match &request.input {
            GenerationInput::Prompt(prompt) => {
                self.generate_stream(&request.model, prompt, &request.options)
                    .await?
            }
            GenerationInput::Chat(messages) => {
                self.chat_stream(&request.model, messages, &request.options)
                    .await?
            }
        };
        Ok(stream)
    }
}
