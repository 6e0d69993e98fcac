//! Generation requests and the generator abstraction.
//!
//! A [`GenerationRequest`] is an immutable description of one call to
//! the external text/vision model. Any backend that can turn a request
//! into a lazy stream of text fragments implements [`Generator`].

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Lazy sequence of text fragments produced by one generation call.
pub type FragmentStream = BoxStream<'static, Result<String, GeneratorError>>;

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged turn, optionally carrying raw image payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub images: Vec<Vec<u8>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.images.push(bytes);
        self
    }
}

/// What the model is asked to continue.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationInput {
    /// Single-turn prompt completion.
    Prompt(String),
    /// Ordered multi-turn conversation.
    Chat(Vec<ChatMessage>),
}

/// Sampling options forwarded to the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    /// Sequences at which the service itself should stop emitting.
    pub stop: Vec<String>,
    /// Upper bound on generated tokens, if the service supports one.
    pub max_tokens: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            stop: Vec::new(),
            max_tokens: None,
        }
    }
}

/// Immutable description of a single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub input: GenerationInput,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: GenerationInput::Prompt(prompt.into()),
            options: GenerationOptions::default(),
        }
    }

    pub fn chat(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            input: GenerationInput::Chat(messages),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Failures reported by a generator backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeneratorError {
    /// The request could not be delivered (connection refused, DNS, TLS...).
    #[error("Transport error: {}", single_line(.0))]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("Generator returned status {status}: {}", single_line(.body))]
    Status { status: u16, body: String },

    /// The service reported an error inside the stream.
    #[error("Generator error: {}", single_line(.0))]
    Service(String),

    /// A stream chunk could not be decoded.
    #[error("Malformed stream chunk: {}", single_line(.0))]
    Protocol(String),
}

/// Fold `text` onto one line, joining its non-blank lines with ` | `.
///
/// Error text from the service ends up in the heartbeat log, where every
/// line must start with a timestamp.
pub fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// A backend able to stream generated text for a request.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Start generating and return the fragment stream.
    ///
    /// Dropping the returned stream must abandon the generation.
    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, GeneratorError>;
}
