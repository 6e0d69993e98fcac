//! Ollama wire types and stream chunk parser.
//!
//! Requests go to `/api/generate` (single prompt) or `/api/chat`
//! (conversation). With `"stream": true` the server answers with one
//! JSON object per line:
//!
//! ```text
//! {"model":"qwen2.5:7b","response":"Bon","done":false}
//! {"model":"llava","message":{"role":"assistant","content":"jour"},"done":false}
//! {"error":"model 'x' not found"}
//! ```

use base64::Engine;
use immo_core::generation::{ChatMessage, GenerationOptions};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/generate`.
#[derive(Debug, Serialize)]
pub struct GenerateBody<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    pub options: WireOptions<'a>,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Serialize)]
pub struct ChatBody<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage<'a>>,
    pub stream: bool,
    pub options: WireOptions<'a>,
}

/// One conversation turn. Images travel base64-encoded.
#[derive(Debug, Serialize)]
pub struct WireMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        let engine = base64::engine::general_purpose::STANDARD;
        Self {
            role: message.role.as_str(),
            content: &message.content,
            images: message.images.iter().map(|bytes| engine.encode(bytes)).collect(),
        }
    }
}

/// Sampling options in Ollama's naming.
#[derive(Debug, Serialize)]
pub struct WireOptions<'a> {
    pub temperature: f32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

impl<'a> From<&'a GenerationOptions> for WireOptions<'a> {
    fn from(options: &'a GenerationOptions) -> Self {
        Self {
            temperature: options.temperature,
            stop: &options.stop,
            num_predict: options.max_tokens,
        }
    }
}

/// One line of a streamed response, from either endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamChunk {
    /// Text emitted by `/api/generate`.
    #[serde(default)]
    pub response: Option<String>,
    /// Text emitted by `/api/chat`.
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: String,
}

impl StreamChunk {
    /// Generated text carried by this chunk, if any.
    pub fn fragment(&self) -> Option<&str> {
        self.response
            .as_deref()
            .or_else(|| self.message.as_ref().map(|m| m.content.as_str()))
            .filter(|text| !text.is_empty())
    }
}

/// Body of `GET /api/version`.
#[derive(Debug, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// Parse one NDJSON line into a [`StreamChunk`].
pub fn parse_chunk(line: &str) -> Result<StreamChunk, serde_json::Error> {
    serde_json::from_str(line)
}
