//! Client library for an Ollama-compatible generation server.
//!
//! Provides the typed request/response wire format, an NDJSON decoder
//! that turns the streamed HTTP body into text fragments, the REST
//! client implementing [`immo_core::generation::Generator`], and a
//! helper that starts the local server when it is not running.

pub mod api;
pub mod messages;
pub mod service;
pub mod stream;
