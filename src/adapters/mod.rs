//! Adapter interfaces for external systems.
//!
//! Adapters are the narrow seams to the capabilities the pipeline does not
//! own: a speech-to-text service and a hosted AI model with conversation
//! state. The HTTP implementations target OpenAI-compatible endpoints;
//! `scripted` holds deterministic stand-ins for tests and offline use.

pub mod openai;
pub mod scripted;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

// Re-export the concrete adapters
pub use openai::OpenAiClient;
pub use scripted::{ScriptedInterpreter, ScriptedSpeech};

/// Encoded audio submitted for transcription
#[derive(Clone)]
pub struct AudioInput {
    pub bytes: Vec<u8>,
    /// Declared mime type, possibly with parameters (`audio/webm;codecs=opus`)
    pub mime_type: String,
    pub duration_ms: Option<u64>,
}

impl AudioInput {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, duration_ms: Option<u64>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            duration_ms,
        }
    }

    /// Mime type without parameters, lowercased
    pub fn essence(&self) -> String {
        mime_essence(&self.mime_type)
    }

    /// Upload file name matching the mime type
    pub fn file_name(&self) -> String {
        format!("audio.{}", extension_for_mime(&self.essence()))
    }
}

impl fmt::Debug for AudioInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioInput")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("duration_ms", &self.duration_ms)
            .finish()
    }
}

/// Strip parameters from a mime type
pub fn mime_essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// File extension the speech services expect for a mime type
pub fn extension_for_mime(essence: &str) -> &'static str {
    match essence {
        "audio/webm" | "video/webm" => "webm",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "video/mp4" => "m4a",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/flac" | "audio/x-flac" => "flac",
        _ => "bin",
    }
}

/// Mime type for a file extension (CLI uploads)
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "webm" => Some("audio/webm"),
        "mp3" => Some("audio/mpeg"),
        "m4a" | "mp4" => Some("audio/mp4"),
        "wav" => Some("audio/wav"),
        "ogg" | "opus" => Some("audio/ogg"),
        "flac" => Some("audio/flac"),
        _ => None,
    }
}

/// Result of one speech-model attempt, classified by the backend
#[derive(Debug)]
pub enum SpeechOutcome {
    /// Raw text as returned by the model (may still be blank)
    Text(String),
    /// The model rejected the audio container/codec
    UnsupportedFormat(anyhow::Error),
    /// Any other failure
    Failed(anyhow::Error),
}

/// Speech-to-text service
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Transcribe audio with a specific model
    async fn transcribe(&self, audio: &AudioInput, model: &str) -> SpeechOutcome;
}

/// Metadata attached to a newly created AI conversation
#[derive(Debug, Clone)]
pub struct ConversationMetadata {
    pub session_id: String,
    pub request_id: Option<String>,
}

/// A schema-constrained completion request
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub model: String,
    /// Conversation to append to; `None` for a one-off completion
    pub conversation_id: Option<String>,
    pub instructions: String,
    pub input: String,
    pub schema_name: String,
    pub schema: serde_json::Value,
}

/// Hosted AI model with conversation state
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Human-readable client name
    fn name(&self) -> &str;

    /// Create a conversation and return its id
    async fn create_conversation(&self, metadata: &ConversationMetadata) -> Result<String>;

    /// Run a structured completion; returns the raw provider response
    async fn complete_structured(&self, request: &StructuredRequest) -> Result<serde_json::Value>;
}

/// Non-success HTTP response from an external service
#[derive(Debug, Clone, Error)]
#[error("{service} returned HTTP {status}: {message}")]
pub struct HttpFailure {
    pub service: String,
    pub status: u16,
    /// Provider error code, when the body carried one
    pub code: Option<String>,
    pub message: String,
    /// Raw response body
    pub body: String,
}

impl HttpFailure {
    /// Build from a response body, reading an OpenAI-style `{"error": {...}}` envelope if present
    pub fn from_body(service: impl Into<String>, status: u16, body: String) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: ErrorBody,
        }

        #[derive(Deserialize)]
        struct ErrorBody {
            #[serde(default)]
            message: Option<String>,
            #[serde(default)]
            code: Option<String>,
        }

        let parsed = serde_json::from_str::<Envelope>(&body).ok();
        let code = parsed.as_ref().and_then(|e| e.error.code.clone());
        let message = parsed
            .and_then(|e| e.error.message)
            .unwrap_or_else(|| body.chars().take(200).collect());

        Self {
            service: service.into(),
            status,
            code,
            message,
            body,
        }
    }
}
