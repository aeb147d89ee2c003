//! OpenAI-compatible HTTP adapter.
//!
//! Endpoints:
//! - POST /audio/transcriptions (multipart) – speech to text
//! - POST /conversations – create a conversation
//! - POST /responses – structured completion inside a conversation
//!
//! Auth: Bearer token. The key never leaves this struct.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ResolvedConfig;

use super::{
    AudioInput, ConversationMetadata, HttpFailure, ModelClient, SpeechBackend, SpeechOutcome,
    StructuredRequest,
};

/// OpenAI-compatible API client
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Transcription response body
#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// Conversation creation response body
#[derive(Debug, Deserialize)]
struct ConversationResponse {
    id: String,
}

impl OpenAiClient {
    /// Create a new client
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create from resolved configuration and `OPENAI_API_KEY`
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let api_key = crate::config::openai_api_key()?;
        Self::new(
            config.openai_base_url.clone(),
            api_key,
            Duration::from_secs(config.limits.request_timeout_seconds),
        )
    }

    /// Build API URL
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body and return the JSON response
    async fn post_json(&self, service: &str, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", service))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpFailure::from_body(service, status.as_u16(), text).into());
        }

        response
            .json::<Value>()
            .await
            .with_context(|| format!("Failed to parse {} response", service))
    }
}

/// Whether a transcription failure means the audio format was rejected
pub fn is_unsupported_format(failure: &HttpFailure) -> bool {
    if !matches!(failure.status, 400 | 415) {
        return false;
    }

    if let Some(code) = failure.code.as_deref() {
        if matches!(code, "unsupported_format" | "invalid_file_format" | "unsupported_file") {
            return true;
        }
    }

    let message = failure.message.to_ascii_lowercase();
    (message.contains("unsupported") || message.contains("invalid"))
        && (message.contains("file format") || message.contains("audio format"))
}

#[async_trait]
impl SpeechBackend for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn transcribe(&self, audio: &AudioInput, model: &str) -> SpeechOutcome {
        let part = match Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name())
            .mime_str(&audio.essence())
        {
            Ok(part) => part,
            Err(e) => {
                return SpeechOutcome::Failed(
                    anyhow::Error::new(e).context("Failed to build multipart audio part"),
                )
            }
        };

        let form = Form::new()
            .text("model", model.to_string())
            .text("response_format", "json")
            .part("file", part);

        debug!(model, bytes = audio.bytes.len(), "Submitting audio for transcription");

        let response = match self
            .client
            .post(self.url("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return SpeechOutcome::Failed(
                    anyhow::Error::new(e).context("Failed to send transcription request"),
                )
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let failure = HttpFailure::from_body("transcription", status.as_u16(), text);
            return if is_unsupported_format(&failure) {
                SpeechOutcome::UnsupportedFormat(failure.into())
            } else {
                SpeechOutcome::Failed(failure.into())
            };
        }

        match response.json::<TranscriptionResponse>().await {
            Ok(body) => SpeechOutcome::Text(body.text),
            Err(e) => SpeechOutcome::Failed(
                anyhow::Error::new(e).context("Failed to parse transcription response"),
            ),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn create_conversation(&self, metadata: &ConversationMetadata) -> Result<String> {
        let mut meta = json!({ "session_id": metadata.session_id });
        if let Some(ref request_id) = metadata.request_id {
            meta["request_id"] = json!(request_id);
        }

        let value = self
            .post_json("conversations", "conversations", &json!({ "metadata": meta }))
            .await?;
        let conversation: ConversationResponse =
            serde_json::from_value(value).context("Conversation response has no id")?;

        Ok(conversation.id)
    }

    async fn complete_structured(&self, request: &StructuredRequest) -> Result<Value> {
        let mut body = json!({
            "model": request.model,
            "instructions": request.instructions,
            "input": request.input,
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": request.schema_name,
                    "schema": request.schema,
                    "strict": true,
                }
            }
        });

        if let Some(ref conversation_id) = request.conversation_id {
            body["conversation"] = json!(conversation_id);
        }

        self.post_json("responses", "responses", &body).await
    }
}
