//! Transcription with a single fallback retry.
//!
//! Clips shorter than `min_duration_ms` are skipped without touching the
//! backend. Otherwise the primary model is tried; a format rejection triggers
//! exactly one retry with the fallback model. Any other failure is final.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapters::{AudioInput, SpeechBackend, SpeechOutcome};
use crate::config::TranscriptionSettings;

/// Errors that can occur during transcription
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Both the primary and the fallback model rejected the audio format
    #[error("Audio format rejected by {primary} and fallback {fallback}")]
    UnsupportedAudioFormat {
        primary: String,
        fallback: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Transcription with {model} failed")]
    Failed {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Transcription with {model} returned no text")]
    EmptyTranscript { model: String },
}

/// Non-empty transcript text and the model that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub model: String,
    pub used_fallback: bool,
}

/// Outcome of a transcription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptionOutcome {
    /// Clip too short; nothing was sent to the backend
    Skipped { duration_ms: u64 },
    Transcribed(Transcript),
}

/// Primary/fallback transcription front for a speech backend
#[derive(Clone)]
pub struct Transcriber {
    backend: Arc<dyn SpeechBackend>,
    settings: TranscriptionSettings,
}

impl Transcriber {
    pub fn new(backend: Arc<dyn SpeechBackend>, settings: TranscriptionSettings) -> Self {
        Self { backend, settings }
    }

    /// Whether a clip of this duration is skipped
    pub fn is_too_short(&self, duration_ms: Option<u64>) -> bool {
        matches!(duration_ms, Some(ms) if ms < self.settings.min_duration_ms)
    }

    /// Transcribe audio, retrying once with the fallback model on format rejection
    pub async fn transcribe(
        &self,
        audio: &AudioInput,
    ) -> Result<TranscriptionOutcome, TranscriptionError> {
        if let Some(duration_ms) = audio.duration_ms {
            if duration_ms < self.settings.min_duration_ms {
                debug!(duration_ms, "Clip below minimum duration, skipping");
                return Ok(TranscriptionOutcome::Skipped { duration_ms });
            }
        }

        let backend = self.backend.name();
        let primary = self.settings.primary_model.as_str();
        let fallback = self.settings.fallback_model.as_str();

        let (text, model, used_fallback) = match self.backend.transcribe(audio, primary).await {
            SpeechOutcome::Text(text) => (text, primary, false),
            SpeechOutcome::UnsupportedFormat(e) => {
                warn!(
                    backend,
                    primary,
                    fallback,
                    error = %e,
                    "Primary model rejected audio format, retrying with fallback"
                );
                match self.backend.transcribe(audio, fallback).await {
                    SpeechOutcome::Text(text) => (text, fallback, true),
                    SpeechOutcome::UnsupportedFormat(source) => {
                        return Err(TranscriptionError::UnsupportedAudioFormat {
                            primary: primary.to_string(),
                            fallback: fallback.to_string(),
                            source,
                        })
                    }
                    SpeechOutcome::Failed(source) => {
                        return Err(TranscriptionError::Failed {
                            model: fallback.to_string(),
                            source,
                        })
                    }
                }
            }
            SpeechOutcome::Failed(source) => {
                return Err(TranscriptionError::Failed {
                    model: primary.to_string(),
                    source,
                })
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(TranscriptionError::EmptyTranscript {
                model: model.to_string(),
            });
        }

        info!(backend, model, used_fallback, chars = text.len(), "Audio transcribed");

        Ok(TranscriptionOutcome::Transcribed(Transcript {
            text: text.to_string(),
            model: model.to_string(),
            used_fallback,
        }))
    }
}
