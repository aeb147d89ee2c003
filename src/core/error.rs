//! Chunk failure taxonomy.

use thiserror::Error;

use super::diagnostics::Diagnostic;
use super::interpreter::InterpretError;
use super::transcription::TranscriptionError;
use crate::domain::ChunkStage;
use crate::store::StoreError;

/// Why a chunk failed
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Malformed request, rejected before any side effect
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Audio format not supported")]
    UnsupportedAudioFormat(#[source] TranscriptionError),

    #[error("Transcription failed")]
    Transcription(#[source] TranscriptionError),

    #[error("Interpretation failed")]
    Interpretation(#[source] InterpretError),

    #[error("Session could not be resolved")]
    SessionResolution(#[source] StoreError),

    #[error("Persisting chunk failed")]
    Persistence(#[source] StoreError),
}

impl ChunkError {
    /// Error class recorded in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::UnsupportedAudioFormat(_) => "UnsupportedAudioFormat",
            Self::Transcription(_) => "TranscriptionFailure",
            Self::Interpretation(_) => "InterpretationFailure",
            Self::SessionResolution(_) => "SessionResolutionFailure",
            Self::Persistence(_) => "PersistenceFailure",
        }
    }
}

impl From<TranscriptionError> for ChunkError {
    fn from(e: TranscriptionError) -> Self {
        match e {
            TranscriptionError::UnsupportedAudioFormat { .. } => Self::UnsupportedAudioFormat(e),
            other => Self::Transcription(other),
        }
    }
}

/// A fatal chunk failure tagged with its request and stage
#[derive(Debug, Error)]
#[error("[{request_id}] {stage} failed: {source}")]
pub struct PipelineError {
    pub request_id: String,
    pub stage: ChunkStage,
    #[source]
    pub source: ChunkError,
    pub diagnostic: Diagnostic,
}

impl PipelineError {
    pub fn new(request_id: impl Into<String>, stage: ChunkStage, source: ChunkError) -> Self {
        let diagnostic = Diagnostic::capture(stage, source.name(), &source);
        Self {
            request_id: request_id.into(),
            stage,
            source,
            diagnostic,
        }
    }
}
