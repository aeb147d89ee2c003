//! Core chunk processing.
//!
//! This module contains:
//! - Transcriber: Primary/fallback speech-to-text with the duration skip
//! - ConversationSerializer: Per-conversation task ordering
//! - Interpreter: Transcript text to structured actions
//! - Normalizer: Filtering and cleanup of interpreter output
//! - GraphMutator: Applying action batches to a session graph
//! - Diagnostics: Bounded, redacted failure context
//! - ChunkPipeline: The ingestion entry point tying them together

pub mod diagnostics;
pub mod error;
pub mod interpreter;
pub mod mutator;
pub mod normalizer;
pub mod pipeline;
pub mod serializer;
pub mod transcription;

// Re-export commonly used types
pub use diagnostics::{redact, Diagnostic};
pub use error::{ChunkError, PipelineError};
pub use interpreter::{action_batch_schema, InterpretError, InterpretRequest, Interpreter, ModelInterpreter};
pub use mutator::{ChunkContext, GraphMutator, SessionGraph};
pub use normalizer::{DroppedAction, NormalizedBatch, Normalizer};
pub use pipeline::{ChunkPipeline, IngestRequest, IngestResponse, TranscriptSummary};
pub use serializer::ConversationSerializer;
pub use transcription::{Transcriber, Transcript, TranscriptionError, TranscriptionOutcome};
