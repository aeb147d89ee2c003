//! huddle - Transcript-to-planning-graph synchronization
//!
//! Turns spoken meeting audio into a shared planning graph of ideas, tasks,
//! decisions and their dependencies.
//!
//! # Architecture
//!
//! Each audio chunk flows through one pipeline:
//! - Transcription with a primary model and a single fallback retry
//! - A per-conversation gate so chunks of one conversation never interleave
//! - Structured interpretation into create/update/remove actions
//! - Normalization, then all-or-nothing application to the session graph
//!
//! Stores are event-sourced: the graph is derived by replaying persisted
//! chunks, so any state can be rebuilt from the chunk log.
//!
//! # Modules
//!
//! - `adapters`: Speech and model services (OpenAI-compatible, scripted)
//! - `core`: Transcriber, serializer, interpreter, normalizer, mutator, pipeline
//! - `domain`: Data structures (PlanningItem, StructuredAction, TranscriptChunk)
//! - `store`: Persistence boundary (in-memory and JSONL file stores)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! huddle session new weekly-sync --title "Weekly sync"
//! huddle ingest clip.webm --session weekly-sync --speaker-id u1 --speaker-label Dana
//! huddle items weekly-sync
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use crate::core::{ChunkPipeline, IngestRequest, IngestResponse, PipelineError};
pub use domain::{ItemType, PlanningItem, SessionRef, StructuredAction, TranscriptChunk};
pub use store::{FileStore, InMemoryStore, PlanningStore};
