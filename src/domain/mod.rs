//! Domain types for the huddle pipeline.
//!
//! This module contains the core data structures:
//! - Items: Planning graph nodes and their compact snapshots
//! - Actions: Structured mutations emitted by the interpreter
//! - Chunk: Immutable transcript chunks and their mutation records
//! - Session: Sessions, session references and AI conversations
//! - Stage: Per-chunk processing state machine

pub mod actions;
pub mod chunk;
pub mod items;
pub mod session;
pub mod stage;

// Re-export commonly used types
pub use actions::{ActionBatch, CreateItem, ItemPatch, RemoveItem, StructuredAction, UpdateItem};
pub use chunk::{
    AudioDescriptor, ChunkEvent, ChunkEventKind, MutationResult, SkippedAction, TranscriptChunk,
    TranscriptMetadata,
};
pub use items::{item_id, ItemMetadata, ItemType, KnownItem, PlanningItem};
pub use session::{ConversationSession, SessionInfo, SessionRef, SessionSnapshot};
pub use stage::ChunkStage;
