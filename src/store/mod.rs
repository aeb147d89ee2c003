//! Persistence boundary for sessions, chunks and planning graphs.
//!
//! A store resolves sessions (with their current items) and records one
//! transcript chunk per successful ingestion together with the normalized
//! action batch it carried. Applying the batch happens inside `record_chunk`
//! so a chunk and its graph changes land together or not at all.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::core::mutator::{ChunkContext, GraphMutator, SessionGraph};
use crate::domain::{
    AudioDescriptor, ConversationSession, MutationResult, SessionInfo, SessionRef,
    SessionSnapshot, StructuredAction, TranscriptChunk, TranscriptMetadata,
};

pub use file::FileStore;
pub use memory::InMemoryStore;

/// Errors raised by a planning store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    SessionNotFound(SessionRef),

    #[error("Session slug already in use: {0}")]
    SlugTaken(String),

    #[error("Invalid session slug '{0}': use lowercase letters, digits and '-'")]
    InvalidSlug(String),

    #[error("Storage failure")]
    Backend(#[source] anyhow::Error),
}

impl From<anyhow::Error> for StoreError {
    fn from(e: anyhow::Error) -> Self {
        Self::Backend(e)
    }
}

/// Everything needed to persist one transcribed chunk
#[derive(Debug, Clone)]
pub struct ChunkMutation {
    pub session_id: String,
    pub speaker_id: String,
    pub speaker_label: String,
    pub text: String,
    /// Normalized batch
    pub actions: Vec<StructuredAction>,
    pub conversation_id: Option<String>,
    pub transcript: TranscriptMetadata,
    pub audio: AudioDescriptor,
    pub request_id: Option<String>,
}

/// Identity of the persisted chunk plus what its batch changed
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReceipt {
    pub chunk_id: Uuid,
    pub sequence: u64,
    pub result: MutationResult,
}

/// Narrow query/mutation contract the pipeline depends on
#[async_trait]
pub trait PlanningStore: Send + Sync {
    /// Create a session with a unique slug
    async fn create_session(&self, slug: &str, title: Option<&str>) -> Result<SessionInfo, StoreError>;

    /// Resolve a session by id or slug, with its current items
    async fn resolve_session(&self, session: &SessionRef) -> Result<SessionSnapshot, StoreError>;

    /// Persist a chunk and apply its batch
    async fn record_chunk(&self, mutation: ChunkMutation) -> Result<ChunkReceipt, StoreError>;

    /// All chunks of a session in sequence order
    async fn list_chunks(&self, session_id: &str) -> Result<Vec<TranscriptChunk>, StoreError>;

    /// Conversation state derived from persisted chunks
    async fn conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationSession>, StoreError>;
}

/// Check a session slug
pub fn validate_slug(slug: &str) -> Result<(), StoreError> {
    let valid = !slug.is_empty()
        && slug.len() <= 64
        && !slug.starts_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSlug(slug.to_string()))
    }
}

/// New session id
pub fn new_session_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("ses_{}", &id[..12])
}

/// Apply a mutation to a copy of `graph` and build the chunk record.
///
/// `graph` is only replaced once the caller commits the returned graph.
pub(crate) fn prepare_chunk(
    mutator: &GraphMutator,
    graph: &SessionGraph,
    mutation: ChunkMutation,
    sequence: u64,
    at: DateTime<Utc>,
) -> (TranscriptChunk, SessionGraph, MutationResult) {
    let chunk_id = Uuid::new_v4();
    let ctx = ChunkContext {
        chunk_id,
        sequence,
        speaker_id: mutation.speaker_id.clone(),
        speaker_label: mutation.speaker_label.clone(),
        at,
    };

    let mut next = graph.clone();
    let result = mutator.apply(&mut next, &mutation.actions, &ctx);

    let chunk = TranscriptChunk {
        id: chunk_id,
        session_id: mutation.session_id,
        speaker_id: mutation.speaker_id,
        speaker_label: mutation.speaker_label,
        text: mutation.text,
        sequence,
        created_at: at,
        audio: mutation.audio,
        conversation_id: mutation.conversation_id,
        request_id: mutation.request_id,
        transcript: mutation.transcript,
        actions: mutation.actions,
        merge_policy: mutator.merge_policy(),
        resulting_events: result.events.clone(),
    };

    (chunk, next, result)
}

/// Rebuild a session graph from its chunk log.
///
/// Each chunk is re-applied with the merge policy it was recorded under, so
/// the result does not depend on the current configuration.
pub fn replay_graph(session_id: &str, chunks: &[TranscriptChunk]) -> SessionGraph {
    let mut graph = SessionGraph::new(session_id);
    for chunk in chunks {
        let mutator = GraphMutator::new(chunk.merge_policy);
        let ctx = ChunkContext {
            chunk_id: chunk.id,
            sequence: chunk.sequence,
            speaker_id: chunk.speaker_id.clone(),
            speaker_label: chunk.speaker_label.clone(),
            at: chunk.created_at,
        };
        mutator.apply(&mut graph, &chunk.actions, &ctx);
    }
    graph
}

/// Latest conversation state among `chunks`
pub(crate) fn conversation_from_chunks<'a>(
    conversation_id: &str,
    chunks: impl IntoIterator<Item = &'a TranscriptChunk>,
) -> Option<ConversationSession> {
    chunks
        .into_iter()
        .filter(|c| c.conversation_id.as_deref() == Some(conversation_id))
        .max_by_key(|c| c.sequence)
        .map(|c| ConversationSession {
            conversation_id: conversation_id.to_string(),
            session_id: c.session_id.clone(),
            last_sequence_applied: c.sequence,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergePolicy;
    use crate::domain::{CreateItem, ItemType};

    fn create(key: &str, text: &str, deps: Option<Vec<&str>>) -> StructuredAction {
        StructuredAction::CreateItem(CreateItem {
            item_key: key.to_string(),
            item_type: ItemType::Task,
            text: text.to_string(),
            speaker_label: None,
            blocked_by_keys: deps.map(|d| d.into_iter().map(String::from).collect()),
            needs_research: None,
        })
    }

    fn mutation(actions: Vec<StructuredAction>) -> ChunkMutation {
        ChunkMutation {
            session_id: "ses_1".to_string(),
            speaker_id: "u1".to_string(),
            speaker_label: "Dana".to_string(),
            text: "text".to_string(),
            actions,
            conversation_id: None,
            transcript: TranscriptMetadata::default(),
            audio: AudioDescriptor::describe(b"a", "audio/webm", None),
            request_id: None,
        }
    }

    /// Append a chunk the way stores do, returning the committed graph
    fn record(
        mutator: &GraphMutator,
        graph: &SessionGraph,
        log: &mut Vec<TranscriptChunk>,
        actions: Vec<StructuredAction>,
    ) -> SessionGraph {
        let sequence = log.len() as u64 + 1;
        let (chunk, next, _) = prepare_chunk(mutator, graph, mutation(actions), sequence, Utc::now());
        log.push(chunk);
        next
    }

    #[test]
    fn test_replay_uses_each_chunks_recorded_policy() {
        let merge = GraphMutator::new(MergePolicy::MergePresent);
        let replace = GraphMutator::new(MergePolicy::ReplaceAll);
        let mut log = Vec::new();

        let graph = SessionGraph::new("ses_1");
        let graph = record(&merge, &graph, &mut log, vec![create("task_a", "A", None)]);
        let graph = record(&merge, &graph, &mut log, vec![create("task_b", "B", Some(vec!["task_a"]))]);
        // Collision under merge: dependencies survive.
        let graph = record(&merge, &graph, &mut log, vec![create("task_b", "B2", None)]);
        // Collision under replace: dependencies cleared.
        let graph = record(&replace, &graph, &mut log, vec![create("task_a", "A2", None)]);

        assert_eq!(log[2].merge_policy, MergePolicy::MergePresent);
        assert_eq!(log[3].merge_policy, MergePolicy::ReplaceAll);

        let replayed = replay_graph("ses_1", &log);
        assert_eq!(replayed.ordered_items(), graph.ordered_items());
        assert!(replayed.get("task_b").unwrap().blocked_by_keys.contains("task_a"));
    }

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("weekly-sync-2").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("Weekly").is_err());
        assert!(validate_slug("-lead").is_err());
        assert!(validate_slug("a b").is_err());
    }

    #[test]
    fn test_session_ids_are_prefixed() {
        let id = new_session_id();
        assert!(id.starts_with("ses_"));
        assert_eq!(id.len(), 16);
        assert_ne!(id, new_session_id());
    }
}
