//! In-process planning store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    conversation_from_chunks, new_session_id, prepare_chunk, validate_slug, ChunkMutation,
    ChunkReceipt, PlanningStore, StoreError,
};
use crate::core::mutator::{GraphMutator, SessionGraph};
use crate::domain::{
    ConversationSession, SessionInfo, SessionRef, SessionSnapshot, TranscriptChunk,
};

struct SessionState {
    info: SessionInfo,
    graph: SessionGraph,
    chunks: Vec<TranscriptChunk>,
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            info: self.info.clone(),
            items: self.graph.ordered_items(),
            last_sequence: self.chunks.last().map(|c| c.sequence).unwrap_or(0),
        }
    }
}

/// Sessions held in memory behind a `RwLock`
#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, SessionState>>,
    mutator: GraphMutator,
}

impl InMemoryStore {
    pub fn new(mutator: GraphMutator) -> Self {
        Self {
            sessions: RwLock::default(),
            mutator,
        }
    }
}

fn find<'a>(
    sessions: &'a HashMap<String, SessionState>,
    session: &SessionRef,
) -> Option<&'a SessionState> {
    let by_id = |id: &str| sessions.get(id);
    let by_slug = |slug: &str| sessions.values().find(|s| s.info.slug == slug);

    match session {
        SessionRef::Id(id) => by_id(id),
        SessionRef::Slug(slug) => by_slug(slug),
        SessionRef::Any(value) => by_id(value).or_else(|| by_slug(value)),
    }
}

#[async_trait]
impl PlanningStore for InMemoryStore {
    async fn create_session(&self, slug: &str, title: Option<&str>) -> Result<SessionInfo, StoreError> {
        validate_slug(slug)?;

        let mut sessions = self.sessions.write().await;
        if sessions.values().any(|s| s.info.slug == slug) {
            return Err(StoreError::SlugTaken(slug.to_string()));
        }

        let info = SessionInfo {
            id: new_session_id(),
            slug: slug.to_string(),
            title: title.map(str::to_string),
            created_at: Utc::now(),
        };
        sessions.insert(
            info.id.clone(),
            SessionState {
                info: info.clone(),
                graph: SessionGraph::new(info.id.clone()),
                chunks: Vec::new(),
            },
        );

        debug!(session = %info.id, slug, "Session created");
        Ok(info)
    }

    async fn resolve_session(&self, session: &SessionRef) -> Result<SessionSnapshot, StoreError> {
        let sessions = self.sessions.read().await;
        find(&sessions, session)
            .map(SessionState::snapshot)
            .ok_or_else(|| StoreError::SessionNotFound(session.clone()))
    }

    async fn record_chunk(&self, mutation: ChunkMutation) -> Result<ChunkReceipt, StoreError> {
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .get_mut(&mutation.session_id)
            .ok_or_else(|| StoreError::SessionNotFound(SessionRef::Id(mutation.session_id.clone())))?;

        let sequence = state.chunks.last().map(|c| c.sequence).unwrap_or(0) + 1;
        let (chunk, graph, result) =
            prepare_chunk(&self.mutator, &state.graph, mutation, sequence, Utc::now());

        let receipt = ChunkReceipt {
            chunk_id: chunk.id,
            sequence,
            result,
        };
        state.chunks.push(chunk);
        state.graph = graph;

        Ok(receipt)
    }

    async fn list_chunks(&self, session_id: &str) -> Result<Vec<TranscriptChunk>, StoreError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|s| s.chunks.clone())
            .ok_or_else(|| StoreError::SessionNotFound(SessionRef::Id(session_id.to_string())))
    }

    async fn conversation(&self, conversation_id: &str) -> Result<Option<ConversationSession>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(conversation_from_chunks(
            conversation_id,
            sessions.values().flat_map(|s| s.chunks.iter()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AudioDescriptor, CreateItem, ItemType, StructuredAction, TranscriptMetadata};

    fn mutation(session_id: &str, key: &str, conversation: Option<&str>) -> ChunkMutation {
        ChunkMutation {
            session_id: session_id.to_string(),
            speaker_id: "u1".to_string(),
            speaker_label: "Dana".to_string(),
            text: format!("about {}", key),
            actions: vec![StructuredAction::CreateItem(CreateItem {
                item_key: key.to_string(),
                item_type: ItemType::Task,
                text: key.to_string(),
                speaker_label: None,
                blocked_by_keys: None,
                needs_research: None,
            })],
            conversation_id: conversation.map(str::to_string),
            transcript: TranscriptMetadata::default(),
            audio: AudioDescriptor::describe(b"a", "audio/webm", None),
            request_id: None,
        }
    }

    #[tokio::test]
    async fn test_resolve_by_id_and_slug() {
        let store = InMemoryStore::default();
        let info = store.create_session("weekly", Some("Weekly sync")).await.unwrap();

        let by_id = store.resolve_session(&SessionRef::Id(info.id.clone())).await.unwrap();
        let by_slug = store.resolve_session(&SessionRef::parse("weekly")).await.unwrap();
        assert_eq!(by_id.info, by_slug.info);

        let missing = store.resolve_session(&SessionRef::Slug("nope".into())).await;
        assert!(matches!(missing, Err(StoreError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_slug_rejected() {
        let store = InMemoryStore::default();
        store.create_session("weekly", None).await.unwrap();
        let err = store.create_session("weekly", None).await.unwrap_err();
        assert!(matches!(err, StoreError::SlugTaken(_)));
    }

    #[tokio::test]
    async fn test_record_chunk_assigns_sequences_and_applies_batch() {
        let store = InMemoryStore::default();
        let info = store.create_session("weekly", None).await.unwrap();

        let first = store.record_chunk(mutation(&info.id, "task_a", Some("conv_1"))).await.unwrap();
        let second = store.record_chunk(mutation(&info.id, "task_b", Some("conv_1"))).await.unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));

        let snapshot = store.resolve_session(&SessionRef::Id(info.id.clone())).await.unwrap();
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.last_sequence, 2);

        let chunks = store.list_chunks(&info.id).await.unwrap();
        assert_eq!(chunks[1].resulting_events.len(), 1);

        let conversation = store.conversation("conv_1").await.unwrap().unwrap();
        assert_eq!(conversation.last_sequence_applied, 2);
        assert_eq!(conversation.session_id, info.id);
        assert!(store.conversation("conv_9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_chunk_for_unknown_session() {
        let store = InMemoryStore::default();
        let err = store.record_chunk(mutation("ses_missing", "task_a", None)).await.unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));
    }
}
