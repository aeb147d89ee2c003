//! Transcript chunks and the mutation records attached to them.
//!
//! A chunk is created once per successfully transcribed audio submission and
//! never changes afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::actions::StructuredAction;
use crate::config::MergePolicy;
use super::items::{ItemType, PlanningItem};

/// What was submitted, without the audio itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDescriptor {
    pub mime_type: String,
    pub byte_len: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// First 16 hex chars of the audio sha256
    pub sha256: String,
}

impl AudioDescriptor {
    /// Describe an audio payload
    pub fn describe(bytes: &[u8], mime_type: &str, duration_ms: Option<u64>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();

        Self {
            mime_type: mime_type.to_string(),
            byte_len: bytes.len() as u64,
            duration_ms,
            sha256: hex::encode(&digest[..8]),
        }
    }
}

/// Transcription facts recorded with the chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMetadata {
    /// Speech model that produced the text
    pub model: String,
    pub used_fallback: bool,
}

/// Kind of change a chunk made to the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkEventKind {
    Created,
    Updated,
    Removed,
}

/// Compact per-mutation record for downstream display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEvent {
    pub kind: ChunkEventKind,
    pub item_type: ItemType,
    pub item_text: String,
    pub item_id: String,
    pub item_key: String,
}

impl ChunkEvent {
    pub fn from_item(kind: ChunkEventKind, item: &PlanningItem) -> Self {
        Self {
            kind,
            item_type: item.item_type,
            item_text: item.text.clone(),
            item_id: item.id.clone(),
            item_key: item.item_key.clone(),
        }
    }
}

/// An action that reached the mutator but changed nothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedAction {
    /// Position in the normalized batch
    pub index: usize,
    pub key: String,
    pub reason: String,
}

/// Outcome of applying one normalized batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResult {
    pub events: Vec<ChunkEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedAction>,
}

/// A persisted transcript chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub id: Uuid,
    pub session_id: String,
    pub speaker_id: String,
    pub speaker_label: String,
    pub text: String,
    /// 1-based, strictly increasing per session
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub audio: AudioDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub transcript: TranscriptMetadata,
    /// Normalized batch applied for this chunk
    #[serde(default)]
    pub actions: Vec<StructuredAction>,
    /// Policy the batch was applied with; replay reuses it
    #[serde(default)]
    pub merge_policy: MergePolicy,
    /// Mutation records produced by the batch
    #[serde(default)]
    pub resulting_events: Vec<ChunkEvent>,
}
