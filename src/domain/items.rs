//! Planning items: the nodes of a session's planning graph.
//!
//! Every item is addressed by its `item_key`, a human-legible identifier the
//! interpreter chooses (e.g. `task_audit_flow`). Keys are unique per session.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Kind of planning item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Idea,
    Task,
    Dependency,
    Owner,
    Risk,
    Outcome,
    Decision,
    Summary,
}

impl ItemType {
    /// All item types, in schema order
    pub const ALL: [ItemType; 8] = [
        ItemType::Idea,
        ItemType::Task,
        ItemType::Dependency,
        ItemType::Owner,
        ItemType::Risk,
        ItemType::Outcome,
        ItemType::Decision,
        ItemType::Summary,
    ];

    /// Wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Idea => "idea",
            ItemType::Task => "task",
            ItemType::Dependency => "dependency",
            ItemType::Owner => "owner",
            ItemType::Risk => "risk",
            ItemType::Outcome => "outcome",
            ItemType::Decision => "decision",
            ItemType::Summary => "summary",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ItemType::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| format!("unknown item type: {}", s))
    }
}

/// Bookkeeping attached to an item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Whether an idea still needs research (ideas only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_research: Option<bool>,

    /// Display label of the speaker who raised the item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_label: Option<String>,

    /// Chunk that created the item
    pub created_by_chunk: Uuid,

    /// Chunk that last changed the item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by_chunk: Option<Uuid>,
}

/// A node in the planning graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningItem {
    /// Storage id (deterministic, see [`item_id`])
    pub id: String,

    /// Session-scoped correlation key
    pub item_key: String,

    pub session_id: String,

    pub item_type: ItemType,

    pub text: String,

    /// Speaker who raised the item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,

    /// Keys of the items blocking this one
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub blocked_by_keys: BTreeSet<String>,

    /// Monotonic position within the session
    pub order: u64,

    pub metadata: ItemMetadata,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl PlanningItem {
    /// Compact view handed to the interpreter
    pub fn known(&self) -> KnownItem {
        KnownItem {
            item_key: self.item_key.clone(),
            item_type: self.item_type,
            text: self.text.clone(),
        }
    }
}

/// Compact snapshot entry of an already-known item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownItem {
    pub item_key: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub text: String,
}

/// Deterministic item id: first 16 hex chars of sha256(session:key:sequence)
///
/// Replaying the same chunk log always yields the same ids.
pub fn item_id(session_id: &str, item_key: &str, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", session_id, item_key, sequence).as_bytes());
    let digest = hasher.finalize();
    format!("item_{}", hex::encode(&digest[..8]))
}
