//! Sessions ("huddles") and the AI conversations attached to them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::items::{KnownItem, PlanningItem};

/// How a caller names a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRef {
    /// Storage id
    Id(String),
    /// Human-friendly slug
    Slug(String),
    /// Either; resolved as id first, then slug
    Any(String),
}

impl SessionRef {
    /// Parse `id:<id>`, `slug:<slug>` or a bare identifier
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(id) = raw.strip_prefix("id:") {
            Self::Id(id.trim().to_string())
        } else if let Some(slug) = raw.strip_prefix("slug:") {
            Self::Slug(slug.trim().to_string())
        } else {
            Self::Any(raw.to_string())
        }
    }

    /// The raw identifier
    pub fn value(&self) -> &str {
        match self {
            Self::Id(v) | Self::Slug(v) | Self::Any(v) => v,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value().is_empty()
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(v) => write!(f, "id:{}", v),
            Self::Slug(v) => write!(f, "slug:{}", v),
            Self::Any(v) => f.write_str(v),
        }
    }
}

/// Session header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A session together with its current planning items
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub info: SessionInfo,
    /// Items ordered by `order`
    pub items: Vec<PlanningItem>,
    /// Sequence of the latest persisted chunk (0 when none)
    pub last_sequence: u64,
}

impl SessionSnapshot {
    /// Compact item list for the interpreter
    pub fn known_items(&self) -> Vec<KnownItem> {
        self.items.iter().map(PlanningItem::known).collect()
    }
}

/// An externally hosted AI dialogue reused across chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub conversation_id: String,
    pub session_id: String,
    pub last_sequence_applied: u64,
}
