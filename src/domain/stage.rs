//! Per-chunk processing stages.
//!
//! ```text
//! received → skipped
//!          ↘ transcribing → skipped
//!                         ↘ resolving_session → interpreting → normalizing → applying → persisted
//! (any non-terminal stage) → failed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStage {
    #[default]
    Received,
    Transcribing,
    /// Clip too short to be worth transcribing
    Skipped,
    ResolvingSession,
    Interpreting,
    Normalizing,
    Applying,
    Persisted,
    Failed,
}

impl ChunkStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Transcribing => "transcribing",
            Self::Skipped => "skipped",
            Self::ResolvingSession => "resolving_session",
            Self::Interpreting => "interpreting",
            Self::Normalizing => "normalizing",
            Self::Applying => "applying",
            Self::Persisted => "persisted",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Persisted | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(&self, next: ChunkStage) -> bool {
        use ChunkStage::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Received, Transcribing)
                | (Received, Skipped)
                | (Transcribing, Skipped)
                | (Transcribing, ResolvingSession)
                | (ResolvingSession, Interpreting)
                | (Interpreting, Normalizing)
                | (Normalizing, Applying)
                | (Applying, Persisted)
        )
    }
}

impl fmt::Display for ChunkStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
