//! Bounded, credential-free failure context.
//!
//! Every fatal chunk failure carries a [`Diagnostic`]: the failing stage, the
//! error class, a truncated message, HTTP status/code/body when an external
//! service was involved, and up to [`MAX_CAUSE_DEPTH`] causes. All text passes
//! through [`redact`] first.

use std::error::Error as StdError;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::adapters::HttpFailure;
use crate::domain::ChunkStage;

pub const MAX_CAUSE_DEPTH: usize = 5;
pub const MAX_BODY_CHARS: usize = 2_000;
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Structured failure context for one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: ChunkStage,
    /// Error class, e.g. `TranscriptionFailure`
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl Diagnostic {
    /// Capture an error and its source chain
    pub fn capture(stage: ChunkStage, name: &str, error: &(dyn StdError + 'static)) -> Self {
        let mut diagnostic = Self {
            stage,
            name: name.to_string(),
            message: clean(&error.to_string(), MAX_MESSAGE_CHARS),
            status: None,
            code: None,
            body: None,
            causes: Vec::new(),
        };

        diagnostic.pick_http(error);

        let mut current = error.source();
        while let Some(cause) = current {
            if diagnostic.causes.len() >= MAX_CAUSE_DEPTH {
                break;
            }
            diagnostic.pick_http(cause);
            diagnostic.causes.push(clean(&cause.to_string(), MAX_MESSAGE_CHARS));
            current = cause.source();
        }

        diagnostic
    }

    /// Take status/code/body from the first HTTP failure in the chain
    fn pick_http(&mut self, error: &(dyn StdError + 'static)) {
        if self.status.is_some() {
            return;
        }
        if let Some(failure) = error.downcast_ref::<HttpFailure>() {
            self.status = Some(failure.status);
            self.code = failure.code.as_deref().map(redact);
            if !failure.body.is_empty() {
                self.body = Some(clean(&failure.body, MAX_BODY_CHARS));
            }
        }
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        match self.status {
            Some(status) => format!("{} at {} (HTTP {}): {}", self.name, self.stage, status, self.message),
            None => format!("{} at {}: {}", self.name, self.stage, self.message),
        }
    }
}

fn clean(text: &str, max_chars: usize) -> String {
    truncate(&redact(text), max_chars)
}

/// Cut to `max_chars` characters, marking the cut
pub fn truncate(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(&format!("…[+{} chars]", total - max_chars));
    out
}

fn patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)(authorization\s*[:=]\s*)[^\r\n,;]+", "${1}[REDACTED]"),
            (r"(?i)\bbearer\s+[A-Za-z0-9._~+/\-]+=*", "Bearer [REDACTED]"),
            (r"\bsk-[A-Za-z0-9_\-]{6,}", "sk-[REDACTED]"),
            (r#"(?i)(api[_-]?key["']?\s*[=:]\s*["']?)[^\s"'&,;}]+"#, "${1}[REDACTED]"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Strip credentials from free text
pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for (pattern, replacement) in patterns() {
        if pattern.is_match(&out) {
            out = pattern.replace_all(&out, *replacement).into_owned();
        }
    }
    out
}
