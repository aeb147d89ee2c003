//! Structured interpretation of transcript text into graph actions.
//!
//! The interpreter sends the speaker's verbatim text plus a compact list of
//! already-known items to a model constrained by a strict JSON schema, and
//! parses the reply into an [`ActionBatch`]. The model may only reference keys
//! it was shown; ambiguous or non-actionable speech must produce an empty batch.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::adapters::{ConversationMetadata, ModelClient, StructuredRequest};
use crate::config::InterpretationSettings;
use crate::domain::{ActionBatch, ItemType, KnownItem};

/// Schema name sent with every structured completion
pub const SCHEMA_NAME: &str = "planning_actions";

/// Errors that can occur during interpretation
#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("Failed to open AI conversation")]
    Conversation(#[source] anyhow::Error),

    #[error("Model request failed")]
    Model(#[source] anyhow::Error),

    #[error("Model response contained no text output")]
    NoOutput,

    #[error("Model output is not a valid action batch: {0}")]
    InvalidOutput(String),
}

/// Everything the interpreter needs for one chunk
#[derive(Debug, Clone)]
pub struct InterpretRequest {
    pub session_id: String,
    pub conversation_id: Option<String>,
    pub request_id: Option<String>,
    pub speaker_id: String,
    pub speaker_label: String,
    pub text: String,
    /// Snapshot of items already in the session graph
    pub known_items: Vec<KnownItem>,
}

/// Transcript text → action batch
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Open a conversation for a session and return its id
    async fn open_conversation(
        &self,
        session_id: &str,
        request_id: Option<&str>,
    ) -> Result<String, InterpretError>;

    /// Interpret one chunk
    async fn interpret(&self, request: &InterpretRequest) -> Result<ActionBatch, InterpretError>;
}

/// Interpreter backed by a hosted model
pub struct ModelInterpreter {
    client: Arc<dyn ModelClient>,
    settings: InterpretationSettings,
}

impl ModelInterpreter {
    pub fn new(client: Arc<dyn ModelClient>, settings: InterpretationSettings) -> Self {
        Self { client, settings }
    }

    /// Build the structured request for a chunk
    pub fn build_request(&self, request: &InterpretRequest) -> StructuredRequest {
        StructuredRequest {
            model: self.settings.model.clone(),
            conversation_id: request.conversation_id.clone(),
            instructions: INSTRUCTIONS.to_string(),
            input: build_input(request, &self.settings),
            schema_name: SCHEMA_NAME.to_string(),
            schema: action_batch_schema(),
        }
    }
}

#[async_trait]
impl Interpreter for ModelInterpreter {
    async fn open_conversation(
        &self,
        session_id: &str,
        request_id: Option<&str>,
    ) -> Result<String, InterpretError> {
        let metadata = ConversationMetadata {
            session_id: session_id.to_string(),
            request_id: request_id.map(str::to_string),
        };
        let id = self
            .client
            .create_conversation(&metadata)
            .await
            .map_err(InterpretError::Conversation)?;

        info!(
            client = self.client.name(),
            conversation = %id,
            session = session_id,
            "Opened AI conversation"
        );
        Ok(id)
    }

    #[instrument(skip(self, request), fields(session = %request.session_id, known = request.known_items.len()))]
    async fn interpret(&self, request: &InterpretRequest) -> Result<ActionBatch, InterpretError> {
        let structured = self.build_request(request);
        let response = self
            .client
            .complete_structured(&structured)
            .await
            .map_err(InterpretError::Model)?;

        let batch = parse_response(&response)?;
        debug!(client = self.client.name(), actions = batch.len(), "Model produced action batch");
        Ok(batch)
    }
}

const INSTRUCTIONS: &str = "\
You turn meeting speech into planning-graph changes.

Return a JSON object {\"actions\": [...]} where each action is one of:
- createItem: a new idea, task, dependency, owner, risk, outcome, decision or summary.
- updateItem: change the text or blocking dependencies of a known item (patch).
- removeItem: delete a known item the speaker explicitly withdrew.

Rules:
- Be conservative. Small talk, filler, process noise or anything ambiguous yields {\"actions\": []}.
- itemKey is short snake_case prefixed by the type, e.g. task_audit_flow, and unique in the session.
- Reuse a known item's key instead of creating a duplicate of it.
- blockedByKeys may only list keys from the known items or items created earlier in this batch. Never invent keys.
- Only task items carry blockedByKeys and they may only reference other tasks. Use null otherwise.
- needsResearch is a boolean only for idea items; null for every other type.
- Rewrite text as a crisp sentence; keep the speaker's meaning.
- Use null for any field that does not apply.";

/// Render the per-chunk input: speaker, known items, verbatim text
pub fn build_input(request: &InterpretRequest, settings: &InterpretationSettings) -> String {
    let mut input = format!(
        "Speaker: {} ({})\n\nKnown items:\n",
        request.speaker_label, request.speaker_id
    );

    if request.known_items.is_empty() {
        input.push_str("(none)\n");
    } else {
        // Most recent items are the likeliest targets; keep the tail.
        let skip = request
            .known_items
            .len()
            .saturating_sub(settings.max_known_items);
        for item in request.known_items.iter().skip(skip) {
            input.push_str(&format!(
                "- {} [{}]: {}\n",
                item.item_key,
                item.item_type,
                truncate_chars(&item.text, settings.max_item_text_chars)
            ));
        }
    }

    input.push_str("\nTranscript:\n\"\"\"\n");
    input.push_str(request.text.trim());
    input.push_str("\n\"\"\"\n");
    input
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Strict JSON schema for the action batch
pub fn action_batch_schema() -> Value {
    let item_types: Vec<&str> = ItemType::ALL.iter().map(|t| t.as_str()).collect();
    let nullable_string = json!({ "type": ["string", "null"] });
    let nullable_keys = json!({ "type": ["array", "null"], "items": { "type": "string" } });

    let create = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "action": { "type": "string", "enum": ["createItem"] },
            "itemKey": { "type": "string" },
            "type": { "type": "string", "enum": item_types },
            "text": { "type": "string" },
            "speakerLabel": nullable_string,
            "blockedByKeys": nullable_keys,
            "needsResearch": { "type": ["boolean", "null"] }
        },
        "required": ["action", "itemKey", "type", "text", "speakerLabel", "blockedByKeys", "needsResearch"]
    });

    let update = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "action": { "type": "string", "enum": ["updateItem"] },
            "targetKey": { "type": "string" },
            "patch": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "text": nullable_string,
                    "blockedByKeys": nullable_keys
                },
                "required": ["text", "blockedByKeys"]
            }
        },
        "required": ["action", "targetKey", "patch"]
    });

    let remove = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "action": { "type": "string", "enum": ["removeItem"] },
            "targetKey": { "type": "string" }
        },
        "required": ["action", "targetKey"]
    });

    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "actions": {
                "type": "array",
                "items": { "anyOf": [create, update, remove] }
            }
        },
        "required": ["actions"]
    })
}

/// Extract and parse the action batch from a raw model response.
///
/// Looks at a top-level `output_text` first, then at every text block nested
/// under `output[].content[]`; the first candidate that parses wins.
pub fn parse_response(response: &Value) -> Result<ActionBatch, InterpretError> {
    let candidates = text_candidates(response);
    if candidates.is_empty() {
        return Err(InterpretError::NoOutput);
    }

    let mut last_error = String::new();
    for candidate in candidates {
        match parse_batch_text(&candidate) {
            Ok(batch) => return Ok(batch),
            Err(e) => last_error = e,
        }
    }

    Err(InterpretError::InvalidOutput(last_error))
}

fn text_candidates(response: &Value) -> Vec<String> {
    let mut candidates = Vec::new();

    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            candidates.push(text.to_string());
        }
    }

    let blocks = response
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("content").and_then(Value::as_array))
        .flatten();

    for block in blocks {
        if let Some(text) = block.get("text").and_then(Value::as_str) {
            if !text.trim().is_empty() {
                candidates.push(text.to_string());
            }
        } else if let Some(parsed) = block.get("json").or_else(|| block.get("parsed")) {
            if parsed.is_object() {
                candidates.push(parsed.to_string());
            }
        }
    }

    candidates
}

/// Parse a text blob as an action batch, tolerating a surrounding code fence
pub fn parse_batch_text(text: &str) -> Result<ActionBatch, String> {
    let trimmed = strip_code_fence(text.trim());
    serde_json::from_str::<ActionBatch>(trimmed).map_err(|e| e.to_string())
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening line.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
