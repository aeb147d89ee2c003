//! Structured graph-mutation actions emitted by the interpreter.
//!
//! Wire format (one element of `actions`):
//!
//! ```json
//! {"action": "createItem", "itemKey": "task_audit_flow", "type": "task",
//!  "text": "Audit current onboarding screens for gaps.", "blockedByKeys": null}
//! {"action": "updateItem", "targetKey": "task_audit_flow", "patch": {"text": "..."}}
//! {"action": "removeItem", "targetKey": "idea_dark_mode"}
//! ```
//!
//! `null` and a missing field mean the same thing: "no value / no change".

use serde::{Deserialize, Serialize};

use super::items::ItemType;

/// One typed graph mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum StructuredAction {
    #[serde(rename = "createItem")]
    CreateItem(CreateItem),

    #[serde(rename = "updateItem")]
    UpdateItem(UpdateItem),

    #[serde(rename = "removeItem")]
    RemoveItem(RemoveItem),
}

impl StructuredAction {
    /// Wire name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateItem(_) => "createItem",
            Self::UpdateItem(_) => "updateItem",
            Self::RemoveItem(_) => "removeItem",
        }
    }

    /// Key the action creates or targets
    pub fn key(&self) -> &str {
        match self {
            Self::CreateItem(c) => &c.item_key,
            Self::UpdateItem(u) => &u.target_key,
            Self::RemoveItem(r) => &r.target_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItem {
    pub item_key: String,

    #[serde(rename = "type")]
    pub item_type: ItemType,

    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by_keys: Option<Vec<String>>,

    /// Only meaningful for ideas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_research: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItem {
    pub target_key: String,
    pub patch: ItemPatch,
}

/// Fields an update may change; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by_keys: Option<Vec<String>>,
}

impl ItemPatch {
    /// True when the patch carries no present field
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.blocked_by_keys.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveItem {
    pub target_key: String,
}

/// Ordered batch of actions for one chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionBatch {
    pub actions: Vec<StructuredAction>,
}

impl ActionBatch {
    pub fn new(actions: Vec<StructuredAction>) -> Self {
        Self { actions }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}
