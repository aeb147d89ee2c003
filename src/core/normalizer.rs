//! Action normalization between the interpreter and the mutator.
//!
//! Structurally incomplete actions are filtered out (never an error), text is
//! trimmed, nulls are already omissions after deserialization, and the
//! task-only dependency policy is applied according to configuration.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DependencyPolicy;
use crate::domain::{ActionBatch, ItemType, KnownItem, StructuredAction};

/// An action removed before mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedAction {
    /// Position in the interpreter's batch
    pub index: usize,
    pub action: String,
    pub key: String,
    pub reason: String,
}

/// Batch ready for the mutator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Surviving actions, in original order
    pub actions: Vec<StructuredAction>,
    pub dropped: Vec<DroppedAction>,
}

/// Filters and cleans interpreter output
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    dependency_policy: DependencyPolicy,
}

impl Normalizer {
    pub fn new(dependency_policy: DependencyPolicy) -> Self {
        Self { dependency_policy }
    }

    pub fn dependency_policy(&self) -> DependencyPolicy {
        self.dependency_policy
    }

    /// Normalize a batch against the known-item snapshot it was interpreted with
    pub fn normalize(&self, batch: ActionBatch, known: &[KnownItem]) -> NormalizedBatch {
        let mut types: HashMap<String, ItemType> = known
            .iter()
            .map(|item| (item.item_key.clone(), item.item_type))
            .collect();

        let mut out = NormalizedBatch::default();

        for (index, action) in batch.actions.into_iter().enumerate() {
            let kind = action.kind();
            let key = action.key().trim().to_string();

            match self.normalize_action(action, &types) {
                Ok(action) => {
                    match &action {
                        StructuredAction::CreateItem(create) => {
                            types.insert(create.item_key.clone(), create.item_type);
                        }
                        StructuredAction::RemoveItem(remove) => {
                            types.remove(&remove.target_key);
                        }
                        StructuredAction::UpdateItem(_) => {}
                    }
                    out.actions.push(action);
                }
                Err(reason) => {
                    warn!(index, action = kind, key = %key, reason, "Dropping action");
                    out.dropped.push(DroppedAction {
                        index,
                        action: kind.to_string(),
                        key,
                        reason: reason.to_string(),
                    });
                }
            }
        }

        debug!(
            kept = out.actions.len(),
            dropped = out.dropped.len(),
            "Action batch normalized"
        );
        out
    }

    fn normalize_action(
        &self,
        action: StructuredAction,
        types: &HashMap<String, ItemType>,
    ) -> Result<StructuredAction, &'static str> {
        match action {
            StructuredAction::CreateItem(mut create) => {
                create.item_key = create.item_key.trim().to_string();
                if create.item_key.is_empty() {
                    return Err("create without itemKey");
                }

                create.text = create.text.trim().to_string();
                if create.text.is_empty() {
                    return Err("create without text");
                }

                create.speaker_label = non_blank(create.speaker_label);

                if create.item_type != ItemType::Idea {
                    create.needs_research = None;
                }

                create.blocked_by_keys = create
                    .blocked_by_keys
                    .map(|keys| clean_keys(keys, &create.item_key));
                create.blocked_by_keys = self.apply_policy(
                    &create.item_key,
                    create.item_type,
                    create.blocked_by_keys,
                    types,
                );

                Ok(StructuredAction::CreateItem(create))
            }

            StructuredAction::UpdateItem(mut update) => {
                update.target_key = update.target_key.trim().to_string();
                if update.target_key.is_empty() {
                    return Err("update without targetKey");
                }

                update.patch.text = non_blank(update.patch.text);
                update.patch.blocked_by_keys = update
                    .patch
                    .blocked_by_keys
                    .map(|keys| clean_keys(keys, &update.target_key));

                if let Some(&target_type) = types.get(&update.target_key) {
                    update.patch.blocked_by_keys = self.apply_policy(
                        &update.target_key,
                        target_type,
                        update.patch.blocked_by_keys,
                        types,
                    );
                }

                if update.patch.is_empty() {
                    return Err("update patch has no present field");
                }

                Ok(StructuredAction::UpdateItem(update))
            }

            StructuredAction::RemoveItem(mut remove) => {
                remove.target_key = remove.target_key.trim().to_string();
                if remove.target_key.is_empty() {
                    return Err("remove without targetKey");
                }
                Ok(StructuredAction::RemoveItem(remove))
            }
        }
    }

    /// Apply the task-only dependency policy to one item's edges
    fn apply_policy(
        &self,
        key: &str,
        item_type: ItemType,
        edges: Option<Vec<String>>,
        types: &HashMap<String, ItemType>,
    ) -> Option<Vec<String>> {
        let edges = edges?;
        if edges.is_empty() {
            return Some(edges);
        }

        if item_type != ItemType::Task {
            return match self.dependency_policy {
                DependencyPolicy::Advisory => {
                    warn!(key, item_type = %item_type, "Non-task item carries blockedByKeys");
                    Some(edges)
                }
                DependencyPolicy::Enforce => {
                    warn!(key, item_type = %item_type, "Stripping blockedByKeys from non-task item");
                    None
                }
            };
        }

        let mut kept = Vec::with_capacity(edges.len());
        for edge in edges {
            match types.get(&edge) {
                Some(&target) if target != ItemType::Task => match self.dependency_policy {
                    DependencyPolicy::Advisory => {
                        warn!(key, blocked_by = %edge, target = %target, "Dependency on non-task item");
                        kept.push(edge);
                    }
                    DependencyPolicy::Enforce => {
                        warn!(key, blocked_by = %edge, target = %target, "Dropping dependency on non-task item");
                    }
                },
                _ => kept.push(edge),
            }
        }
        Some(kept)
    }
}

/// Trim, de-duplicate (first occurrence wins) and drop self references
fn clean_keys(keys: Vec<String>, own_key: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty() && k != own_key)
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
