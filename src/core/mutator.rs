//! Planning graph mutation.
//!
//! Applies a normalized action batch, in order, to one session's items.
//! Mutations are infallible at this level: unknown targets become
//! [`SkippedAction`]s and dangling dependency references are dropped, so a
//! batch either applies completely or (upstream) not at all.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MergePolicy;
use crate::domain::{
    item_id, ChunkEvent, ChunkEventKind, CreateItem, ItemMetadata, ItemType, KnownItem,
    MutationResult, PlanningItem, SkippedAction, StructuredAction, UpdateItem,
};

/// One session's planning items keyed by `item_key`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionGraph {
    pub session_id: String,
    pub items: BTreeMap<String, PlanningItem>,
    /// Order assigned to the next new item; never decreases
    pub next_order: u64,
}

impl SessionGraph {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            items: BTreeMap::new(),
            next_order: 1,
        }
    }

    pub fn get(&self, item_key: &str) -> Option<&PlanningItem> {
        self.items.get(item_key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items sorted by `order`
    pub fn ordered_items(&self) -> Vec<PlanningItem> {
        let mut items: Vec<PlanningItem> = self.items.values().cloned().collect();
        items.sort_by_key(|item| item.order);
        items
    }

    /// Compact snapshot in `order`
    pub fn known_items(&self) -> Vec<KnownItem> {
        self.ordered_items().iter().map(PlanningItem::known).collect()
    }
}

/// The chunk a batch belongs to
#[derive(Debug, Clone)]
pub struct ChunkContext {
    pub chunk_id: Uuid,
    pub sequence: u64,
    pub speaker_id: String,
    pub speaker_label: String,
    pub at: DateTime<Utc>,
}

/// Applies action batches to a [`SessionGraph`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphMutator {
    merge_policy: MergePolicy,
}

impl GraphMutator {
    pub fn new(merge_policy: MergePolicy) -> Self {
        Self { merge_policy }
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    /// Apply `actions` in order and report what changed
    pub fn apply(
        &self,
        graph: &mut SessionGraph,
        actions: &[StructuredAction],
        ctx: &ChunkContext,
    ) -> MutationResult {
        let mut result = MutationResult::default();

        for (index, action) in actions.iter().enumerate() {
            match action {
                StructuredAction::CreateItem(create) => {
                    let event = self.create(graph, create, ctx);
                    result.events.push(event);
                }
                StructuredAction::UpdateItem(update) => match self.update(graph, update, ctx) {
                    Some(event) => result.events.push(event),
                    None => {
                        warn!(key = %update.target_key, "Update targets unknown item, skipping");
                        result.skipped.push(SkippedAction {
                            index,
                            key: update.target_key.clone(),
                            reason: "unknown targetKey".to_string(),
                        });
                    }
                },
                StructuredAction::RemoveItem(remove) => match remove_item(graph, &remove.target_key) {
                    Some(removed) => {
                        result
                            .events
                            .push(ChunkEvent::from_item(ChunkEventKind::Removed, &removed));
                    }
                    None => {
                        warn!(key = %remove.target_key, "Remove targets unknown item, skipping");
                        result.skipped.push(SkippedAction {
                            index,
                            key: remove.target_key.clone(),
                            reason: "unknown targetKey".to_string(),
                        });
                    }
                },
            }
        }

        debug!(
            session = %graph.session_id,
            sequence = ctx.sequence,
            events = result.events.len(),
            skipped = result.skipped.len(),
            items = graph.len(),
            "Batch applied"
        );
        result
    }

    fn create(&self, graph: &mut SessionGraph, create: &CreateItem, ctx: &ChunkContext) -> ChunkEvent {
        let deps = create
            .blocked_by_keys
            .as_ref()
            .map(|keys| resolve_dependencies(graph, &create.item_key, keys));
        let speaker_label = create
            .speaker_label
            .clone()
            .unwrap_or_else(|| ctx.speaker_label.clone());

        if let Some(existing) = graph.items.get_mut(&create.item_key) {
            debug!(key = %create.item_key, policy = ?self.merge_policy, "Create hit existing key, merging");

            existing.item_type = create.item_type;
            existing.text = create.text.clone();
            existing.updated_at = ctx.at;
            existing.metadata.updated_by_chunk = Some(ctx.chunk_id);

            match self.merge_policy {
                MergePolicy::MergePresent => {
                    if let Some(deps) = deps {
                        existing.blocked_by_keys = deps;
                    }
                    if create.needs_research.is_some() {
                        existing.metadata.needs_research = create.needs_research;
                    }
                    if create.speaker_label.is_some() {
                        existing.metadata.speaker_label = create.speaker_label.clone();
                    }
                }
                MergePolicy::ReplaceAll => {
                    existing.blocked_by_keys = deps.unwrap_or_default();
                    existing.metadata.needs_research = create.needs_research;
                    existing.metadata.speaker_label = Some(speaker_label);
                    existing.speaker_id = Some(ctx.speaker_id.clone());
                }
            }

            if existing.item_type != ItemType::Idea {
                existing.metadata.needs_research = None;
            }

            return ChunkEvent::from_item(ChunkEventKind::Updated, existing);
        }

        let order = graph.next_order;
        graph.next_order += 1;

        let item = PlanningItem {
            id: item_id(&graph.session_id, &create.item_key, ctx.sequence),
            item_key: create.item_key.clone(),
            session_id: graph.session_id.clone(),
            item_type: create.item_type,
            text: create.text.clone(),
            speaker_id: Some(ctx.speaker_id.clone()),
            blocked_by_keys: deps.unwrap_or_default(),
            order,
            metadata: ItemMetadata {
                needs_research: create
                    .needs_research
                    .filter(|_| create.item_type == ItemType::Idea),
                speaker_label: Some(speaker_label),
                created_by_chunk: ctx.chunk_id,
                updated_by_chunk: None,
            },
            created_at: ctx.at,
            updated_at: ctx.at,
        };

        let event = ChunkEvent::from_item(ChunkEventKind::Created, &item);
        graph.items.insert(item.item_key.clone(), item);
        event
    }

    fn update(&self, graph: &mut SessionGraph, update: &UpdateItem, ctx: &ChunkContext) -> Option<ChunkEvent> {
        let deps = update
            .patch
            .blocked_by_keys
            .as_ref()
            .map(|keys| resolve_dependencies(graph, &update.target_key, keys));

        let item = graph.items.get_mut(&update.target_key)?;

        if let Some(ref text) = update.patch.text {
            item.text = text.clone();
        }
        if let Some(deps) = deps {
            item.blocked_by_keys = deps;
        }
        item.updated_at = ctx.at;
        item.metadata.updated_by_chunk = Some(ctx.chunk_id);

        Some(ChunkEvent::from_item(ChunkEventKind::Updated, item))
    }
}

/// Keep only references to items currently in the graph
fn resolve_dependencies(graph: &SessionGraph, own_key: &str, keys: &[String]) -> BTreeSet<String> {
    keys.iter()
        .filter(|key| {
            if key.as_str() == own_key {
                return false;
            }
            let exists = graph.items.contains_key(key.as_str());
            if !exists {
                warn!(item = own_key, blocked_by = %key, "Dropping reference to unknown item");
            }
            exists
        })
        .cloned()
        .collect()
}

/// Remove an item and prune it from every other item's dependencies
fn remove_item(graph: &mut SessionGraph, key: &str) -> Option<PlanningItem> {
    let removed = graph.items.remove(key)?;
    for item in graph.items.values_mut() {
        item.blocked_by_keys.remove(key);
    }
    Some(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ItemPatch, RemoveItem};
    use chrono::TimeZone;

    fn ctx(sequence: u64) -> ChunkContext {
        ChunkContext {
            chunk_id: Uuid::from_u128(sequence as u128),
            sequence,
            speaker_id: "u1".to_string(),
            speaker_label: "Dana".to_string(),
            at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, sequence as u32).unwrap(),
        }
    }

    fn create(key: &str, item_type: ItemType, text: &str, deps: Option<Vec<&str>>) -> StructuredAction {
        StructuredAction::CreateItem(CreateItem {
            item_key: key.to_string(),
            item_type,
            text: text.to_string(),
            speaker_label: None,
            blocked_by_keys: deps.map(|d| d.into_iter().map(String::from).collect()),
            needs_research: None,
        })
    }

    fn update(key: &str, text: Option<&str>, deps: Option<Vec<&str>>) -> StructuredAction {
        StructuredAction::UpdateItem(UpdateItem {
            target_key: key.to_string(),
            patch: ItemPatch {
                text: text.map(String::from),
                blocked_by_keys: deps.map(|d| d.into_iter().map(String::from).collect()),
            },
        })
    }

    fn remove(key: &str) -> StructuredAction {
        StructuredAction::RemoveItem(RemoveItem {
            target_key: key.to_string(),
        })
    }

    #[test]
    fn test_create_assigns_monotonic_order() {
        let mut graph = SessionGraph::new("s1");
        let result = GraphMutator::default().apply(
            &mut graph,
            &[
                create("task_audit_flow", ItemType::Task, "Audit current onboarding screens for gaps.", None),
                create("idea_dark_mode", ItemType::Idea, "Dark mode", None),
            ],
            &ctx(1),
        );

        assert_eq!(result.events.len(), 2);
        assert!(result.events.iter().all(|e| e.kind == ChunkEventKind::Created));

        let items = graph.ordered_items();
        assert_eq!(items[0].item_key, "task_audit_flow");
        assert_eq!(items[0].order, 1);
        assert_eq!(items[1].order, 2);
        assert!(items[0].blocked_by_keys.is_empty());
        assert_eq!(items[0].metadata.speaker_label.as_deref(), Some("Dana"));
    }

    #[test]
    fn test_repeated_create_never_duplicates() {
        let mutator = GraphMutator::default();
        let mut graph = SessionGraph::new("s1");
        let action = create("task_audit_flow", ItemType::Task, "Audit", None);

        mutator.apply(&mut graph, &[action.clone()], &ctx(1));
        let result = mutator.apply(&mut graph, &[action], &ctx(2));

        assert_eq!(graph.len(), 1);
        assert_eq!(result.events[0].kind, ChunkEventKind::Updated);

        let item = graph.get("task_audit_flow").unwrap();
        assert_eq!(item.order, 1);
        assert_eq!(item.id, item_id("s1", "task_audit_flow", 1));
        assert_eq!(item.metadata.updated_by_chunk, Some(Uuid::from_u128(2)));
        assert_eq!(graph.next_order, 2);
    }

    #[test]
    fn test_merge_present_keeps_absent_dependencies() {
        let mutator = GraphMutator::new(MergePolicy::MergePresent);
        let mut graph = SessionGraph::new("s1");
        mutator.apply(
            &mut graph,
            &[
                create("task_a", ItemType::Task, "A", None),
                create("task_b", ItemType::Task, "B", Some(vec!["task_a"])),
            ],
            &ctx(1),
        );
        mutator.apply(&mut graph, &[create("task_b", ItemType::Task, "B2", None)], &ctx(2));

        let b = graph.get("task_b").unwrap();
        assert_eq!(b.text, "B2");
        assert!(b.blocked_by_keys.contains("task_a"));
    }

    #[test]
    fn test_replace_all_clears_absent_dependencies() {
        let mutator = GraphMutator::new(MergePolicy::ReplaceAll);
        let mut graph = SessionGraph::new("s1");
        mutator.apply(
            &mut graph,
            &[
                create("task_a", ItemType::Task, "A", None),
                create("task_b", ItemType::Task, "B", Some(vec!["task_a"])),
            ],
            &ctx(1),
        );
        mutator.apply(&mut graph, &[create("task_b", ItemType::Task, "B2", None)], &ctx(2));

        assert!(graph.get("task_b").unwrap().blocked_by_keys.is_empty());
    }

    #[test]
    fn test_dependency_on_known_item_is_recorded() {
        let mutator = GraphMutator::default();
        let mut graph = SessionGraph::new("s1");
        mutator.apply(
            &mut graph,
            &[create("task_audit_flow", ItemType::Task, "Audit", None)],
            &ctx(1),
        );
        mutator.apply(
            &mut graph,
            &[create("task_write_tip_copy", ItemType::Task, "Write tip copy", Some(vec!["task_audit_flow"]))],
            &ctx(2),
        );

        let item = graph.get("task_write_tip_copy").unwrap();
        assert_eq!(
            item.blocked_by_keys.iter().collect::<Vec<_>>(),
            vec!["task_audit_flow"]
        );
    }

    #[test]
    fn test_dangling_dependencies_are_dropped() {
        let mut graph = SessionGraph::new("s1");
        GraphMutator::default().apply(
            &mut graph,
            &[create("task_b", ItemType::Task, "B", Some(vec!["task_invented"]))],
            &ctx(1),
        );
        assert!(graph.get("task_b").unwrap().blocked_by_keys.is_empty());
    }

    #[test]
    fn test_update_applies_present_fields_only() {
        let mutator = GraphMutator::default();
        let mut graph = SessionGraph::new("s1");
        mutator.apply(
            &mut graph,
            &[
                create("task_a", ItemType::Task, "A", None),
                create("task_b", ItemType::Task, "B", Some(vec!["task_a"])),
            ],
            &ctx(1),
        );
        let result = mutator.apply(&mut graph, &[update("task_b", Some("x"), None)], &ctx(2));

        let b = graph.get("task_b").unwrap();
        assert_eq!(b.text, "x");
        assert!(b.blocked_by_keys.contains("task_a"));
        assert_eq!(result.events[0].kind, ChunkEventKind::Updated);
        assert_eq!(result.events[0].item_text, "x");
    }

    #[test]
    fn test_unknown_targets_are_skipped_without_aborting() {
        let mut graph = SessionGraph::new("s1");
        let result = GraphMutator::default().apply(
            &mut graph,
            &[
                remove("missing"),
                update("also_missing", Some("x"), None),
                create("task_a", ItemType::Task, "A", None),
            ],
            &ctx(1),
        );

        assert_eq!(result.skipped.len(), 2);
        assert_eq!(result.skipped[0].index, 0);
        assert_eq!(result.events.len(), 1);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_remove_prunes_references_and_keeps_order_monotonic() {
        let mutator = GraphMutator::default();
        let mut graph = SessionGraph::new("s1");
        mutator.apply(
            &mut graph,
            &[
                create("task_a", ItemType::Task, "A", None),
                create("task_b", ItemType::Task, "B", Some(vec!["task_a"])),
            ],
            &ctx(1),
        );
        let result = mutator.apply(&mut graph, &[remove("task_a")], &ctx(2));
        assert_eq!(result.events[0].kind, ChunkEventKind::Removed);
        assert!(graph.get("task_b").unwrap().blocked_by_keys.is_empty());

        mutator.apply(&mut graph, &[create("task_c", ItemType::Task, "C", None)], &ctx(3));
        assert_eq!(graph.get("task_c").unwrap().order, 3);
    }

    #[test]
    fn test_needs_research_only_on_ideas() {
        let mut graph = SessionGraph::new("s1");
        let mut idea = create("idea_x", ItemType::Idea, "X", None);
        let mut task = create("task_y", ItemType::Task, "Y", None);
        for action in [&mut idea, &mut task] {
            if let StructuredAction::CreateItem(c) = action {
                c.needs_research = Some(true);
            }
        }
        GraphMutator::default().apply(&mut graph, &[idea, task], &ctx(1));

        assert_eq!(graph.get("idea_x").unwrap().metadata.needs_research, Some(true));
        assert_eq!(graph.get("task_y").unwrap().metadata.needs_research, None);
    }
}
