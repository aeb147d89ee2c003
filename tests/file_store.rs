//! File Store Integration Tests
//!
//! Verifies that the JSONL chunk log is the source of truth: graphs rebuilt
//! from disk match what was applied, sequences survive reopening, and the
//! pipeline runs end-to-end over it.

use std::sync::Arc;

use huddle::adapters::scripted::{ScriptedInterpreter, ScriptedSpeech, SpeechReply};
use huddle::config::{MergePolicy, TranscriptionSettings};
use huddle::core::{ChunkPipeline, GraphMutator, IngestRequest, Transcriber};
use huddle::domain::{
    AudioDescriptor, CreateItem, ItemPatch, ItemType, RemoveItem, SessionRef, StructuredAction,
    TranscriptMetadata, UpdateItem,
};
use huddle::store::{replay_graph, ChunkMutation, FileStore, PlanningStore, StoreError};
use tempfile::TempDir;

fn store(dir: &TempDir) -> FileStore {
    FileStore::new(dir.path().join("sessions"), GraphMutator::default())
}

fn create(key: &str, item_type: ItemType, text: &str, deps: &[&str]) -> StructuredAction {
    StructuredAction::CreateItem(CreateItem {
        item_key: key.to_string(),
        item_type,
        text: text.to_string(),
        speaker_label: None,
        blocked_by_keys: if deps.is_empty() {
            None
        } else {
            Some(deps.iter().map(|d| d.to_string()).collect())
        },
        needs_research: None,
    })
}

fn mutation(session_id: &str, conversation: Option<&str>, actions: Vec<StructuredAction>) -> ChunkMutation {
    ChunkMutation {
        session_id: session_id.to_string(),
        speaker_id: "user_sam".to_string(),
        speaker_label: "Sam".to_string(),
        text: "placeholder transcript".to_string(),
        actions,
        conversation_id: conversation.map(str::to_string),
        transcript: TranscriptMetadata {
            model: "gpt-4o-mini-transcribe".to_string(),
            used_fallback: false,
        },
        audio: AudioDescriptor::describe(b"abc", "audio/webm", Some(4000)),
        request_id: None,
    }
}

#[tokio::test]
async fn test_graph_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let session = store(&dir).create_session("launch", Some("Launch plan")).await.unwrap();

    {
        let store = store(&dir);
        store
            .record_chunk(mutation(
                &session.id,
                Some("conv_1"),
                vec![
                    create("task_audit_flow", ItemType::Task, "Audit the flow", &[]),
                    create("risk_churn", ItemType::Risk, "Churn during migration", &[]),
                ],
            ))
            .await
            .unwrap();
        store
            .record_chunk(mutation(
                &session.id,
                Some("conv_1"),
                vec![
                    create("task_write_tip_copy", ItemType::Task, "Write tips", &["task_audit_flow"]),
                    StructuredAction::UpdateItem(UpdateItem {
                        target_key: "task_audit_flow".into(),
                        patch: ItemPatch {
                            text: Some("Audit the signup flow".into()),
                            blocked_by_keys: None,
                        },
                    }),
                    StructuredAction::RemoveItem(RemoveItem {
                        target_key: "risk_churn".into(),
                    }),
                ],
            ))
            .await
            .unwrap();
    }

    // A fresh handle sees the same graph.
    let reopened = store(&dir);
    let snapshot = reopened.resolve_session(&SessionRef::Slug("launch".into())).await.unwrap();
    assert_eq!(snapshot.last_sequence, 2);

    let keys: Vec<&str> = snapshot.items.iter().map(|i| i.item_key.as_str()).collect();
    assert_eq!(keys, vec!["task_audit_flow", "task_write_tip_copy"]);
    assert_eq!(snapshot.items[0].text, "Audit the signup flow");
    assert!(snapshot.items[1].blocked_by_keys.contains("task_audit_flow"));

    let receipt = reopened
        .record_chunk(mutation(&session.id, None, vec![]))
        .await
        .unwrap();
    assert_eq!(receipt.sequence, 3);
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let session = store.create_session("replay", None).await.unwrap();

    store
        .record_chunk(mutation(
            &session.id,
            None,
            vec![
                create("idea_referrals", ItemType::Idea, "Referral bonus", &[]),
                create("task_audit_flow", ItemType::Task, "Audit", &[]),
            ],
        ))
        .await
        .unwrap();

    let chunks = store.list_chunks(&session.id).await.unwrap();
    let first = replay_graph(&session.id, &chunks);
    let second = replay_graph(&session.id, &chunks);
    assert_eq!(first.ordered_items(), second.ordered_items());

    let snapshot = store.resolve_session(&SessionRef::Id(session.id.clone())).await.unwrap();
    assert_eq!(snapshot.items, first.ordered_items());
    // Items keep the chunk's timestamp, not the replay time.
    assert_eq!(snapshot.items[0].created_at, chunks[0].created_at);
}

#[tokio::test]
async fn test_reconfigured_merge_policy_leaves_history_unchanged() {
    let dir = TempDir::new().unwrap();
    let merge = store(&dir);
    let session = merge.create_session("policy", None).await.unwrap();

    merge
        .record_chunk(mutation(
            &session.id,
            None,
            vec![create("task_audit_flow", ItemType::Task, "Audit", &[])],
        ))
        .await
        .unwrap();
    merge
        .record_chunk(mutation(
            &session.id,
            None,
            vec![create("task_write_tip_copy", ItemType::Task, "Tips", &["task_audit_flow"])],
        ))
        .await
        .unwrap();
    // Re-create without dependencies: merging keeps them.
    merge
        .record_chunk(mutation(
            &session.id,
            None,
            vec![create("task_write_tip_copy", ItemType::Task, "Tips v2", &[])],
        ))
        .await
        .unwrap();

    let before = merge.resolve_session(&SessionRef::Id(session.id.clone())).await.unwrap();
    let tip = before.items.iter().find(|i| i.item_key == "task_write_tip_copy").unwrap();
    assert_eq!(tip.text, "Tips v2");
    assert!(tip.blocked_by_keys.contains("task_audit_flow"));

    // Reopen with the other policy: existing chunks replay as recorded.
    let replace = FileStore::new(
        dir.path().join("sessions"),
        GraphMutator::new(MergePolicy::ReplaceAll),
    );
    let after = replace.resolve_session(&SessionRef::Id(session.id.clone())).await.unwrap();
    assert_eq!(after.items, before.items);

    // New chunks follow the new policy.
    replace
        .record_chunk(mutation(
            &session.id,
            None,
            vec![create("task_write_tip_copy", ItemType::Task, "Tips v3", &[])],
        ))
        .await
        .unwrap();
    let chunks = replace.list_chunks(&session.id).await.unwrap();
    let policies: Vec<MergePolicy> = chunks.iter().map(|c| c.merge_policy).collect();
    assert_eq!(
        policies,
        vec![
            MergePolicy::MergePresent,
            MergePolicy::MergePresent,
            MergePolicy::MergePresent,
            MergePolicy::ReplaceAll
        ]
    );

    let latest = merge.resolve_session(&SessionRef::Id(session.id.clone())).await.unwrap();
    let tip = latest.items.iter().find(|i| i.item_key == "task_write_tip_copy").unwrap();
    assert_eq!(tip.text, "Tips v3");
    assert!(tip.blocked_by_keys.is_empty());
}

#[tokio::test]
async fn test_conversation_lookup_scans_sessions() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let a = store.create_session("alpha", None).await.unwrap();
    let b = store.create_session("beta", None).await.unwrap();

    store.record_chunk(mutation(&a.id, Some("conv_a"), vec![])).await.unwrap();
    store.record_chunk(mutation(&b.id, Some("conv_b"), vec![])).await.unwrap();
    store.record_chunk(mutation(&b.id, Some("conv_b"), vec![])).await.unwrap();

    let conv = store.conversation("conv_b").await.unwrap().unwrap();
    assert_eq!(conv.session_id, b.id);
    assert_eq!(conv.last_sequence_applied, 2);

    assert!(store.conversation("conv_missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let err = store
        .record_chunk(mutation("ses_000000000000", None, vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SessionNotFound(_)));

    let err = store.list_chunks("ses_000000000000").await.unwrap_err();
    assert!(matches!(err, StoreError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_concurrent_appends_get_distinct_sequences() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(store(&dir));
    let session = store.create_session("busy", None).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let id = session.id.clone();
            tokio::spawn(async move {
                let key = format!("task_{}", i);
                store
                    .record_chunk(mutation(&id, None, vec![create(&key, ItemType::Task, "t", &[])]))
                    .await
            })
        })
        .collect();

    let mut sequences = Vec::new();
    for handle in handles {
        sequences.push(handle.await.unwrap().unwrap().sequence);
    }
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=8).collect::<Vec<u64>>());

    let snapshot = store.resolve_session(&SessionRef::Id(session.id.clone())).await.unwrap();
    assert_eq!(snapshot.items.len(), 8);
}

#[tokio::test]
async fn test_pipeline_over_file_store() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(store(&dir));
    store.create_session("onboarding", None).await.unwrap();

    let speech = Arc::new(
        ScriptedSpeech::new().reply(SpeechReply::Text("Task: audit current onboarding screens".into())),
    );
    let interpreter = Arc::new(ScriptedInterpreter::new().when(
        "audit",
        vec![create("task_audit_flow", ItemType::Task, "Audit current onboarding screens", &[])],
    ));
    let pipeline = ChunkPipeline::new(
        Transcriber::new(speech, TranscriptionSettings::default()),
        interpreter,
        store.clone(),
    );

    let response = pipeline
        .ingest(IngestRequest {
            audio_bytes: b"OggS fake".to_vec(),
            mime_type: "audio/ogg".into(),
            session: "onboarding".into(),
            speaker_id: "user_dana".into(),
            speaker_label: "Dana".into(),
            duration_ms: None,
            conversation_id: None,
            request_id: Some("req_e2e".into()),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.transcript.sequence, 1);

    let log = std::fs::read_to_string(store.chunks_path(&response_session(&store).await)).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("\"request_id\":\"req_e2e\""));
    assert!(!log.contains("OggS"));

    let chunks = store.list_chunks(&response_session(&store).await).await.unwrap();
    assert_eq!(chunks[0].conversation_id.as_deref(), Some(response.conversation_id.as_str()));
    assert_eq!(chunks[0].audio.mime_type, "audio/ogg");
    assert_eq!(chunks[0].resulting_events.len(), 1);
}

async fn response_session(store: &FileStore) -> String {
    store
        .resolve_session(&SessionRef::Slug("onboarding".into()))
        .await
        .unwrap()
        .info
        .id
}
