//! Chunk ingestion pipeline.
//!
//! ```text
//! received ─validate─▶ (too short? → skipped)
//!          ─gate(conversation)─▶ transcribing ─▶ resolving_session
//!          ─▶ interpreting ─▶ normalizing ─▶ applying ─▶ persisted
//! ```
//!
//! Everything after the gate runs inside the conversation serializer, so two
//! chunks sharing a conversation id are processed end-to-end in the order
//! `ingest` was called. Any failure ends the chunk with a [`PipelineError`]
//! naming the stage; nothing is persisted unless the whole batch applies.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::error::{ChunkError, PipelineError};
use super::interpreter::{InterpretRequest, Interpreter};
use super::normalizer::{DroppedAction, Normalizer};
use super::serializer::ConversationSerializer;
use super::transcription::{Transcriber, TranscriptionOutcome};
use crate::adapters::{AudioInput, SpeechBackend};
use crate::config::ResolvedConfig;
use crate::domain::{AudioDescriptor, ChunkStage, MutationResult, SessionRef, TranscriptMetadata};
use crate::store::{ChunkMutation, PlanningStore};

/// One audio submission
#[derive(Clone, Default)]
pub struct IngestRequest {
    pub audio_bytes: Vec<u8>,
    pub mime_type: String,
    /// Session id or slug (`id:` / `slug:` prefixes accepted)
    pub session: String,
    pub speaker_id: String,
    pub speaker_label: String,
    pub duration_ms: Option<u64>,
    pub conversation_id: Option<String>,
    pub request_id: Option<String>,
}

impl std::fmt::Debug for IngestRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestRequest")
            .field("audio_bytes", &self.audio_bytes.len())
            .field("mime_type", &self.mime_type)
            .field("session", &self.session)
            .field("speaker_id", &self.speaker_id)
            .field("duration_ms", &self.duration_ms)
            .field("conversation_id", &self.conversation_id)
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Transcript part of an ingestion result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSummary {
    pub text: String,
    pub chunk_id: Uuid,
    pub sequence: u64,
    pub model: String,
    pub used_fallback: bool,
}

/// Result of a processed chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub transcript: TranscriptSummary,
    pub mutation_result: MutationResult,
    /// Actions the normalizer filtered out
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<DroppedAction>,
    pub conversation_id: String,
    pub request_id: String,
}

/// A validated request, ready to be gated
struct Admitted {
    request_id: String,
    audio: AudioInput,
    session: SessionRef,
    speaker_id: String,
    speaker_label: String,
    conversation_id: Option<String>,
    stages: StageTracker,
}

/// Stage of one chunk; every transition is checked and logged
#[derive(Debug, Default)]
struct StageTracker {
    current: ChunkStage,
}

impl StageTracker {
    fn current(&self) -> ChunkStage {
        self.current
    }

    fn advance(&mut self, next: ChunkStage) {
        debug_assert!(
            self.current.can_advance_to(next),
            "illegal chunk stage transition {} -> {}",
            self.current,
            next
        );
        debug!(from = %self.current, stage = %next, "Chunk stage");
        self.current = next;
    }
}

/// Generate a request id
pub fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

/// Whether a mime type is accepted for transcription
pub fn is_accepted_mime(essence: &str) -> bool {
    essence.starts_with("audio/") || matches!(essence, "video/webm" | "video/mp4")
}

/// Transcribe → interpret → apply, per chunk
pub struct ChunkPipeline {
    transcriber: Transcriber,
    interpreter: Arc<dyn Interpreter>,
    store: Arc<dyn PlanningStore>,
    serializer: ConversationSerializer,
    normalizer: Normalizer,
    max_audio_bytes: u64,
}

impl ChunkPipeline {
    pub fn new(
        transcriber: Transcriber,
        interpreter: Arc<dyn Interpreter>,
        store: Arc<dyn PlanningStore>,
    ) -> Self {
        Self {
            transcriber,
            interpreter,
            store,
            serializer: ConversationSerializer::new(),
            normalizer: Normalizer::default(),
            max_audio_bytes: crate::config::LimitSettings::default().max_audio_bytes,
        }
    }

    /// Wire a pipeline from resolved configuration
    pub fn from_config(
        config: &ResolvedConfig,
        speech: Arc<dyn SpeechBackend>,
        interpreter: Arc<dyn Interpreter>,
        store: Arc<dyn PlanningStore>,
    ) -> Self {
        Self::new(
            Transcriber::new(speech, config.transcription.clone()),
            interpreter,
            store,
        )
        .with_normalizer(Normalizer::new(config.graph.dependency_policy))
        .with_max_audio_bytes(config.limits.max_audio_bytes)
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Share a serializer with other pipelines in the process
    pub fn with_serializer(mut self, serializer: ConversationSerializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_max_audio_bytes(mut self, max_audio_bytes: u64) -> Self {
        self.max_audio_bytes = max_audio_bytes;
        self
    }

    pub fn serializer(&self) -> &ConversationSerializer {
        &self.serializer
    }

    /// Ingest one audio chunk.
    ///
    /// Validation and the duration check happen immediately; the chunk then
    /// takes its place in the conversation queue at call time. Resolves to
    /// `Ok(None)` for clips below the minimum duration.
    pub fn ingest(
        &self,
        request: IngestRequest,
    ) -> impl Future<Output = Result<Option<IngestResponse>, PipelineError>> + Send + '_ {
        let request_id = request
            .request_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(new_request_id);

        let task = match self.admit(request_id, request) {
            Ok(Some(admitted)) => {
                let key = admitted.conversation_id.clone();
                Ok(Some(self.serializer.submit(key.as_deref(), self.process(admitted))))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        async move {
            match task {
                Ok(Some(task)) => task.await.map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            }
        }
    }

    /// Validate and apply the duration skip; no side effects
    fn admit(&self, request_id: String, request: IngestRequest) -> Result<Option<Admitted>, PipelineError> {
        let mut stages = StageTracker::default();
        debug!(request_id = %request_id, stage = %stages.current(), "Chunk stage");

        if let Err(reason) = self.validate(&request) {
            warn!(request_id = %request_id, reason = %reason, "Rejecting chunk");
            return Err(PipelineError::new(
                request_id,
                stages.current(),
                ChunkError::Validation(reason),
            ));
        }

        if self.transcriber.is_too_short(request.duration_ms) {
            stages.advance(ChunkStage::Skipped);
            info!(
                request_id = %request_id,
                duration_ms = ?request.duration_ms,
                "Clip below minimum duration, skipping"
            );
            return Ok(None);
        }

        let conversation_id = request
            .conversation_id
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(Some(Admitted {
            audio: AudioInput::new(request.audio_bytes, request.mime_type, request.duration_ms),
            session: SessionRef::parse(&request.session),
            speaker_id: request.speaker_id.trim().to_string(),
            speaker_label: request.speaker_label.trim().to_string(),
            conversation_id,
            request_id,
            stages,
        }))
    }

    fn validate(&self, request: &IngestRequest) -> Result<(), String> {
        let essence = crate::adapters::mime_essence(&request.mime_type);
        if !is_accepted_mime(&essence) {
            return Err(format!("unsupported mime type '{}'", request.mime_type));
        }
        if request.audio_bytes.is_empty() {
            return Err("audio is empty".to_string());
        }
        if request.audio_bytes.len() as u64 > self.max_audio_bytes {
            return Err(format!(
                "audio is {} bytes, limit is {}",
                request.audio_bytes.len(),
                self.max_audio_bytes
            ));
        }
        if SessionRef::parse(&request.session).is_empty() {
            return Err("session identifier is required".to_string());
        }
        if request.speaker_id.trim().is_empty() {
            return Err("speakerId is required".to_string());
        }
        if request.speaker_label.trim().is_empty() {
            return Err("speakerLabel is required".to_string());
        }
        Ok(())
    }

    #[instrument(
        skip_all,
        fields(
            request_id = %chunk.request_id,
            session = %chunk.session,
            conversation = chunk.conversation_id.as_deref().unwrap_or("-")
        )
    )]
    async fn process(&self, chunk: Admitted) -> Result<IngestResponse, PipelineError> {
        let Admitted {
            request_id,
            audio,
            session,
            speaker_id,
            speaker_label,
            conversation_id,
            mut stages,
        } = chunk;
        let fail = |stage: ChunkStage, source: ChunkError| {
            let err = PipelineError::new(request_id.clone(), stage, source);
            warn!(diagnostic = %err.diagnostic.summary(), stage = %ChunkStage::Failed, "Chunk failed");
            err
        };

        stages.advance(ChunkStage::Transcribing);
        let transcript = match self.transcriber.transcribe(&audio).await {
            Ok(TranscriptionOutcome::Transcribed(transcript)) => transcript,
            Ok(TranscriptionOutcome::Skipped { duration_ms }) => {
                // admit() already filters these; the transcriber is the authority.
                return Err(fail(
                    stages.current(),
                    ChunkError::Validation(format!("clip of {}ms is below the minimum", duration_ms)),
                ));
            }
            Err(e) => return Err(fail(stages.current(), e.into())),
        };

        stages.advance(ChunkStage::ResolvingSession);
        let snapshot = self
            .store
            .resolve_session(&session)
            .await
            .map_err(|e| fail(stages.current(), ChunkError::SessionResolution(e)))?;
        let session_id = snapshot.info.id.clone();

        if let Some(ref id) = conversation_id {
            let existing = self
                .store
                .conversation(id)
                .await
                .map_err(|e| fail(stages.current(), ChunkError::SessionResolution(e)))?;
            if let Some(existing) = existing {
                if existing.session_id != session_id {
                    return Err(fail(
                        stages.current(),
                        ChunkError::Validation(format!(
                            "conversation {} belongs to session {}",
                            id, existing.session_id
                        )),
                    ));
                }
                debug!(last_sequence = existing.last_sequence_applied, "Continuing conversation");
            }
        }

        stages.advance(ChunkStage::Interpreting);
        let conversation_id = match conversation_id {
            Some(id) => id,
            None => self
                .interpreter
                .open_conversation(&session_id, Some(&request_id))
                .await
                .map_err(|e| fail(stages.current(), ChunkError::Interpretation(e)))?,
        };

        let known_items = snapshot.known_items();
        let interpret_request = InterpretRequest {
            session_id: session_id.clone(),
            conversation_id: Some(conversation_id.clone()),
            request_id: Some(request_id.clone()),
            speaker_id: speaker_id.clone(),
            speaker_label: speaker_label.clone(),
            text: transcript.text.clone(),
            known_items,
        };
        let batch = self
            .interpreter
            .interpret(&interpret_request)
            .await
            .map_err(|e| fail(stages.current(), ChunkError::Interpretation(e)))?;

        stages.advance(ChunkStage::Normalizing);
        let normalized = self.normalizer.normalize(batch, &interpret_request.known_items);

        stages.advance(ChunkStage::Applying);
        let mutation = ChunkMutation {
            session_id: session_id.clone(),
            speaker_id,
            speaker_label,
            text: transcript.text.clone(),
            actions: normalized.actions,
            conversation_id: Some(conversation_id.clone()),
            transcript: TranscriptMetadata {
                model: transcript.model.clone(),
                used_fallback: transcript.used_fallback,
            },
            audio: AudioDescriptor::describe(&audio.bytes, &audio.essence(), audio.duration_ms),
            request_id: Some(request_id.clone()),
        };
        let receipt = self
            .store
            .record_chunk(mutation)
            .await
            .map_err(|e| fail(stages.current(), ChunkError::Persistence(e)))?;

        stages.advance(ChunkStage::Persisted);
        info!(
            session = %session_id,
            sequence = receipt.sequence,
            events = receipt.result.events.len(),
            skipped = receipt.result.skipped.len(),
            model = %transcript.model,
            "Chunk persisted"
        );

        Ok(IngestResponse {
            transcript: TranscriptSummary {
                text: transcript.text,
                chunk_id: receipt.chunk_id,
                sequence: receipt.sequence,
                model: transcript.model,
                used_fallback: transcript.used_fallback,
            },
            mutation_result: receipt.result,
            dropped: normalized.dropped,
            conversation_id,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::scripted::{ScriptedInterpreter, ScriptedSpeech};
    use crate::config::TranscriptionSettings;
    use crate::store::InMemoryStore;

    fn pipeline(speech: Arc<ScriptedSpeech>) -> ChunkPipeline {
        ChunkPipeline::new(
            Transcriber::new(speech, TranscriptionSettings::default()),
            Arc::new(ScriptedInterpreter::new()),
            Arc::new(InMemoryStore::default()),
        )
        .with_max_audio_bytes(16)
    }

    fn request() -> IngestRequest {
        IngestRequest {
            audio_bytes: b"fake".to_vec(),
            mime_type: "audio/webm;codecs=opus".to_string(),
            session: "weekly".to_string(),
            speaker_id: "u1".to_string(),
            speaker_label: "Dana".to_string(),
            duration_ms: Some(5_000),
            ..Default::default()
        }
    }

    #[test]
    fn test_accepted_mime_types() {
        assert!(is_accepted_mime("audio/webm"));
        assert!(is_accepted_mime("video/mp4"));
        assert!(!is_accepted_mime("text/plain"));
        assert!(!is_accepted_mime("video/quicktime"));
    }

    #[test]
    fn test_stage_tracker_follows_the_chunk_path() {
        let mut stages = StageTracker::default();
        assert_eq!(stages.current(), ChunkStage::Received);

        for next in [
            ChunkStage::Transcribing,
            ChunkStage::ResolvingSession,
            ChunkStage::Interpreting,
            ChunkStage::Normalizing,
            ChunkStage::Applying,
            ChunkStage::Persisted,
        ] {
            stages.advance(next);
        }
        assert_eq!(stages.current(), ChunkStage::Persisted);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "illegal chunk stage transition")]
    fn test_stage_tracker_rejects_skipped_stages() {
        let mut stages = StageTracker::default();
        stages.advance(ChunkStage::Transcribing);
        stages.advance(ChunkStage::Applying);
    }

    #[test]
    fn test_request_ids() {
        let id = new_request_id();
        assert!(id.starts_with("req_"));
        assert_eq!(id.len(), 36);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_side_effects() {
        let speech = Arc::new(ScriptedSpeech::new());
        let pipeline = pipeline(speech.clone());

        let cases = [
            IngestRequest { mime_type: "text/plain".into(), ..request() },
            IngestRequest { audio_bytes: vec![], ..request() },
            IngestRequest { audio_bytes: vec![0; 17], ..request() },
            IngestRequest { session: "  ".into(), ..request() },
            IngestRequest { speaker_id: "".into(), ..request() },
            IngestRequest { speaker_label: " ".into(), ..request() },
        ];

        for case in cases {
            let err = pipeline.ingest(case).await.unwrap_err();
            assert_eq!(err.stage, ChunkStage::Received);
            assert!(matches!(err.source, ChunkError::Validation(_)));
        }
        assert!(speech.calls().is_empty());
    }

    #[tokio::test]
    async fn test_supplied_request_id_is_kept() {
        let pipeline = pipeline(Arc::new(ScriptedSpeech::new()));
        let err = pipeline
            .ingest(IngestRequest {
                request_id: Some("req_custom".into()),
                audio_bytes: vec![],
                ..request()
            })
            .await
            .unwrap_err();

        assert_eq!(err.request_id, "req_custom");
        assert!(err.to_string().starts_with("[req_custom] received failed"));
    }
}
