//! Event-sourced file store.
//!
//! Layout under the sessions directory:
//!
//! ```text
//! sessions/
//!   .lock                   # held while creating sessions (slug uniqueness)
//!   <session-id>/
//!     session.json          # SessionInfo
//!     chunks.jsonl          # one TranscriptChunk per line, append-only
//! ```
//!
//! The planning graph is never stored; it is rebuilt by replaying each chunk's
//! normalized batch with the merge policy recorded on that chunk. The store's
//! own mutator only decides how new chunks are applied.
//!
//! Appends hold an exclusive lock on `chunks.jsonl` across replay, sequencing
//! and write, so concurrent writers (threads or processes) cannot hand out the
//! same sequence.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, info};

use super::{
    conversation_from_chunks, new_session_id, prepare_chunk, replay_graph, validate_slug,
    ChunkMutation, ChunkReceipt, PlanningStore, StoreError,
};
use crate::config::ResolvedConfig;
use crate::core::mutator::GraphMutator;
use crate::domain::{
    ConversationSession, SessionInfo, SessionRef, SessionSnapshot, TranscriptChunk,
};

const SESSION_FILE: &str = "session.json";
const CHUNKS_FILE: &str = "chunks.jsonl";
const CREATE_LOCK: &str = ".lock";

/// JSONL-backed planning store
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    mutator: GraphMutator,
}

impl FileStore {
    /// Store rooted at `root` (the sessions directory)
    pub fn new(root: impl Into<PathBuf>, mutator: GraphMutator) -> Self {
        Self {
            root: root.into(),
            mutator,
        }
    }

    /// Store under `<home>/sessions` with the configured merge policy
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(config.sessions_dir(), GraphMutator::new(config.graph.merge_policy))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a session's chunk log
    pub fn chunks_path(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id).join(CHUNKS_FILE)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Backend(anyhow::Error::new(e).context("Storage task panicked")))?
}

/// Ids become directory names; only accept what `new_session_id` produces
fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn read_info(dir: &Path) -> Result<SessionInfo, StoreError> {
    let path = dir.join(SESSION_FILE);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read session file: {}", path.display()))?;
    let info = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse session file: {}", path.display()))?;
    Ok(info)
}

fn parse_chunks(reader: impl BufRead, path: &Path) -> Result<Vec<TranscriptChunk>, StoreError> {
    let mut chunks = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: TranscriptChunk = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse chunk in {}", path.display()))?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Read a chunk log under a shared lock
fn read_chunks(path: &Path) -> Result<Vec<TranscriptChunk>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    file.lock_shared()
        .with_context(|| format!("Failed to acquire shared lock on {}", path.display()))?;

    // Lock is released when file is dropped
    parse_chunks(BufReader::new(&file), path)
}

fn list_infos(root: &Path) -> Result<Vec<SessionInfo>, StoreError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut infos = Vec::new();
    let entries =
        fs::read_dir(root).with_context(|| format!("Failed to list sessions in {}", root.display()))?;
    for entry in entries {
        let dir = entry.context("Failed to read sessions directory entry")?.path();
        if dir.join(SESSION_FILE).is_file() {
            infos.push(read_info(&dir)?);
        }
    }
    Ok(infos)
}

fn find_session(root: &Path, session: &SessionRef) -> Result<Option<SessionInfo>, StoreError> {
    let by_id = |id: &str| -> Result<Option<SessionInfo>, StoreError> {
        let dir = root.join(id);
        if is_safe_id(id) && dir.join(SESSION_FILE).is_file() {
            Ok(Some(read_info(&dir)?))
        } else {
            Ok(None)
        }
    };
    let by_slug = |slug: &str| -> Result<Option<SessionInfo>, StoreError> {
        Ok(list_infos(root)?.into_iter().find(|info| info.slug == slug))
    };

    match session {
        SessionRef::Id(id) => by_id(id),
        SessionRef::Slug(slug) => by_slug(slug),
        SessionRef::Any(value) => match by_id(value)? {
            Some(info) => Ok(Some(info)),
            None => by_slug(value),
        },
    }
}

fn create_session(root: &Path, slug: &str, title: Option<String>) -> Result<SessionInfo, StoreError> {
    validate_slug(slug)?;

    fs::create_dir_all(root)
        .with_context(|| format!("Failed to create sessions directory: {}", root.display()))?;

    let lock_path = root.join(CREATE_LOCK);
    let lock = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to open {}", lock_path.display()))?;
    lock.lock_exclusive()
        .context("Failed to acquire session creation lock")?;

    if list_infos(root)?.iter().any(|info| info.slug == slug) {
        return Err(StoreError::SlugTaken(slug.to_string()));
    }

    let info = SessionInfo {
        id: new_session_id(),
        slug: slug.to_string(),
        title,
        created_at: Utc::now(),
    };

    let dir = root.join(&info.id);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create session directory: {}", dir.display()))?;
    let json = serde_json::to_string_pretty(&info).context("Failed to serialize session")?;
    fs::write(dir.join(SESSION_FILE), json)
        .with_context(|| format!("Failed to write session file in {}", dir.display()))?;

    Ok(info)
}

fn record_chunk(
    root: &Path,
    mutator: &GraphMutator,
    mutation: ChunkMutation,
) -> Result<ChunkReceipt, StoreError> {
    let session_id = mutation.session_id.clone();
    let dir = root.join(&session_id);
    if !is_safe_id(&session_id) || !dir.join(SESSION_FILE).is_file() {
        return Err(StoreError::SessionNotFound(SessionRef::Id(session_id)));
    }

    let path = dir.join(CHUNKS_FILE);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open chunk log: {}", path.display()))?;

    // Held until `file` drops: replay, sequencing and append are one unit.
    file.lock_exclusive()
        .with_context(|| format!("Failed to acquire lock on {}", path.display()))?;

    let existing = parse_chunks(BufReader::new(&file), &path)?;
    let graph = replay_graph(&session_id, &existing);
    let sequence = existing.last().map(|c| c.sequence).unwrap_or(0) + 1;

    let (chunk, _graph, result) = prepare_chunk(mutator, &graph, mutation, sequence, Utc::now());

    let json = serde_json::to_string(&chunk).context("Failed to serialize chunk")?;
    let mut writer = &file;
    writeln!(writer, "{}", json).context("Failed to append chunk")?;
    writer.flush().context("Failed to flush chunk log")?;
    file.sync_data().context("Failed to sync chunk log")?;

    Ok(ChunkReceipt {
        chunk_id: chunk.id,
        sequence,
        result,
    })
}

#[async_trait]
impl PlanningStore for FileStore {
    async fn create_session(&self, slug: &str, title: Option<&str>) -> Result<SessionInfo, StoreError> {
        let root = self.root.clone();
        let slug = slug.to_string();
        let title = title.map(str::to_string);

        let info = blocking(move || create_session(&root, &slug, title)).await?;
        info!(session = %info.id, slug = %info.slug, "Session created");
        Ok(info)
    }

    async fn resolve_session(&self, session: &SessionRef) -> Result<SessionSnapshot, StoreError> {
        let root = self.root.clone();
        let session = session.clone();

        blocking(move || {
            let info = find_session(&root, &session)?
                .ok_or_else(|| StoreError::SessionNotFound(session.clone()))?;
            let chunks = read_chunks(&root.join(&info.id).join(CHUNKS_FILE))?;
            let graph = replay_graph(&info.id, &chunks);

            debug!(session = %info.id, chunks = chunks.len(), items = graph.len(), "Session replayed");
            Ok(SessionSnapshot {
                items: graph.ordered_items(),
                last_sequence: chunks.last().map(|c| c.sequence).unwrap_or(0),
                info,
            })
        })
        .await
    }

    async fn record_chunk(&self, mutation: ChunkMutation) -> Result<ChunkReceipt, StoreError> {
        let root = self.root.clone();
        let mutator = self.mutator;
        blocking(move || record_chunk(&root, &mutator, mutation)).await
    }

    async fn list_chunks(&self, session_id: &str) -> Result<Vec<TranscriptChunk>, StoreError> {
        if !is_safe_id(session_id) || !self.root.join(session_id).join(SESSION_FILE).is_file() {
            return Err(StoreError::SessionNotFound(SessionRef::Id(session_id.to_string())));
        }
        let path = self.chunks_path(session_id);
        blocking(move || read_chunks(&path)).await
    }

    async fn conversation(&self, conversation_id: &str) -> Result<Option<ConversationSession>, StoreError> {
        let root = self.root.clone();
        let conversation_id = conversation_id.to_string();

        blocking(move || {
            let mut chunks = Vec::new();
            for info in list_infos(&root)? {
                chunks.extend(read_chunks(&root.join(&info.id).join(CHUNKS_FILE))?);
            }
            Ok(conversation_from_chunks(&conversation_id, &chunks))
        })
        .await
    }
}
