//! Command-line interface for huddle.
//!
//! Provides commands for creating sessions, ingesting audio chunks through
//! the pipeline, and inspecting a session's planning graph and transcript.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{mime_for_extension, OpenAiClient};
use crate::config::{self, ResolvedConfig};
use crate::core::{ChunkPipeline, IngestRequest, IngestResponse, ModelInterpreter};
use crate::domain::{ChunkEvent, PlanningItem, SessionRef};
use crate::store::{FileStore, PlanningStore};

/// huddle - Turn meeting speech into a shared planning graph
#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Transcribe an audio chunk and apply it to a session
    Ingest {
        /// Audio file to ingest
        audio: PathBuf,

        /// Session id or slug
        #[arg(short, long)]
        session: String,

        /// Speaker id
        #[arg(long)]
        speaker_id: String,

        /// Speaker display label
        #[arg(long)]
        speaker_label: String,

        /// Clip duration in milliseconds (clips under the minimum are skipped)
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Conversation id to continue
        #[arg(short, long)]
        conversation: Option<String>,

        /// Request id for tracing (generated if absent)
        #[arg(long)]
        request_id: Option<String>,

        /// Mime type (derived from the file extension if absent)
        #[arg(long)]
        mime: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a session's planning items
    Items {
        /// Session id or slug
        session: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a session's transcript chunks
    Chunks {
        /// Session id or slug
        session: String,

        /// Maximum number of chunks to show (most recent)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Create a new session
    New {
        /// URL-friendly slug (lowercase letters, digits, '-')
        slug: String,

        /// Human-readable title
        #[arg(short, long)]
        title: Option<String>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::config()?;

        match self.command {
            Commands::Session { command } => match command {
                SessionCommands::New { slug, title } => new_session(cfg, &slug, title.as_deref()).await,
            },
            Commands::Ingest {
                audio,
                session,
                speaker_id,
                speaker_label,
                duration_ms,
                conversation,
                request_id,
                mime,
                json,
            } => {
                let request = IngestRequest {
                    audio_bytes: Vec::new(),
                    mime_type: resolve_mime(&audio, mime)?,
                    session,
                    speaker_id,
                    speaker_label,
                    duration_ms,
                    conversation_id: conversation,
                    request_id,
                };
                ingest(cfg, &audio, request, json).await
            }
            Commands::Items { session, json } => show_items(cfg, &session, json).await,
            Commands::Chunks { session, limit } => show_chunks(cfg, &session, limit).await,
            Commands::Config => show_config(cfg),
        }
    }
}

/// Mime type from the flag or the file extension
fn resolve_mime(audio: &Path, mime: Option<String>) -> Result<String> {
    if let Some(mime) = mime {
        return Ok(mime);
    }

    let ext = audio
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    mime_for_extension(ext)
        .map(str::to_string)
        .with_context(|| format!("Cannot infer mime type for '{}'; pass --mime", audio.display()))
}

async fn new_session(cfg: &ResolvedConfig, slug: &str, title: Option<&str>) -> Result<()> {
    let store = FileStore::from_config(cfg);
    let info = store.create_session(slug, title).await?;

    println!("Created session {}", info.id);
    println!("  Slug:  {}", info.slug);
    if let Some(title) = &info.title {
        println!("  Title: {}", title);
    }
    Ok(())
}

async fn ingest(cfg: &ResolvedConfig, audio: &Path, mut request: IngestRequest, json: bool) -> Result<()> {
    request.audio_bytes = tokio::fs::read(audio)
        .await
        .with_context(|| format!("Failed to read audio file: {}", audio.display()))?;

    let client = Arc::new(OpenAiClient::from_config(cfg)?);
    let interpreter = Arc::new(ModelInterpreter::new(client.clone(), cfg.interpretation.clone()));
    let store = Arc::new(FileStore::from_config(cfg));
    let pipeline = ChunkPipeline::from_config(cfg, client, interpreter, store);

    match pipeline.ingest(request).await {
        Ok(Some(response)) if json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Ok(Some(response)) => print_response(&response),
        Ok(None) => {
            eprintln!("Clip shorter than {}ms, skipped", cfg.transcription.min_duration_ms);
            if json {
                println!("null");
            }
        }
        Err(e) => {
            eprintln!("{}", serde_json::to_string_pretty(&e.diagnostic)?);
            return Err(e.into());
        }
    }

    Ok(())
}

fn print_response(response: &IngestResponse) {
    let t = &response.transcript;
    println!("Chunk #{} ({})", t.sequence, t.chunk_id);
    println!(
        "  Model:        {}{}",
        t.model,
        if t.used_fallback { " (fallback)" } else { "" }
    );
    println!("  Conversation: {}", response.conversation_id);
    println!("  Request:      {}", response.request_id);
    println!();
    println!("{}", t.text);
    println!();

    if response.mutation_result.events.is_empty() {
        println!("No planning changes.");
    }
    for event in &response.mutation_result.events {
        println!("  {}", format_event(event));
    }
    for skipped in &response.mutation_result.skipped {
        println!("  skipped  {} ({})", skipped.key, skipped.reason);
    }
    for dropped in &response.dropped {
        println!("  dropped  {} {} ({})", dropped.action, dropped.key, dropped.reason);
    }
}

fn format_event(event: &ChunkEvent) -> String {
    let kind = serde_json::to_value(event.kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    format!("{:<8} {:<9} {:<28} {}", kind, event.item_type.as_str(), event.item_key, event.item_text)
}

async fn show_items(cfg: &ResolvedConfig, session: &str, json: bool) -> Result<()> {
    let store = FileStore::from_config(cfg);
    let snapshot = store.resolve_session(&SessionRef::parse(session)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.items)?);
        return Ok(());
    }

    println!(
        "{} ({}) - {} item(s), last chunk #{}",
        snapshot.info.slug,
        snapshot.info.id,
        snapshot.items.len(),
        snapshot.last_sequence
    );
    if snapshot.items.is_empty() {
        println!("No planning items yet. Use 'huddle ingest' to add some.");
        return Ok(());
    }

    println!();
    println!("{:<5} {:<9} {:<28} {}", "ORDER", "TYPE", "KEY", "TEXT");
    println!("{}", "-".repeat(80));
    for item in &snapshot.items {
        println!("{}", format_item(item));
    }
    Ok(())
}

fn format_item(item: &PlanningItem) -> String {
    let mut line = format!(
        "{:<5} {:<9} {:<28} {}",
        item.order, item.item_type.as_str(), item.item_key, item.text
    );
    if !item.blocked_by_keys.is_empty() {
        let deps: Vec<&str> = item.blocked_by_keys.iter().map(String::as_str).collect();
        line.push_str(&format!("  [blocked by: {}]", deps.join(", ")));
    }
    if item.metadata.needs_research == Some(true) {
        line.push_str("  [needs research]");
    }
    line
}

async fn show_chunks(cfg: &ResolvedConfig, session: &str, limit: Option<usize>) -> Result<()> {
    let store = FileStore::from_config(cfg);
    let snapshot = store.resolve_session(&SessionRef::parse(session)).await?;
    let chunks = store.list_chunks(&snapshot.info.id).await?;

    if chunks.is_empty() {
        println!("No chunks recorded for {}", snapshot.info.slug);
        return Ok(());
    }

    let skip = limit.map(|l| chunks.len().saturating_sub(l)).unwrap_or(0);
    for chunk in chunks.iter().skip(skip) {
        println!(
            "#{} {} {} ({}{})",
            chunk.sequence,
            chunk.created_at.format("%Y-%m-%d %H:%M:%S"),
            chunk.speaker_label,
            chunk.transcript.model,
            if chunk.transcript.used_fallback { ", fallback" } else { "" }
        );
        println!("  {}", chunk.text);
        for event in &chunk.resulting_events {
            println!("    {}", format_event(event));
        }
    }
    Ok(())
}

fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    let key_status = if config::openai_api_key().is_ok() { "set" } else { "missing" };

    println!("huddle configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Sessions: {}", cfg.sessions_dir().display());
    println!();
    println!("OpenAI:");
    println!("  Base URL: {}", cfg.openai_base_url);
    println!("  API key:  {}", key_status);
    println!();
    println!("Transcription:");
    println!("  Primary model:  {}", cfg.transcription.primary_model);
    println!("  Fallback model: {}", cfg.transcription.fallback_model);
    println!("  Min duration:   {}ms", cfg.transcription.min_duration_ms);
    println!();
    println!("Interpretation:");
    println!("  Model:           {}", cfg.interpretation.model);
    println!("  Max known items: {}", cfg.interpretation.max_known_items);
    println!("  Max item chars:  {}", cfg.interpretation.max_item_text_chars);
    println!();
    println!("Graph:");
    println!("  Merge policy:      {:?}", cfg.graph.merge_policy);
    println!("  Dependency policy: {:?}", cfg.graph.dependency_policy);
    println!();
    println!("Limits:");
    println!("  Max audio size: {} bytes", cfg.limits.max_audio_bytes);
    println!("  Timeout:        {}s", cfg.limits.request_timeout_seconds);

    Ok(())
}
