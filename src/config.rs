//! Configuration for huddle.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (HUDDLE_HOME, HUDDLE_*_MODEL, OPENAI_BASE_URL)
//! 2. Config file (.huddle/config.yaml)
//! 3. Defaults (~/.huddle, OpenAI-compatible model ids)
//!
//! Config file discovery:
//! - Searches current directory and parents for .huddle/config.yaml
//! - `home` in the config file is relative to the .huddle/ directory
//!
//! The API key is only ever read from `OPENAI_API_KEY`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const DEFAULT_PRIMARY_MODEL: &str = "gpt-4o-mini-transcribe";
pub const DEFAULT_FALLBACK_MODEL: &str = "whisper-1";
pub const DEFAULT_INTERPRET_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub version: Option<String>,
    pub home: Option<String>,
    #[serde(default)]
    pub transcription: Option<TranscriptionFileConfig>,
    #[serde(default)]
    pub interpretation: Option<InterpretationFileConfig>,
    #[serde(default)]
    pub openai: Option<OpenAiFileConfig>,
    #[serde(default)]
    pub limits: Option<LimitsFileConfig>,
    #[serde(default)]
    pub graph: Option<GraphFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionFileConfig {
    pub primary_model: Option<String>,
    pub fallback_model: Option<String>,
    pub min_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterpretationFileConfig {
    pub model: Option<String>,
    pub max_known_items: Option<usize>,
    pub max_item_text_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiFileConfig {
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsFileConfig {
    pub max_audio_bytes: Option<u64>,
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphFileConfig {
    pub merge_policy: Option<MergePolicy>,
    pub dependency_policy: Option<DependencyPolicy>,
}

/// What a `createItem` does when its key already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Overwrite type and text; dependencies and research flag only when present
    #[default]
    MergePresent,
    /// Replace every content field of the existing item
    ReplaceAll,
}

/// How strictly the task-only dependency rule is applied after interpretation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    /// Log violations, keep the edges
    #[default]
    Advisory,
    /// Strip edges that are not task-to-task
    Enforce,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionSettings {
    pub primary_model: String,
    pub fallback_model: String,
    /// Clips shorter than this are skipped
    pub min_duration_ms: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            primary_model: DEFAULT_PRIMARY_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            min_duration_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpretationSettings {
    pub model: String,
    pub max_known_items: usize,
    pub max_item_text_chars: usize,
}

impl Default for InterpretationSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_INTERPRET_MODEL.to_string(),
            max_known_items: 200,
            max_item_text_chars: 160,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitSettings {
    pub max_audio_bytes: u64,
    pub request_timeout_seconds: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_audio_bytes: 25 * 1024 * 1024, // 25MB
            request_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphSettings {
    pub merge_policy: MergePolicy,
    pub dependency_policy: DependencyPolicy,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to huddle home (file store root)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub openai_base_url: String,
    pub transcription: TranscriptionSettings,
    pub interpretation: InterpretationSettings,
    pub limits: LimitSettings,
    pub graph: GraphSettings,
}

impl ResolvedConfig {
    /// Defaults rooted at `home`, ignoring files and environment
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            home,
            config_file: None,
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            transcription: TranscriptionSettings::default(),
            interpretation: InterpretationSettings::default(),
            limits: LimitSettings::default(),
            graph: GraphSettings::default(),
        }
    }

    /// Directory holding per-session stores
    pub fn sessions_dir(&self) -> PathBuf {
        self.home.join("sessions")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".huddle").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn parse_config(content: &str) -> Result<ConfigFile> {
    Ok(serde_yaml::from_str(content)?)
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file over the defaults
fn apply_file(config: &mut ResolvedConfig, file: ConfigFile, huddle_dir: &Path) {
    if let Some(ref home) = file.home {
        config.home = resolve_path(huddle_dir, home);
    }

    if let Some(t) = file.transcription {
        if let Some(model) = t.primary_model {
            config.transcription.primary_model = model;
        }
        if let Some(model) = t.fallback_model {
            config.transcription.fallback_model = model;
        }
        if let Some(ms) = t.min_duration_ms {
            config.transcription.min_duration_ms = ms;
        }
    }

    if let Some(i) = file.interpretation {
        if let Some(model) = i.model {
            config.interpretation.model = model;
        }
        if let Some(n) = i.max_known_items {
            config.interpretation.max_known_items = n;
        }
        if let Some(n) = i.max_item_text_chars {
            config.interpretation.max_item_text_chars = n;
        }
    }

    if let Some(url) = file.openai.and_then(|o| o.base_url) {
        config.openai_base_url = url;
    }

    if let Some(l) = file.limits {
        if let Some(bytes) = l.max_audio_bytes {
            config.limits.max_audio_bytes = bytes;
        }
        if let Some(secs) = l.request_timeout_seconds {
            config.limits.request_timeout_seconds = secs;
        }
    }

    if let Some(g) = file.graph {
        if let Some(policy) = g.merge_policy {
            config.graph.merge_policy = policy;
        }
        if let Some(policy) = g.dependency_policy {
            config.graph.dependency_policy = policy;
        }
    }
}

/// Apply environment overrides
fn apply_env(config: &mut ResolvedConfig) {
    if let Ok(home) = std::env::var("HUDDLE_HOME") {
        config.home = PathBuf::from(home);
    }
    if let Ok(model) = std::env::var("HUDDLE_TRANSCRIBE_MODEL") {
        config.transcription.primary_model = model;
    }
    if let Ok(model) = std::env::var("HUDDLE_TRANSCRIBE_FALLBACK_MODEL") {
        config.transcription.fallback_model = model;
    }
    if let Ok(model) = std::env::var("HUDDLE_INTERPRET_MODEL") {
        config.interpretation.model = model;
    }
    if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
        config.openai_base_url = url;
    }
}

/// Load configuration from all sources
pub fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".huddle");

    let mut config = ResolvedConfig::with_home(default_home);

    if let Some(config_path) = find_config_file() {
        let file = load_config_file(&config_path)?;
        let huddle_dir = config_path.parent().unwrap_or(Path::new("."));
        apply_file(&mut config, file, huddle_dir);
        config.config_file = Some(config_path);
    }

    apply_env(&mut config);

    Ok(config)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// API key for the OpenAI-compatible endpoints
pub fn openai_api_key() -> Result<String> {
    let key = std::env::var("OPENAI_API_KEY")
        .context("OPENAI_API_KEY environment variable required")?;
    let key = key.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("OPENAI_API_KEY is empty");
    }
    Ok(key)
}
