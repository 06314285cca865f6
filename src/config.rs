//! Configuration parsing and validation.
//!
//! Kontext keeps its state under `<root>/.ctx/`: the SQLite index
//! (`index.db`) and an optional `config.toml`. A missing config file means
//! every setting takes its default.
//!
//! # Example
//!
//! ```toml
//! [chunking]
//! max_tokens = 512
//! min_tokens = 16
//!
//! [embedding]
//! provider = "ollama"          # disabled | openai | ollama | local
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [indexing]
//! workers = 8
//! exclude_globs = ["**/generated/**"]
//!
//! [retrieval]
//! default_limit = 10
//! candidate_k = 50
//!
//! [watch]
//! debounce_ms = 500
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory holding the index and configuration, relative to the root.
pub const CTX_DIR: &str = ".ctx";
pub const DB_FILE: &str = "index.db";
pub const CONFIG_FILE: &str = "config.toml";

pub fn ctx_dir(root: &Path) -> PathBuf {
    root.join(CTX_DIR)
}

pub fn db_path(root: &Path) -> PathBuf {
    ctx_dir(root).join(DB_FILE)
}

pub fn config_path(root: &Path) -> PathBuf {
    ctx_dir(root).join(CONFIG_FILE)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("unknown config key: {0}")]
    UnknownKey(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            min_tokens: default_min_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_min_tokens() -> usize {
    16
}

impl ChunkingConfig {
    pub fn chunker(&self) -> kontext_core::chunk::ChunkerConfig {
        kontext_core::chunk::ChunkerConfig {
            max_tokens: self.max_tokens,
            min_tokens: self.min_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Embedding requests allowed in flight at once.
    #[serde(default = "default_embed_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
            concurrency: default_embed_concurrency(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_embed_concurrency() -> usize {
    4
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Parse workers; defaults to the number of CPUs.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Files larger than this many bytes are skipped.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// When non-empty, only matching paths are indexed.
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Skip hashing files git reports clean since the last full pass.
    #[serde(default = "default_use_git")]
    pub use_git: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_file_size: default_max_file_size(),
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            use_git: default_use_git(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_use_git() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Candidates fetched per strategy before fusion.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            candidate_k: default_candidate_k(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_candidate_k() -> usize {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}

/// Load `<root>/.ctx/config.toml`, falling back to defaults when absent.
pub fn load_config(root: &Path) -> Result<Config, ConfigError> {
    let path = config_path(root);
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let config: Config =
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints the type system does not capture.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::Invalid(msg));

    if config.chunking.max_tokens == 0 {
        return invalid("chunking.max_tokens must be > 0".into());
    }
    if config.chunking.min_tokens > config.chunking.max_tokens {
        return invalid("chunking.min_tokens must be <= chunking.max_tokens".into());
    }
    if config.indexing.workers == 0 {
        return invalid("indexing.workers must be >= 1".into());
    }
    if config.retrieval.default_limit == 0 {
        return invalid("retrieval.default_limit must be >= 1".into());
    }
    if config.embedding.batch_size == 0 || config.embedding.concurrency == 0 {
        return invalid("embedding.batch_size and embedding.concurrency must be >= 1".into());
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                return invalid(format!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                ));
            }
            if matches!(config.embedding.dims, None | Some(0)) {
                return invalid(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                ));
            }
        }
        other => {
            return invalid(format!(
                "unknown embedding provider: '{other}'. Must be disabled, openai, ollama, or local."
            ))
        }
    }
    if config.embedding.dims == Some(0) {
        return invalid("embedding.dims must be > 0".into());
    }
    Ok(())
}

/// Render the effective configuration as TOML.
pub fn show(config: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

/// Set a dotted key (e.g. `embedding.provider`) in `<root>/.ctx/config.toml`.
///
/// The value is parsed as a TOML literal when possible (`512`, `true`,
/// `["a", "b"]`) and as a bare string otherwise. The resulting file must
/// still validate; on failure nothing is written.
pub fn set_value(root: &Path, key: &str, value: &str) -> Result<Config, ConfigError> {
    let (section, field) = key
        .split_once('.')
        .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

    let known = toml::Table::try_from(Config::default())?;
    let section_known = known
        .get(section)
        .and_then(|s| s.as_table())
        .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
    let optional_fields = ["model", "dims", "url"];
    if !section_known.contains_key(field)
        && !(section == "embedding" && optional_fields.contains(&field))
    {
        return Err(ConfigError::UnknownKey(key.to_string()));
    }

    let path = config_path(root);
    let mut table: toml::Table = if path.exists() {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?
    } else {
        toml::Table::new()
    };

    let parsed = parse_value(value);
    let section_table = table
        .entry(section.to_string())
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    match section_table.as_table_mut() {
        Some(t) => {
            t.insert(field.to_string(), parsed);
        }
        None => return Err(ConfigError::Invalid(format!("{section} is not a table"))),
    }

    let config: Config = table
        .clone()
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Invalid(e.to_string()))?;
    validate(&config)?;

    let dir = ctx_dir(root);
    std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Write {
        path: dir.clone(),
        source,
    })?;
    let rendered = toml::to_string_pretty(&table)?;
    std::fs::write(&path, rendered).map_err(|source| ConfigError::Write { path, source })?;
    Ok(config)
}

fn parse_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.chunking.max_tokens, 512);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(ctx_dir(dir.path())).unwrap();
        std::fs::write(
            config_path(dir.path()),
            "[retrieval]\ndefault_limit = 3\n\n[indexing]\nexclude_globs = [\"vendor/**\"]\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.retrieval.default_limit, 3);
        assert_eq!(config.retrieval.candidate_k, 50);
        assert_eq!(config.indexing.exclude_globs, vec!["vendor/**"]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.chunking.min_tokens = 1000;
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.embedding.provider = "openai".into();
        assert!(validate(&config).is_err());
        config.embedding.model = Some("text-embedding-3-small".into());
        config.embedding.dims = Some(1536);
        assert!(validate(&config).is_ok());

        let mut config = Config::default();
        config.embedding.provider = "magic".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_set_value_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        set_value(dir.path(), "retrieval.default_limit", "25").unwrap();
        set_value(dir.path(), "indexing.use_git", "false").unwrap();
        set_value(dir.path(), "embedding.url", "http://gpu-box:11434").unwrap();

        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.retrieval.default_limit, 25);
        assert!(!config.indexing.use_git);
        assert_eq!(config.embedding.url.as_deref(), Some("http://gpu-box:11434"));
    }

    #[test]
    fn test_set_value_rejects_unknown_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            set_value(dir.path(), "retrieval.nope", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            set_value(dir.path(), "verbose", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(set_value(dir.path(), "chunking.max_tokens", "0").is_err());
        assert!(!config_path(dir.path()).exists());
    }

    #[test]
    fn test_show_renders_sections() {
        let text = show(&Config::default()).unwrap();
        assert!(text.contains("[chunking]"));
        assert!(text.contains("provider = \"disabled\""));
    }
}
