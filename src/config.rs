//! TOML configuration parsing and validation.
//!
//! All settings live in a single file (default `./config/rag.toml`). Every
//! section except `[db]` is optional and falls back to the defaults below.
//!
//! ```toml
//! [db]
//! path = "./data/rag.sqlite"
//!
//! [corpus]
//! root = "."
//! code_globs = ["**/*.rs", "**/*.py"]
//! docs_globs = ["**/*.md"]
//! ignore_globs = ["**/vendor/**"]
//! max_file_bytes = 1048576
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! batch_size = 32
//!
//! [embedding.retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//! multiplier = 2.0
//!
//! [retrieval]
//! candidate_pool = 50
//! top_k = 5
//! threshold = 0.70
//!
//! [server]
//! bind = "127.0.0.1:8801"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::embedding::local::resolve_local_model;
use crate::embedding::retry::BackoffPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_code_globs")]
    pub code_globs: Vec<String>,
    #[serde(default = "default_docs_globs")]
    pub docs_globs: Vec<String>,
    #[serde(default)]
    pub ignore_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            code_globs: default_code_globs(),
            docs_globs: default_docs_globs(),
            ignore_globs: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
            follow_symlinks: false,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_code_globs() -> Vec<String> {
    [
        "**/*.rs", "**/*.py", "**/*.go", "**/*.js", "**/*.ts", "**/*.tsx", "**/*.java",
        "**/*.c", "**/*.h", "**/*.cpp", "**/*.sh", "**/*.sql", "**/*.toml", "**/*.yaml",
        "**/*.yml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_docs_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.rst".to_string(),
        "**/*.txt".to_string(),
    ]
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Prefix prepended to query texts (e.g. `"query: "` for E5 models).
    #[serde(default)]
    pub query_prefix: Option<String>,
    /// Prefix prepended to document texts (e.g. `"passage: "` for E5 models).
    #[serde(default)]
    pub passage_prefix: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            query_prefix: None,
            passage_prefix: None,
            retry: RetryConfig::default(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl RetryConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_pool: default_candidate_pool(),
            top_k: default_top_k(),
            threshold: default_threshold(),
        }
    }
}

fn default_candidate_pool() -> usize {
    50
}
fn default_top_k() -> usize {
    5
}
fn default_threshold() -> f64 {
    0.70
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8801".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Number of prior user turns folded into a session-aware query.
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_turns: default_context_turns(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_context_turns() -> usize {
    3
}
fn default_history_limit() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Build a config around a database path with every other section defaulted.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            corpus: CorpusConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Relative corpus roots resolve against the config file's directory
    if config.corpus.root.is_relative() {
        if let Some(parent) = path.parent() {
            config.corpus.root = parent.join(&config.corpus.root);
        }
    }

    validate(&mut config)?;
    Ok(config)
}

/// Check value ranges and fill in model-derived embedding defaults.
pub fn validate(config: &mut Config) -> Result<()> {
    if config.corpus.max_file_bytes == 0 {
        bail!("corpus.max_file_bytes must be > 0");
    }
    if config.corpus.code_globs.is_empty() && config.corpus.docs_globs.is_empty() {
        bail!("corpus needs at least one of code_globs or docs_globs");
    }

    if config.retrieval.candidate_pool < 1 {
        bail!("retrieval.candidate_pool must be >= 1");
    }
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.threshold) {
        bail!("retrieval.threshold must be in [0.0, 1.0]");
    }

    let emb = &mut config.embedding;
    if emb.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if emb.retry.max_attempts == 0 {
        bail!("embedding.retry.max_attempts must be >= 1");
    }
    if emb.retry.multiplier < 1.0 {
        bail!("embedding.retry.multiplier must be >= 1.0");
    }

    match emb.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if emb.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    emb.provider
                );
            }
            if emb.dims.unwrap_or(0) == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    emb.provider
                );
            }
        }
        "hash" => {
            if emb.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is 'hash'");
            }
            emb.dims.get_or_insert(256);
        }
        "local" => {
            let spec = resolve_local_model(emb.model.as_deref())?;
            emb.model.get_or_insert_with(|| spec.name.to_string());
            emb.dims.get_or_insert(spec.dims);
            if emb.query_prefix.is_none() {
                emb.query_prefix = spec.query_prefix.map(str::to_string);
            }
            if emb.passage_prefix.is_none() {
                emb.passage_prefix = spec.passage_prefix.map(str::to_string);
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, local, or hash.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let mut config: Config = toml::from_str(toml_src)?;
        validate(&mut config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse("[db]\npath = \"/tmp/rag.sqlite\"\n").unwrap();
        assert_eq!(cfg.retrieval.candidate_pool, 50);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert!((cfg.retrieval.threshold - 0.70).abs() < 1e-9);
        assert_eq!(cfg.embedding.retry.max_attempts, 3);
        assert_eq!(cfg.embedding.retry.base_delay_ms, 1000);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.server.bind, "127.0.0.1:8801");
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let err = parse("[db]\npath = \"x\"\n[retrieval]\nthreshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn openai_requires_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));

        let err = parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn hash_provider_defaults_dims() {
        let cfg = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\n").unwrap();
        assert_eq!(cfg.embedding.dims, Some(256));
    }

    #[test]
    fn local_e5_model_gets_prefixes() {
        let cfg = parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"local\"\nmodel = \"multilingual-e5-small\"\n",
        )
        .unwrap();
        assert_eq!(cfg.embedding.dims, Some(384));
        assert_eq!(cfg.embedding.query_prefix.as_deref(), Some("query: "));
        assert_eq!(cfg.embedding.passage_prefix.as_deref(), Some("passage: "));
    }

    #[test]
    fn explicit_prefix_overrides_model_table() {
        let cfg = parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"local\"\nmodel = \"multilingual-e5-base\"\nquery_prefix = \"q: \"\n",
        )
        .unwrap();
        assert_eq!(cfg.embedding.query_prefix.as_deref(), Some("q: "));
        assert_eq!(cfg.embedding.passage_prefix.as_deref(), Some("passage: "));
    }

    #[test]
    fn retry_policy_from_config() {
        let cfg = parse(
            "[db]\npath = \"x\"\n[embedding.retry]\nmax_attempts = 5\nbase_delay_ms = 250\nmultiplier = 1.0\n",
        )
        .unwrap();
        let policy = cfg.embedding.retry.policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
    }
}
