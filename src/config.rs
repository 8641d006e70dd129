use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_overlap() -> usize {
    50
}

/// Embedding settings.
///
/// `provider` selects the strategy once at startup:
/// - `"auto"`: live API when the credential in `api_key_env` is set and
///   non-empty, deterministic vectors otherwise.
/// - `"openai"`: live API; startup fails without a credential.
/// - `"mock"`: deterministic vectors only, no network.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            max_input_chars: default_max_input_chars(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "auto".to_string()
}
fn default_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_max_input_chars() -> usize {
    8000
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Number of chunks buffered per write transaction.
    #[serde(default = "default_commit_every")]
    pub commit_every: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            commit_every: default_commit_every(),
        }
    }
}

fn default_commit_every() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:8000".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: default_token_secret(),
            token_ttl_minutes: default_token_ttl_minutes(),
        }
    }
}

fn default_token_secret() -> String {
    std::env::var("DOCVAULT_TOKEN_SECRET").unwrap_or_default()
}
fn default_token_ttl_minutes() -> i64 {
    30
}

impl EmbeddingConfig {
    /// Reads the API credential named by `api_key_env`, treating an empty
    /// value as absent.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

impl Config {
    /// Config rooted at a directory, with every other setting at its default.
    /// Used by tests and by `docvault init` when no file exists yet.
    pub fn default_for(root: &Path) -> Self {
        let mut embedding = EmbeddingConfig::default();
        embedding.provider = "mock".to_string();
        Self {
            db: DbConfig {
                path: root.join("data").join("docvault.sqlite"),
            },
            storage: StorageConfig {
                upload_dir: root.join("uploads"),
            },
            chunking: ChunkingConfig::default(),
            embedding,
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig {
                token_secret: "test-secret".to_string(),
                token_ttl_minutes: default_token_ttl_minutes(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            anyhow::bail!("chunking.max_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.max_tokens {
            anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
        }
        if self.embedding.dims == 0 {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if self.embedding.max_input_chars == 0 {
            anyhow::bail!("embedding.max_input_chars must be > 0");
        }
        if self.ingest.commit_every == 0 {
            anyhow::bail!("ingest.commit_every must be > 0");
        }
        if self.auth.token_secret.is_empty() {
            anyhow::bail!(
                "auth.token_secret must be set (or provide DOCVAULT_TOKEN_SECRET in the environment)"
            );
        }
        if self.auth.token_ttl_minutes <= 0 {
            anyhow::bail!("auth.token_ttl_minutes must be > 0");
        }

        match self.embedding.provider.as_str() {
            "auto" | "openai" | "mock" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be auto, openai, or mock.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
