//! Service configuration.
//!
//! Loaded once at startup from an optional `config.*` file with
//! `ARCHIVIST__`-prefixed environment variable overrides.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_embeddings")]
    pub embeddings: EmbeddingsConfig,

    #[serde(default = "default_pipeline")]
    pub pipeline: PipelineConfig,

    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Embedding backend configuration (Ollama)
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_embedding_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempt budget for transient failures (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff between retries
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl EmbeddingsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// What to do when a single chunk fails embedding with a permanent error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedFailurePolicy {
    /// Fail the embed stage on the first permanent chunk error
    FailClosed,
    /// Record the chunk as failed and keep embedding its siblings
    AllowPartial,
}

/// Processing pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,

    /// Concurrent embedding requests per document
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,

    #[serde(default = "default_embed_failure_policy")]
    pub embed_failure_policy: EmbedFailurePolicy,
}

/// Upload limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_document_size")]
    pub max_document_size_bytes: u64,

    /// Accepted upload extensions, with leading dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl AppConfig {
    /// Load configuration from file and env vars
    pub fn load() -> ServiceResult<Self> {
        let config: AppConfig = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("ARCHIVIST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to build config: {}", e),
            })?
            .try_deserialize()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to deserialize config: {}", e),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot honor
    pub fn validate(&self) -> ServiceResult<()> {
        if self.pipeline.max_chunk_chars == 0 {
            return Err(ServiceError::Config {
                message: "pipeline.max_chunk_chars must be greater than zero".to_string(),
            });
        }
        if self.pipeline.overlap_chars >= self.pipeline.max_chunk_chars {
            return Err(ServiceError::Config {
                message: format!(
                    "pipeline.overlap_chars ({}) must be smaller than pipeline.max_chunk_chars ({})",
                    self.pipeline.overlap_chars, self.pipeline.max_chunk_chars
                ),
            });
        }
        if self.pipeline.embed_concurrency == 0 {
            return Err(ServiceError::Config {
                message: "pipeline.embed_concurrency must be greater than zero".to_string(),
            });
        }
        if self.embeddings.max_attempts == 0 {
            return Err(ServiceError::Config {
                message: "embeddings.max_attempts must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_embeddings() -> EmbeddingsConfig {
    EmbeddingsConfig {
        base_url: default_embedding_url(),
        model: default_embedding_model(),
        request_timeout_secs: default_request_timeout_secs(),
        max_attempts: default_max_attempts(),
        retry_base_delay_ms: default_retry_base_delay_ms(),
    }
}

fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    4
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_pipeline() -> PipelineConfig {
    PipelineConfig {
        max_chunk_chars: default_max_chunk_chars(),
        overlap_chars: default_overlap_chars(),
        embed_concurrency: default_embed_concurrency(),
        embed_failure_policy: default_embed_failure_policy(),
    }
}

fn default_max_chunk_chars() -> usize {
    2048
}

fn default_overlap_chars() -> usize {
    256
}

fn default_embed_concurrency() -> usize {
    4
}

fn default_embed_failure_policy() -> EmbedFailurePolicy {
    EmbedFailurePolicy::FailClosed
}

fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_document_size_bytes: default_max_document_size(),
        allowed_extensions: default_allowed_extensions(),
    }
}

fn default_max_document_size() -> u64 {
    52_428_800 // 50MB
}

// Word documents are accepted at upload but fail at the extract stage
// until a converter backend lands
fn default_allowed_extensions() -> Vec<String> {
    [".pdf", ".doc", ".docx", ".txt", ".md"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}
