//! Embedding generation via Ollama.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingsConfig;
use crate::error::EmbedError;

/// Turn text into an embedding vector.
///
/// Implementations classify failures as transient or permanent via
/// [`EmbedError::is_transient`]; callers decide chunk-level policy, the
/// embedder itself retries transient failures with backoff.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Embed several texts, returning one result per input in input order.
    ///
    /// The default issues the per-text requests concurrently; backends with
    /// a native batch endpoint can override this with a single call.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbedError>> {
        futures::future::join_all(texts.iter().map(|text| self.embed(text))).await
    }

    /// Expected vector dimension, if the implementation knows it up front
    fn dimension(&self) -> Option<usize> {
        None
    }
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct OllamaBatchRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OllamaBatchResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by an Ollama server
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    max_attempts: u32,
    retry_base_delay: Duration,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingsConfig) -> Result<Self, EmbedError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EmbedError::InvalidInput {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_attempts: config.max_attempts.max(1),
            retry_base_delay: config.retry_base_delay(),
        })
    }

    /// One embedding request, no retries
    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/api/embeddings", self.base_url);

        let request = OllamaEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbedError::Timeout
                } else {
                    EmbedError::Connection {
                        url: url.clone(),
                        source: e,
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(EmbedError::RateLimited);
            }

            if message.contains("model")
                && (message.contains("not found") || message.contains("does not exist"))
            {
                return Err(EmbedError::ModelNotFound {
                    model: self.model.clone(),
                });
            }

            return Err(EmbedError::Generation {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                EmbedError::Timeout
            } else {
                EmbedError::Connection {
                    url: url.clone(),
                    source: e,
                }
            }
        })?;

        let embedding_response: OllamaEmbeddingResponse =
            serde_json::from_str(&body).map_err(|e| EmbedError::InvalidResponse { source: e })?;

        if embedding_response.embedding.is_empty() {
            return Err(EmbedError::InvalidInput {
                message: "Embedding backend returned an empty vector".to_string(),
            });
        }

        Ok(embedding_response.embedding)
    }

    /// One batched embedding request via the `/api/embed` endpoint
    async fn embed_batch_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let url = format!("{}/api/embed", self.base_url);

        let request = OllamaBatchRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbedError::Timeout
                } else {
                    EmbedError::Connection {
                        url: url.clone(),
                        source: e,
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(EmbedError::RateLimited);
            }

            return Err(EmbedError::Generation {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                EmbedError::Timeout
            } else {
                EmbedError::Connection {
                    url: url.clone(),
                    source: e,
                }
            }
        })?;

        let batch_response: OllamaBatchResponse =
            serde_json::from_str(&body).map_err(|e| EmbedError::InvalidResponse { source: e })?;

        if batch_response.embeddings.len() != texts.len() {
            return Err(EmbedError::InvalidInput {
                message: format!(
                    "Embedding backend returned {} vectors for {} inputs",
                    batch_response.embeddings.len(),
                    texts.len()
                ),
            });
        }

        Ok(batch_response.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    /// Embed with exponential backoff on transient failures.
    /// Permanent failures return immediately.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut attempt = 1u32;
        loop {
            match self.embed_once(text).await {
                Ok(embedding) => {
                    debug!(dimension = embedding.len(), attempt, "Generated embedding");
                    return Ok(embedding);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient embedding failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Batched embedding through `/api/embed` with the same backoff.
    /// Servers without the batch endpoint fall back to per-text requests,
    /// which also recovers per-text error attribution.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbedError>> {
        if texts.len() > 1 {
            let mut attempt = 1u32;
            loop {
                match self.embed_batch_once(texts).await {
                    Ok(vectors) => return vectors.into_iter().map(Ok).collect(),
                    Err(e) if e.is_transient() && attempt < self.max_attempts => {
                        let delay = self.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                        warn!(
                            attempt,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient batch embedding failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        debug!(error = %e, "Batch embedding unavailable, using per-text requests");
                        break;
                    }
                }
            }
        }

        futures::future::join_all(texts.iter().map(|text| self.embed(text))).await
    }
}
