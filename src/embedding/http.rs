//! A reference `EmbeddingProvider` adapter over an OpenAI-compatible HTTP
//! embeddings endpoint.
//!
//! This is provided so the crate compiles and is testable end-to-end against
//! a real HTTP collaborator; hosts are free to supply their own
//! `EmbeddingProvider` implementation instead (the engine only depends on
//! the trait). Grounded on the request/response shapes and query-mode
//! instruction-prefix trick of the source package's OpenRouter client, with
//! the internal sliding-window rate limiter removed — pacing is the
//! engine's job here (see [`super::pacing`]), not the provider's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{EmbeddingError, EmbeddingMode, EmbeddingProvider};

/// Configuration for [`HttpEmbeddingProvider`].
#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
  pub endpoint: String,
  pub api_key: String,
  pub model: String,
  pub dimensions: usize,
  /// When set, query-mode text is formatted as
  /// `Instruct: {instruction}\nQuery:{text}` before embedding.
  pub query_instruction: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpEmbeddingProvider {
  client: reqwest::Client,
  config: HttpEmbeddingConfig,
}

impl HttpEmbeddingProvider {
  pub fn new(config: HttpEmbeddingConfig) -> Result<Self, EmbeddingError> {
    if config.api_key.is_empty() {
      return Err(EmbeddingError::NoApiKey);
    }
    Ok(Self { client: reqwest::Client::new(), config })
  }

  fn format_for_embedding(&self, text: &str, mode: EmbeddingMode) -> String {
    match mode {
      EmbeddingMode::Query => {
        if let Some(instruction) = self.config.query_instruction.as_deref().filter(|s| !s.is_empty()) {
          return format!("Instruct: {instruction}\nQuery:{text}");
        }
        text.to_string()
      }
      EmbeddingMode::Document => text.to_string(),
    }
  }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
  model: &'a str,
  input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
  data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
  index: usize,
  embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
  fn name(&self) -> &str {
    "http"
  }

  fn model_id(&self) -> &str {
    &self.config.model
  }

  fn dimensions(&self) -> usize {
    self.config.dimensions
  }

  async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }

    let input: Vec<String> = texts.iter().map(|t| self.format_for_embedding(t, mode)).collect();
    let request = EmbeddingRequest { model: &self.config.model, input };

    let response = self
      .client
      .post(&self.config.endpoint)
      .bearer_auth(&self.config.api_key)
      .json(&request)
      .send()
      .await
      .map_err(|e| if e.is_timeout() { EmbeddingError::Timeout } else { EmbeddingError::from(e) })?;

    if response.status().is_server_error() {
      return Err(EmbeddingError::Network(format!("server error: {}", response.status())));
    }
    if !response.status().is_success() {
      return Err(EmbeddingError::ProviderError(format!("status {}", response.status())));
    }

    let mut parsed: EmbeddingResponse = response.json().await?;
    parsed.data.sort_by_key(|d| d.index);

    if parsed.data.len() != texts.len() {
      return Err(EmbeddingError::ProviderError(format!(
        "expected {} embeddings, got {}",
        texts.len(),
        parsed.data.len()
      )));
    }

    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
  }
}
