//! Embedding providers.
//!
//! Concrete implementations of the core [`Embedder`] trait:
//! - **[`OpenAiEmbedder`]** calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]** calls a local Ollama instance's `/api/embed`.
//! - **`FastembedEmbedder`** runs a model in-process via fastembed
//!   (cargo feature `local-embeddings-fastembed`).
//!
//! Use [`create_embedder`] to build the provider named by the
//! configuration; `"disabled"` yields no embedder at all.
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use kontext_core::embedding::Embedder;
use kontext_core::models::{Chunk, Language};

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Upper bound on characters sent per chunk.
const MAX_EMBED_CHARS: usize = 8_000;

/// Build the embedder named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | none |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `FastembedEmbedder` (feature `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAiEmbedder::new(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaEmbedder::new(config)?))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Some(Arc::new(FastembedEmbedder::new(config)?))),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Text sent to the embedder for one chunk: a short header naming the
/// file and declaration, then the code.
pub fn prepare_chunk_text(file_path: &str, language: Language, chunk: &Chunk) -> String {
    let mut header = format!("// {file_path} ({language})\n// {}", chunk.kind);
    match (&chunk.parent, &chunk.name) {
        (Some(parent), Some(name)) => header.push_str(&format!(" {parent}.{name}")),
        (None, Some(name)) => header.push_str(&format!(" {name}")),
        _ => {}
    }
    header.push('\n');

    let budget = MAX_EMBED_CHARS.saturating_sub(header.len());
    match chunk.text.char_indices().nth(budget) {
        Some((cut, _)) => format!("{header}{}", &chunk.text[..cut]),
        None => format!("{header}{}", chunk.text),
    }
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Send the request built by `request` until it succeeds, fails with a
/// non-retryable status, or `max_retries` retries are used up.
async fn send_with_retry<F>(label: &str, max_retries: u32, request: F) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} request failed: {}", label, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", label)))
}

fn check_dimensions(name: &str, dims: usize, vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "{} returned {} embeddings for {} inputs",
            name,
            vectors.len(),
            expected
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "{} returned a {}-dimensional vector, expected {}",
            name,
            bad.len(),
            dims
        );
    }
    Ok(())
}

// ============ OpenAI ============

/// Embedder backed by `POST /v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
    name: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: http_client(config)?,
            api_key,
            name: format!("openai:{model}"),
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = send_with_retry("OpenAI", self.max_retries, || {
            self.client
                .post(OPENAI_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let vectors = parse_openai_response(&json)?;
        check_dimensions(&self.name, self.dims, &vectors, texts.len())?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_f32_vec(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Ollama ============

/// Embedder backed by a running Ollama instance (`/api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
    name: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        Ok(Self {
            client: http_client(config)?,
            url: url.trim_end_matches('/').to_string(),
            name: format!("ollama:{model}"),
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url);
        let json = send_with_retry("Ollama", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await
        .map_err(|e| anyhow!("{e} (is Ollama running at {}?)", self.url))?;

        let vectors = parse_ollama_response(&json)?;
        check_dimensions(&self.name, self.dims, &vectors, texts.len())?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32_vec(values))
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::FastembedEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, bail, Result};
    use async_trait::async_trait;

    use kontext_core::embedding::Embedder;

    use crate::config::EmbeddingConfig;

    const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

    /// In-process embedder. The model is downloaded from Hugging Face and
    /// loaded on first use, then reused for every batch.
    pub struct FastembedEmbedder {
        model_id: fastembed::EmbeddingModel,
        model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
        dims: usize,
        batch_size: usize,
        name: String,
    }

    impl FastembedEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string());
            let dims = config.dims.unwrap_or_else(|| default_dims(&model_name));
            Ok(Self {
                model_id: to_fastembed_model(&model_name)?,
                model: Arc::new(Mutex::new(None)),
                dims,
                batch_size: config.batch_size,
                name: format!("local:{model_name}"),
            })
        }
    }

    fn default_dims(model: &str) -> usize {
        match model {
            "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5"
            | "multilingual-e5-base" => 768,
            "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
            _ => 384,
        }
    }

    fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
            "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
            other => bail!("Unknown local embedding model: '{}'", other),
        }
    }

    #[async_trait]
    impl Embedder for FastembedEmbedder {
        fn name(&self) -> &str {
            &self.name
        }

        fn dimensions(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let model = Arc::clone(&self.model);
            let model_id = self.model_id.clone();
            let batch_size = self.batch_size;
            let texts = texts.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut guard = model
                    .lock()
                    .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
                if guard.is_none() {
                    let loaded = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model_id).with_show_download_progress(true),
                    )
                    .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                    *guard = Some(loaded);
                }
                let Some(model) = guard.as_mut() else {
                    bail!("local embedding model unavailable");
                };
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("Local embedding failed: {}", e))
            })
            .await?
        }
    }
}
