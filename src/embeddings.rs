// Embeddings Module - pluggable bi-encoder providers for semantic search.
// The provider is treated as a pure function of (model identity, input):
// the same text embeds to the same unit vector at build time and at query
// time, which is what makes dense scores comparable to the stored matrix.

use crate::errors::GovernanceError;
use crate::pure::{scoring, text};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::warn;

/// Configuration for embedding providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderType,
    pub model_name: String,
    pub dimension: usize,
    pub max_batch_size: usize,
    /// Inputs are clipped to this many characters before encoding, the
    /// documented stand-in for the model's BPE token budget.
    pub max_input_chars: usize,
    pub provider_config: ProviderConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::Deterministic,
            model_name: "hash-projection-v1".to_string(),
            dimension: 384,
            max_batch_size: 32,
            max_input_chars: 2048,
            provider_config: ProviderConfig::Deterministic { seed: 0x5eed },
        }
    }
}

/// Available embedding provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    /// Seeded token-hash projection. No model files, fully reproducible;
    /// the default for builds and the substitute used by tests.
    Deterministic,
    /// OpenAI-compatible embedding API (feature `embeddings-openai`).
    OpenAI,
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderConfig {
    Deterministic {
        seed: u64,
    },
    OpenAI {
        api_key: String,
        api_base: Option<String>, // for OpenAI-compatible APIs
    },
}

/// Result of embedding generation.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embeddings: Vec<Vec<f32>>,
    pub model_used: String,
}

/// Trait for embedding providers.
///
/// # Contract
/// - Rows are unit-norm within 1e-4
/// - Row order matches input order
/// - Deterministic for a fixed model identity
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Generate an embedding for a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no embedding returned"))
    }

    /// Dimension of vectors produced by this provider.
    fn dimension(&self) -> usize;

    /// Model identity recorded in the index header. A load-time mismatch
    /// against this value latches dense-degraded mode.
    fn model_id(&self) -> &str;

    fn max_batch_size(&self) -> usize;
}

/// Deterministic embedding provider: seeded hash projection of unigrams
/// and bigrams onto the unit sphere. Related texts share tokens and land
/// near each other; disjoint texts are near-orthogonal in expectation.
#[derive(Debug)]
pub struct DeterministicEmbeddingProvider {
    config: EmbeddingConfig,
    seed: u64,
}

impl DeterministicEmbeddingProvider {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let seed = match &config.provider_config {
            ProviderConfig::Deterministic { seed } => *seed,
            _ => return Err(anyhow!("config is not for the deterministic provider")),
        };
        Ok(Self { config, seed })
    }

    fn encode_one(&self, input: &str) -> Vec<f32> {
        let clipped: String = input.chars().take(self.config.max_input_chars).collect();
        let tokens = text::content_tokens(&clipped);
        let mut vector = vec![0.0f32; self.config.dimension];

        let mix = |token: &str, weight: f32, vector: &mut [f32]| {
            let mut state = fnv1a64(token.as_bytes()) ^ self.seed;
            for slot in vector.iter_mut() {
                state = xorshift64star(state);
                let unit = (state >> 11) as f32 / (1u64 << 53) as f32;
                *slot += weight * (unit * 2.0 - 1.0);
            }
        };

        for token in &tokens {
            mix(token, 1.0, &mut vector);
        }
        // Bigrams give mild compositionality at half weight.
        for pair in tokens.windows(2) {
            mix(&format!("{} {}", pair[0], pair[1]), 0.5, &mut vector);
        }

        if !scoring::l2_normalize(&mut vector) {
            // Empty or all-stop-word input: a fixed basis vector keeps the
            // unit-norm contract without special cases downstream.
            vector[0] = 1.0;
        }
        vector
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn xorshift64star(mut state: u64) -> u64 {
    state ^= state >> 12;
    state ^= state << 25;
    state ^= state >> 27;
    state.wrapping_mul(0x2545F4914F6CDD1D)
}

#[async_trait::async_trait]
impl EmbeddingProvider for DeterministicEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let embeddings = texts.iter().map(|t| self.encode_one(t)).collect();
        Ok(EmbeddingResult {
            embeddings,
            model_used: self.config.model_name.clone(),
        })
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_id(&self) -> &str {
        &self.config.model_name
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }
}

/// OpenAI-compatible embedding provider.
#[cfg(feature = "embeddings-openai")]
#[derive(Debug)]
pub struct OpenAIEmbeddingProvider {
    config: EmbeddingConfig,
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

#[cfg(feature = "embeddings-openai")]
impl OpenAIEmbeddingProvider {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let (api_key, api_base) = match &config.provider_config {
            ProviderConfig::OpenAI { api_key, api_base } => (api_key.clone(), api_base.clone()),
            _ => return Err(anyhow!("config is not for the OpenAI provider")),
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            config,
            client,
            api_key,
            api_base: api_base.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }
}

#[cfg(feature = "embeddings-openai")]
#[async_trait::async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult {
                embeddings: Vec::new(),
                model_used: self.config.model_name.clone(),
            });
        }

        #[derive(Serialize)]
        struct EmbeddingRequest {
            input: Vec<String>,
            model: String,
            encoding_format: String,
        }

        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
            index: usize,
        }

        let clipped = texts
            .iter()
            .map(|t| t.chars().take(self.config.max_input_chars).collect())
            .collect();

        let request = EmbeddingRequest {
            input: clipped,
            model: self.config.model_name.clone(),
            encoding_format: "float".to_string(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("embedding API error: {}", error_text));
        }

        let embedding_response: EmbeddingResponse = response.json().await?;

        // Sort by index to restore input order.
        let mut sorted_data = embedding_response.data;
        sorted_data.sort_by_key(|d| d.index);

        let embeddings = sorted_data
            .into_iter()
            .map(|d| {
                let mut v = d.embedding;
                // API vectors are near-unit but not exactly; renormalise so
                // the index norm invariant holds.
                scoring::l2_normalize(&mut v);
                v
            })
            .collect();

        Ok(EmbeddingResult {
            embeddings,
            model_used: self.config.model_name.clone(),
        })
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_id(&self) -> &str {
        &self.config.model_name
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }
}

/// Embedding service: provider + query cache + the degraded-mode latch.
///
/// Once `mark_degraded` fires, every subsequent call observes the latch
/// for the lifetime of the process; there is no reload path that could
/// bypass it.
pub struct EmbeddingService {
    provider: Box<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Vec<f32>>>,
    degraded: AtomicBool,
    degraded_logged: AtomicBool,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let provider: Box<dyn EmbeddingProvider> = match config.provider {
            EmbeddingProviderType::Deterministic => {
                Box::new(DeterministicEmbeddingProvider::new(config)?)
            }
            #[cfg(feature = "embeddings-openai")]
            EmbeddingProviderType::OpenAI => Box::new(OpenAIEmbeddingProvider::new(config)?),
            #[cfg(not(feature = "embeddings-openai"))]
            EmbeddingProviderType::OpenAI => {
                return Err(anyhow!(
                    "OpenAI embeddings require the embeddings-openai feature"
                ))
            }
        };

        Ok(Self {
            provider,
            cache: RwLock::new(HashMap::new()),
            degraded: AtomicBool::new(false),
            degraded_logged: AtomicBool::new(false),
        })
    }

    pub fn from_provider(provider: Box<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
            degraded: AtomicBool::new(false),
            degraded_logged: AtomicBool::new(false),
        }
    }

    /// True once dense search has been disabled for this process.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Latch degraded mode. Logged once with the lost capability.
    pub fn mark_degraded(&self, reason: &str) {
        self.degraded.store(true, Ordering::Release);
        if !self.degraded_logged.swap(true, Ordering::AcqRel) {
            warn!(reason, "dense search disabled for process lifetime");
        }
    }

    /// Embed a query with caching. Returns `ModelUnavailable` when the
    /// latch is set or the provider fails (which sets the latch).
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, GovernanceError> {
        if self.is_degraded() {
            return Err(GovernanceError::ModelUnavailable(
                "embedder degraded".into(),
            ));
        }

        {
            let cache = self.cache.read().await;
            if let Some(embedding) = cache.get(query) {
                return Ok(embedding.clone());
            }
        }

        match self.provider.embed_text(query).await {
            Ok(embedding) => {
                let mut cache = self.cache.write().await;
                cache.insert(query.to_string(), embedding.clone());
                Ok(embedding)
            }
            Err(e) => {
                self.mark_degraded(&e.to_string());
                Err(GovernanceError::ModelUnavailable(e.to_string()))
            }
        }
    }

    /// Embed a batch without caching (build path).
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.provider.max_batch_size().max(1)) {
            let result = self.provider.embed_texts(chunk).await?;
            if result.embeddings.len() != chunk.len() {
                return Err(anyhow!(
                    "provider returned {} embeddings for {} inputs",
                    result.embeddings.len(),
                    chunk.len()
                ));
            }
            all.extend(result.embeddings);
        }
        Ok(all)
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }
}
