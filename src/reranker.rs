// Cross-Encoder Reranker - joint (query, candidate) scoring for the top-K
// band. The reranker is strictly optional: any failure or absence leaves
// the fused ordering untouched, and the pipeline never errors because
// reranking was unavailable.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use crate::pure::text;

/// Configuration for the rerank stage. The band size it operates on is
/// retrieval tuning (`rerank_top_k`), not a property of the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub provider: RerankerProviderType,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: RerankerProviderType::Lexical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankerProviderType {
    /// Token-overlap scoring. Deterministic, model-free; the default and
    /// the substitute used by tests.
    Lexical,
    /// Reranking off: fused scores are final.
    Disabled,
}

/// Trait for rerank providers.
///
/// # Contract
/// - Output length equals candidate count, in candidate order
/// - Scores are calibrated into [0, 1] by the provider
/// - For a fixed query the scores are monotone in relevance; no
///   cross-query calibration is promised
#[async_trait::async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
    fn model_id(&self) -> &str;
}

/// Jaccard token overlap between query and candidate. Weak as a
/// cross-encoder but deterministic, and it preserves the contract shape
/// for the pipeline and its tests.
#[derive(Debug, Default)]
pub struct LexicalOverlapReranker;

#[async_trait::async_trait]
impl Reranker for LexicalOverlapReranker {
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let query_tokens = text::content_tokens(query);
        Ok(candidates
            .iter()
            .map(|c| text::jaccard_similarity(&query_tokens, &text::content_tokens(c)))
            .collect())
    }

    fn model_id(&self) -> &str {
        "lexical-overlap-v1"
    }
}

/// Rerank service: optional provider + the same latch-on-failure policy
/// the embedding service uses.
pub struct RerankService {
    reranker: Option<Box<dyn Reranker>>,
    degraded: AtomicBool,
    degraded_logged: AtomicBool,
}

impl RerankService {
    pub fn new(config: &RerankerConfig) -> Self {
        let reranker: Option<Box<dyn Reranker>> = match config.provider {
            RerankerProviderType::Lexical => Some(Box::new(LexicalOverlapReranker)),
            RerankerProviderType::Disabled => None,
        };
        Self {
            reranker,
            degraded: AtomicBool::new(false),
            degraded_logged: AtomicBool::new(false),
        }
    }

    pub fn from_reranker(reranker: Box<dyn Reranker>) -> Self {
        Self {
            reranker: Some(reranker),
            degraded: AtomicBool::new(false),
            degraded_logged: AtomicBool::new(false),
        }
    }

    pub fn disabled() -> Self {
        Self {
            reranker: None,
            degraded: AtomicBool::new(false),
            degraded_logged: AtomicBool::new(false),
        }
    }

    pub fn is_available(&self) -> bool {
        self.reranker.is_some() && !self.degraded.load(Ordering::Acquire)
    }

    /// Score the candidate band, or None when reranking is off, degraded,
    /// or fails. Malformed provider output (wrong length, out-of-range
    /// values) counts as a failure and latches.
    pub async fn rerank(&self, query: &str, candidates: &[String]) -> Option<Vec<f32>> {
        if !self.is_available() || candidates.is_empty() {
            return None;
        }
        let reranker = self.reranker.as_ref()?;
        match reranker.score(query, candidates).await {
            Ok(scores)
                if scores.len() == candidates.len()
                    && scores.iter().all(|s| (0.0..=1.0).contains(s)) =>
            {
                Some(scores)
            }
            Ok(scores) => {
                self.mark_degraded(&format!(
                    "reranker returned {} scores for {} candidates or out-of-range values",
                    scores.len(),
                    candidates.len()
                ));
                None
            }
            Err(e) => {
                self.mark_degraded(&e.to_string());
                None
            }
        }
    }

    fn mark_degraded(&self, reason: &str) {
        self.degraded.store(true, Ordering::Release);
        if !self.degraded_logged.swap(true, Ordering::AcqRel) {
            warn!(reason, "reranking disabled for process lifetime");
        }
    }
}
