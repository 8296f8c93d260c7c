// Retrieval Pipeline - orchestrates embed → route → hybrid → rerank →
// promote → label. The stage order is load-bearing: safety promotion runs
// after reranking so nothing downstream of it can demote a safety
// principle, and confidence labelling is the only stage that drops hits.

use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingService;
use crate::errors::GovernanceError;
use crate::feedback::FeedbackStore;
use crate::hybrid_search::{score_item, search_domains, Candidate};
use crate::index_loader::LoadedIndex;
use crate::models::{Confidence, SafetyCheck, ScoredHit};
use crate::observability::{record_operation, Operation, OperationContext};
use crate::pure::text;
use crate::reranker::RerankService;
use crate::router::route_domains;
use crate::safety::{promotable_items, SafetyScreen};
use crate::types::{DomainName, SemanticWeight, ValidatedLimit, ValidatedQuery};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Characters of content included in result snippets.
const SNIPPET_CHARS: usize = 240;

/// A request deadline. Suspension points check it before starting work.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    pub fn check(&self, stage: &'static str) -> Result<(), GovernanceError> {
        if Instant::now() >= self.at {
            Err(GovernanceError::Deadline(stage))
        } else {
            Ok(())
        }
    }
}

/// A validated retrieval request.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: ValidatedQuery,
    pub domain: Option<DomainName>,
    pub include_constitution: bool,
    pub include_methods: bool,
    pub max_results: ValidatedLimit,
    /// Per-query α override; the config default applies when absent.
    pub semantic_weight: Option<SemanticWeight>,
}

impl RetrievalRequest {
    pub fn new(query: ValidatedQuery) -> Self {
        Self {
            query,
            domain: None,
            include_constitution: true,
            include_methods: true,
            max_results: ValidatedLimit::default(),
            semantic_weight: None,
        }
    }
}

/// Retrieval output: ranked hits plus the pipeline flags callers need to
/// interpret them.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievalResponse {
    pub hits: Vec<ScoredHit>,
    pub routed_domains: Vec<DomainName>,
    pub s_series_check: SafetyCheck,
    /// True when dense scoring was skipped (degraded embedder); results
    /// are BM25-only but still correct.
    pub dense_search_skipped: bool,
    /// True when the cross-encoder did not run (disabled, degraded, or
    /// out of deadline budget).
    pub rerank_skipped: bool,
    pub elapsed_ms: u64,
}

/// The retrieval engine: loaded index + model services + tuning.
pub struct RetrievalEngine {
    index: Arc<LoadedIndex>,
    embeddings: Arc<EmbeddingService>,
    reranker: Arc<RerankService>,
    feedback: Option<Arc<FeedbackStore>>,
    safety: SafetyScreen,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        index: Arc<LoadedIndex>,
        embeddings: Arc<EmbeddingService>,
        reranker: Arc<RerankService>,
        feedback: Option<Arc<FeedbackStore>>,
        safety: SafetyScreen,
        config: RetrievalConfig,
    ) -> Self {
        // Model identity mismatch disables dense search for the process
        // lifetime. The latch lives in the embedding service, so every
        // dense-path reader observes it; there is no reload that bypasses
        // the check.
        let index_model = &index.header().embedding_model;
        if index_model != embeddings.model_id() {
            warn!(
                index_model = %index_model,
                runtime_model = %embeddings.model_id(),
                "index was embedded with a different model"
            );
            embeddings.mark_degraded("embedding model identity mismatch");
        }

        Self {
            index,
            embeddings,
            reranker,
            feedback,
            safety,
            config,
        }
    }

    pub fn index(&self) -> &LoadedIndex {
        &self.index
    }

    pub fn safety_screen(&self) -> &SafetyScreen {
        &self.safety
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Embed arbitrary text, if the embedder is healthy. Shared with the
    /// audit verifier.
    pub async fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        self.embeddings.embed_query(text).await.ok()
    }

    pub fn default_deadline(&self) -> Deadline {
        Deadline::after(Duration::from_millis(self.config.retrieval_deadline_ms))
    }

    /// Run the full pipeline for one query.
    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
        deadline: Deadline,
    ) -> Result<RetrievalResponse, GovernanceError> {
        let ctx = OperationContext::new("retrieve");
        let result = self.retrieve_inner(request, deadline).await;
        record_operation(
            &Operation::Retrieval {
                result_count: result.as_ref().map(|r| r.hits.len()).unwrap_or(0),
                elapsed_ms: ctx.elapsed_ms(),
            },
            &result.as_ref().map(|_| ()).map_err(|e| e.to_string()),
        );
        result
    }

    async fn retrieve_inner(
        &self,
        request: &RetrievalRequest,
        deadline: Deadline,
    ) -> Result<RetrievalResponse, GovernanceError> {
        let started = Instant::now();
        let query_text = request.query.as_str();

        // Keyword screen on the raw query; drives promotion below.
        let s_series_check = self.safety.screen(query_text);

        // Dense leg. The embedder is a suspension point: deadline first.
        deadline.check("embed")?;
        let query_embedding = match self.embeddings.embed_query(query_text).await {
            Ok(v) => Some(v),
            Err(GovernanceError::ModelUnavailable(reason)) => {
                debug!(reason, "dense search skipped");
                None
            }
            Err(e) => return Err(e),
        };
        let dense_search_skipped = query_embedding.is_none();

        let routed_domains = route_domains(
            &self.index,
            query_embedding.as_deref(),
            request.domain.as_ref(),
            request.include_constitution,
            self.config.domain_threshold,
        )?;

        let alpha = request
            .semantic_weight
            .map(|w| w.get())
            .unwrap_or(self.config.semantic_weight);

        // Score every item in the routed domains; the rerank band is a
        // prefix of this list, and safety promotion may reach past it.
        let mut candidates = search_domains(
            &self.index,
            &routed_domains,
            query_text,
            query_embedding.as_deref(),
            alpha,
            request.include_methods,
            self.feedback.as_deref(),
            self.index.items().len(),
        );

        // Promotion set: safety-relevant items overlapping the query, only
        // when the screen tripped. A promotable item whose domain was not
        // routed (suppressed constitution) is scored individually so the
        // promoter can still surface it.
        let promoted_ids: HashSet<&str> = if s_series_check.triggered {
            let promotable = promotable_items(&self.index, query_text);
            let present: HashSet<&str> =
                candidates.iter().map(|c| c.item.id.as_str()).collect();
            for item in &promotable {
                if !present.contains(item.id.as_str()) {
                    candidates.push(score_item(
                        &self.index,
                        item,
                        query_text,
                        query_embedding.as_deref(),
                        alpha,
                        self.feedback.as_deref(),
                    ));
                }
            }
            promotable.into_iter().map(|item| item.id.as_str()).collect()
        } else {
            HashSet::new()
        };

        // Rerank the top-K band. The reranker is the second suspension
        // point; past the deadline it is skipped, never partially applied.
        // Rerank scores replace fused scores for ordering inside the band;
        // the reported score and the confidence label stay derived from
        // the fused score, which is the calibrated one.
        let band = self.config.rerank_top_k.min(candidates.len());
        let mut rank_scores: Vec<f32> = candidates.iter().map(|c| c.fused).collect();
        let mut reranked = vec![false; candidates.len()];
        let mut rerank_skipped = true;
        if band > 0 && deadline.check("rerank").is_ok() && self.reranker.is_available() {
            let texts: Vec<String> = candidates[..band]
                .iter()
                .map(|c| {
                    format!(
                        "{}\n{}",
                        c.item.title,
                        text::snippet(&c.item.content, SNIPPET_CHARS)
                    )
                })
                .collect();
            if let Some(scores) = self.reranker.rerank(query_text, &texts).await {
                for (i, score) in scores.into_iter().enumerate() {
                    rank_scores[i] = score;
                    reranked[i] = true;
                }
                rerank_skipped = false;
            }
        }

        let hits = self.assemble(
            &candidates,
            &rank_scores,
            &reranked,
            &promoted_ids,
            request.max_results.get(),
        );

        Ok(RetrievalResponse {
            hits,
            routed_domains,
            s_series_check,
            dense_search_skipped,
            rerank_skipped,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Confidence labelling, safety pass-through, promotion, ordering and
    /// truncation.
    fn assemble(
        &self,
        candidates: &[Candidate<'_>],
        rank_scores: &[f32],
        reranked: &[bool],
        promoted_ids: &HashSet<&str>,
        max_results: usize,
    ) -> Vec<ScoredHit> {
        let thresholds = &self.config.confidence;

        // (in_band, rank_score, hit): the band stays a block ahead of the
        // tail, reordered by rerank score when one ran.
        let mut ranked: Vec<(bool, f32, ScoredHit)> = Vec::new();

        for (i, candidate) in candidates.iter().enumerate() {
            let item = candidate.item;
            let score = candidate.fused.clamp(0.0, 1.0);
            let promoted = promoted_ids.contains(item.id.as_str());

            let confidence = if promoted {
                // Promotion forces high confidence whatever the score.
                Confidence::High
            } else {
                match thresholds.label(score) {
                    Some(c) => c,
                    // S-series matched lexically passes through unfiltered;
                    // everything else below the floor is dropped.
                    None if item.is_safety_relevant() && candidate.lexical > 0.0 => {
                        Confidence::Low
                    }
                    None => continue,
                }
            };

            let hit = ScoredHit {
                id: item.id.clone(),
                title: item.title.clone(),
                domain: item.domain.clone(),
                series: item.series_code,
                score,
                confidence,
                snippet: text::snippet(&item.content, SNIPPET_CHARS),
                source_range: item.source_range.clone(),
                lexical_score: candidate.lexical,
                dense_score: candidate.dense,
                reranked: reranked[i],
                safety_promoted: promoted,
            };
            ranked.push((reranked[i], rank_scores[i], hit));
        }

        ranked.sort_by(|(a_band, a_rank, a_hit), (b_band, b_rank, b_hit)| {
            b_band
                .cmp(a_band) // band block first
                .then_with(|| b_rank.total_cmp(a_rank))
                .then_with(|| ScoredHit::ordering(a_hit, b_hit))
        });
        let mut hits: Vec<ScoredHit> = ranked.into_iter().map(|(_, _, hit)| hit).collect();

        // Truncate without ever cutting a promoted safety hit, keeping
        // the established order for everything retained.
        if hits.len() > max_results {
            let mut budget = max_results.saturating_sub(
                hits.iter().filter(|h| h.safety_promoted).count(),
            );
            hits.retain(|hit| {
                if hit.safety_promoted {
                    true
                } else if budget > 0 {
                    budget -= 1;
                    true
                } else {
                    false
                }
            });
        }

        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::corpus::{CorpusManifest, DomainEntry};
    use crate::embeddings::{EmbeddingConfig, EmbeddingService};
    use crate::index_builder::build_index_from_manifest;
    use crate::reranker::RerankerConfig;

    /// Tuning for the deterministic test embedder: its centroid cosines
    /// sit near zero, so routing accepts every domain and the ranking
    /// signal comes from fusion.
    fn test_config() -> RetrievalConfig {
        RetrievalConfig {
            domain_threshold: -1.0,
            ..RetrievalConfig::default()
        }
    }

    async fn engine(dir: &std::path::Path) -> RetrievalEngine {
        std::fs::write(
            dir.join("const-p.md"),
            "# Constitution\n\n## S-Series\n\n### Never Destroy User Data\n\n\
             **Applies To:** data deletion, destructive migrations\n\n\
             Deleting user data is **irreversible harm**; escalate every time.\n\n\
             ## Q-Series\n\n### Validate Inputs\n\nValidate inputs at every trust boundary.\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("const-m.md"),
            "# Methods\n\n## Escalation Checklist\n\nStop, snapshot, escalate.\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("coding-p.md"),
            "# Coding\n\n## C-Series\n\n### Specification Completeness\n\n\
             **Applies To:** incomplete specifications, ambiguous requirements\n\n\
             Treat every **incomplete specification** as a question to ask, \
             never a gap to fill by guessing.\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("coding-m.md"),
            "# Methods\n\n## Spec Review Walkthrough\n\nRead it twice, list unknowns.\n",
        )
        .unwrap();

        let manifest = CorpusManifest {
            domains: vec![
                DomainEntry {
                    name: "constitution".into(),
                    description: "Universal governance and safety rules".into(),
                    priority: 0,
                    prefix: "const".into(),
                    principles_file: "const-p.md".into(),
                    methods_file: "const-m.md".into(),
                },
                DomainEntry {
                    name: "ai-coding".into(),
                    description: "Rules for AI-assisted coding and specifications".into(),
                    priority: 1,
                    prefix: "coding".into(),
                    principles_file: "coding-p.md".into(),
                    methods_file: "coding-m.md".into(),
                },
            ],
        };
        let out = dir.join("index");
        let embeddings = EmbeddingService::new(EmbeddingConfig::default()).unwrap();
        build_index_from_manifest(&manifest, dir, &out, &embeddings)
            .await
            .unwrap();
        let index = Arc::new(crate::index_loader::LoadedIndex::load(&out).unwrap());

        RetrievalEngine::new(
            index,
            Arc::new(embeddings),
            Arc::new(RerankService::new(&RerankerConfig::default())),
            None,
            SafetyScreen::with_defaults(),
            test_config(),
        )
    }

    fn request(query: &str) -> RetrievalRequest {
        RetrievalRequest::new(ValidatedQuery::new(query).unwrap())
    }

    fn long_deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_specification_query_hits_coding_domain() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;

        let response = engine
            .retrieve(
                &request("how do I handle an incomplete specification?"),
                long_deadline(),
            )
            .await
            .unwrap();

        assert!(!response.hits.is_empty());
        let top = &response.hits[0];
        assert_eq!(top.domain.as_str(), "ai-coding");
        assert_eq!(top.id.as_str(), "coding-context-specification-completeness");
        assert!(top.confidence >= Confidence::Medium);
        assert!(!response.s_series_check.triggered);
        assert!(!response.dense_search_skipped);
    }

    #[tokio::test]
    async fn test_safety_query_promotes_s_series() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;

        let response = engine
            .retrieve(
                &request("delete all user data older than 30 days"),
                long_deadline(),
            )
            .await
            .unwrap();

        assert!(response.s_series_check.triggered);
        let promoted: Vec<_> = response
            .hits
            .iter()
            .filter(|h| h.safety_promoted)
            .collect();
        assert!(!promoted.is_empty());
        for hit in promoted {
            assert_eq!(hit.confidence, Confidence::High);
            assert!(hit.series.is_safety());
        }
    }

    #[tokio::test]
    async fn test_scores_always_in_unit_interval() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        for query in [
            "incomplete specification",
            "delete user data",
            "completely unrelated topic words",
        ] {
            let response = engine.retrieve(&request(query), long_deadline()).await.unwrap();
            for hit in &response.hits {
                assert!((0.0..=1.0).contains(&hit.score), "{} -> {}", hit.id, hit.score);
            }
        }
    }

    #[tokio::test]
    async fn test_deterministic_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let req = request("validate inputs at the trust boundary");

        let a = engine.retrieve(&req, long_deadline()).await.unwrap();
        let b = engine.retrieve(&req, long_deadline()).await.unwrap();
        let ids_a: Vec<_> = a.hits.iter().map(|h| (h.id.clone(), h.score.to_bits())).collect();
        let ids_b: Vec<_> = b.hits.iter().map(|h| (h.id.clone(), h.score.to_bits())).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn test_expired_deadline_aborts_before_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let expired = Deadline::after(Duration::from_millis(0));
        tokio::time::sleep(Duration::from_millis(2)).await;

        let err = engine
            .retrieve(&request("anything"), expired)
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Deadline("embed")));
    }

    #[tokio::test]
    async fn test_degraded_embedder_still_answers() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        // Simulate a mismatched model discovered at startup.
        engine.embeddings.mark_degraded("test");

        let response = engine
            .retrieve(&request("input at the trust boundary"), long_deadline())
            .await
            .unwrap();
        assert!(response.dense_search_skipped);
        assert!(!response.hits.is_empty());
        assert_eq!(
            response.hits[0].id.as_str(),
            "const-quality-validate-inputs"
        );
    }

    #[tokio::test]
    async fn test_max_results_respected_but_never_cuts_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let mut req = request("delete all user data and validate inputs");
        req.max_results = ValidatedLimit::new(1).unwrap();

        let response = engine.retrieve(&req, long_deadline()).await.unwrap();
        assert!(response.s_series_check.triggered);
        assert!(response.hits.iter().any(|h| h.safety_promoted));
    }

    #[tokio::test]
    async fn test_promotion_reaches_past_suppressed_constitution() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let mut req = request("delete all user data from the store");
        req.domain = Some(DomainName::new("ai-coding").unwrap());
        req.include_constitution = false;

        let response = engine.retrieve(&req, long_deadline()).await.unwrap();
        assert!(response.s_series_check.triggered);
        // The constitution was not routed, but its safety principle is
        // still lifted into the result set.
        assert!(!response
            .routed_domains
            .iter()
            .any(|d| d.is_constitution()));
        assert!(response
            .hits
            .iter()
            .any(|h| h.safety_promoted && h.domain.is_constitution()));
    }

    #[tokio::test]
    async fn test_explicit_domain_restricts_results() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let mut req = request("incomplete specification details");
        req.domain = Some(DomainName::new("ai-coding").unwrap());
        req.include_constitution = false;

        let response = engine.retrieve(&req, long_deadline()).await.unwrap();
        assert!(response
            .hits
            .iter()
            .all(|h| h.domain.as_str() == "ai-coding"));
        assert_eq!(response.routed_domains.len(), 1);
    }
}
