// Hybrid Searcher - per-domain lexical + dense scoring and convex fusion.
// Produces the candidate band that reranking and safety promotion refine.
// Every score leaving this module is in [0, 1].

use crate::feedback::FeedbackStore;
use crate::index_loader::LoadedIndex;
use crate::models::ItemRecord;
use crate::pure::{scoring, text};
use crate::types::DomainName;
use std::collections::HashMap;

/// Default size of the fused candidate band handed to the reranker.
pub const DEFAULT_TOP_K: usize = 20;

/// One fused candidate before reranking and promotion.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub item: &'a ItemRecord,
    pub lexical: f32,
    pub dense: f32,
    pub fused: f32,
}

/// Score every item in the candidate domains and return the fused top-K
/// union, deterministically ordered.
///
/// With `query_embedding` absent (degraded mode) the fused score collapses
/// to the lexical score rather than scaling it by `1 - alpha`; a missing
/// model must not shrink otherwise-identical rankings.
///
/// A verbatim trigger-phrase hit in the query lifts that item's lexical
/// score to 1.0: trigger phrases are authored precisely to outrank
/// ordinary term overlap.
pub fn search_domains<'a>(
    index: &'a LoadedIndex,
    domains: &[DomainName],
    query_text: &str,
    query_embedding: Option<&[f32]>,
    alpha: f32,
    include_methods: bool,
    feedback: Option<&FeedbackStore>,
    top_k: usize,
) -> Vec<Candidate<'a>> {
    let query_tokens = text::content_tokens(query_text);
    let query_lower = query_text.to_lowercase();

    let mut candidates: Vec<Candidate<'a>> = Vec::new();
    for domain in domains {
        // Lexical scores for the whole domain, aligned with the BM25
        // document list and normalised to [0, 1].
        let mut lexical_by_id: HashMap<&str, f32> = HashMap::new();
        if let Some(state) = index.bm25(domain) {
            let scores = state.normalized_scores(&query_tokens);
            for (doc_id, score) in state.doc_ids.iter().zip(scores) {
                lexical_by_id.insert(doc_id.as_str(), score);
            }
        }

        for item in index.items_in_domain(domain) {
            if item.is_method() && !include_methods {
                continue;
            }
            let lexical = lexical_by_id
                .get(item.id.as_str())
                .copied()
                .unwrap_or(0.0);
            candidates.push(fuse_item(
                index,
                item,
                lexical,
                &query_lower,
                query_embedding,
                alpha,
                feedback,
            ));
        }
    }

    // Fused descending, ID ascending on ties: deterministic across runs.
    candidates.sort_by(|a, b| {
        b.fused
            .total_cmp(&a.fused)
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    candidates.truncate(top_k);
    candidates
}

/// Score one item outside the routed set. Used by safety promotion when a
/// promotable item's domain was not routed (suppressed constitution), so
/// the promoted hit still carries real component scores.
pub fn score_item<'a>(
    index: &'a LoadedIndex,
    item: &'a ItemRecord,
    query_text: &str,
    query_embedding: Option<&[f32]>,
    alpha: f32,
    feedback: Option<&FeedbackStore>,
) -> Candidate<'a> {
    let query_tokens = text::content_tokens(query_text);
    let query_lower = query_text.to_lowercase();

    let mut lexical = 0.0;
    if let Some(state) = index.bm25(&item.domain) {
        let scores = state.normalized_scores(&query_tokens);
        if let Some(pos) = state.doc_ids.iter().position(|id| id == &item.id) {
            lexical = scores[pos];
        }
    }
    fuse_item(index, item, lexical, &query_lower, query_embedding, alpha, feedback)
}

fn fuse_item<'a>(
    index: &'a LoadedIndex,
    item: &'a ItemRecord,
    mut lexical: f32,
    query_lower: &str,
    query_embedding: Option<&[f32]>,
    alpha: f32,
    feedback: Option<&FeedbackStore>,
) -> Candidate<'a> {
    if item
        .trigger_phrases
        .iter()
        .any(|p| query_lower.contains(&p.to_lowercase()))
    {
        lexical = 1.0;
    }

    let (dense, fused) = match query_embedding {
        Some(q) => {
            let cosine = scoring::cosine_similarity(q, index.item_vector(item));
            let dense = scoring::dense_score(cosine);
            (dense, scoring::fuse(dense, lexical, alpha))
        }
        None => (0.0, lexical),
    };

    let fused = match feedback {
        Some(store) => (fused + store.adjustment(item.id.as_str())).clamp(0.0, 1.0),
        None => fused,
    };

    Candidate {
        item,
        lexical,
        dense,
        fused,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{CorpusManifest, DomainEntry};
    use crate::embeddings::{EmbeddingConfig, EmbeddingService};
    use crate::index_builder::build_index_from_manifest;
    use std::path::Path;

    async fn fixture(dir: &Path) -> (LoadedIndex, EmbeddingService) {
        std::fs::write(
            dir.join("p.md"),
            "# C\n\n## S-Series\n\n### Never Destroy User Data\n\n\
             **Applies To:** data deletion\n\n\
             Destroying user data is **irreversible harm** and always escalates.\n\n\
             ## Q-Series\n\n### Validate Inputs\n\n\
             Validate every input at the trust boundary before use.\n\n\
             ### Rate Limit External Calls\n\n\
             Apply rate limiting to outbound requests and retries.\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("m.md"),
            "# M\n\n## Input Validation Checklist\n\nEnumerate inputs, validate each.\n",
        )
        .unwrap();
        let manifest = CorpusManifest {
            domains: vec![DomainEntry {
                name: "constitution".into(),
                description: "Universal rules".into(),
                priority: 0,
                prefix: "const".into(),
                principles_file: "p.md".into(),
                methods_file: "m.md".into(),
            }],
        };
        let out = dir.join("index");
        let embeddings = EmbeddingService::new(EmbeddingConfig::default()).unwrap();
        build_index_from_manifest(&manifest, dir, &out, &embeddings)
            .await
            .unwrap();
        (LoadedIndex::load(&out).unwrap(), embeddings)
    }

    fn constitution() -> Vec<DomainName> {
        vec![DomainName::constitution()]
    }

    #[tokio::test]
    async fn test_lexical_match_ranks_first() {
        let dir = tempfile::tempdir().unwrap();
        let (index, embeddings) = fixture(dir.path()).await;
        let query = "rate limiting strategies for retries";
        let q = embeddings.embed_query(query).await.unwrap();

        let hits = search_domains(
            &index,
            &constitution(),
            query,
            Some(&q),
            0.6,
            true,
            None,
            20,
        );
        assert_eq!(
            hits[0].item.id.as_str(),
            "const-quality-rate-limit-external-calls"
        );
        assert!(hits.iter().all(|c| (0.0..=1.0).contains(&c.fused)));
    }

    #[tokio::test]
    async fn test_trigger_phrase_outranks_term_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let (index, embeddings) = fixture(dir.path()).await;
        // "irreversible harm" is a trigger phrase of the S-series item.
        let query = "an action causing irreversible harm to inputs";
        let q = embeddings.embed_query(query).await.unwrap();

        let hits = search_domains(
            &index,
            &constitution(),
            query,
            Some(&q),
            0.0, // pure lexical fusion isolates the trigger boost
            true,
            None,
            20,
        );
        assert_eq!(hits[0].item.id.as_str(), "const-s-never-destroy-user-data");
        assert_eq!(hits[0].lexical, 1.0);
    }

    #[tokio::test]
    async fn test_degraded_mode_collapses_to_lexical() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _embeddings) = fixture(dir.path()).await;
        let query = "input at the trust boundary";

        let hits = search_domains(&index, &constitution(), query, None, 0.6, true, None, 20);
        for c in &hits {
            assert_eq!(c.dense, 0.0);
            assert_eq!(c.fused, c.lexical, "fused must equal lexical when dense is skipped");
        }
        assert_eq!(
            hits[0].item.id.as_str(),
            "const-quality-validate-inputs"
        );
    }

    #[tokio::test]
    async fn test_methods_excluded_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let (index, embeddings) = fixture(dir.path()).await;
        let query = "input validation checklist";
        let q = embeddings.embed_query(query).await.unwrap();

        let with = search_domains(
            &index,
            &constitution(),
            query,
            Some(&q),
            0.6,
            true,
            None,
            20,
        );
        assert!(with.iter().any(|c| c.item.is_method()));

        let without = search_domains(
            &index,
            &constitution(),
            query,
            Some(&q),
            0.6,
            false,
            None,
            20,
        );
        assert!(without.iter().all(|c| !c.item.is_method()));
    }

    #[tokio::test]
    async fn test_feedback_cannot_cross_visibility_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _embeddings) = fixture(dir.path()).await;
        let store = FeedbackStore::new(0.05);
        for _ in 0..100 {
            store.record("const-quality-validate-inputs", 1).unwrap();
        }

        // Query with no overlap at all: lexical 0, dense skipped.
        let hits = search_domains(
            &index,
            &constitution(),
            "zzz qqq xxx",
            None,
            0.6,
            true,
            Some(&store),
            20,
        );
        let boosted = hits
            .iter()
            .find(|c| c.item.id.as_str() == "const-quality-validate-inputs")
            .unwrap();
        // Capped at +0.05: still far below the 0.30 visibility floor.
        assert!(boosted.fused <= 0.05 + 1e-6);
    }

    #[tokio::test]
    async fn test_top_k_truncation_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let (index, _embeddings) = fixture(dir.path()).await;
        let a = search_domains(&index, &constitution(), "zzz", None, 0.6, true, None, 2);
        let b = search_domains(&index, &constitution(), "zzz", None, 0.6, true, None, 2);
        assert_eq!(a.len(), 2);
        let ids_a: Vec<_> = a.iter().map(|c| c.item.id.as_str()).collect();
        let ids_b: Vec<_> = b.iter().map(|c| c.item.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
        // All-zero scores tie-break by ID ascending.
        let mut sorted = ids_a.clone();
        sorted.sort_unstable();
        assert_eq!(ids_a, sorted);
    }
}
