// End-to-end retrieval scenarios through the server context: routing,
// degradation, determinism, and input boundaries.

use govdb::builders::QueryBuilder;
use govdb::config::GovdbConfig;
use govdb::context::ServerContext;
use govdb::corpus::{CorpusManifest, DomainEntry};
use govdb::embeddings::{EmbeddingConfig, EmbeddingService};
use govdb::errors::GovernanceError;
use govdb::index_builder::build_index_from_manifest;
use govdb::types::MAX_QUERY_CHARS;
use std::path::Path;
use std::sync::Arc;

async fn build_fixture(dir: &Path) -> String {
    std::fs::write(
        dir.join("const-p.md"),
        "# Constitution\n\n## S-Series\n\n### Never Destroy User Data\n\n\
         **Applies To:** data deletion\n\n\
         Deleting user data is **irreversible harm**; escalate every time.\n\n\
         ## Q-Series\n\n### Rate Limit External Calls\n\n\
         Apply rate limiting to outbound requests and retries.\n",
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
         Treat an **incomplete specification** as a question to ask, never a \
         gap to fill by guessing.\n",
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
    out.to_string_lossy().into_owned()
}

fn config_for(index_dir: String) -> GovdbConfig {
    let mut config = GovdbConfig::default();
    config.paths.index_dir = index_dir;
    // The deterministic test embedder produces near-zero centroid cosines;
    // routing filters are exercised in the router's own tests.
    config.retrieval.domain_threshold = -1.0;
    config.retrieval.retrieval_deadline_ms = 5_000;
    config
}

async fn context(dir: &Path) -> Arc<ServerContext> {
    let index_dir = build_fixture(dir).await;
    Arc::new(ServerContext::initialize(config_for(index_dir)).unwrap())
}

#[tokio::test]
async fn specification_lookup_ranks_coding_principle_first() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path()).await;

    let response = ctx
        .query_governance(
            QueryBuilder::new("how do I handle an incomplete specification?")
                .max_results(5)
                .build()
                .unwrap(),
        )
        .await
        .unwrap();

    let top = &response.hits[0];
    assert_eq!(top.id.as_str(), "coding-context-specification-completeness");
    assert_eq!(top.domain.as_str(), "ai-coding");
    assert!(!response.dense_search_skipped);
    assert!(response.hits.len() <= 5);
}

#[tokio::test]
async fn degraded_embedder_returns_bm25_only_with_flag() {
    let dir = tempfile::tempdir().unwrap();
    let index_dir = build_fixture(dir.path()).await;
    let mut config = config_for(index_dir);
    // A different model name than the one the index was built with
    // latches dense-degraded mode at startup.
    config.embeddings.model_name = "some-other-model".into();
    let ctx = Arc::new(ServerContext::initialize(config).unwrap());

    let response = ctx
        .query_governance(
            QueryBuilder::new("rate limiting strategies for retries")
                .build()
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.dense_search_skipped);
    assert!(!response.hits.is_empty());
    assert_eq!(
        response.hits[0].id.as_str(),
        "const-quality-rate-limit-external-calls"
    );
    for hit in &response.hits {
        assert_eq!(hit.dense_score, 0.0);
        assert!((0.0..=1.0).contains(&hit.score));
    }
}

#[tokio::test]
async fn identical_queries_return_identical_rankings() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path()).await;

    let mut orderings = Vec::new();
    for _ in 0..3 {
        let response = ctx
            .query_governance(
                QueryBuilder::new("escalate data deletion questions")
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();
        orderings.push(
            response
                .hits
                .iter()
                .map(|h| (h.id.as_str().to_string(), h.score.to_bits()))
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(orderings[0], orderings[1]);
    assert_eq!(orderings[1], orderings[2]);
}

#[tokio::test]
async fn query_length_boundary_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path()).await;

    // Empty query rejected before any pipeline work.
    assert!(QueryBuilder::new("").build().is_err());

    // Exactly at the cap: accepted.
    let at_cap = "q ".repeat(MAX_QUERY_CHARS / 2);
    assert_eq!(at_cap.len(), MAX_QUERY_CHARS);
    let response = ctx
        .query_governance(QueryBuilder::new(at_cap).build().unwrap())
        .await;
    assert!(response.is_ok());

    // One past the cap: InvalidInput.
    let over_cap = "q".repeat(MAX_QUERY_CHARS + 1);
    match QueryBuilder::new(over_cap).build() {
        Err(GovernanceError::InvalidInput(_)) => {}
        other => panic!("expected InvalidInput, got {other:?}"),
    }
}

#[tokio::test]
async fn explicit_unknown_domain_is_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path()).await;
    let err = ctx
        .query_governance(
            QueryBuilder::new("anything")
                .domain("no-such-domain")
                .build()
                .unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GovernanceError::InvalidInput(_)));
}

#[tokio::test]
async fn methods_rank_alongside_principles_when_included() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path()).await;

    let response = ctx
        .query_governance(
            QueryBuilder::new("escalation checklist snapshot")
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response
        .hits
        .iter()
        .any(|h| h.id.as_str() == "const-method-escalation-checklist"));

    let response = ctx
        .query_governance(
            QueryBuilder::new("escalation checklist snapshot")
                .include_methods(false)
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response
        .hits
        .iter()
        .all(|h| h.id.as_str() != "const-method-escalation-checklist"));
}

#[tokio::test]
async fn no_lexical_match_in_degraded_mode_returns_empty_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let index_dir = build_fixture(dir.path()).await;
    let mut config = config_for(index_dir);
    config.embeddings.model_name = "some-other-model".into();
    let ctx = Arc::new(ServerContext::initialize(config).unwrap());

    let response = ctx
        .query_governance(QueryBuilder::new("zxqv wvuts mlkjh").build().unwrap())
        .await
        .unwrap();
    // All-zero lexical scores fall below the visibility floor; an empty
    // result is a valid answer, never an error.
    assert!(response.hits.is_empty());
}
