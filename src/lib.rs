// GovDB - A Semantic Retrieval Engine for AI Governance Content
// Root library module

pub mod audit;
pub mod bm25;
pub mod builders;
pub mod config;
pub mod context;
pub mod corpus;
pub mod embeddings;
pub mod errors;
pub mod feedback;
pub mod governance;
pub mod hybrid_search;
pub mod index_builder;
pub mod index_format;
pub mod index_loader;
pub mod models;
pub mod observability;
pub mod pure;
pub mod reranker;
pub mod retrieval;
pub mod router;
pub mod safety;
pub mod types;

// MCP surface (stdio JSON-RPC)
pub mod mcp;

// Re-export key types
pub use errors::GovernanceError;

pub use models::{
    AssessmentKind, Confidence, ConfidenceThresholds, Domain, ItemRecord, SafetyCheck, ScoredHit,
    SeriesCode, SourceRange,
};

// Re-export validated types
pub use types::{DomainName, ItemId, SemanticWeight, ValidatedLimit, ValidatedQuery};

// Re-export the pipeline surface
pub use context::ServerContext;
pub use governance::{Assessment, EvaluateRequest, GovernanceEvaluator, VerificationResult};
pub use index_builder::{build_index, build_index_from_manifest, BuildReport};
pub use index_loader::LoadedIndex;
pub use retrieval::{Deadline, RetrievalEngine, RetrievalRequest, RetrievalResponse};

// Re-export builders
pub use builders::{ManifestBuilder, QueryBuilder};

// Re-export observability entry points
pub use observability::{init_logging, metrics_snapshot, MetricsSnapshot};
