// Runtime Configuration - layered the usual way: compiled defaults,
// optional TOML file, then environment overrides. Every tunable the
// pipeline reads lives here with its documented default.

use crate::embeddings::EmbeddingConfig;
use crate::errors::GovernanceError;
use crate::hybrid_search::DEFAULT_TOP_K;
use crate::models::ConfidenceThresholds;
use crate::reranker::RerankerConfig;
use crate::router::DEFAULT_DOMAIN_THRESHOLD;
use crate::safety::default_safety_keywords;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GovdbConfig {
    pub paths: PathsConfig,
    pub retrieval: RetrievalConfig,
    pub safety: SafetyConfig,
    pub audit: AuditConfig,
    pub feedback: FeedbackConfig,
    pub embeddings: EmbeddingConfig,
    pub reranker: RerankerConfig,
    pub mcp: McpProtocolConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Index directory produced by `govdb build-index`.
    pub index_dir: String,
    /// Corpus manifest consumed by the builder.
    pub corpus_manifest: String,
    /// Optional append-only JSONL audit persistence. Rotation is external.
    pub audit_log: Option<String>,
    /// Optional JSONL feedback log.
    pub feedback_log: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            index_dir: "./govdb-index".to_string(),
            corpus_manifest: "./corpus/manifest.toml".to_string(),
            audit_log: None,
            feedback_log: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Fusion weight α: share of the dense score in the fused score.
    pub semantic_weight: f32,
    /// Centroid-similarity routing threshold τ.
    pub domain_threshold: f32,
    /// Fused candidates handed to the reranker after the cross-domain union.
    pub rerank_top_k: usize,
    /// Results returned when the caller does not ask for a count.
    pub max_results_default: usize,
    pub confidence: ConfidenceThresholds,
    pub retrieval_deadline_ms: u64,
    pub evaluation_deadline_ms: u64,
    /// Admission limit on concurrent queries.
    pub max_in_flight: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.60,
            domain_threshold: DEFAULT_DOMAIN_THRESHOLD,
            rerank_top_k: DEFAULT_TOP_K,
            max_results_default: 10,
            confidence: ConfidenceThresholds::default(),
            retrieval_deadline_ms: 100,
            evaluation_deadline_ms: 2_000,
            max_in_flight: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Safety trigger terms; see `safety::default_safety_keywords`.
    pub keywords: Vec<String>,
    /// Similarity at or above which post-hoc verification is COMPLIANT.
    pub verify_threshold: f32,
    /// Similarity band [partial, verify) reported as PARTIAL.
    pub verify_partial_threshold: f32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            keywords: default_safety_keywords(),
            verify_threshold: 0.80,
            verify_partial_threshold: 0.50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Ring capacity; FIFO eviction beyond it.
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub enabled: bool,
    /// Cap on the fused-score adjustment, in either direction.
    pub max_adjustment: f32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_adjustment: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpProtocolConfig {
    pub protocol_version: String,
    pub server_name: String,
    pub server_version: String,
}

impl Default for McpProtocolConfig {
    fn default() -> Self {
        Self {
            protocol_version: "2024-11-05".to_string(),
            server_name: "govdb".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl GovdbConfig {
    /// Load configuration from a TOML file. Missing sections fall back to
    /// defaults.
    pub fn from_file(path: &str) -> Result<Self, GovernanceError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GovernanceError::Config(format!("cannot read config {path}: {e}")))?;
        let config: GovdbConfig = toml::from_str(&content)
            .map_err(|e| GovernanceError::Config(format!("malformed config {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the file at `path` when it exists, then environment
    /// overrides.
    pub fn load(path: Option<&str>) -> Result<Self, GovernanceError> {
        let mut config = match path {
            Some(p) if std::path::Path::new(p).exists() => Self::from_file(p)?,
            _ => Self::default(),
        };

        if let Ok(dir) = std::env::var("GOVDB_INDEX_DIR") {
            config.paths.index_dir = dir;
        }
        if let Ok(manifest) = std::env::var("GOVDB_CORPUS_MANIFEST") {
            config.paths.corpus_manifest = manifest;
        }
        if let Ok(log) = std::env::var("GOVDB_AUDIT_LOG") {
            config.paths.audit_log = Some(log);
        }
        if let Ok(level) = std::env::var("GOVDB_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GovernanceError> {
        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.semantic_weight) {
            return Err(GovernanceError::Config(format!(
                "semantic_weight {} outside [0, 1]",
                r.semantic_weight
            )));
        }
        if !(-1.0..=1.0).contains(&r.domain_threshold) {
            return Err(GovernanceError::Config(format!(
                "domain_threshold {} outside [-1, 1]",
                r.domain_threshold
            )));
        }
        if r.rerank_top_k == 0 || r.max_in_flight == 0 {
            return Err(GovernanceError::Config(
                "rerank_top_k and max_in_flight must be positive".into(),
            ));
        }
        let c = &r.confidence;
        if !(c.low <= c.medium && c.medium <= c.high) {
            return Err(GovernanceError::Config(format!(
                "confidence thresholds must be ordered low <= medium <= high \
                 (got {} / {} / {})",
                c.low, c.medium, c.high
            )));
        }
        if self.audit.capacity == 0 {
            return Err(GovernanceError::Config(
                "audit capacity must be positive".into(),
            ));
        }
        if self.safety.verify_partial_threshold > self.safety.verify_threshold {
            return Err(GovernanceError::Config(
                "verify_partial_threshold must not exceed verify_threshold".into(),
            ));
        }
        Ok(())
    }
}
