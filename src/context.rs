// Server Context - the explicit, passed-in state the MCP layer and the
// CLI share. Constructed once at startup; there are no module singletons
// and no hidden initialisation order. The index is owned here and handed
// to handlers as read-only views.

use crate::audit::AuditStore;
use crate::config::GovdbConfig;
use crate::embeddings::EmbeddingService;
use crate::errors::GovernanceError;
use crate::feedback::FeedbackStore;
use crate::governance::{Assessment, EvaluateRequest, GovernanceEvaluator, VerificationResult};
use crate::index_loader::LoadedIndex;
use crate::models::{Domain, ItemRecord, SeriesCode};
use crate::observability::{metrics_snapshot, MetricsSnapshot};
use crate::reranker::RerankService;
use crate::retrieval::{RetrievalEngine, RetrievalRequest, RetrievalResponse};
use crate::safety::SafetyScreen;
use crate::types::{DomainName, ItemId};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::info;

/// Shared server state. Cheap to clone handles out of via the `Arc`s.
pub struct ServerContext {
    config: GovdbConfig,
    engine: Arc<RetrievalEngine>,
    evaluator: Arc<GovernanceEvaluator>,
    audit: Arc<AuditStore>,
    admission: Arc<Semaphore>,
}

/// Item listing entry used by domain summaries.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    pub id: ItemId,
    pub title: String,
    pub series: SeriesCode,
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainSummary {
    pub domain: Domain,
    pub principles: Vec<ItemSummary>,
    pub methods: Vec<ItemSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub item_count: usize,
    pub principle_count: usize,
    pub method_count: usize,
    pub domain_count: usize,
    pub dimension: usize,
    pub embedding_model: String,
    pub corpus_sha256: String,
    pub audit_records: usize,
    pub audit_capacity: usize,
    pub metrics: MetricsSnapshot,
}

impl ServerContext {
    /// Load the index and assemble every service from configuration.
    /// Fatal on any load or config failure: the server does not start on
    /// a corrupt index.
    pub fn initialize(config: GovdbConfig) -> Result<Self, GovernanceError> {
        config.validate()?;
        let index = Arc::new(LoadedIndex::load(Path::new(&config.paths.index_dir))?);
        Self::with_index(config, index)
    }

    /// Assemble around an already-loaded index (tests build in-memory).
    pub fn with_index(
        config: GovdbConfig,
        index: Arc<LoadedIndex>,
    ) -> Result<Self, GovernanceError> {
        let embeddings = Arc::new(
            EmbeddingService::new(config.embeddings.clone())
                .map_err(|e| GovernanceError::Config(e.to_string()))?,
        );
        let reranker = Arc::new(RerankService::new(&config.reranker));
        let safety = SafetyScreen::new(&config.safety.keywords);

        let feedback = if config.feedback.enabled {
            let store = match &config.paths.feedback_log {
                Some(path) => {
                    FeedbackStore::open(Path::new(path), config.feedback.max_adjustment)?
                }
                None => FeedbackStore::new(config.feedback.max_adjustment),
            };
            Some(Arc::new(store))
        } else {
            None
        };

        let audit = Arc::new(match &config.paths.audit_log {
            Some(path) => AuditStore::open(Path::new(path), config.audit.capacity)?,
            None => AuditStore::new(config.audit.capacity),
        });

        let engine = Arc::new(RetrievalEngine::new(
            index,
            embeddings,
            reranker,
            feedback,
            safety,
            config.retrieval.clone(),
        ));
        let evaluator = Arc::new(GovernanceEvaluator::new(
            engine.clone(),
            audit.clone(),
            config.safety.verify_threshold,
            config.safety.verify_partial_threshold,
            Duration::from_millis(config.retrieval.evaluation_deadline_ms),
        ));
        let admission = Arc::new(Semaphore::new(config.retrieval.max_in_flight));

        info!(
            max_in_flight = config.retrieval.max_in_flight,
            audit_capacity = config.audit.capacity,
            "server context initialized"
        );

        Ok(Self {
            config,
            engine,
            evaluator,
            audit,
            admission,
        })
    }

    pub fn config(&self) -> &GovdbConfig {
        &self.config
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    /// Admission control: reject rather than queue when the in-flight
    /// limit is reached.
    fn admit(&self) -> Result<tokio::sync::OwnedSemaphorePermit, GovernanceError> {
        self.admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| GovernanceError::Overloaded)
    }

    /// `query_governance`: ranked principles and methods for a query.
    pub async fn query_governance(
        &self,
        request: RetrievalRequest,
    ) -> Result<RetrievalResponse, GovernanceError> {
        let _permit = self.admit()?;
        let deadline = self.engine.default_deadline();
        self.engine.retrieve(&request, deadline).await
    }

    /// `evaluate_governance`: typed assessment with audit write-through.
    pub async fn evaluate_governance(
        &self,
        request: EvaluateRequest,
    ) -> Result<Assessment, GovernanceError> {
        let _permit = self.admit()?;
        self.evaluator.evaluate(&request).await
    }

    /// `verify_governance_compliance`: post-hoc audit lookup.
    pub async fn verify_compliance(
        &self,
        action_description: &str,
        expected_principles: &[String],
    ) -> Result<VerificationResult, GovernanceError> {
        let _permit = self.admit()?;
        self.evaluator
            .verify_compliance(action_description, expected_principles)
            .await
    }

    /// `get_principle`: full body of a principle or method by ID.
    pub fn get_principle(&self, id: &str) -> Result<ItemRecord, GovernanceError> {
        let id = ItemId::new(id)?;
        self.engine
            .index()
            .item_by_id(id.as_str())
            .cloned()
            .ok_or_else(|| GovernanceError::NotFound(format!("no item with id '{id}'")))
    }

    /// `list_domains`: the domain table in priority order.
    pub fn list_domains(&self) -> Vec<Domain> {
        self.engine.index().domains().to_vec()
    }

    /// `get_domain_summary`: a domain and its items.
    pub fn domain_summary(&self, name: &str) -> Result<DomainSummary, GovernanceError> {
        let name = DomainName::new(name)?;
        let index = self.engine.index();
        let domain = index
            .domain(&name)
            .cloned()
            .ok_or_else(|| GovernanceError::NotFound(format!("no domain named '{name}'")))?;

        let mut principles = Vec::new();
        let mut methods = Vec::new();
        for item in index.items_in_domain(&name) {
            let summary = ItemSummary {
                id: item.id.clone(),
                title: item.title.clone(),
                series: item.series_code,
            };
            if item.is_method() {
                methods.push(summary);
            } else {
                principles.push(summary);
            }
        }
        Ok(DomainSummary {
            domain,
            principles,
            methods,
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        let index = self.engine.index();
        let header = index.header();
        StatsSnapshot {
            item_count: header.item_count,
            principle_count: index.principles().len(),
            method_count: index.methods().len(),
            domain_count: header.domain_count,
            dimension: header.dimension,
            embedding_model: header.embedding_model.clone(),
            corpus_sha256: header.corpus_sha256.clone(),
            audit_records: self.audit.len(),
            audit_capacity: self.audit.capacity(),
            metrics: metrics_snapshot(),
        }
    }
}
