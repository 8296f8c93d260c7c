// Governance Evaluator - turns a planned action into a typed assessment
// backed by retrieval, and verifies past evaluations against the audit
// store. The safety keyword screen runs on the planned action alone:
// benign context or concerns text cannot tip the safety scale in either
// direction.

use crate::audit::{new_audit_id, AuditRecord, AuditStore};
use crate::errors::GovernanceError;
use crate::models::{AssessmentKind, Confidence, SafetyCheck, ScoredHit};
use crate::observability::{record_operation, Operation, OperationContext};
use crate::pure::scoring;
use crate::retrieval::{Deadline, RetrievalEngine, RetrievalRequest};
use crate::types::{
    ValidatedLimit, ValidatedQuery, MAX_CONCERNS_CHARS, MAX_CONTEXT_CHARS, MAX_ID_CHARS,
    MAX_QUERY_CHARS,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Cap on `expected_principles` entries in a verification request.
const MAX_EXPECTED_PRINCIPLES: usize = 20;

/// A validated evaluation request.
#[derive(Debug, Clone)]
pub struct EvaluateRequest {
    pub planned_action: ValidatedQuery,
    pub context: Option<String>,
    pub concerns: Option<String>,
}

impl EvaluateRequest {
    pub fn new(
        planned_action: impl Into<String>,
        context: Option<String>,
        concerns: Option<String>,
    ) -> Result<Self, GovernanceError> {
        let planned_action = ValidatedQuery::new(planned_action)?;
        if let Some(c) = &context {
            if c.chars().count() > MAX_CONTEXT_CHARS {
                return Err(GovernanceError::InvalidInput(format!(
                    "context exceeds {MAX_CONTEXT_CHARS} characters"
                )));
            }
        }
        if let Some(c) = &concerns {
            if c.chars().count() > MAX_CONCERNS_CHARS {
                return Err(GovernanceError::InvalidInput(format!(
                    "concerns exceeds {MAX_CONCERNS_CHARS} characters"
                )));
            }
        }
        Ok(Self {
            planned_action,
            context,
            concerns,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceStatus {
    #[serde(rename = "COMPLIES")]
    Complies,
    #[serde(rename = "NEEDS_MODIFICATION")]
    NeedsModification,
    #[serde(rename = "VIOLATION")]
    Violation,
}

/// Per-principle finding attached to an assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceEvaluation {
    pub principle_id: String,
    pub title: String,
    pub status: ComplianceStatus,
    pub finding: String,
}

/// The typed result of `evaluate_governance`.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub assessment: AssessmentKind,
    pub audit_id: String,
    pub s_series_check: SafetyCheck,
    pub compliance: Vec<ComplianceEvaluation>,
    pub required_modifications: Vec<String>,
    pub relevant_principles: Vec<ScoredHit>,
    /// The initial statuses are heuristic; an external reasoner may
    /// refine the non-safety ones. ESCALATE is a veto and never refined.
    pub requires_ai_judgment: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    #[serde(rename = "COMPLIANT")]
    Compliant,
    #[serde(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "NON_COMPLIANT")]
    NonCompliant,
}

/// Result of `verify_governance_compliance`.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub matching_audit_id: Option<String>,
    pub finding: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// The evaluator: retrieval plus the audit trail.
pub struct GovernanceEvaluator {
    engine: Arc<RetrievalEngine>,
    audit: Arc<AuditStore>,
    verify_threshold: f32,
    verify_partial_threshold: f32,
    evaluation_deadline: Duration,
}

impl GovernanceEvaluator {
    pub fn new(
        engine: Arc<RetrievalEngine>,
        audit: Arc<AuditStore>,
        verify_threshold: f32,
        verify_partial_threshold: f32,
        evaluation_deadline: Duration,
    ) -> Self {
        Self {
            engine,
            audit,
            verify_threshold,
            verify_partial_threshold,
            evaluation_deadline,
        }
    }

    pub fn audit_store(&self) -> &AuditStore {
        &self.audit
    }

    /// Evaluate a planned action. The audit append is the final step: a
    /// deadline abort earlier in the pipeline leaves no partial record.
    pub async fn evaluate(&self, request: &EvaluateRequest) -> Result<Assessment, GovernanceError> {
        let ctx = OperationContext::new("evaluate");
        let result = self.evaluate_inner(request).await;
        record_operation(
            &Operation::Evaluation {
                assessment: result
                    .as_ref()
                    .map(|a| a.assessment.to_string())
                    .unwrap_or_else(|_| "FAILED".to_string()),
                elapsed_ms: ctx.elapsed_ms(),
            },
            &result.as_ref().map(|_| ()).map_err(|e| e.to_string()),
        );
        result
    }

    async fn evaluate_inner(
        &self,
        request: &EvaluateRequest,
    ) -> Result<Assessment, GovernanceError> {
        let ctx = OperationContext::new("evaluate_inner");
        let deadline = Deadline::after(self.evaluation_deadline);
        let action = request.planned_action.as_str();

        // Safety screen on the action text alone, before anything else.
        let s_series_check = self.engine.safety_screen().screen(action);

        // Retrieval over the composed text. The composition is clipped
        // back to the query cap; the action always fits, the tail of an
        // oversized context is the part that gives.
        let mut composed = action.to_string();
        for extra in [&request.context, &request.concerns].into_iter().flatten() {
            if !extra.trim().is_empty() {
                composed.push(' ');
                composed.push_str(extra.trim());
            }
        }
        let composed: String = composed.chars().take(MAX_QUERY_CHARS).collect();

        let retrieval_request = RetrievalRequest {
            query: ValidatedQuery::new(composed)?,
            domain: None,
            include_constitution: true,
            include_methods: false,
            max_results: ValidatedLimit::default(),
            semantic_weight: None,
        };
        let retrieval = self.engine.retrieve(&retrieval_request, deadline).await?;

        // Per-principle compliance labelling. Explicit safety hits are
        // violations; high-confidence relevance needs modification;
        // the rest complies as planned.
        let mut compliance = Vec::with_capacity(retrieval.hits.len());
        let mut required_modifications = Vec::new();
        for hit in &retrieval.hits {
            let (status, finding) = if s_series_check.triggered
                && (hit.series.is_safety() || hit.safety_promoted)
            {
                (
                    ComplianceStatus::Violation,
                    format!(
                        "action matches safety trigger terms governed by '{}' ({})",
                        hit.title, hit.id
                    ),
                )
            } else if hit.confidence == Confidence::High {
                let directive = format!(
                    "align the action with {} ('{}') before proceeding",
                    hit.id, hit.title
                );
                required_modifications.push(directive.clone());
                (ComplianceStatus::NeedsModification, directive)
            } else {
                (
                    ComplianceStatus::Complies,
                    format!("no conflict found with '{}' at current relevance", hit.title),
                )
            };
            compliance.push(ComplianceEvaluation {
                principle_id: hit.id.as_str().to_string(),
                title: hit.title.clone(),
                status,
                finding,
            });
        }

        // Decision. The safety veto is terminal; nothing overrides it.
        let assessment = if s_series_check.triggered {
            AssessmentKind::Escalate
        } else if !required_modifications.is_empty() {
            AssessmentKind::ProceedWithModifications
        } else {
            AssessmentKind::Proceed
        };

        // Allocate the audit ID and append as the last step.
        let audit_id = new_audit_id();
        self.audit.append(AuditRecord {
            audit_id: audit_id.clone(),
            timestamp: Utc::now(),
            action_reviewed: action.to_string(),
            assessment,
            relevant_principle_ids: retrieval
                .hits
                .iter()
                .map(|h| h.id.as_str().to_string())
                .collect(),
            s_series_triggered: s_series_check.triggered,
        })?;

        Ok(Assessment {
            assessment,
            audit_id,
            s_series_check,
            compliance,
            required_modifications,
            relevant_principles: retrieval.hits,
            requires_ai_judgment: assessment != AssessmentKind::Escalate,
            elapsed_ms: ctx.elapsed_ms(),
        })
    }

    /// Post-hoc verification: does the audit trail show this action was
    /// evaluated? Substring containment (either direction,
    /// case-insensitive) is decisive; otherwise embedding similarity
    /// against reviewed actions, newest first.
    pub async fn verify_compliance(
        &self,
        action_description: &str,
        expected_principles: &[String],
    ) -> Result<VerificationResult, GovernanceError> {
        let description = ValidatedQuery::new(action_description)?;
        if expected_principles.len() > MAX_EXPECTED_PRINCIPLES {
            return Err(GovernanceError::InvalidInput(format!(
                "at most {MAX_EXPECTED_PRINCIPLES} expected principles"
            )));
        }
        if expected_principles
            .iter()
            .any(|p| p.chars().count() > MAX_ID_CHARS)
        {
            return Err(GovernanceError::InvalidInput(format!(
                "expected principle ids are capped at {MAX_ID_CHARS} characters"
            )));
        }

        let needle = description.as_str().to_lowercase();
        let mut records = self.audit.snapshot();
        records.reverse(); // newest first

        for record in &records {
            let reviewed = record.action_reviewed.to_lowercase();
            if reviewed.contains(&needle) || needle.contains(&reviewed) {
                return Ok(self.verdict(record, VerificationStatus::Compliant, expected_principles));
            }
        }

        // Similarity pass, skipped silently when the embedder is degraded.
        if let Some(query_vec) = self.engine.embed_text(description.as_str()).await {
            let mut best: Option<(f32, &AuditRecord)> = None;
            for record in &records {
                if let Some(vec) = self.engine.embed_text(&record.action_reviewed).await {
                    let sim = scoring::cosine_similarity(&query_vec, &vec);
                    if best.map(|(s, _)| sim > s).unwrap_or(true) {
                        best = Some((sim, record));
                    }
                }
            }
            if let Some((sim, record)) = best {
                if sim >= self.verify_threshold {
                    return Ok(self.verdict(
                        record,
                        VerificationStatus::Compliant,
                        expected_principles,
                    ));
                }
                if sim >= self.verify_partial_threshold {
                    return Ok(self.verdict(
                        record,
                        VerificationStatus::Partial,
                        expected_principles,
                    ));
                }
            }
        }

        Ok(VerificationResult {
            status: VerificationStatus::NonCompliant,
            matching_audit_id: None,
            finding: "no audit record matches this action".to_string(),
            timestamp: None,
        })
    }

    fn verdict(
        &self,
        record: &AuditRecord,
        status: VerificationStatus,
        expected_principles: &[String],
    ) -> VerificationResult {
        let mut finding = format!(
            "action was evaluated as {} under audit {}",
            record.assessment, record.audit_id
        );
        if !expected_principles.is_empty() {
            let missing: Vec<&str> = expected_principles
                .iter()
                .filter(|p| !record.relevant_principle_ids.contains(*p))
                .map(|p| p.as_str())
                .collect();
            if missing.is_empty() {
                finding.push_str("; all expected principles were considered");
            } else {
                finding.push_str(&format!(
                    "; expected principles not in the record: {}",
                    missing.join(", ")
                ));
            }
        }
        VerificationResult {
            status,
            matching_audit_id: Some(record.audit_id.clone()),
            finding,
            timestamp: Some(record.timestamp),
        }
    }
}
