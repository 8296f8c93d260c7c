//! MCP Tools Implementation
//!
//! The six governance tools exposed through the Model Context Protocol.
//! Each handler validates its payload into the typed request forms and
//! delegates to the shared server context.

use crate::context::ServerContext;
use crate::errors::GovernanceError;
use crate::governance::EvaluateRequest;
use crate::mcp::types::*;
use crate::retrieval::RetrievalRequest;
use crate::types::{DomainName, SemanticWeight, ValidatedLimit, ValidatedQuery};
use serde_json::json;
use std::sync::Arc;

/// Tool registry backed by the server context.
pub struct GovernanceTools {
    context: Arc<ServerContext>,
}

impl GovernanceTools {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    /// Route a `tools/call` to its handler.
    pub async fn handle_call(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, GovernanceError> {
        match name {
            "query_governance" => self.query_governance(parse(params)?).await,
            "evaluate_governance" => self.evaluate_governance(parse(params)?).await,
            "verify_governance_compliance" => self.verify_compliance(parse(params)?).await,
            "get_principle" => self.get_principle(parse(params)?),
            "list_domains" => self.list_domains(),
            "get_domain_summary" => self.get_domain_summary(parse(params)?),
            _ => Err(GovernanceError::NotFound(format!("unknown tool '{name}'"))),
        }
    }

    async fn query_governance(
        &self,
        request: QueryGovernanceRequest,
    ) -> Result<serde_json::Value, GovernanceError> {
        let mut retrieval = RetrievalRequest::new(ValidatedQuery::new(request.query)?);
        if let Some(domain) = request.domain {
            retrieval.domain = Some(DomainName::new(domain)?);
        }
        if let Some(include) = request.include_constitution {
            retrieval.include_constitution = include;
        }
        if let Some(include) = request.include_methods {
            retrieval.include_methods = include;
        }
        if let Some(limit) = request.max_results {
            retrieval.max_results = ValidatedLimit::new(limit)?;
        }
        if let Some(alpha) = request.semantic_weight {
            retrieval.semantic_weight = Some(SemanticWeight::new(alpha)?);
        }

        let response = self.context.query_governance(retrieval).await?;
        serde_json::to_value(response).map_err(|e| GovernanceError::Internal(e.to_string()))
    }

    async fn evaluate_governance(
        &self,
        request: EvaluateGovernanceRequest,
    ) -> Result<serde_json::Value, GovernanceError> {
        let evaluate =
            EvaluateRequest::new(request.planned_action, request.context, request.concerns)?;
        let assessment = self.context.evaluate_governance(evaluate).await?;
        serde_json::to_value(assessment).map_err(|e| GovernanceError::Internal(e.to_string()))
    }

    async fn verify_compliance(
        &self,
        request: VerifyComplianceRequest,
    ) -> Result<serde_json::Value, GovernanceError> {
        let expected = request.expected_principles.unwrap_or_default();
        let result = self
            .context
            .verify_compliance(&request.action_description, &expected)
            .await?;
        serde_json::to_value(result).map_err(|e| GovernanceError::Internal(e.to_string()))
    }

    fn get_principle(
        &self,
        request: GetPrincipleRequest,
    ) -> Result<serde_json::Value, GovernanceError> {
        let item = self.context.get_principle(&request.id)?;
        serde_json::to_value(item).map_err(|e| GovernanceError::Internal(e.to_string()))
    }

    fn list_domains(&self) -> Result<serde_json::Value, GovernanceError> {
        serde_json::to_value(self.context.list_domains())
            .map_err(|e| GovernanceError::Internal(e.to_string()))
    }

    fn get_domain_summary(
        &self,
        request: GetDomainSummaryRequest,
    ) -> Result<serde_json::Value, GovernanceError> {
        let summary = self.context.domain_summary(&request.domain)?;
        serde_json::to_value(summary).map_err(|e| GovernanceError::Internal(e.to_string()))
    }

    /// Definitions for `tools/list`.
    pub fn get_tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "query_governance".to_string(),
                description: "Retrieve ranked governance principles and methods for a \
                              natural-language query"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Natural-language query (max 10000 characters)"
                        },
                        "domain": {
                            "type": "string",
                            "description": "Restrict routing to one domain"
                        },
                        "include_constitution": {
                            "type": "boolean",
                            "description": "Include the universal constitution domain (default true)"
                        },
                        "include_methods": {
                            "type": "boolean",
                            "description": "Rank methods alongside principles (default true)"
                        },
                        "max_results": {
                            "type": "integer",
                            "minimum": 1,
                            "maximum": 50,
                            "description": "Maximum results to return (default 10)"
                        },
                        "semantic_weight": {
                            "type": "number",
                            "minimum": 0.0,
                            "maximum": 1.0,
                            "description": "Per-query fusion weight override"
                        }
                    },
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: "evaluate_governance".to_string(),
                description: "Evaluate a planned action against governance principles: \
                              PROCEED, PROCEED_WITH_MODIFICATIONS, or ESCALATE"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "planned_action": {
                            "type": "string",
                            "description": "The action under review (max 10000 characters)"
                        },
                        "context": {
                            "type": "string",
                            "description": "Supporting context (max 2000 characters)"
                        },
                        "concerns": {
                            "type": "string",
                            "description": "Caller concerns (max 1000 characters)"
                        }
                    },
                    "required": ["planned_action"]
                }),
            },
            ToolDefinition {
                name: "verify_governance_compliance".to_string(),
                description: "Check the audit trail for a prior evaluation of an action"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "action_description": {
                            "type": "string",
                            "description": "Description of the action to look up (max 10000 characters)"
                        },
                        "expected_principles": {
                            "type": "array",
                            "items": { "type": "string", "maxLength": 100 },
                            "maxItems": 20,
                            "description": "Principle IDs expected to have been considered"
                        }
                    },
                    "required": ["action_description"]
                }),
            },
            ToolDefinition {
                name: "get_principle".to_string(),
                description: "Fetch the full body of a principle or method by ID".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "id": {
                            "type": "string",
                            "maxLength": 100,
                            "description": "Item ID of the form prefix-category-slug"
                        }
                    },
                    "required": ["id"]
                }),
            },
            ToolDefinition {
                name: "list_domains".to_string(),
                description: "List the domain table in priority order".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            ToolDefinition {
                name: "get_domain_summary".to_string(),
                description: "Fetch a domain and the items it contains".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "domain": {
                            "type": "string",
                            "description": "Domain name"
                        }
                    },
                    "required": ["domain"]
                }),
            },
        ]
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T, GovernanceError> {
    serde_json::from_value(params)
        .map_err(|e| GovernanceError::InvalidInput(format!("malformed tool arguments: {e}")))
}
