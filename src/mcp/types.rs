use serde::{Deserialize, Serialize};

/// MCP Protocol Types
/// Request/response shapes for the governance tool surface.

/// Tool definition advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryGovernanceRequest {
    pub query: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub include_constitution: Option<bool>,
    #[serde(default)]
    pub include_methods: Option<bool>,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub semantic_weight: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateGovernanceRequest {
    pub planned_action: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub concerns: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyComplianceRequest {
    pub action_description: String,
    #[serde(default)]
    pub expected_principles: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPrincipleRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDomainSummaryRequest {
    pub domain: String,
}
