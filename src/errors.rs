// Error taxonomy surfaced at the API boundary.
// Internal plumbing uses anyhow; every failure that can reach a caller is
// folded into one of these kinds before it leaves the crate.

use thiserror::Error;

/// Errors visible to callers of the retrieval and governance APIs.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// Missing or inconsistent manifest/configuration. Fatal at build or startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed corpus content or duplicate identifiers. Fatal at build.
    #[error("corpus parse error: {0}")]
    Parse(String),

    /// Index header mismatch, row-count mismatch, or unnormalised vectors.
    /// Fatal at load; the server never starts on a partial index.
    #[error("index format error: {0}")]
    Format(String),

    /// Embedder or reranker cannot be invoked. Callers never see this kind;
    /// the pipeline degrades and logs instead. It exists so the degradation
    /// site has a typed cause to latch on.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Bad caller input: oversized query, unknown domain name, malformed ID.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Admission limit reached. Callers should retry after backoff.
    #[error("server overloaded, retry later")]
    Overloaded,

    /// The request deadline expired mid-pipeline. No audit record is
    /// written when this is returned.
    #[error("deadline expired during {0}")]
    Deadline(&'static str),

    /// Lookup of an identifier that is not in the index.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invariant violation. Logged and surfaced generically in release.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GovernanceError {
    /// Stable machine-readable code for the MCP layer.
    pub fn code(&self) -> &'static str {
        match self {
            GovernanceError::Config(_) => "CONFIG_ERROR",
            GovernanceError::Parse(_) => "PARSE_ERROR",
            GovernanceError::Format(_) => "FORMAT_ERROR",
            GovernanceError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            GovernanceError::InvalidInput(_) => "INVALID_INPUT",
            GovernanceError::Overloaded => "OVERLOADED",
            GovernanceError::Deadline(_) => "DEADLINE",
            GovernanceError::NotFound(_) => "NOT_FOUND",
            GovernanceError::Internal(_) => "INTERNAL",
        }
    }

    /// True for kinds a caller can recover from by changing the request
    /// or retrying. Fatal kinds abort startup instead.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GovernanceError::InvalidInput(_)
                | GovernanceError::Overloaded
                | GovernanceError::Deadline(_)
                | GovernanceError::NotFound(_)
        )
    }

    /// JSON-RPC error code used by the stdio server.
    pub fn rpc_code(&self) -> i32 {
        match self {
            GovernanceError::InvalidInput(_) => -32602,
            GovernanceError::NotFound(_) => -32001,
            GovernanceError::Overloaded => -32002,
            GovernanceError::Deadline(_) => -32003,
            _ => -32603,
        }
    }
}

/// Aggregate of build-time failures. The extractor reports every missing
/// file and duplicate ID in one pass rather than stopping at the first.
#[derive(Debug, Default)]
pub struct BuildErrorSet {
    errors: Vec<GovernanceError>,
}

impl BuildErrorSet {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn push(&mut self, err: GovernanceError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[GovernanceError] {
        &self.errors
    }

    /// Collapse the set into a single fatal error, or Ok when empty.
    pub fn into_result(self) -> Result<(), GovernanceError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let joined = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(GovernanceError::Parse(format!(
            "{} build error(s): {}",
            self.errors.len(),
            joined
        )))
    }
}
