// Validated Types - strongly-typed wrappers that enforce invariants at
// construction time. Pipeline code downstream of these types never
// re-checks lengths, character sets, or bounds.

use crate::errors::GovernanceError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted query / planned-action length in characters.
pub const MAX_QUERY_CHARS: usize = 10_000;
/// Maximum accepted evaluation context length in characters.
pub const MAX_CONTEXT_CHARS: usize = 2_000;
/// Maximum accepted evaluation concerns length in characters.
pub const MAX_CONCERNS_CHARS: usize = 1_000;
/// Maximum result count a caller may request.
pub const MAX_RESULTS_LIMIT: usize = 50;
/// Maximum accepted item-ID length in characters.
pub const MAX_ID_CHARS: usize = 100;

/// A query string that is guaranteed non-empty and within the length cap.
///
/// # Invariants
/// - Non-empty after trimming
/// - At most [`MAX_QUERY_CHARS`] characters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedQuery {
    inner: String,
}

impl ValidatedQuery {
    pub fn new(text: impl Into<String>) -> Result<Self, GovernanceError> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(GovernanceError::InvalidInput(
                "query cannot be empty".into(),
            ));
        }
        let chars = trimmed.chars().count();
        if chars > MAX_QUERY_CHARS {
            return Err(GovernanceError::InvalidInput(format!(
                "query is {chars} characters, maximum is {MAX_QUERY_CHARS}"
            )));
        }
        Ok(Self {
            inner: trimmed.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// A retrievable item identifier of the form `{prefix}-{category}-{slug}`.
///
/// # Invariants
/// - Only `[a-z0-9-]` characters
/// - At least three hyphen-separated segments, none empty
/// - At most [`MAX_ID_CHARS`] characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId {
    inner: String,
}

impl ItemId {
    pub fn new(id: impl Into<String>) -> Result<Self, GovernanceError> {
        let id = id.into();
        if id.is_empty() || id.chars().count() > MAX_ID_CHARS {
            return Err(GovernanceError::InvalidInput(format!(
                "item id must be 1..={MAX_ID_CHARS} characters"
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(GovernanceError::InvalidInput(format!(
                "item id '{id}' contains characters outside [a-z0-9-]"
            )));
        }
        let segments: Vec<&str> = id.split('-').collect();
        if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(GovernanceError::InvalidInput(format!(
                "item id '{id}' must have the form prefix-category-slug"
            )));
        }
        Ok(Self { inner: id })
    }

    /// Synthesize an ID from its parts. Parts are assumed pre-slugified.
    pub fn synthesize(prefix: &str, category: &str, slug: &str) -> Result<Self, GovernanceError> {
        Self::new(format!("{prefix}-{category}-{slug}"))
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Leading segment, matched exhaustively against the domain table.
    pub fn prefix(&self) -> &str {
        self.inner.split('-').next().unwrap_or("")
    }

    /// Second segment: the series/category tag.
    pub fn category(&self) -> &str {
        self.inner.split('-').nth(1).unwrap_or("")
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// A domain key: stable, lowercase, hyphen-separated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainName {
    inner: String,
}

impl DomainName {
    pub fn new(name: impl Into<String>) -> Result<Self, GovernanceError> {
        let name = name.into();
        if name.is_empty() || name.len() > 64 {
            return Err(GovernanceError::InvalidInput(
                "domain name must be 1..=64 characters".into(),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(GovernanceError::InvalidInput(format!(
                "domain name '{name}' contains characters outside [a-z0-9-]"
            )));
        }
        Ok(Self { inner: name })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// The universal domain that routing always includes.
    pub fn constitution() -> Self {
        Self {
            inner: "constitution".to_string(),
        }
    }

    pub fn is_constitution(&self) -> bool {
        self.inner == "constitution"
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// A result-count limit bounded to `1..=MAX_RESULTS_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedLimit {
    inner: usize,
}

impl ValidatedLimit {
    pub fn new(limit: usize) -> Result<Self, GovernanceError> {
        if limit == 0 || limit > MAX_RESULTS_LIMIT {
            return Err(GovernanceError::InvalidInput(format!(
                "max_results must be 1..={MAX_RESULTS_LIMIT}, got {limit}"
            )));
        }
        Ok(Self { inner: limit })
    }

    pub fn get(&self) -> usize {
        self.inner
    }
}

impl Default for ValidatedLimit {
    fn default() -> Self {
        Self { inner: 10 }
    }
}

/// The semantic fusion weight α, bounded to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SemanticWeight {
    inner: f32,
}

impl SemanticWeight {
    pub fn new(alpha: f32) -> Result<Self, GovernanceError> {
        if !(0.0..=1.0).contains(&alpha) || !alpha.is_finite() {
            return Err(GovernanceError::InvalidInput(format!(
                "semantic_weight must be within [0, 1], got {alpha}"
            )));
        }
        Ok(Self { inner: alpha })
    }

    pub fn get(&self) -> f32 {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_query_bounds() {
        assert!(ValidatedQuery::new("rate limiting strategies").is_ok());
        assert!(ValidatedQuery::new("").is_err());
        assert!(ValidatedQuery::new("   ").is_err());

        // Exactly at the cap is accepted, one past it is rejected.
        let at_cap = "q".repeat(MAX_QUERY_CHARS);
        assert!(ValidatedQuery::new(at_cap).is_ok());
        let over_cap = "q".repeat(MAX_QUERY_CHARS + 1);
        assert!(ValidatedQuery::new(over_cap).is_err());
    }

    #[test]
    fn test_query_is_trimmed() {
        let q = ValidatedQuery::new("  how to handle secrets  ").unwrap();
        assert_eq!(q.as_str(), "how to handle secrets");
    }

    #[test]
    fn test_item_id_shape() {
        let id = ItemId::new("coding-context-specification-completeness").unwrap();
        assert_eq!(id.prefix(), "coding");
        assert_eq!(id.category(), "context");

        assert!(ItemId::new("Coding-Context-X").is_err()); // uppercase
        assert!(ItemId::new("coding-context").is_err()); // two segments
        assert!(ItemId::new("coding--slug").is_err()); // empty segment
        assert!(ItemId::new("").is_err());
    }

    #[test]
    fn test_item_id_synthesize() {
        let id = ItemId::synthesize("const", "s", "no-irreversible-actions").unwrap();
        assert_eq!(id.as_str(), "const-s-no-irreversible-actions");
    }

    #[test]
    fn test_domain_name() {
        assert!(DomainName::new("multi-agent").is_ok());
        assert!(DomainName::new("Multi Agent").is_err());
        assert!(DomainName::constitution().is_constitution());
    }

    #[test]
    fn test_limit_and_weight_bounds() {
        assert!(ValidatedLimit::new(1).is_ok());
        assert!(ValidatedLimit::new(50).is_ok());
        assert!(ValidatedLimit::new(0).is_err());
        assert!(ValidatedLimit::new(51).is_err());

        assert!(SemanticWeight::new(0.0).is_ok());
        assert!(SemanticWeight::new(1.0).is_ok());
        assert!(SemanticWeight::new(-0.1).is_err());
        assert!(SemanticWeight::new(f32::NAN).is_err());
    }
}
