// Fluent Builders - ergonomic construction of validated request and
// manifest values. Validation happens once at build() so call sites get
// the same guarantees as the typed constructors without the ceremony.

use crate::corpus::{CorpusManifest, DomainEntry};
use crate::errors::GovernanceError;
use crate::retrieval::RetrievalRequest;
use crate::types::{DomainName, SemanticWeight, ValidatedLimit, ValidatedQuery};

/// Builder for retrieval requests.
///
/// ```
/// use govdb::builders::QueryBuilder;
///
/// let request = QueryBuilder::new("rate limiting strategies")
///     .domain("ai-coding")
///     .max_results(5)
///     .build()
///     .unwrap();
/// assert_eq!(request.max_results.get(), 5);
/// ```
#[derive(Debug, Default)]
pub struct QueryBuilder {
    text: String,
    domain: Option<String>,
    include_constitution: bool,
    include_methods: bool,
    max_results: Option<usize>,
    semantic_weight: Option<f32>,
}

impl QueryBuilder {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            domain: None,
            include_constitution: true,
            include_methods: true,
            max_results: None,
            semantic_weight: None,
        }
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn include_constitution(mut self, include: bool) -> Self {
        self.include_constitution = include;
        self
    }

    pub fn include_methods(mut self, include: bool) -> Self {
        self.include_methods = include;
        self
    }

    pub fn max_results(mut self, limit: usize) -> Self {
        self.max_results = Some(limit);
        self
    }

    pub fn semantic_weight(mut self, alpha: f32) -> Self {
        self.semantic_weight = Some(alpha);
        self
    }

    pub fn build(self) -> Result<RetrievalRequest, GovernanceError> {
        let mut request = RetrievalRequest::new(ValidatedQuery::new(self.text)?);
        if let Some(domain) = self.domain {
            request.domain = Some(DomainName::new(domain)?);
        }
        request.include_constitution = self.include_constitution;
        request.include_methods = self.include_methods;
        if let Some(limit) = self.max_results {
            request.max_results = ValidatedLimit::new(limit)?;
        }
        if let Some(alpha) = self.semantic_weight {
            request.semantic_weight = Some(SemanticWeight::new(alpha)?);
        }
        Ok(request)
    }
}

/// Builder for corpus manifests, used heavily by tests and the examples
/// in the documentation.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    domains: Vec<DomainEntry>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(
        mut self,
        name: impl Into<String>,
        prefix: impl Into<String>,
        priority: u32,
        description: impl Into<String>,
        principles_file: impl Into<String>,
        methods_file: impl Into<String>,
    ) -> Self {
        self.domains.push(DomainEntry {
            name: name.into(),
            description: description.into(),
            priority,
            prefix: prefix.into(),
            principles_file: principles_file.into(),
            methods_file: methods_file.into(),
        });
        self
    }

    pub fn build(self) -> CorpusManifest {
        CorpusManifest {
            domains: self.domains,
        }
    }
}
