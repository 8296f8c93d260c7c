// Domain Router - ranks domains by centroid similarity and applies the
// routing policy. Resolution is always an exhaustive lookup against the
// domain table; variable-length prefix matching is deliberately absent
// (two prefixes that share a leading substring must never collide).

use crate::errors::GovernanceError;
use crate::index_loader::LoadedIndex;
use crate::pure::scoring;
use crate::types::DomainName;
use tracing::debug;

/// Default centroid-similarity acceptance threshold.
pub const DEFAULT_DOMAIN_THRESHOLD: f32 = 0.30;

/// Route a query to candidate domains.
///
/// - An explicit domain routes to exactly that domain (unknown names are
///   an `InvalidInput`), still unioned with `constitution` unless the
///   caller suppressed it.
/// - Otherwise domains score by cosine against their centroid and pass at
///   `threshold`; `constitution` is included regardless of score because
///   it is universal.
/// - Without a query embedding (dense degraded) every domain is a
///   candidate so lexical search can still cover the corpus.
///
/// The returned order follows the domain table, which is priority order
/// with name as the build-time tie-break, so routing is deterministic.
pub fn route_domains(
    index: &LoadedIndex,
    query_embedding: Option<&[f32]>,
    explicit_domain: Option<&DomainName>,
    include_constitution: bool,
    threshold: f32,
) -> Result<Vec<DomainName>, GovernanceError> {
    if let Some(name) = explicit_domain {
        if index.domain(name).is_none() {
            return Err(GovernanceError::InvalidInput(format!(
                "unknown domain '{name}'"
            )));
        }
        let mut routed = Vec::with_capacity(2);
        // Keep table order: constitution has the lowest priority value in
        // any well-formed corpus, but the table is the source of truth.
        for domain in index.domains() {
            let is_explicit = &domain.name == name;
            let is_universal =
                include_constitution && domain.name.is_constitution();
            if is_explicit || is_universal {
                routed.push(domain.name.clone());
            }
        }
        return Ok(routed);
    }

    let mut routed = Vec::new();
    for domain in index.domains() {
        let accepted = if domain.name.is_constitution() {
            include_constitution
        } else {
            match query_embedding {
                Some(q) => {
                    let sim = scoring::cosine_similarity(q, index.centroid_vector(domain));
                    sim >= threshold
                }
                // Dense degraded: no centroid signal, so do not filter.
                None => true,
            }
        };
        if accepted {
            routed.push(domain.name.clone());
        }
    }

    // A query that clears no threshold still searches somewhere: fall
    // back to the full table rather than returning nothing.
    if routed.is_empty() {
        for domain in index.domains() {
            if include_constitution || !domain.name.is_constitution() {
                routed.push(domain.name.clone());
            }
        }
    }

    debug!(domains = ?routed.iter().map(|d| d.as_str()).collect::<Vec<_>>(), "routed");
    Ok(routed)
}
