// Index Loader - reads an index directory whole at process start and
// exposes read-only accessors. Validation is all-or-nothing: any header,
// row-count, referential, or norm failure aborts the load, and the server
// never starts on a partial index.

use crate::bm25::Bm25State;
use crate::errors::GovernanceError;
use crate::index_builder::NORM_TOLERANCE;
use crate::index_format::{
    read_matrix, EmbeddingMatrix, GlobalIndexFile, IndexHeader, CONTENT_EMBEDDINGS_FILE,
    DOMAIN_EMBEDDINGS_FILE, GLOBAL_INDEX_FILE,
};
use crate::models::{Domain, ItemRecord};
use crate::pure::scoring;
use crate::types::DomainName;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

/// The in-memory index. Immutable after load; request handlers share it
/// by reference and never need mutable access.
#[derive(Debug)]
pub struct LoadedIndex {
    header: IndexHeader,
    /// Domain table in priority order.
    domains: Vec<Domain>,
    /// Principles then methods, the matrix row order.
    items: Vec<ItemRecord>,
    principle_count: usize,
    bm25_by_domain: HashMap<String, Bm25State>,
    content: EmbeddingMatrix,
    centroids: EmbeddingMatrix,
    item_index_by_id: HashMap<String, usize>,
    item_indices_by_domain: HashMap<String, Vec<usize>>,
    domain_index_by_name: HashMap<String, usize>,
}

impl LoadedIndex {
    /// Load and validate an index directory.
    pub fn load(dir: &Path) -> Result<Self, GovernanceError> {
        let global = GlobalIndexFile::read(&dir.join(GLOBAL_INDEX_FILE))?;
        let content = read_matrix(&dir.join(CONTENT_EMBEDDINGS_FILE))?;
        let centroids = read_matrix(&dir.join(DOMAIN_EMBEDDINGS_FILE))?;
        let index = Self::assemble(global, content, centroids)?;
        info!(
            items = index.items.len(),
            domains = index.domains.len(),
            dimension = index.header.dimension,
            model = %index.header.embedding_model,
            "index loaded"
        );
        Ok(index)
    }

    /// Assemble and validate from already-parsed parts (shared by `load`
    /// and the round-trip tests).
    pub fn assemble(
        global: GlobalIndexFile,
        content: EmbeddingMatrix,
        centroids: EmbeddingMatrix,
    ) -> Result<Self, GovernanceError> {
        let GlobalIndexFile {
            header,
            domains,
            principles,
            methods,
            bm25_by_domain,
        } = global;

        let principle_count = principles.len();
        let item_count = principle_count + methods.len();
        if header.item_count != item_count {
            return Err(GovernanceError::Format(format!(
                "header promises {} items, records hold {item_count}",
                header.item_count
            )));
        }
        if header.domain_count != domains.len() {
            return Err(GovernanceError::Format(format!(
                "header promises {} domains, table holds {}",
                header.domain_count,
                domains.len()
            )));
        }
        if content.rows() != item_count || content.dimension() != header.dimension {
            return Err(GovernanceError::Format(format!(
                "content matrix is {}x{}, header promises {}x{}",
                content.rows(),
                content.dimension(),
                item_count,
                header.dimension
            )));
        }
        if centroids.rows() != domains.len() || centroids.dimension() != header.dimension {
            return Err(GovernanceError::Format(format!(
                "centroid matrix is {}x{}, header promises {}x{}",
                centroids.rows(),
                centroids.dimension(),
                domains.len(),
                header.dimension
            )));
        }

        // Domain table: unique names/prefixes, valid and unique centroid rows.
        let mut domain_index_by_name = HashMap::new();
        let mut prefix_owner: HashMap<&str, &Domain> = HashMap::new();
        let mut centroid_rows = HashSet::new();
        for (idx, domain) in domains.iter().enumerate() {
            if domain_index_by_name
                .insert(domain.name.as_str().to_string(), idx)
                .is_some()
            {
                return Err(GovernanceError::Format(format!(
                    "duplicate domain '{}' in table",
                    domain.name
                )));
            }
            if prefix_owner.insert(domain.prefix.as_str(), domain).is_some() {
                return Err(GovernanceError::Format(format!(
                    "duplicate domain prefix '{}'",
                    domain.prefix
                )));
            }
            if domain.centroid_row >= domains.len() || !centroid_rows.insert(domain.centroid_row) {
                return Err(GovernanceError::Format(format!(
                    "domain '{}' has invalid centroid row {}",
                    domain.name, domain.centroid_row
                )));
            }
        }

        // Item records: ID uniqueness, domain membership via exhaustive
        // prefix lookup, dense unique rows.
        let items: Vec<ItemRecord> = principles.into_iter().chain(methods).collect();
        let mut item_index_by_id = HashMap::new();
        let mut item_indices_by_domain: HashMap<String, Vec<usize>> = HashMap::new();
        let mut rows_seen = HashSet::new();
        for (idx, item) in items.iter().enumerate() {
            item.validate()
                .map_err(|e| GovernanceError::Format(e.to_string()))?;
            if item_index_by_id
                .insert(item.id.as_str().to_string(), idx)
                .is_some()
            {
                return Err(GovernanceError::Format(format!(
                    "duplicate item id '{}'",
                    item.id
                )));
            }
            let Some(owner) = prefix_owner.get(item.id.prefix()) else {
                return Err(GovernanceError::Format(format!(
                    "item '{}' prefix matches no domain",
                    item.id
                )));
            };
            if owner.name != item.domain {
                return Err(GovernanceError::Format(format!(
                    "item '{}' claims domain '{}' but its prefix belongs to '{}'",
                    item.id, item.domain, owner.name
                )));
            }
            if item.embedding_row >= item_count || !rows_seen.insert(item.embedding_row) {
                return Err(GovernanceError::Format(format!(
                    "item '{}' has invalid embedding row {}",
                    item.id, item.embedding_row
                )));
            }
            item_indices_by_domain
                .entry(item.domain.as_str().to_string())
                .or_default()
                .push(idx);
        }

        // Unit-norm invariant over both matrices.
        for row in 0..content.rows() {
            let v = content.row(row).expect("row bound checked above");
            if !scoring::is_unit_norm(v, NORM_TOLERANCE) {
                return Err(GovernanceError::Format(format!(
                    "content row {row} is not unit-norm"
                )));
            }
        }
        for row in 0..centroids.rows() {
            let v = centroids.row(row).expect("row bound checked above");
            if !scoring::is_unit_norm(v, NORM_TOLERANCE) {
                return Err(GovernanceError::Format(format!(
                    "centroid row {row} is not unit-norm"
                )));
            }
        }

        // BM25 states: structurally sound and referencing known items.
        for (domain_name, state) in &bm25_by_domain {
            if !domain_index_by_name.contains_key(domain_name) {
                return Err(GovernanceError::Format(format!(
                    "bm25 state for unknown domain '{domain_name}'"
                )));
            }
            state.validate()?;
            for id in &state.doc_ids {
                if !item_index_by_id.contains_key(id.as_str()) {
                    return Err(GovernanceError::Format(format!(
                        "bm25 state for '{domain_name}' references unknown item '{id}'"
                    )));
                }
            }
        }
        for domain in &domains {
            if !bm25_by_domain.contains_key(domain.name.as_str()) {
                return Err(GovernanceError::Format(format!(
                    "domain '{}' has no bm25 state",
                    domain.name
                )));
            }
        }

        Ok(Self {
            header,
            domains,
            items,
            principle_count,
            bm25_by_domain: bm25_by_domain.into_iter().collect(),
            content,
            centroids,
            item_index_by_id,
            item_indices_by_domain,
            domain_index_by_name,
        })
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    /// Domain table in priority order.
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn domain(&self, name: &DomainName) -> Option<&Domain> {
        self.domain_index_by_name
            .get(name.as_str())
            .map(|&idx| &self.domains[idx])
    }

    pub fn item_by_id(&self, id: &str) -> Option<&ItemRecord> {
        self.item_index_by_id.get(id).map(|&idx| &self.items[idx])
    }

    pub fn item_by_row(&self, row: usize) -> Option<&ItemRecord> {
        self.items.iter().find(|item| item.embedding_row == row)
    }

    /// All items, principles first, in matrix row order.
    pub fn items(&self) -> &[ItemRecord] {
        &self.items
    }

    pub fn principles(&self) -> &[ItemRecord] {
        &self.items[..self.principle_count]
    }

    pub fn methods(&self) -> &[ItemRecord] {
        &self.items[self.principle_count..]
    }

    pub fn items_in_domain(&self, name: &DomainName) -> Vec<&ItemRecord> {
        self.item_indices_by_domain
            .get(name.as_str())
            .map(|indices| indices.iter().map(|&i| &self.items[i]).collect())
            .unwrap_or_default()
    }

    pub fn bm25(&self, name: &DomainName) -> Option<&Bm25State> {
        self.bm25_by_domain.get(name.as_str())
    }

    pub fn item_vector(&self, item: &ItemRecord) -> &[f32] {
        self.content
            .row(item.embedding_row)
            .expect("embedding rows validated at load")
    }

    pub fn centroid_vector(&self, domain: &Domain) -> &[f32] {
        self.centroids
            .row(domain.centroid_row)
            .expect("centroid rows validated at load")
    }

    /// Re-serialise the stable fields; used by the round-trip tests.
    pub fn to_global_file(&self) -> GlobalIndexFile {
        GlobalIndexFile {
            header: self.header.clone(),
            domains: self.domains.clone(),
            principles: self.items[..self.principle_count].to_vec(),
            methods: self.items[self.principle_count..].to_vec(),
            bm25_by_domain: self
                .bm25_by_domain
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}
