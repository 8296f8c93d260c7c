// Index Builder - the offline extraction pass. Orchestrates parse →
// tokenise → BM25 → embed → normalise → serialise, validating referential
// integrity before anything touches disk. The output directory appears
// atomically: everything is written to a sibling temp directory first and
// renamed into place in one step, so a crashed build leaves no readable
// half-index.

use crate::bm25::Bm25State;
use crate::corpus::{extract_corpus, CorpusManifest};
use crate::embeddings::EmbeddingService;
use crate::errors::GovernanceError;
use crate::index_format::{
    write_matrix, EmbeddingMatrix, GlobalIndexFile, IndexHeader, CONTENT_EMBEDDINGS_FILE,
    DOMAIN_EMBEDDINGS_FILE, FORMAT_VERSION, GLOBAL_INDEX_FILE,
};
use crate::models::{Domain, ItemRecord};
use crate::pure::scoring;
use crate::pure::text;
use crate::types::DomainName;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Unit-norm tolerance asserted on every vector before serialisation.
pub const NORM_TOLERANCE: f32 = 1e-4;

/// Summary of a completed build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub principle_count: usize,
    pub method_count: usize,
    pub domain_count: usize,
    pub dimension: usize,
    pub corpus_sha256: String,
}

/// Build an index from a manifest file path.
pub async fn build_index(
    manifest_path: &Path,
    out_dir: &Path,
    embeddings: &EmbeddingService,
) -> Result<BuildReport, GovernanceError> {
    let (manifest, base_dir) = CorpusManifest::from_file(manifest_path)?;
    build_index_from_manifest(&manifest, &base_dir, out_dir, embeddings).await
}

/// Build an index from an in-memory manifest resolved against `base_dir`.
pub async fn build_index_from_manifest(
    manifest: &CorpusManifest,
    base_dir: &Path,
    out_dir: &Path,
    embeddings: &EmbeddingService,
) -> Result<BuildReport, GovernanceError> {
    let corpus = extract_corpus(manifest, base_dir)?;
    let corpus_sha256 = hash_corpus(manifest, base_dir)?;

    // Items in serialisation order: principles then methods, each already
    // ID-sorted by the extractor. Row assignment follows this order, so
    // rows are unique and dense by construction.
    let mut principles = corpus.principles;
    let mut methods = corpus.methods;
    for (row, item) in principles.iter_mut().chain(methods.iter_mut()).enumerate() {
        item.embedding_row = row;
        item.validate()
            .map_err(|e| GovernanceError::Parse(e.to_string()))?;
    }
    let item_count = principles.len() + methods.len();
    if item_count == 0 {
        return Err(GovernanceError::Parse(
            "corpus produced no retrievable items".into(),
        ));
    }

    // Domain table in priority order; the extractor's manifest validation
    // already guaranteed distinct priorities and prefixes.
    let mut entries = manifest.domains.clone();
    entries.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.name.cmp(&b.name)));
    let mut domains = Vec::with_capacity(entries.len());
    for (centroid_row, entry) in entries.iter().enumerate() {
        let name = DomainName::new(entry.name.clone())?;
        let principle_count = principles.iter().filter(|i| i.domain == name).count();
        let method_count = methods.iter().filter(|i| i.domain == name).count();
        domains.push(Domain {
            name,
            description: entry.description.clone(),
            priority: entry.priority,
            prefix: entry.prefix.clone(),
            centroid_row,
            principle_count,
            method_count,
        });
    }

    // Per-domain BM25 over the lexical text of the domain's items.
    let mut bm25_by_domain = BTreeMap::new();
    for domain in &domains {
        let docs: Vec<_> = principles
            .iter()
            .chain(methods.iter())
            .filter(|i| i.domain == domain.name)
            .map(|i| (i.id.clone(), text::content_tokens(&i.lexical_text())))
            .collect();
        bm25_by_domain.insert(domain.name.as_str().to_string(), Bm25State::build(&docs));
    }

    // Dense matrices. The builder embeds in provider-sized batches and
    // re-asserts the unit-norm invariant on every row.
    let item_texts: Vec<String> = principles
        .iter()
        .chain(methods.iter())
        .map(ItemRecord::embedding_text)
        .collect();
    let item_vectors = embeddings
        .embed_batch(&item_texts)
        .await
        .map_err(|e| GovernanceError::ModelUnavailable(format!("embedding items: {e}")))?;

    let centroid_texts: Vec<String> = domains
        .iter()
        .map(|d| {
            let titles: Vec<&str> = principles
                .iter()
                .chain(methods.iter())
                .filter(|i| i.domain == d.name)
                .map(|i| i.title.as_str())
                .collect();
            format!("{}\n{}\n{}", d.name, d.description, titles.join("\n"))
        })
        .collect();
    let centroid_vectors = embeddings
        .embed_batch(&centroid_texts)
        .await
        .map_err(|e| GovernanceError::ModelUnavailable(format!("embedding centroids: {e}")))?;

    let dimension = embeddings.dimension();
    let content_matrix = normalized_matrix(item_vectors, dimension, "item")?;
    let centroid_matrix = normalized_matrix(centroid_vectors, dimension, "centroid")?;

    let header = IndexHeader {
        format_version: FORMAT_VERSION,
        dimension,
        item_count,
        domain_count: domains.len(),
        corpus_sha256: corpus_sha256.clone(),
        embedding_model: embeddings.model_id().to_string(),
    };

    let global = GlobalIndexFile {
        header,
        domains,
        principles,
        methods,
        bm25_by_domain,
    };

    write_atomically(out_dir, &global, &content_matrix, &centroid_matrix)?;

    info!(
        principles = global.principles.len(),
        methods = global.methods.len(),
        domains = global.domains.len(),
        dimension,
        out = %out_dir.display(),
        "index build complete"
    );

    Ok(BuildReport {
        principle_count: global.principles.len(),
        method_count: global.methods.len(),
        domain_count: global.domains.len(),
        dimension,
        corpus_sha256,
    })
}

fn normalized_matrix(
    mut vectors: Vec<Vec<f32>>,
    dimension: usize,
    what: &str,
) -> Result<EmbeddingMatrix, GovernanceError> {
    for (row, vector) in vectors.iter_mut().enumerate() {
        if vector.len() != dimension {
            return Err(GovernanceError::Format(format!(
                "{what} row {row} has dimension {} instead of {dimension}",
                vector.len()
            )));
        }
        if !scoring::l2_normalize(vector) {
            return Err(GovernanceError::Format(format!(
                "{what} row {row} is a zero vector and cannot be normalised"
            )));
        }
        if !scoring::is_unit_norm(vector, NORM_TOLERANCE) {
            return Err(GovernanceError::Format(format!(
                "{what} row {row} failed the unit-norm assertion"
            )));
        }
    }
    EmbeddingMatrix::from_rows(vectors, dimension)
}

/// SHA-256 over every source file in manifest order.
fn hash_corpus(manifest: &CorpusManifest, base_dir: &Path) -> Result<String, GovernanceError> {
    let mut hasher = Sha256::new();
    for entry in &manifest.domains {
        for file in [&entry.principles_file, &entry.methods_file] {
            let path = base_dir.join(file);
            let bytes = std::fs::read(&path).map_err(|e| {
                GovernanceError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            hasher.update(file.as_bytes());
            hasher.update([0u8]);
            hasher.update(&bytes);
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

fn write_atomically(
    out_dir: &Path,
    global: &GlobalIndexFile,
    content: &EmbeddingMatrix,
    centroids: &EmbeddingMatrix,
) -> Result<(), GovernanceError> {
    let parent = out_dir.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|e| GovernanceError::Format(format!("create {}: {e}", parent.display())))?;

    let tmp_dir = parent.join(format!(
        ".{}.tmp-{}",
        out_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("index"),
        std::process::id()
    ));
    if tmp_dir.exists() {
        std::fs::remove_dir_all(&tmp_dir)
            .map_err(|e| GovernanceError::Format(format!("clear {}: {e}", tmp_dir.display())))?;
    }
    std::fs::create_dir_all(&tmp_dir)
        .map_err(|e| GovernanceError::Format(format!("create {}: {e}", tmp_dir.display())))?;

    global.write(&tmp_dir.join(GLOBAL_INDEX_FILE))?;
    write_matrix(&tmp_dir.join(CONTENT_EMBEDDINGS_FILE), content)?;
    write_matrix(&tmp_dir.join(DOMAIN_EMBEDDINGS_FILE), centroids)?;

    if out_dir.exists() {
        std::fs::remove_dir_all(out_dir)
            .map_err(|e| GovernanceError::Format(format!("replace {}: {e}", out_dir.display())))?;
    }
    std::fs::rename(&tmp_dir, out_dir).map_err(|e| {
        GovernanceError::Format(format!(
            "rename {} -> {}: {e}",
            tmp_dir.display(),
            out_dir.display()
        ))
    })
}
