// Per-domain Okapi BM25 state: tokenised document lengths, inverted
// postings, and a precomputed IDF table. Built once by the extractor,
// serialised into the global index, and queried read-only.

use crate::errors::GovernanceError;
use crate::pure::scoring;
use crate::types::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_K1: f32 = 1.5;
pub const DEFAULT_B: f32 = 0.75;

/// One posting: document position and term frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc: u32,
    pub tf: u32,
}

/// BM25 state for a single domain.
///
/// Maps are BTreeMaps so the serialised form is byte-stable: rebuilding an
/// unchanged corpus produces an identical index file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bm25State {
    /// Document position -> item ID. Positions are domain-local.
    pub doc_ids: Vec<ItemId>,
    pub doc_lengths: Vec<u32>,
    pub avg_doc_length: f32,
    pub postings: BTreeMap<String, Vec<Posting>>,
    /// Precomputed, clamped at build time; clamped again at query time so
    /// a hand-edited index cannot reintroduce negative lexical scores.
    pub idf: BTreeMap<String, f32>,
    pub k1: f32,
    pub b: f32,
}

impl Bm25State {
    /// Build from tokenised documents. Token lists come from
    /// [`crate::pure::text::content_tokens`] over each item's lexical text.
    pub fn build(docs: &[(ItemId, Vec<String>)]) -> Self {
        Self::build_with_params(docs, DEFAULT_K1, DEFAULT_B)
    }

    pub fn build_with_params(docs: &[(ItemId, Vec<String>)], k1: f32, b: f32) -> Self {
        let mut doc_ids = Vec::with_capacity(docs.len());
        let mut doc_lengths = Vec::with_capacity(docs.len());
        let mut postings: BTreeMap<String, Vec<Posting>> = BTreeMap::new();

        for (pos, (id, tokens)) in docs.iter().enumerate() {
            doc_ids.push(id.clone());
            doc_lengths.push(tokens.len() as u32);

            let mut tf: BTreeMap<&String, u32> = BTreeMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for (term, count) in tf {
                postings.entry(term.clone()).or_default().push(Posting {
                    doc: pos as u32,
                    tf: count,
                });
            }
        }

        let total_docs = doc_ids.len();
        let avg_doc_length = if total_docs == 0 {
            0.0
        } else {
            doc_lengths.iter().sum::<u32>() as f32 / total_docs as f32
        };

        let idf = postings
            .iter()
            .map(|(term, plist)| (term.clone(), scoring::bm25_idf(plist.len(), total_docs)))
            .collect();

        Self {
            doc_ids,
            doc_lengths,
            avg_doc_length,
            postings,
            idf,
            k1,
            b,
        }
    }

    pub fn doc_count(&self) -> usize {
        self.doc_ids.len()
    }

    /// Raw BM25 scores for every document in the domain, aligned with
    /// `doc_ids`. Zero for documents matching no query term.
    pub fn raw_scores(&self, query_tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.doc_ids.len()];
        for term in query_tokens {
            let Some(plist) = self.postings.get(term) else {
                continue;
            };
            // The clamp mirrors build time; see the struct doc.
            let idf = self.idf.get(term).copied().unwrap_or(0.0).max(0.0);
            if idf == 0.0 {
                continue;
            }
            for posting in plist {
                let doc = posting.doc as usize;
                scores[doc] += scoring::bm25_term_score(
                    idf,
                    posting.tf as f32,
                    self.doc_lengths[doc] as usize,
                    self.avg_doc_length,
                    self.k1,
                    self.b,
                );
            }
        }
        scores
    }

    /// Scores normalised into [0, 1] by the domain maximum.
    pub fn normalized_scores(&self, query_tokens: &[String]) -> Vec<f32> {
        let raw = self.raw_scores(query_tokens);
        let max = raw.iter().copied().fold(0.0f32, f32::max);
        raw.into_iter()
            .map(|s| scoring::normalize_lexical(s, max))
            .collect()
    }

    /// Structural validation run at index load.
    pub fn validate(&self) -> Result<(), GovernanceError> {
        if self.doc_ids.len() != self.doc_lengths.len() {
            return Err(GovernanceError::Format(format!(
                "bm25 state: {} doc ids but {} lengths",
                self.doc_ids.len(),
                self.doc_lengths.len()
            )));
        }
        if self.postings.len() != self.idf.len() {
            return Err(GovernanceError::Format(
                "bm25 state: postings and idf tables disagree".into(),
            ));
        }
        for (term, plist) in &self.postings {
            if plist.is_empty() {
                return Err(GovernanceError::Format(format!(
                    "bm25 state: term '{term}' has an empty posting list"
                )));
            }
            for posting in plist {
                if posting.doc as usize >= self.doc_ids.len() {
                    return Err(GovernanceError::Format(format!(
                        "bm25 state: term '{term}' references document {} of {}",
                        posting.doc,
                        self.doc_ids.len()
                    )));
                }
            }
            if !self.idf.contains_key(term) {
                return Err(GovernanceError::Format(format!(
                    "bm25 state: term '{term}' missing from idf table"
                )));
            }
        }
        Ok(())
    }
}
