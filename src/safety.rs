// Safety Promoter - guarantees safety-relevant principles surface whenever
// a query implicates safety, regardless of what lexical, dense, or rerank
// scores say. Runs after reranking so no upstream stage can demote a
// safety principle out of view.

use crate::index_loader::LoadedIndex;
use crate::models::{ItemRecord, SafetyCheck};
use crate::pure::text;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Documented default safety trigger terms. Deliberately stem-shaped
/// ("delet" covers delete/deleting/deletion) and matched as substrings of
/// the NFKC-folded action text. The list is configuration, not canon.
pub fn default_safety_keywords() -> Vec<String> {
    [
        "delet",
        "destroy",
        "wipe",
        "purge",
        "erase",
        "drop table",
        "rm -rf",
        "irreversible",
        "unrecoverable",
        "credential",
        "password",
        "secret key",
        "api key",
        "private key",
        "exfiltrat",
        "bypass safeguard",
        "bypass safety",
        "disable safety",
        "override safety",
        "force push",
        "production data",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Deterministic keyword screen over raw action/query text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyScreen {
    /// NFKC-folded, lowercased at construction.
    keywords: Vec<String>,
}

impl SafetyScreen {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| fold(k)).collect(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&default_safety_keywords())
    }

    /// Scan text for safety trigger terms. The input is NFKC-normalised
    /// before matching so homoglyph spellings (fullwidth letters, ligature
    /// forms) cannot slip past the screen.
    pub fn screen(&self, raw_text: &str) -> SafetyCheck {
        let folded = fold(raw_text);
        let matched: Vec<String> = self
            .keywords
            .iter()
            .filter(|k| folded.contains(k.as_str()))
            .cloned()
            .collect();
        SafetyCheck {
            triggered: !matched.is_empty(),
            matched_keywords: matched,
        }
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }
}

fn fold(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}

/// Safety-relevant items whose trigger phrases or keywords overlap the
/// query: the set the promoter lifts into a safety-triggered result.
pub fn promotable_items<'a>(index: &'a LoadedIndex, query_text: &str) -> Vec<&'a ItemRecord> {
    let folded_query = fold(query_text);
    let query_tokens: std::collections::HashSet<String> =
        text::content_tokens(query_text).into_iter().collect();

    index
        .items()
        .iter()
        .filter(|item| item.is_safety_relevant())
        .filter(|item| {
            let phrase_hit = item
                .trigger_phrases
                .iter()
                .any(|p| folded_query.contains(&fold(p)));
            let keyword_hit = item.keywords.iter().any(|k| query_tokens.contains(k));
            phrase_hit || keyword_hit
        })
        .collect()
}
