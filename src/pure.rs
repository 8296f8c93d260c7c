// Pure Functions Module
// Every function here is deterministic over its inputs with no I/O and no
// shared state, so the scoring pipeline can be tested exhaustively without
// fixtures.

/// Text processing - pure functions
pub mod text {
    /// Stop words excluded from keyword extraction and BM25 tokenisation.
    /// Deliberately small: governance prose is keyword-dense and aggressive
    /// stop-wording was observed to hurt trigger matching.
    pub const STOP_WORDS: &[&str] = &[
        "the", "a", "an", "and", "or", "but", "if", "then", "else", "when", "while", "for", "to",
        "of", "in", "on", "at", "by", "with", "from", "as", "is", "are", "was", "were", "be",
        "been", "being", "it", "its", "this", "that", "these", "those", "you", "your", "not",
        "all", "any", "can", "will", "should", "must", "may", "might", "have", "has", "had", "do",
        "does", "did", "their", "there", "they", "them", "what", "which", "who", "how", "than",
        "too", "very", "into", "over", "under", "about", "each", "such", "only", "also", "more",
        "most", "other", "some", "same", "both", "use", "used", "using",
    ];

    pub fn is_stop_word(token: &str) -> bool {
        STOP_WORDS.contains(&token)
    }

    /// Lowercase alphanumeric-only split. The single tokenisation used for
    /// BM25 documents, BM25 queries, and keyword extraction, so lexical
    /// scores stay comparable across all three.
    pub fn tokenize(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        for ch in text.chars() {
            if ch.is_alphanumeric() {
                current.extend(ch.to_lowercase());
            } else if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        tokens
    }

    /// Tokenise, drop stop words and short tokens. Used for BM25 documents
    /// and queries.
    pub fn content_tokens(text: &str) -> Vec<String> {
        tokenize(text)
            .into_iter()
            .filter(|t| t.len() >= 3 && !is_stop_word(t))
            .collect()
    }

    /// Keyword extraction: content tokens, deduplicated preserving first
    /// occurrence.
    pub fn extract_keywords(text: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut keywords = Vec::new();
        for token in content_tokens(text) {
            if seen.insert(token.clone()) {
                keywords.push(token);
            }
        }
        keywords
    }

    /// Slugify a heading into the ID segment: lowercase, non-alphanumerics
    /// collapsed into single hyphens, no leading/trailing hyphen.
    pub fn slugify(title: &str) -> String {
        let mut slug = String::with_capacity(title.len());
        let mut last_hyphen = true; // suppress a leading hyphen
        for ch in title.chars() {
            if ch.is_alphanumeric() {
                slug.extend(ch.to_lowercase());
                last_hyphen = false;
            } else if !last_hyphen {
                slug.push('-');
                last_hyphen = true;
            }
        }
        while slug.ends_with('-') {
            slug.pop();
        }
        slug
    }

    /// First `max_chars` of content with markdown emphasis markers and
    /// newlines flattened, cut at a char boundary.
    pub fn snippet(content: &str, max_chars: usize) -> String {
        let flat: String = content
            .replace("**", "")
            .replace('\n', " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if flat.chars().count() <= max_chars {
            return flat;
        }
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut.trim_end())
    }

    /// Jaccard similarity of two token sets. Used by the lexical-overlap
    /// reranker fallback.
    pub fn jaccard_similarity(a: &[String], b: &[String]) -> f32 {
        if a.is_empty() && b.is_empty() {
            return 0.0;
        }
        let set_a: std::collections::HashSet<&String> = a.iter().collect();
        let set_b: std::collections::HashSet<&String> = b.iter().collect();
        let intersection = set_a.intersection(&set_b).count();
        let union = set_a.union(&set_b).count();
        if union == 0 {
            0.0
        } else {
            intersection as f32 / union as f32
        }
    }
}

/// Scoring and relevance - pure functions
pub mod scoring {
    /// Okapi BM25 inverse document frequency.
    ///
    /// On small corpora where a term appears in most documents the raw IDF
    /// goes negative; it is clamped to zero here so no negative lexical
    /// score can ever reach fusion. This clamp is load-bearing.
    pub fn bm25_idf(document_frequency: usize, total_documents: usize) -> f32 {
        if document_frequency == 0 || total_documents == 0 {
            return 0.0;
        }
        let idf = (((total_documents - document_frequency) as f32 + 0.5)
            / (document_frequency as f32 + 0.5))
            .ln();
        idf.max(0.0)
    }

    /// Okapi BM25 per-term contribution given a precomputed (clamped) IDF.
    pub fn bm25_term_score(
        idf: f32,
        term_frequency: f32,
        document_length: usize,
        average_document_length: f32,
        k1: f32,
        b: f32,
    ) -> f32 {
        if average_document_length <= 0.0 {
            return 0.0;
        }
        let dl_norm = document_length as f32 / average_document_length;
        let tf_component =
            (term_frequency * (k1 + 1.0)) / (term_frequency + k1 * (1.0 - b + b * dl_norm));
        idf * tf_component
    }

    /// Normalise raw BM25 scores into [0, 1] by the corpus maximum.
    /// Negative inputs (impossible after the IDF clamp, but cheap to state)
    /// and division blow-ups are both pinned.
    pub fn normalize_lexical(score: f32, max_score: f32) -> f32 {
        const EPSILON: f32 = 1e-6;
        let s = score.max(0.0) / max_score.max(EPSILON);
        s.clamp(0.0, 1.0)
    }

    /// Cosine similarity of two vectors. Unit-norm inputs give [-1, 1].
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    /// Map a cosine in [-1, 1] to a dense score in [0, 1].
    pub fn dense_score(cosine: f32) -> f32 {
        ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
    }

    /// Convex fusion of dense and lexical scores.
    /// `alpha` is the semantic weight, clamped to [0, 1].
    pub fn fuse(dense: f32, lexical: f32, alpha: f32) -> f32 {
        let alpha = alpha.clamp(0.0, 1.0);
        (alpha * dense + (1.0 - alpha) * lexical).clamp(0.0, 1.0)
    }

    /// L2-normalise a vector in place. Zero vectors are left untouched and
    /// reported so the builder can fail the norm invariant explicitly.
    pub fn l2_normalize(v: &mut [f32]) -> bool {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return false;
        }
        for x in v.iter_mut() {
            *x /= norm;
        }
        true
    }

    /// True when the vector's L2 norm is 1 within `tolerance`.
    pub fn is_unit_norm(v: &[f32], tolerance: f32) -> bool {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        (norm - 1.0).abs() <= tolerance
    }
}
