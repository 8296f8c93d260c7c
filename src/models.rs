// Core Data Model - immutable records produced by the extractor and
// consumed read-only by the retrieval pipeline. Construction validates the
// invariants; nothing downstream mutates a record after the index is built.

use crate::types::{DomainName, ItemId};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Series tag classifying a retrievable item. `S` is the safety series and
/// holds veto authority in governance evaluation; `Method` marks procedural
/// content ranked alongside principles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesCode {
    S,
    C,
    Q,
    O,
    P,
    G,
    MA,
    Method,
    None,
}

impl SeriesCode {
    /// Tie-break precedence: safety first, then the series in their
    /// documented order, methods after principles, untagged last.
    pub fn priority(&self) -> u8 {
        match self {
            SeriesCode::S => 0,
            SeriesCode::C => 1,
            SeriesCode::Q => 2,
            SeriesCode::O => 3,
            SeriesCode::P => 4,
            SeriesCode::G => 5,
            SeriesCode::MA => 6,
            SeriesCode::Method => 7,
            SeriesCode::None => 8,
        }
    }

    /// ID category segment for this series.
    pub fn category(&self) -> &'static str {
        match self {
            SeriesCode::S => "s",
            SeriesCode::C => "context",
            SeriesCode::Q => "quality",
            SeriesCode::O => "core",
            SeriesCode::P => "process",
            SeriesCode::G => "g",
            SeriesCode::MA => "ma",
            SeriesCode::Method => "method",
            SeriesCode::None => "core",
        }
    }

    /// Parse a series letter as it appears in heading markers
    /// ("S-Series", "Series MA", ...). Case-insensitive.
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.to_ascii_uppercase().as_str() {
            "S" => Some(SeriesCode::S),
            "C" => Some(SeriesCode::C),
            "Q" => Some(SeriesCode::Q),
            "O" => Some(SeriesCode::O),
            "P" => Some(SeriesCode::P),
            "G" => Some(SeriesCode::G),
            "MA" => Some(SeriesCode::MA),
            _ => None,
        }
    }

    pub fn is_safety(&self) -> bool {
        matches!(self, SeriesCode::S)
    }

    pub fn is_method(&self) -> bool {
        matches!(self, SeriesCode::Method)
    }
}

impl fmt::Display for SeriesCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SeriesCode::S => "S",
            SeriesCode::C => "C",
            SeriesCode::Q => "Q",
            SeriesCode::O => "O",
            SeriesCode::P => "P",
            SeriesCode::G => "G",
            SeriesCode::MA => "MA",
            SeriesCode::Method => "method",
            SeriesCode::None => "none",
        };
        write!(f, "{s}")
    }
}

/// Source location of an extracted section, for traceability back to the
/// authored markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    pub path: String,
    pub line_start: usize,
    pub line_end: usize,
}

impl SourceRange {
    pub fn new(path: impl Into<String>, line_start: usize, line_end: usize) -> Result<Self> {
        let path = path.into();
        ensure!(!path.is_empty(), "source path cannot be empty");
        ensure!(
            line_end >= line_start,
            "source range end must be >= start ({line_start}..{line_end})"
        );
        Ok(Self {
            path,
            line_start,
            line_end,
        })
    }
}

/// A retrievable governance item. Principles and methods share this shape;
/// `series_code == Method` is the discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub domain: DomainName,
    pub series_code: SeriesCode,
    pub title: String,
    pub content: String,
    /// Lowercased, stop-word filtered tokens in first-occurrence order.
    pub keywords: Vec<String>,
    /// Bolded multi-word phrases (> 5 chars, <= 4 tokens) used as
    /// high-precedence lexical hits.
    pub trigger_phrases: Vec<String>,
    /// Contents of an optional `Applies To:` line; high-signal text fed
    /// into both the BM25 document and the embedding input.
    pub applies_to: Vec<String>,
    pub source_range: SourceRange,
    /// Row into the content embedding matrix. Unique across the index.
    pub embedding_row: usize,
    /// Set for non-S-series items explicitly flagged safety-critical in
    /// their source; the safety promoter treats them like S-series.
    #[serde(default)]
    pub safety_critical: bool,
}

impl ItemRecord {
    /// Validate cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.title.is_empty(), "item {} has empty title", self.id);
        ensure!(
            !self.content.is_empty(),
            "item {} has empty content",
            self.id
        );
        ensure!(
            self.series_code.is_method() == (self.id.category() == "method"),
            "item {} series/category mismatch",
            self.id
        );
        Ok(())
    }

    pub fn is_method(&self) -> bool {
        self.series_code.is_method()
    }

    /// True when the safety promoter must treat this item as S-series.
    pub fn is_safety_relevant(&self) -> bool {
        self.series_code.is_safety() || self.safety_critical
    }

    /// Text embedded for this item: title, applies-to line, body.
    pub fn embedding_text(&self) -> String {
        let mut text = self.title.clone();
        if !self.applies_to.is_empty() {
            text.push('\n');
            text.push_str(&self.applies_to.join(", "));
        }
        text.push('\n');
        text.push_str(&self.content);
        text
    }

    /// Text tokenised into the BM25 document: title, body, applies-to and
    /// trigger phrases, so trigger vocabulary ranks without special-casing
    /// in the scorer.
    pub fn lexical_text(&self) -> String {
        let mut text = format!("{}\n{}", self.title, self.content);
        if !self.applies_to.is_empty() {
            text.push('\n');
            text.push_str(&self.applies_to.join(" "));
        }
        if !self.trigger_phrases.is_empty() {
            text.push('\n');
            text.push_str(&self.trigger_phrases.join(" "));
        }
        text
    }
}

/// A named bucket of items with a routing centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub name: DomainName,
    pub description: String,
    /// Lower value = higher precedence in tie-breaks.
    pub priority: u32,
    /// ID prefix of items in this domain. Unique across the table.
    pub prefix: String,
    /// Row into the centroid embedding matrix.
    pub centroid_row: usize,
    pub principle_count: usize,
    pub method_count: usize,
}

/// Ordinal confidence label derived from the final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Score bands for confidence labelling. Values are configuration; these
/// are the documented defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub high: f32,
    pub medium: f32,
    pub low: f32,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high: 0.70,
            medium: 0.40,
            low: 0.30,
        }
    }
}

impl ConfidenceThresholds {
    /// Label a final score, or None when it falls below the visibility
    /// threshold and the hit should be dropped.
    pub fn label(&self, score: f32) -> Option<Confidence> {
        if score >= self.high {
            Some(Confidence::High)
        } else if score >= self.medium {
            Some(Confidence::Medium)
        } else if score >= self.low {
            Some(Confidence::Low)
        } else {
            None
        }
    }
}

/// One ranked result. Created per retrieval; scores are always in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredHit {
    pub id: ItemId,
    pub title: String,
    pub domain: DomainName,
    pub series: SeriesCode,
    pub score: f32,
    pub confidence: Confidence,
    pub snippet: String,
    pub source_range: SourceRange,
    /// Component scores kept for diagnostics and feedback analysis.
    pub lexical_score: f32,
    pub dense_score: f32,
    /// True when the cross-encoder replaced the fused score for this hit.
    pub reranked: bool,
    /// True when the safety promoter lifted this hit into the result set.
    pub safety_promoted: bool,
}

impl ScoredHit {
    /// Deterministic result ordering: score descending, then safety first,
    /// then series precedence, then ID lexicographic.
    pub fn ordering(a: &ScoredHit, b: &ScoredHit) -> std::cmp::Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.safety_promoted.cmp(&a.safety_promoted))
            .then_with(|| a.series.priority().cmp(&b.series.priority()))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// The decision an `evaluate_governance` call terminates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssessmentKind {
    #[serde(rename = "PROCEED")]
    Proceed,
    #[serde(rename = "PROCEED_WITH_MODIFICATIONS")]
    ProceedWithModifications,
    #[serde(rename = "ESCALATE")]
    Escalate,
}

impl fmt::Display for AssessmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssessmentKind::Proceed => "PROCEED",
            AssessmentKind::ProceedWithModifications => "PROCEED_WITH_MODIFICATIONS",
            AssessmentKind::Escalate => "ESCALATE",
        };
        write!(f, "{s}")
    }
}

/// Result of the deterministic safety keyword screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub triggered: bool,
    /// Keywords that matched, in configuration order.
    pub matched_keywords: Vec<String>,
}

impl SafetyCheck {
    pub fn clear() -> Self {
        Self {
            triggered: false,
            matched_keywords: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, series: SeriesCode) -> ItemRecord {
        ItemRecord {
            id: ItemId::new(id).unwrap(),
            domain: DomainName::constitution(),
            series_code: series,
            title: "Test".to_string(),
            content: "Body".to_string(),
            keywords: vec![],
            trigger_phrases: vec![],
            applies_to: vec![],
            source_range: SourceRange::new("p.md", 1, 2).unwrap(),
            embedding_row: 0,
            safety_critical: false,
        }
    }

    #[test]
    fn test_series_priority_order() {
        assert!(SeriesCode::S.priority() < SeriesCode::C.priority());
        assert!(SeriesCode::MA.priority() < SeriesCode::Method.priority());
        assert!(SeriesCode::Method.priority() < SeriesCode::None.priority());
    }

    #[test]
    fn test_series_from_letter() {
        assert_eq!(SeriesCode::from_letter("s"), Some(SeriesCode::S));
        assert_eq!(SeriesCode::from_letter("MA"), Some(SeriesCode::MA));
        assert_eq!(SeriesCode::from_letter("x"), None);
    }

    #[test]
    fn test_source_range_validation() {
        assert!(SourceRange::new("a.md", 5, 4).is_err());
        assert!(SourceRange::new("", 1, 2).is_err());
        assert!(SourceRange::new("a.md", 1, 1).is_ok());
    }

    #[test]
    fn test_item_series_category_consistency() {
        let ok = item("const-s-rule", SeriesCode::S);
        assert!(ok.validate().is_ok());

        let bad = item("const-method-rule", SeriesCode::S);
        assert!(bad.validate().is_err());

        let m = item("const-method-rule", SeriesCode::Method);
        assert!(m.validate().is_ok());
        assert!(m.is_method());
    }

    #[test]
    fn test_embedding_text_includes_applies_to() {
        let mut it = item("const-s-rule", SeriesCode::S);
        it.applies_to = vec!["data deletion".into(), "schema changes".into()];
        let text = it.embedding_text();
        assert!(text.contains("data deletion, schema changes"));
    }

    #[test]
    fn test_confidence_bands() {
        let t = ConfidenceThresholds::default();
        assert_eq!(t.label(0.70), Some(Confidence::High));
        assert_eq!(t.label(0.69), Some(Confidence::Medium));
        assert_eq!(t.label(0.40), Some(Confidence::Medium));
        assert_eq!(t.label(0.39), Some(Confidence::Low));
        assert_eq!(t.label(0.30), Some(Confidence::Low));
        assert_eq!(t.label(0.29), None);
    }

    #[test]
    fn test_hit_ordering_tie_break() {
        let range = SourceRange::new("p.md", 1, 2).unwrap();
        let base = |id: &str| ScoredHit {
            id: ItemId::new(id).unwrap(),
            title: "t".into(),
            domain: DomainName::constitution(),
            series: SeriesCode::C,
            score: 0.5,
            confidence: Confidence::Medium,
            snippet: String::new(),
            source_range: range.clone(),
            lexical_score: 0.5,
            dense_score: 0.5,
            reranked: false,
            safety_promoted: false,
        };
        // Identical scores and series: ID ascending wins.
        let a = base("a-b-c");
        let b = base("a-b-d");
        assert_eq!(ScoredHit::ordering(&a, &b), std::cmp::Ordering::Less);

        // Safety promotion outranks ID order at equal score.
        let mut s = base("a-b-z");
        s.safety_promoted = true;
        assert_eq!(ScoredHit::ordering(&s, &a), std::cmp::Ordering::Less);
    }
}
