// Corpus Parser - turns authored markdown corpora into typed records.
// Section splitting, ID synthesis, and keyword/trigger extraction are all
// deterministic: the same sources always produce the same IDs, which is
// what makes index rebuilds snapshot-stable.

use crate::errors::{BuildErrorSet, GovernanceError};
use crate::models::{ItemRecord, SeriesCode, SourceRange};
use crate::pure::text;
use crate::types::{DomainName, ItemId};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Headings that never become their own record; their content folds into
/// the preceding section. Matched case-insensitively.
const SKIP_TITLES: &[&str] = &[
    "purpose",
    "overview",
    "introduction",
    "summary",
    "scope",
    "background",
    "contents",
    "table of contents",
    "notes",
];

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*$").unwrap());
static SERIES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:([a-z]{1,2})[-\s]series\b|series\s+([a-z]{1,2})\b)").unwrap()
});
static BOLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*\n]+)\*\*").unwrap());
static APPLIES_TO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*\*{0,2}applies\s+to:?\*{0,2}:?\s*(.+)$").unwrap());
static SAFETY_CRITICAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\*\*safety[- ]critical\*\*").unwrap());

/// One domain's entry in the corpus manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEntry {
    pub name: String,
    pub description: String,
    /// Lower value = higher precedence when tie-breaking.
    pub priority: u32,
    /// ID prefix for items in this domain. Single lowercase segment.
    pub prefix: String,
    pub principles_file: String,
    pub methods_file: String,
}

/// Manifest mapping each domain to its source files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusManifest {
    pub domains: Vec<DomainEntry>,
}

impl CorpusManifest {
    /// Load from a TOML file. File paths inside the manifest are resolved
    /// against the manifest's own directory.
    pub fn from_file(path: &Path) -> Result<(Self, PathBuf), GovernanceError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GovernanceError::Config(format!("cannot read manifest {}: {e}", path.display()))
        })?;
        let manifest: CorpusManifest = toml::from_str(&content)
            .map_err(|e| GovernanceError::Config(format!("malformed manifest: {e}")))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok((manifest, base))
    }

    /// Validate the manifest shape: unique names, unique single-segment
    /// prefixes, distinct priorities, and every referenced file present.
    /// All problems are reported, not only the first.
    pub fn validate(&self, base_dir: &Path) -> Result<(), GovernanceError> {
        let mut errors = BuildErrorSet::new();

        if self.domains.is_empty() {
            errors.push(GovernanceError::Config(
                "manifest declares no domains".into(),
            ));
        }

        let mut names = HashSet::new();
        let mut prefixes = HashSet::new();
        let mut priorities = HashSet::new();
        for entry in &self.domains {
            if DomainName::new(entry.name.clone()).is_err() {
                errors.push(GovernanceError::Config(format!(
                    "invalid domain name '{}'",
                    entry.name
                )));
            }
            if !names.insert(entry.name.clone()) {
                errors.push(GovernanceError::Config(format!(
                    "duplicate domain name '{}'",
                    entry.name
                )));
            }
            // Prefixes are matched exhaustively against the table, so a
            // hyphen inside one would make IDs unparseable.
            if entry.prefix.is_empty()
                || !entry
                    .prefix
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            {
                errors.push(GovernanceError::Config(format!(
                    "domain '{}' prefix '{}' must be a single lowercase segment",
                    entry.name, entry.prefix
                )));
            }
            if !prefixes.insert(entry.prefix.clone()) {
                errors.push(GovernanceError::Config(format!(
                    "duplicate domain prefix '{}'",
                    entry.prefix
                )));
            }
            if !priorities.insert(entry.priority) {
                errors.push(GovernanceError::Config(format!(
                    "duplicate domain priority {} ('{}')",
                    entry.priority, entry.name
                )));
            }
            for file in [&entry.principles_file, &entry.methods_file] {
                let path = base_dir.join(file);
                if !path.is_file() {
                    errors.push(GovernanceError::Config(format!(
                        "domain '{}' references missing file {}",
                        entry.name,
                        path.display()
                    )));
                }
            }
        }

        errors.into_result()
    }
}

/// Output of a full corpus extraction pass.
#[derive(Debug)]
pub struct ExtractedCorpus {
    pub principles: Vec<ItemRecord>,
    pub methods: Vec<ItemRecord>,
}

/// Parse every domain in the manifest. Fails with the aggregate error set
/// if any file is malformed or any two items collide on an ID.
pub fn extract_corpus(
    manifest: &CorpusManifest,
    base_dir: &Path,
) -> Result<ExtractedCorpus, GovernanceError> {
    manifest.validate(base_dir)?;

    let mut errors = BuildErrorSet::new();
    let mut seen_ids: HashSet<ItemId> = HashSet::new();
    let mut principles = Vec::new();
    let mut methods = Vec::new();

    for entry in &manifest.domains {
        let domain = DomainName::new(entry.name.clone())
            .map_err(|e| GovernanceError::Config(e.to_string()))?;

        for (file, is_methods) in [(&entry.principles_file, false), (&entry.methods_file, true)] {
            let path = base_dir.join(file);
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    errors.push(GovernanceError::Config(format!(
                        "cannot read {}: {e}",
                        path.display()
                    )));
                    continue;
                }
            };
            let parsed = parse_markdown_file(&content, file, &domain, &entry.prefix, is_methods);
            match parsed {
                Ok(items) => {
                    for item in items {
                        if !seen_ids.insert(item.id.clone()) {
                            errors.push(GovernanceError::Parse(format!(
                                "duplicate id '{}' (second occurrence in {})",
                                item.id, file
                            )));
                            continue;
                        }
                        if item.series_code.is_safety()
                            && !item.domain.is_constitution()
                            && !item.safety_critical
                        {
                            errors.push(GovernanceError::Parse(format!(
                                "S-series item '{}' outside constitution must carry the \
                                 Safety-Critical flag",
                                item.id
                            )));
                            continue;
                        }
                        if is_methods {
                            methods.push(item);
                        } else {
                            principles.push(item);
                        }
                    }
                }
                Err(e) => errors.push(e),
            }
        }
    }

    errors.into_result()?;

    // ID order is the serialisation order; sorting here keeps builds
    // byte-stable across manifest reordering.
    principles.sort_by(|a, b| a.id.cmp(&b.id));
    methods.sort_by(|a, b| a.id.cmp(&b.id));

    debug!(
        principles = principles.len(),
        methods = methods.len(),
        "corpus extraction complete"
    );

    Ok(ExtractedCorpus {
        principles,
        methods,
    })
}

struct Heading<'a> {
    level: usize,
    text: &'a str,
    line: usize, // zero-based
}

fn is_skip_title(title: &str) -> bool {
    let normalized = title.trim_end_matches(':').trim().to_lowercase();
    SKIP_TITLES.contains(&normalized.as_str())
}

fn series_marker(title: &str) -> Option<SeriesCode> {
    let caps = SERIES_RE.captures(title.trim())?;
    let letter = caps.get(1).or_else(|| caps.get(2))?.as_str();
    SeriesCode::from_letter(letter)
}

/// Parse one markdown file into item records.
///
/// Candidates are the headings at the shallowest level that is not the
/// document title, a series marker, or a skip-listed heading. Deeper
/// headings fold into the enclosing candidate's content; skip-listed
/// sections fold into the preceding one.
fn parse_markdown_file(
    content: &str,
    rel_path: &str,
    domain: &DomainName,
    prefix: &str,
    is_methods: bool,
) -> Result<Vec<ItemRecord>, GovernanceError> {
    let lines: Vec<&str> = content.lines().collect();
    let headings: Vec<Heading> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            HEADING_RE.captures(line).map(|caps| Heading {
                level: caps.get(1).map(|m| m.as_str().len()).unwrap_or(1),
                text: caps.get(2).map(|m| m.as_str()).unwrap_or(""),
                line: i,
            })
        })
        .collect();

    // A single leading level-1 heading is the document title.
    let doc_title_line = headings
        .first()
        .filter(|h| h.level == 1)
        .map(|h| h.line);

    let candidate_level = headings
        .iter()
        .filter(|h| Some(h.line) != doc_title_line)
        .filter(|h| series_marker(h.text).is_none() && !is_skip_title(h.text))
        .map(|h| h.level)
        .min();
    let Some(candidate_level) = candidate_level else {
        // A file with no substantive headings yields no records; the
        // builder decides whether an empty domain is acceptable.
        return Ok(Vec::new());
    };

    let mut items: Vec<ItemRecord> = Vec::new();
    let mut current_series = SeriesCode::None;

    for (idx, heading) in headings.iter().enumerate() {
        if Some(heading.line) == doc_title_line {
            continue;
        }
        if let Some(series) = series_marker(heading.text) {
            current_series = series;
            continue;
        }
        if heading.level != candidate_level {
            continue;
        }

        // Section spans to the next heading at candidate level or
        // shallower (series markers included), else EOF.
        let end_line = headings
            .iter()
            .skip(idx + 1)
            .find(|h| h.level <= candidate_level)
            .map(|h| h.line)
            .unwrap_or(lines.len());
        let body = lines[heading.line + 1..end_line].join("\n");

        if is_skip_title(heading.text) {
            // Fold into the previous record; a leading skip section has
            // nothing to attach to and is preamble.
            if let Some(prev) = items.last_mut() {
                prev.content.push('\n');
                prev.content.push_str(&body);
                prev.source_range.line_end = end_line;
                refresh_derived_fields(prev);
            }
            continue;
        }

        let series = if is_methods {
            SeriesCode::Method
        } else {
            current_series
        };
        let title = heading.text.trim_end_matches(':').trim().to_string();
        let slug = text::slugify(&title);
        if slug.is_empty() {
            return Err(GovernanceError::Parse(format!(
                "{rel_path}:{}: heading '{}' slugifies to nothing",
                heading.line + 1,
                heading.text
            )));
        }
        let id = ItemId::synthesize(prefix, series.category(), &slug)
            .map_err(|e| GovernanceError::Parse(format!("{rel_path}: {e}")))?;

        let source_range = SourceRange::new(rel_path, heading.line + 1, end_line)
            .map_err(|e| GovernanceError::Parse(e.to_string()))?;

        let mut item = ItemRecord {
            id,
            domain: domain.clone(),
            series_code: series,
            title,
            content: body.trim().to_string(),
            keywords: Vec::new(),
            trigger_phrases: Vec::new(),
            applies_to: Vec::new(),
            source_range,
            embedding_row: 0, // assigned by the index builder
            safety_critical: false,
        };
        refresh_derived_fields(&mut item);

        if item.content.is_empty() {
            return Err(GovernanceError::Parse(format!(
                "{rel_path}:{}: section '{}' has no content",
                item.source_range.line_start, item.title
            )));
        }

        items.push(item);
    }

    Ok(items)
}

/// Recompute keywords, trigger phrases, applies-to, and the safety flag
/// from the current title+content. Called again when a folded section
/// extends a record.
fn refresh_derived_fields(item: &mut ItemRecord) {
    let combined = format!("{}\n{}", item.title, item.content);
    item.keywords = text::extract_keywords(&combined);
    item.trigger_phrases = extract_trigger_phrases(&item.content);
    item.applies_to = extract_applies_to(&item.content);
    item.safety_critical = SAFETY_CRITICAL_RE.is_match(&item.content);
}

/// Bolded spans longer than 5 characters with at most 4 tokens, first
/// occurrence order, labels excluded.
fn extract_trigger_phrases(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut phrases = Vec::new();
    for caps in BOLD_RE.captures_iter(content) {
        let phrase = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let lowered = phrase.to_lowercase();
        if phrase.chars().count() <= 5 || phrase.split_whitespace().count() > 4 {
            continue;
        }
        if lowered.starts_with("applies to") || lowered.starts_with("safety-critical") {
            continue;
        }
        if seen.insert(lowered) {
            phrases.push(phrase.to_string());
        }
    }
    phrases
}

fn extract_applies_to(content: &str) -> Vec<String> {
    let mut entries = Vec::new();
    for caps in APPLIES_TO_RE.captures_iter(content) {
        let value = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        for part in value.split([',', ';']) {
            let cleaned = part.trim().trim_matches('*').trim();
            if !cleaned.is_empty() {
                entries.push(cleaned.to_string());
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRINCIPLES_MD: &str = "\
# Constitution

## Purpose

Framing text that should fold away.

## S-Series: Safety

### Never Destroy User Data

**Applies To:** data deletion, destructive migrations

Deleting user data is **irreversible harm** and requires explicit
human approval in every case.

### Protect Credentials

Never echo secrets. **Credential disclosure** is a safety event.

## Q-Series: Quality

### Validate All Inputs

Every external input is validated at the boundary.

#### Details

Nested details stay inside the parent record.
";

    fn parse(content: &str, is_methods: bool) -> Vec<ItemRecord> {
        parse_markdown_file(
            content,
            "constitution/principles.md",
            &DomainName::constitution(),
            "const",
            is_methods,
        )
        .unwrap()
    }

    #[test]
    fn test_section_splitting_and_ids() {
        let items = parse(PRINCIPLES_MD, false);
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "const-s-never-destroy-user-data",
                "const-s-protect-credentials",
                "const-quality-validate-all-inputs",
            ]
        );
    }

    #[test]
    fn test_series_inference_from_heading_path() {
        let items = parse(PRINCIPLES_MD, false);
        assert_eq!(items[0].series_code, SeriesCode::S);
        assert_eq!(items[1].series_code, SeriesCode::S);
        assert_eq!(items[2].series_code, SeriesCode::Q);
    }

    #[test]
    fn test_nested_heading_folds_into_parent() {
        let items = parse(PRINCIPLES_MD, false);
        let quality = &items[2];
        assert!(quality.content.contains("Nested details"));
    }

    #[test]
    fn test_trigger_phrases_filtered() {
        let items = parse(PRINCIPLES_MD, false);
        assert_eq!(items[0].trigger_phrases, vec!["irreversible harm"]);
        assert_eq!(items[1].trigger_phrases, vec!["Credential disclosure"]);
    }

    #[test]
    fn test_applies_to_parsed_and_label_excluded() {
        let items = parse(PRINCIPLES_MD, false);
        assert_eq!(
            items[0].applies_to,
            vec!["data deletion", "destructive migrations"]
        );
        // The label line itself must not leak into trigger phrases.
        assert!(items[0]
            .trigger_phrases
            .iter()
            .all(|p| !p.to_lowercase().contains("applies")));
    }

    #[test]
    fn test_methods_file_series() {
        let md = "# Methods\n\n## Review Checklist\n\nWalk the checklist.\n";
        let items = parse(md, true);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].series_code, SeriesCode::Method);
        assert_eq!(items[0].id.as_str(), "const-method-review-checklist");
    }

    #[test]
    fn test_source_ranges_are_one_based() {
        let items = parse(PRINCIPLES_MD, false);
        let first = &items[0];
        assert_eq!(first.source_range.path, "constitution/principles.md");
        assert!(first.source_range.line_start >= 1);
        assert!(first.source_range.line_end > first.source_range.line_start);
    }

    #[test]
    fn test_duplicate_titles_collide() {
        let md = "# T\n\n## Same Name\n\nBody one.\n\n## Same Name\n\nBody two.\n";
        let parsed = parse_markdown_file(
            md,
            "p.md",
            &DomainName::constitution(),
            "const",
            false,
        )
        .unwrap();
        // The parser synthesizes both; the extractor-level dedupe is what
        // rejects the collision.
        assert_eq!(parsed[0].id, parsed[1].id);
    }

    #[test]
    fn test_manifest_validation_reports_all_problems() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = CorpusManifest {
            domains: vec![
                DomainEntry {
                    name: "constitution".into(),
                    description: "Universal rules".into(),
                    priority: 0,
                    prefix: "const".into(),
                    principles_file: "missing-a.md".into(),
                    methods_file: "missing-b.md".into(),
                },
                DomainEntry {
                    name: "ai-coding".into(),
                    description: "Coding rules".into(),
                    priority: 0, // duplicate priority
                    prefix: "const".into(), // duplicate prefix
                    principles_file: "missing-c.md".into(),
                    methods_file: "missing-d.md".into(),
                },
            ],
        };
        let err = manifest.validate(dir.path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("missing-a.md"));
        assert!(msg.contains("missing-d.md"));
        assert!(msg.contains("duplicate domain prefix"));
        assert!(msg.contains("duplicate domain priority"));
    }

    #[test]
    fn test_safety_series_outside_constitution_needs_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("p.md"),
            "# D\n\n## S-Series\n\n### Danger Zone\n\nUnflagged safety rule.\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("m.md"), "# M\n\n## Helper\n\nSteps.\n").unwrap();
        let manifest = CorpusManifest {
            domains: vec![DomainEntry {
                name: "ai-coding".into(),
                description: "d".into(),
                priority: 1,
                prefix: "coding".into(),
                principles_file: "p.md".into(),
                methods_file: "m.md".into(),
            }],
        };
        let err = extract_corpus(&manifest, dir.path()).unwrap_err();
        assert!(err.to_string().contains("Safety-Critical"));

        // With the flag, the same item extracts cleanly.
        std::fs::write(
            dir.path().join("p.md"),
            "# D\n\n## S-Series\n\n### Danger Zone\n\n**Safety-Critical**\n\nFlagged rule.\n",
        )
        .unwrap();
        let corpus = extract_corpus(&manifest, dir.path()).unwrap();
        assert!(corpus.principles[0].safety_critical);
    }
}
