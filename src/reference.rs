// src/reference.rs

//! Static reference table of emission factors and the lexical matcher over it.
//!
//! Matching is greedy word overlap, not semantic search: recall is only as
//! good as the keywords produced for the line item.

use crate::config::ReferenceSection;
use crate::error::ReferenceError;
use crate::llm::json::parse_decimal;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("valid regex"));

const DEFAULT_CATEGORY: &str = "Reference";

/// One authoritative factor.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceFactorRow {
    pub name: String,
    pub unit: String,
    pub factor_kg_co2e_per_unit: f64,
    pub category_label: String,
}

/// The best row for a keyword set, with its overlap score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceMatch<'a> {
    pub row: &'a ReferenceFactorRow,
    pub score: usize,
}

/// Read-only after loading. Row order is file order.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    rows: Vec<ReferenceFactorRow>,
    name_tokens: Vec<HashSet<String>>,
}

/// Lowercased `\w+` runs.
pub fn tokenize(text: &str) -> HashSet<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

impl ReferenceTable {
    pub fn from_rows(rows: Vec<ReferenceFactorRow>) -> Self {
        let name_tokens = rows.iter().map(|r| tokenize(&r.name)).collect();
        Self { rows, name_tokens }
    }

    /// Load the table at `section.path`. A missing file is not an error:
    /// it yields `None` and the session runs on model estimates alone.
    pub fn load(section: &ReferenceSection) -> Result<Option<Self>, ReferenceError> {
        let path = Path::new(&section.path);
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Reference table not found, using model estimates only");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let table = Self::from_bytes(&bytes, section)?;
        info!(path = %path.display(), rows = table.len(), "Reference table loaded");
        Ok(Some(table))
    }

    /// Parse `;`-delimited bytes (UTF-8, else Windows-1252).
    pub fn from_bytes(bytes: &[u8], section: &ReferenceSection) -> Result<Self, ReferenceError> {
        let text = decode_text(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
            .collect();
        let position = |name: &str| headers.iter().position(|h| h == name);

        let (name_idx, factor_idx, unit_idx) = match (
            position(&section.name_column),
            position(&section.factor_column),
            position(&section.unit_column),
        ) {
            (Some(n), Some(f), Some(u)) => (n, f, u),
            (n, f, u) => {
                let missing = [
                    (n, &section.name_column),
                    (f, &section.factor_column),
                    (u, &section.unit_column),
                ]
                .into_iter()
                .filter(|(idx, _)| idx.is_none())
                .map(|(_, name)| name.clone())
                .collect();
                return Err(ReferenceError::SchemaViolation(missing));
            }
        };
        let category_idx = section
            .category_column
            .as_deref()
            .filter(|c| !c.is_empty())
            .and_then(position);

        let mut rows = Vec::new();
        let mut dropped = 0usize;
        for record in reader.records() {
            let record = record?;
            let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");
            let Some(factor) = parse_decimal(field(factor_idx)) else {
                dropped += 1;
                continue;
            };
            let category = category_idx
                .map(field)
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_CATEGORY);
            rows.push(ReferenceFactorRow {
                name: field(name_idx).to_string(),
                unit: normalize_reference_unit(field(unit_idx)).to_string(),
                factor_kg_co2e_per_unit: factor,
                category_label: category.to_string(),
            });
        }
        if dropped > 0 {
            info!(dropped, "Reference rows without a numeric factor skipped");
        }
        Ok(Self::from_rows(rows))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub fn rows(&self) -> &[ReferenceFactorRow] {
        &self.rows
    }

    /// Row with the strictly highest word overlap with `keywords`, if that
    /// overlap reaches `max(1, keyword_count / 2)`. Ties keep the earlier row.
    pub fn best_match(&self, keywords: &[String]) -> Option<ReferenceMatch<'_>> {
        let distinct: HashSet<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        if distinct.is_empty() {
            return None;
        }
        let query: HashSet<String> = distinct.iter().flat_map(|k| tokenize(k)).collect();

        let mut best: Option<(usize, usize)> = None;
        for (idx, tokens) in self.name_tokens.iter().enumerate() {
            let score = tokens.intersection(&query).count();
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((idx, score));
            }
        }

        let threshold = (distinct.len() / 2).max(1);
        match best {
            Some((idx, score)) if score >= threshold => {
                debug!(name = %self.rows[idx].name, score, threshold, "Reference match");
                Some(ReferenceMatch {
                    row: &self.rows[idx],
                    score,
                })
            }
            _ => {
                debug!(best = ?best.map(|(_, s)| s), threshold, "No reference match");
                None
            }
        }
    }
}

/// Drop a leading `kgCO2e/` so the unit reads like an invoice unit.
fn normalize_reference_unit(raw: &str) -> &str {
    const PREFIX: &str = "kgco2e/";
    let trimmed = raw.trim();
    match trimmed.get(..PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(PREFIX) => trimmed[PREFIX.len()..].trim(),
        _ => trimmed,
    }
}

/// Windows-1252 code points for bytes 0x80..=0x9F. Unassigned bytes map to
/// the matching C1 control character.
const CP1252_HIGH: [char; 32] = [
    '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8d}', 'Ž', '\u{8f}',
    '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\u{9d}', 'ž', 'Ÿ',
];

fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(
            bytes
                .iter()
                .map(|&b| match b {
                    0x80..=0x9f => CP1252_HIGH[(b - 0x80) as usize],
                    _ => char::from(b),
                })
                .collect(),
        ),
    }
}
