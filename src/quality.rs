//! Manuscript quality checks
//!
//! Pure functions over the manuscript text: word count, chapter count and
//! duplicate-sentence ratio against configurable thresholds. Violations are
//! warnings recorded in the manifest; quality never fails a run.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static SENTENCE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?。]\s*").expect("valid sentence regex"));

/// Result record carried into the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub passed: bool,
    pub word_count: usize,
    pub chapter_count: usize,
    pub duplicate_ratio: f64,
    pub warnings: Vec<String>,
}

pub struct QualityChecker {
    min_word_count: usize,
    min_chapter_count: usize,
    max_duplicate_ratio: f64,
}

impl Default for QualityChecker {
    fn default() -> Self {
        Self {
            min_word_count: 10_000,
            min_chapter_count: 5,
            max_duplicate_ratio: 0.15,
        }
    }
}

impl QualityChecker {
    pub fn new(min_word_count: usize, min_chapter_count: usize, max_duplicate_ratio: f64) -> Self {
        Self {
            min_word_count,
            min_chapter_count,
            max_duplicate_ratio,
        }
    }

    pub fn check(&self, content: &str) -> QualityReport {
        let word_count = count_words(content);
        let chapter_count = count_chapters(content);
        let duplicate_ratio = duplicate_ratio(content);

        let mut warnings = Vec::new();
        if word_count < self.min_word_count {
            warnings.push(format!(
                "word count too low: {} (recommended: {}+)",
                word_count, self.min_word_count
            ));
        }
        if chapter_count < self.min_chapter_count {
            warnings.push(format!(
                "chapter count too low: {} (recommended: {}+)",
                chapter_count, self.min_chapter_count
            ));
        }
        if duplicate_ratio > self.max_duplicate_ratio {
            warnings.push(format!(
                "duplicate sentence ratio too high: {:.1}% (recommended: {:.1}% or less)",
                duplicate_ratio * 100.0,
                self.max_duplicate_ratio * 100.0
            ));
        }

        QualityReport {
            passed: warnings.is_empty(),
            word_count,
            chapter_count,
            duplicate_ratio,
            warnings,
        }
    }
}

/// Whitespace-separated token count.
pub fn count_words(content: &str) -> usize {
    content.split_whitespace().count()
}

/// Chapters are `## ` headings at the start of a line.
pub fn count_chapters(content: &str) -> usize {
    content.lines().filter(|l| l.starts_with("## ")).count()
}

/// Fraction of sentences that exactly duplicate an earlier sentence, after
/// lowercasing and stripping all whitespace. Short fragments are ignored.
pub fn duplicate_ratio(content: &str) -> f64 {
    let sentences: Vec<&str> = SENTENCE_SPLIT
        .split(content)
        .map(str::trim)
        .filter(|s| s.len() > 10)
        .collect();

    if sentences.len() < 2 {
        return 0.0;
    }

    let mut seen = std::collections::HashSet::new();
    let mut duplicates = 0usize;
    for sentence in &sentences {
        let normalized: String = sentence.to_lowercase().split_whitespace().collect();
        if !seen.insert(normalized) {
            duplicates += 1;
        }
    }

    duplicates as f64 / sentences.len() as f64
}
