//! Manuscript Model - Chapters and Publication Metadata
//!
//! Chapters are immutable once handed to packaging. Ordinals must be unique
//! and contiguous starting at 1.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Soft limit on category codes. Exceeding it is a warning, never a rejection here.
pub const MAX_CATEGORIES: usize = 3;
/// Soft limit on discovery keywords.
pub const MAX_KEYWORDS: usize = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManuscriptError {
    #[error("Manuscript has no chapters")]
    Empty,

    #[error("Duplicate chapter position {0}")]
    DuplicatePosition(u32),

    #[error("Chapter positions are not contiguous: expected {expected}, found {found}")]
    Gap { expected: u32, found: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chapter {
    pub position: u32,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub word_count: u32,
}

impl Chapter {
    pub fn new(position: u32, title: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let word_count = body.split_whitespace().count() as u32;
        Self {
            position,
            title: title.into(),
            body,
            word_count,
        }
    }

    /// Body split into paragraphs on blank lines, trimmed, empties dropped.
    pub fn paragraphs(&self) -> impl Iterator<Item = &str> {
        self.body
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Returns the chapters sorted by position, or a structural error if the
/// positions are empty, duplicated, or have gaps.
pub fn ordered_chapters(chapters: &[Chapter]) -> Result<Vec<&Chapter>, ManuscriptError> {
    if chapters.is_empty() {
        return Err(ManuscriptError::Empty);
    }

    let mut ordered: Vec<&Chapter> = chapters.iter().collect();
    ordered.sort_by_key(|c| c.position);

    for (index, chapter) in ordered.iter().enumerate() {
        let expected = index as u32 + 1;
        if index > 0 && chapter.position == ordered[index - 1].position {
            return Err(ManuscriptError::DuplicatePosition(chapter.position));
        }
        if chapter.position != expected {
            return Err(ManuscriptError::Gap {
                expected,
                found: chapter.position,
            });
        }
    }

    Ok(ordered)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicationMetadata {
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub author: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub publication_date: NaiveDate,
    /// List price in cents.
    #[serde(default)]
    pub price_cents: u64,
    /// Set by the identifier phase; printed on the rights page.
    #[serde(default)]
    pub isbn: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl PublicationMetadata {
    pub fn new(title: impl Into<String>, author: impl Into<String>, publication_date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            author: author.into(),
            language: default_language(),
            description: String::new(),
            categories: vec![],
            keywords: vec![],
            publication_date,
            price_cents: 0,
            isbn: None,
        }
    }

    /// Soft-limit warnings. These never reject; destination hard limits are
    /// enforced by the validator.
    pub fn soft_limit_warnings(&self) -> Vec<String> {
        let mut warnings = vec![];
        if self.categories.len() > MAX_CATEGORIES {
            warnings.push(format!(
                "{} categories supplied, {} recommended",
                self.categories.len(),
                MAX_CATEGORIES
            ));
        }
        if self.keywords.len() > MAX_KEYWORDS {
            warnings.push(format!(
                "{} keywords supplied, {} recommended",
                self.keywords.len(),
                MAX_KEYWORDS
            ));
        }
        warnings
    }

    /// Title with subtitle appended, as shown on the title page.
    pub fn full_title(&self) -> String {
        match &self.subtitle {
            Some(sub) if !sub.trim().is_empty() => format!("{}: {}", self.title, sub),
            _ => self.title.clone(),
        }
    }
}
