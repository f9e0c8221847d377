//! External collaborator ports
//!
//! The pipeline only sees these traits. Local implementations prepare work
//! in-process (identifier pool, prepared filings, manual upload instructions)
//! and are what the CLI wires up.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::artifact::{OutputFormat, PackagedArtifact};
use crate::destinations::Destination;
use crate::hashing::Fingerprint;
use crate::manuscript::PublicationMetadata;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Identifier inventory exhausted (requested for {format})")]
    OutOfInventory { format: OutputFormat },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl CollaboratorError {
    /// Transient failures may be retried; everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsbnPair {
    pub isbn13: String,
    /// Only `978` identifiers have a ten-digit form.
    pub isbn10: Option<String>,
}

impl IsbnPair {
    pub fn from_isbn13(raw: &str) -> Result<Self, CollaboratorError> {
        let digits: Vec<u32> = raw
            .chars()
            .filter(|c| *c != '-' && !c.is_whitespace())
            .map(|c| c.to_digit(10))
            .collect::<Option<_>>()
            .ok_or_else(|| CollaboratorError::InvalidIdentifier(raw.to_string()))?;

        if digits.len() != 13 {
            return Err(CollaboratorError::InvalidIdentifier(raw.to_string()));
        }
        let weighted: u32 = digits
            .iter()
            .enumerate()
            .map(|(i, d)| if i % 2 == 0 { *d } else { d * 3 })
            .sum();
        if weighted % 10 != 0 {
            return Err(CollaboratorError::InvalidIdentifier(raw.to_string()));
        }

        let isbn13: String = digits.iter().map(|d| char::from_digit(*d, 10).unwrap_or('0')).collect();
        let isbn10 = isbn13.starts_with("978").then(|| {
            let body = &digits[3..12];
            let sum: u32 = body.iter().enumerate().map(|(i, d)| d * (10 - i as u32)).sum();
            let check = (11 - sum % 11) % 11;
            let mut out: String = body.iter().map(|d| char::from_digit(*d, 10).unwrap_or('0')).collect();
            out.push(if check == 10 { 'X' } else { char::from_digit(check, 10).unwrap_or('0') });
            out
        });

        Ok(Self { isbn13, isbn10 })
    }
}

/// Source of numeric identifiers. `acquire` must be an atomic claim: two
/// concurrent callers never receive the same identifier.
#[async_trait]
pub trait IdentifierSource: Send + Sync {
    async fn acquire(&self, format: OutputFormat) -> Result<IsbnPair, CollaboratorError>;
}

/// Pre-purchased identifiers held in memory. Claims pop under one lock.
#[derive(Debug, Default)]
pub struct InMemoryIdentifierPool {
    available: Mutex<VecDeque<IsbnPair>>,
}

impl InMemoryIdentifierPool {
    pub fn new(identifiers: impl IntoIterator<Item = IsbnPair>) -> Self {
        Self { available: Mutex::new(identifiers.into_iter().collect()) }
    }

    pub fn from_isbn13s<S: AsRef<str>>(raw: impl IntoIterator<Item = S>) -> Result<Self, CollaboratorError> {
        let pairs = raw
            .into_iter()
            .map(|s| IsbnPair::from_isbn13(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(pairs))
    }

    pub fn remaining(&self) -> usize {
        self.available.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl IdentifierSource for InMemoryIdentifierPool {
    async fn acquire(&self, format: OutputFormat) -> Result<IsbnPair, CollaboratorError> {
        let claimed = self
            .available
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("identifier pool lock poisoned".into()))?
            .pop_front();
        match claimed {
            Some(pair) => {
                debug!(isbn = %pair.isbn13, %format, "claimed identifier");
                Ok(pair)
            }
            None => Err(CollaboratorError::OutOfInventory { format }),
        }
    }
}

// ---------------------------------------------------------------------------
// Registration and catalog filings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationHandle {
    pub service: String,
    pub reference: String,
    pub prepared_at: DateTime<Utc>,
}

/// Prepares a filing package. Never waits on external approval.
#[async_trait]
pub trait RegistrationService: Send + Sync {
    async fn register(&self, metadata: &PublicationMetadata) -> Result<RegistrationHandle, CollaboratorError>;
}

/// Local filing preparation keyed by a stable metadata fingerprint.
#[derive(Debug, Clone)]
pub struct PreparedRegistration {
    service: String,
    prefix: String,
}

impl PreparedRegistration {
    pub fn new(service: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self { service: service.into(), prefix: prefix.into() }
    }

    pub fn copyright() -> Self {
        Self::new("copyright-registration", "REG")
    }

    pub fn catalog_number() -> Self {
        Self::new("catalog-number", "CAT")
    }
}

#[async_trait]
impl RegistrationService for PreparedRegistration {
    async fn register(&self, metadata: &PublicationMetadata) -> Result<RegistrationHandle, CollaboratorError> {
        let reference = Fingerprint::new(&self.service)
            .field("title", &metadata.title)
            .optional("subtitle", metadata.subtitle.as_deref())
            .field("author", &metadata.author)
            .field("language", &metadata.language)
            .field("publication_date", metadata.publication_date.to_string())
            .optional("isbn", metadata.isbn.as_deref())
            .handle(&self.prefix);
        Ok(RegistrationHandle {
            service: self.service.clone(),
            reference,
            prepared_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Cover art
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverBrief {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

#[async_trait]
pub trait CoverSource: Send + Sync {
    async fn generate(&self, brief: &CoverBrief) -> Result<Vec<u8>, CollaboratorError>;
}

/// Returns the same pre-made image for every request.
#[derive(Debug, Clone)]
pub struct StaticCoverSource {
    image: Vec<u8>,
}

impl StaticCoverSource {
    pub fn new(image: Vec<u8>) -> Self {
        Self { image }
    }
}

#[async_trait]
impl CoverSource for StaticCoverSource {
    async fn generate(&self, _brief: &CoverBrief) -> Result<Vec<u8>, CollaboratorError> {
        Ok(self.image.clone())
    }
}

// ---------------------------------------------------------------------------
// Metadata optimization
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MetadataOptimizer: Send + Sync {
    async fn optimize(&self, metadata: &PublicationMetadata) -> Result<PublicationMetadata, CollaboratorError>;
}

/// Trims and de-duplicates keywords and categories case-insensitively.
/// Counts over destination limits are left for the validator to judge.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupMetadataOptimizer;

fn dedup(values: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && seen.insert(v.to_lowercase()))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl MetadataOptimizer for DedupMetadataOptimizer {
    async fn optimize(&self, metadata: &PublicationMetadata) -> Result<PublicationMetadata, CollaboratorError> {
        Ok(PublicationMetadata {
            keywords: dedup(&metadata.keywords),
            categories: dedup(&metadata.categories),
            description: metadata.description.trim().to_string(),
            ..metadata.clone()
        })
    }
}

// ---------------------------------------------------------------------------
// Destination submission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
    Pending,
    ManualActionRequired,
    Failed,
}

impl SubmissionStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::ManualActionRequired => "manual_action_required",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub status: SubmissionStatus,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

/// Hands one artifact to one destination. Adapters may run their own checks,
/// but the pipeline validates before calling.
#[async_trait]
pub trait DestinationAdapter: Send + Sync {
    async fn submit(
        &self,
        artifact: &PackagedArtifact,
        metadata: &PublicationMetadata,
        destination: Destination,
    ) -> Result<SubmissionReceipt, CollaboratorError>;
}

/// Produces upload instructions instead of calling a remote API.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualDestinationAdapter;

#[async_trait]
impl DestinationAdapter for ManualDestinationAdapter {
    async fn submit(
        &self,
        artifact: &PackagedArtifact,
        metadata: &PublicationMetadata,
        destination: Destination,
    ) -> Result<SubmissionReceipt, CollaboratorError> {
        let req = destination.requirements();
        let descriptor = artifact.descriptor();
        Ok(SubmissionReceipt {
            status: SubmissionStatus::ManualActionRequired,
            instructions: Some(format!(
                "Upload \"{}\" ({}, {} bytes, sha256 {}) through the {} dashboard.",
                metadata.title, descriptor.format, descriptor.byte_size, descriptor.checksum, req.display_name
            )),
            reference: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;

    #[test]
    fn test_isbn_pair_derivation() {
        let pair = IsbnPair::from_isbn13("978-0-306-40615-7").unwrap();
        assert_eq!(pair.isbn13, "9780306406157");
        assert_eq!(pair.isbn10.as_deref(), Some("0306406152"));

        let pair = IsbnPair::from_isbn13("979-10-90636-07-1").unwrap();
        assert_eq!(pair.isbn10, None);

        assert!(IsbnPair::from_isbn13("978-0-306-40615-8").is_err());
        assert!(IsbnPair::from_isbn13("97803064").is_err());
        assert!(IsbnPair::from_isbn13("97803064061X7").is_err());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CollaboratorError::Unavailable("x".into()).is_retryable());
        assert!(CollaboratorError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!CollaboratorError::OutOfInventory { format: OutputFormat::Epub }.is_retryable());
        assert!(!CollaboratorError::Cancelled.is_retryable());
    }

    #[tokio::test]
    async fn test_pool_claims_are_unique_under_concurrency() {
        let raw: Vec<String> = ["9780306406157", "9781861972712", "9780262033848"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let pool = Arc::new(InMemoryIdentifierPool::from_isbn13s(&raw).unwrap());

        let claims = futures::future::join_all((0..5).map(|_| {
            let pool = Arc::clone(&pool);
            async move { pool.acquire(OutputFormat::Epub).await }
        }))
        .await;

        let mut won: Vec<_> = claims.iter().filter_map(|c| c.as_ref().ok()).map(|p| p.isbn13.clone()).collect();
        won.sort();
        won.dedup();
        assert_eq!(won.len(), 3);
        assert_eq!(claims.iter().filter(|c| c.is_err()).count(), 2);
        assert_eq!(pool.remaining(), 0);
    }

    #[tokio::test]
    async fn test_optimizer_dedups_without_truncating() {
        let mut meta = PublicationMetadata::new("T", "A", NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        meta.keywords = vec!["Space".into(), "space ".into(), "".into(), "opera".into()];
        meta.keywords.extend((0..8).map(|i| format!("kw{i}")));
        let out = DedupMetadataOptimizer.optimize(&meta).await.unwrap();
        assert_eq!(out.keywords.len(), 10);
        assert_eq!(out.keywords[0], "Space");
    }

    #[tokio::test]
    async fn test_prepared_registration_is_stable() {
        let meta = PublicationMetadata::new("T", "A", NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let a = PreparedRegistration::copyright().register(&meta).await.unwrap();
        let b = PreparedRegistration::copyright().register(&meta).await.unwrap();
        assert_eq!(a.reference, b.reference);
        assert!(a.reference.starts_with("REG-"));

        let mut described = meta.clone();
        described.description = "Longer blurb".into();
        let c = PreparedRegistration::copyright().register(&described).await.unwrap();
        assert_eq!(a.reference, c.reference);

        let mut assigned = meta;
        assigned.isbn = Some("9780306406157".into());
        let d = PreparedRegistration::copyright().register(&assigned).await.unwrap();
        assert_ne!(a.reference, d.reference);
    }
}
