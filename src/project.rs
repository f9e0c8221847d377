//! Publishing project aggregate
//!
//! A project is created when publishing is requested and owned by the
//! pipeline until the call returns. Once terminal it is never mutated again;
//! a retry starts a fresh project.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::{OutputFormat, PackagedArtifact};
use crate::collaborators::{CoverBrief, IsbnPair, RegistrationHandle, SubmissionStatus};
use crate::destinations::Destination;
use crate::hashing::Fingerprint;
use crate::manuscript::{Chapter, PublicationMetadata};
use crate::phases::{PhaseRecord, PhaseStatus};
use crate::print::PrintSpec;
use crate::validation::ValidationVerdict;

/// Everything a caller supplies to publish one work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub chapters: Vec<Chapter>,
    pub metadata: PublicationMetadata,
    pub formats: Vec<OutputFormat>,
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub print: PrintSpec,
    /// Ask the cover source for artwork during the cover phase.
    #[serde(default)]
    pub generate_cover: bool,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub cover_style: Option<String>,
    /// Caller-supplied cover, embedded at packaging time.
    #[serde(skip)]
    pub cover_image: Option<Vec<u8>>,
}

impl PublishRequest {
    pub fn new(
        chapters: Vec<Chapter>,
        metadata: PublicationMetadata,
        formats: Vec<OutputFormat>,
        destinations: Vec<Destination>,
    ) -> Self {
        Self {
            chapters,
            metadata,
            formats,
            destinations,
            print: PrintSpec::default(),
            generate_cover: false,
            genre: None,
            cover_style: None,
            cover_image: None,
        }
    }

    /// Requested formats, de-duplicated in request order.
    pub fn unique_formats(&self) -> Vec<OutputFormat> {
        let mut out: Vec<OutputFormat> = vec![];
        for f in &self.formats {
            if !out.contains(f) {
                out.push(*f);
            }
        }
        out
    }

    pub fn unique_destinations(&self) -> Vec<Destination> {
        let mut out: Vec<Destination> = vec![];
        for d in &self.destinations {
            if !out.contains(d) {
                out.push(*d);
            }
        }
        out
    }

    pub fn cover_brief(&self) -> CoverBrief {
        CoverBrief {
            title: self.metadata.title.clone(),
            author: self.metadata.author.clone(),
            genre: self.genre.clone(),
            style: self.cover_style.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(pub u64);

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl std::ops::Add for Cents {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::iter::Sum for Cents {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Cents(0), |a, b| a + b)
    }
}

/// Fixed fee schedule. Identifier cost is keyed by how many formats were
/// requested; counts past the end of the table use its last entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CostSchedule {
    #[serde(default = "default_identifier_cents")]
    pub identifier_cents: Vec<u64>,
    #[serde(default = "default_registration_cents")]
    pub registration_cents: u64,
    #[serde(default)]
    pub catalog_cents: u64,
    #[serde(default = "default_cover_cents")]
    pub cover_cents: u64,
    #[serde(default)]
    pub submission_cents: u64,
}

fn default_identifier_cents() -> Vec<u64> { vec![0, 12_500, 29_500] }
fn default_registration_cents() -> u64 { 4_500 }
fn default_cover_cents() -> u64 { 400 }

impl Default for CostSchedule {
    fn default() -> Self {
        Self {
            identifier_cents: default_identifier_cents(),
            registration_cents: default_registration_cents(),
            catalog_cents: 0,
            cover_cents: default_cover_cents(),
            submission_cents: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CostFlags {
    pub cover_generated: bool,
    pub destinations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostItem {
    pub label: String,
    pub amount: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub items: Vec<CostItem>,
    pub total: Cents,
}

impl CostSchedule {
    pub fn compute(&self, formats: usize, flags: CostFlags) -> CostBreakdown {
        let identifiers = self
            .identifier_cents
            .get(formats)
            .or_else(|| self.identifier_cents.last())
            .copied()
            .unwrap_or(0);

        let mut items = vec![
            CostItem { label: format!("identifiers ({formats})"), amount: Cents(identifiers) },
            CostItem { label: "registration filing".into(), amount: Cents(self.registration_cents) },
            CostItem { label: "catalog number".into(), amount: Cents(self.catalog_cents) },
        ];
        if flags.cover_generated {
            items.push(CostItem { label: "cover artwork".into(), amount: Cents(self.cover_cents) });
        }
        if flags.destinations > 0 && self.submission_cents > 0 {
            items.push(CostItem {
                label: format!("submissions ({})", flags.destinations),
                amount: Cents(self.submission_cents * flags.destinations as u64),
            });
        }

        let total = items.iter().map(|i| i.amount).sum();
        CostBreakdown { items, total }
    }
}

// ---------------------------------------------------------------------------
// Project aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    InProgress,
    Published,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedIdentifier {
    pub format: OutputFormat,
    pub isbn: IsbnPair,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub destination: Destination,
    pub format: OutputFormat,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishingProject {
    id: Uuid,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: ProjectStatus,
    metadata: PublicationMetadata,
    phases: Vec<PhaseRecord>,
    identifiers: Vec<AssignedIdentifier>,
    registration: Option<RegistrationHandle>,
    catalog: Option<RegistrationHandle>,
    #[serde(skip)]
    cover_image: Option<Vec<u8>>,
    artifacts: Vec<PackagedArtifact>,
    verdicts: Vec<ValidationVerdict>,
    submissions: Vec<SubmissionResult>,
    cost: Option<CostBreakdown>,
    manifest_hash: Option<String>,
}

impl PublishingProject {
    pub fn new(metadata: PublicationMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            completed_at: None,
            status: ProjectStatus::InProgress,
            metadata,
            phases: vec![],
            identifiers: vec![],
            registration: None,
            catalog: None,
            cover_image: None,
            artifacts: vec![],
            verdicts: vec![],
            submissions: vec![],
            cost: None,
            manifest_hash: None,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn completed_at(&self) -> Option<DateTime<Utc>> { self.completed_at }
    pub fn status(&self) -> ProjectStatus { self.status }
    pub fn metadata(&self) -> &PublicationMetadata { &self.metadata }
    pub fn phases(&self) -> &[PhaseRecord] { &self.phases }
    pub fn identifiers(&self) -> &[AssignedIdentifier] { &self.identifiers }
    pub fn registration(&self) -> Option<&RegistrationHandle> { self.registration.as_ref() }
    pub fn catalog(&self) -> Option<&RegistrationHandle> { self.catalog.as_ref() }
    pub fn cover_image(&self) -> Option<&[u8]> { self.cover_image.as_deref() }
    pub fn artifacts(&self) -> &[PackagedArtifact] { &self.artifacts }
    pub fn verdicts(&self) -> &[ValidationVerdict] { &self.verdicts }
    pub fn submissions(&self) -> &[SubmissionResult] { &self.submissions }
    pub fn cost(&self) -> Option<&CostBreakdown> { self.cost.as_ref() }
    pub fn manifest_hash(&self) -> Option<&str> { self.manifest_hash.as_deref() }

    pub fn artifact(&self, format: OutputFormat) -> Option<&PackagedArtifact> {
        self.artifacts.iter().find(|a| a.format() == format)
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ProjectStatus::InProgress
    }

    /// Weight of the most recently completed phase.
    pub fn progress(&self) -> u8 {
        self.phases
            .iter()
            .rev()
            .find(|p| p.status == PhaseStatus::Completed)
            .map_or(0, |p| p.weight)
    }

    // --- mutation, only while the pipeline owns the project ---

    pub(crate) fn phases_mut(&mut self) -> &mut Vec<PhaseRecord> {
        &mut self.phases
    }

    pub(crate) fn set_identifiers(&mut self, identifiers: Vec<AssignedIdentifier>) {
        if let Some(first) = identifiers.first() {
            self.metadata.isbn = Some(first.isbn.isbn13.clone());
        }
        self.identifiers = identifiers;
    }

    pub(crate) fn set_registration(&mut self, handle: RegistrationHandle) {
        self.registration = Some(handle);
    }

    pub(crate) fn set_catalog(&mut self, handle: RegistrationHandle) {
        self.catalog = Some(handle);
    }

    pub(crate) fn set_metadata(&mut self, metadata: PublicationMetadata) {
        self.metadata = metadata;
    }

    pub(crate) fn set_cover_image(&mut self, image: Vec<u8>) {
        self.cover_image = Some(image);
    }

    /// Adds an artifact, replacing any earlier artifact of the same format.
    pub(crate) fn supersede_artifact(&mut self, artifact: PackagedArtifact) {
        match self.artifacts.iter().position(|a| a.format() == artifact.format()) {
            Some(index) => self.artifacts[index] = artifact,
            None => self.artifacts.push(artifact),
        }
    }

    pub(crate) fn set_verdicts(&mut self, verdicts: Vec<ValidationVerdict>) {
        self.verdicts = verdicts;
    }

    pub(crate) fn set_submissions(&mut self, submissions: Vec<SubmissionResult>) {
        self.submissions = submissions;
    }

    pub(crate) fn finish_published(&mut self, cost: CostBreakdown) {
        self.cost = Some(cost);
        self.status = ProjectStatus::Published;
        self.completed_at = Some(Utc::now());
        self.manifest_hash = Some(self.fingerprint());
    }

    /// Identity, identifiers, artifact checksums, verdict scores and
    /// submission outcomes of the sealed project.
    fn fingerprint(&self) -> String {
        let identifiers = self
            .identifiers
            .iter()
            .map(|id| (id.format.to_string(), id.isbn.isbn13.clone()))
            .collect();
        let artifacts = self
            .artifacts
            .iter()
            .map(|a| (a.format().to_string(), a.checksum().to_string()))
            .collect();
        let scores = self
            .verdicts
            .iter()
            .map(|v| {
                let subject = v.format.map(|f| f.to_string()).unwrap_or_else(|| "metadata".into());
                (format!("{}/{subject}", v.destination), v.score.to_string())
            })
            .collect();
        let submissions = self
            .submissions
            .iter()
            .map(|s| (format!("{}/{}", s.destination, s.format), s.status.name().to_string()))
            .collect();

        Fingerprint::new("project")
            .field("id", self.id.to_string())
            .field("title", &self.metadata.title)
            .rows("identifiers", identifiers)
            .rows("artifacts", artifacts)
            .rows("scores", scores)
            .rows("submissions", submissions)
            .hex()
    }

    pub(crate) fn finish_failed(&mut self) {
        self.status = ProjectStatus::Error;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_cents_display() {
        assert_eq!(Cents(12_500).to_string(), "$125.00");
        assert_eq!(Cents(7).to_string(), "$0.07");
    }

    #[test]
    fn test_cost_schedule() {
        let schedule = CostSchedule::default();
        let one = schedule.compute(1, CostFlags::default());
        assert_eq!(one.total, Cents(12_500 + 4_500));

        let two = schedule.compute(2, CostFlags { cover_generated: true, destinations: 3 });
        assert_eq!(two.total, Cents(29_500 + 4_500 + 400));

        let many = schedule.compute(9, CostFlags::default());
        assert_eq!(many.items[0].amount, Cents(29_500));

        let with_fees = CostSchedule { submission_cents: 100, ..CostSchedule::default() };
        let fees = with_fees.compute(1, CostFlags { cover_generated: false, destinations: 3 });
        assert_eq!(fees.total, Cents(12_500 + 4_500 + 300));
    }

    #[test]
    fn test_request_dedups() {
        let meta = PublicationMetadata::new("T", "A", NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let request = PublishRequest::new(
            vec![],
            meta,
            vec![OutputFormat::Pdf, OutputFormat::Epub, OutputFormat::Pdf],
            vec![Destination::Kobo, Destination::Kobo],
        );
        assert_eq!(request.unique_formats(), vec![OutputFormat::Pdf, OutputFormat::Epub]);
        assert_eq!(request.unique_destinations(), vec![Destination::Kobo]);
    }

    fn sealed(artifacts: Vec<PackagedArtifact>, submissions: Vec<SubmissionResult>) -> PublishingProject {
        let meta = PublicationMetadata::new("T", "A", NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let mut project = PublishingProject::new(meta);
        for artifact in artifacts {
            project.supersede_artifact(artifact);
        }
        project.set_submissions(submissions);
        project.finish_published(CostSchedule::default().compute(1, CostFlags::default()));
        project
    }

    fn submission(destination: Destination, status: SubmissionStatus) -> SubmissionResult {
        SubmissionResult {
            destination,
            format: OutputFormat::Epub,
            status,
            instructions: None,
            reference: None,
            error: None,
        }
    }

    #[test]
    fn test_published_project_always_fingerprinted() {
        let engine = crate::packaging::PackagingEngine::default();
        let meta = PublicationMetadata::new("T", "A", NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let chapters = vec![Chapter::new(1, "One", "Body.")];
        let epub: PackagedArtifact = engine.build_reflowable_document(&chapters, &meta, None).unwrap().into();

        let results = vec![
            submission(Destination::Kobo, SubmissionStatus::Submitted),
            submission(Destination::AppleBooks, SubmissionStatus::Failed),
        ];
        let mut project = sealed(vec![epub], results.clone());
        let hash = project.manifest_hash().unwrap().to_string();
        assert_eq!(hash.len(), 64);
        assert_eq!(project.status(), ProjectStatus::Published);

        let mut reversed = results;
        reversed.reverse();
        project.set_submissions(reversed);
        assert_eq!(project.fingerprint(), hash);

        let rebuilt: PackagedArtifact = engine.build_reflowable_document(&chapters, &meta, None).unwrap().into();
        project.supersede_artifact(rebuilt);
        assert_ne!(project.fingerprint(), hash);

        assert!(sealed(vec![], vec![]).manifest_hash().is_some());
    }

    #[test]
    fn test_progress_tracks_last_completed() {
        use crate::phases::{PhaseDescriptor, PhaseKind};
        let meta = PublicationMetadata::new("T", "A", NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let mut project = PublishingProject::new(meta);
        assert_eq!(project.progress(), 0);
        let mut done = PhaseRecord::pending(PhaseDescriptor { kind: PhaseKind::IdentifierAcquisition, weight: 10 });
        done.complete();
        let mut failed = PhaseRecord::pending(PhaseDescriptor { kind: PhaseKind::Registration, weight: 20 });
        failed.fail("x");
        project.phases_mut().extend([done, failed]);
        assert_eq!(project.progress(), 10);
    }
}
