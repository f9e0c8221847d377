//! Validation System - Rule/Verdict Separation
//!
//! Rules compare an artifact (and optionally its metadata) against one
//! destination's requirement record and produce diagnostics. The verdict
//! fails only when at least one diagnostic is critical; the quality score
//! is informational.

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use zip::{CompressionMethod, ZipArchive};

use crate::artifact::{OutputFormat, PackagedArtifact, PrintDocument, ReflowableDocument};
use crate::destinations::{BleedRequirement, Destination, DestinationRequirements, Enforcement};
use crate::epub::{CONTAINER_PATH, MIMETYPE};
use crate::manuscript::PublicationMetadata;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Error,
    Warning,
}

/// Weight of a warning in the quality score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diagnostic {
    pub code: String,
    pub rule: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<Impact>,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub suggestion: String,
}

impl Diagnostic {
    fn new(rule: &str, code: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            rule: rule.to_string(),
            severity,
            impact: None,
            message: message.into(),
            expected: None,
            actual: None,
            suggestion: String::new(),
        }
    }

    fn critical(rule: &str, code: &str, message: impl Into<String>) -> Self {
        Self::new(rule, code, Severity::Critical, message)
    }

    fn error(rule: &str, code: &str, message: impl Into<String>) -> Self {
        Self::new(rule, code, Severity::Error, message)
    }

    fn warning(rule: &str, code: &str, impact: Impact, message: impl Into<String>) -> Self {
        Self {
            impact: Some(impact),
            ..Self::new(rule, code, Severity::Warning, message)
        }
    }

    /// Blocking destinations raise an error; advisory ones a warning.
    fn enforced(rule: &str, code: &str, enforcement: Enforcement, impact: Impact, message: impl Into<String>) -> Self {
        match enforcement {
            Enforcement::Blocking => Self::error(rule, code, message),
            Enforcement::Advisory => Self::warning(rule, code, impact, message),
        }
    }

    fn expected(mut self, expected: impl ToString, actual: impl ToString) -> Self {
        self.expected = Some(expected.to_string());
        self.actual = Some(actual.to_string());
        self
    }

    fn suggest(mut self, suggestion: &str) -> Self {
        self.suggestion = suggestion.to_string();
        self
    }

    /// Points this diagnostic costs against the quality score.
    pub fn penalty(&self) -> u32 {
        match (self.severity, self.impact) {
            (Severity::Critical, _) => 20,
            (Severity::Error, _) => 10,
            (Severity::Warning, Some(Impact::High)) => 5,
            (Severity::Warning, Some(Impact::Medium) | None) => 3,
            (Severity::Warning, Some(Impact::Low)) => 1,
        }
    }
}

/// 100 minus penalties, floored at 0.
pub fn quality_score(diagnostics: &[Diagnostic]) -> u8 {
    let penalty: u32 = diagnostics.iter().map(Diagnostic::penalty).sum();
    100u32.saturating_sub(penalty) as u8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub destination: Destination,
    pub format: Option<OutputFormat>,
    pub valid: bool,
    pub score: u8,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationVerdict {
    pub fn from_diagnostics(destination: Destination, format: Option<OutputFormat>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            destination,
            format,
            valid: !diagnostics.iter().any(|d| d.severity == Severity::Critical),
            score: quality_score(&diagnostics),
            diagnostics,
        }
    }

    pub fn is_passing(&self) -> bool {
        self.valid
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == severity).count()
    }

    pub fn critical(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Critical)
    }
}

/// What a rule looks at.
#[derive(Debug, Clone, Copy)]
pub struct ValidationSubject<'a> {
    pub artifact: Option<&'a PackagedArtifact>,
    pub metadata: Option<&'a PublicationMetadata>,
}

impl<'a> ValidationSubject<'a> {
    fn reflowable(&self) -> Option<&'a ReflowableDocument> {
        self.artifact.and_then(PackagedArtifact::as_reflowable)
    }

    fn print(&self) -> Option<&'a PrintDocument> {
        self.artifact.and_then(PackagedArtifact::as_print)
    }
}

/// Validation rule trait - produces diagnostics
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, subject: &ValidationSubject<'_>, requirements: &DestinationRequirements) -> Vec<Diagnostic>;
}

// --- Artifact rules ---

pub struct FormatRule;

impl ValidationRule for FormatRule {
    fn name(&self) -> &'static str { "format" }

    fn check(&self, subject: &ValidationSubject<'_>, req: &DestinationRequirements) -> Vec<Diagnostic> {
        let Some(artifact) = subject.artifact else { return vec![] };
        let format = artifact.format();

        if !req.accepts(format) {
            return vec![Diagnostic::critical(
                self.name(),
                "UNSUPPORTED_FORMAT",
                format!("{} does not accept {} files", req.display_name, format),
            )
            .suggest("Submit a format this destination distributes, or drop it from the destination list")];
        }

        match (subject.reflowable(), req.ebook) {
            (Some(doc), Some(ebook)) if !ebook.versions.contains(&doc.format_version) => {
                vec![Diagnostic::critical(self.name(), "UNSUPPORTED_EPUB_VERSION", "E-book package version not accepted")
                    .expected(format!("{:?}", ebook.versions), format!("{:?}", doc.format_version))
                    .suggest("Rebuild the e-book as EPUB 3")]
            }
            _ => vec![],
        }
    }
}

pub struct FileSizeRule;

impl ValidationRule for FileSizeRule {
    fn name(&self) -> &'static str { "file_size" }

    fn check(&self, subject: &ValidationSubject<'_>, req: &DestinationRequirements) -> Vec<Diagnostic> {
        let Some(artifact) = subject.artifact else { return vec![] };
        let max = match artifact.format() {
            OutputFormat::Epub => req.ebook.map(|e| e.max_bytes),
            OutputFormat::Pdf => req.print.map(|p| p.max_bytes),
        };

        match max {
            Some(max) if artifact.byte_size() > max => vec![Diagnostic::critical(
                self.name(),
                "FILE_TOO_LARGE",
                format!("File exceeds the {} size limit", req.display_name),
            )
            .expected(format!("<= {max} bytes"), format!("{} bytes", artifact.byte_size()))
            .suggest("Compress embedded images or split the work")],
            _ => vec![],
        }
    }
}

/// Reopens the container and checks the sentinel entry and container pointer.
pub struct PackageStructureRule;

impl PackageStructureRule {
    fn problems(binary: &[u8]) -> Vec<String> {
        let mut archive = match ZipArchive::new(Cursor::new(binary)) {
            Ok(a) => a,
            Err(e) => return vec![format!("container is not a readable archive: {e}")],
        };
        let mut problems = vec![];

        match archive.by_index(0) {
            Ok(mut first) => {
                if first.name() != "mimetype" {
                    problems.push(format!("first entry is '{}', expected 'mimetype'", first.name()));
                } else {
                    if first.compression() != CompressionMethod::Stored {
                        problems.push("mimetype entry is compressed".to_string());
                    }
                    let mut content = String::new();
                    if std::io::Read::read_to_string(&mut first, &mut content).is_err() || content != MIMETYPE {
                        problems.push("mimetype entry has unexpected content".to_string());
                    }
                }
            }
            Err(_) => problems.push("archive is empty".to_string()),
        }

        if archive.by_name(CONTAINER_PATH).is_err() {
            problems.push(format!("{CONTAINER_PATH} is missing"));
        }
        problems
    }
}

impl ValidationRule for PackageStructureRule {
    fn name(&self) -> &'static str { "package_structure" }

    fn check(&self, subject: &ValidationSubject<'_>, _req: &DestinationRequirements) -> Vec<Diagnostic> {
        let Some(doc) = subject.reflowable() else { return vec![] };
        Self::problems(&doc.binary)
            .into_iter()
            .map(|problem| {
                Diagnostic::critical(self.name(), "PACKAGE_STRUCTURE", problem)
                    .suggest("Rebuild the e-book with the packaging engine")
            })
            .collect()
    }
}

pub struct CoverRule;

impl ValidationRule for CoverRule {
    fn name(&self) -> &'static str { "cover" }

    fn check(&self, subject: &ValidationSubject<'_>, req: &DestinationRequirements) -> Vec<Diagnostic> {
        let Some(doc) = subject.reflowable() else { return vec![] };
        let rules = req.cover;

        let Some(info) = doc.cover.filter(|_| doc.has_cover) else {
            let diag = if rules.required {
                Diagnostic::critical(self.name(), "MISSING_COVER", format!("{} requires a cover image", req.display_name))
            } else {
                Diagnostic::warning(self.name(), "NO_COVER", Impact::Medium, "No cover image embedded")
            };
            return vec![diag.suggest("Supply or generate a cover image")];
        };

        let mut out = vec![];
        if !rules.allowed_encodings.contains(&info.encoding) {
            out.push(
                Diagnostic::critical(self.name(), "COVER_ENCODING", "Cover image encoding not accepted")
                    .expected(format!("{:?}", rules.allowed_encodings), format!("{:?}", info.encoding))
                    .suggest("Re-export the cover as JPEG"),
            );
        }
        if info.width < rules.min_width || info.height < rules.min_height {
            out.push(
                Diagnostic::enforced(self.name(), "COVER_TOO_SMALL", rules.dimensions, Impact::High, "Cover resolution too low")
                    .expected(format!("{}x{} minimum", rules.min_width, rules.min_height), format!("{}x{}", info.width, info.height))
                    .suggest("Provide a higher resolution cover"),
            );
        }
        if let Some(dpi) = info.dpi.filter(|dpi| *dpi < rules.min_dpi) {
            out.push(
                Diagnostic::enforced(self.name(), "COVER_LOW_DPI", rules.dimensions, Impact::Medium, "Cover density too low")
                    .expected(format!("{} dpi minimum", rules.min_dpi), format!("{dpi} dpi"))
                    .suggest("Export the cover at a higher density"),
            );
        }
        if let Some((w, h)) = rules.aspect_ratio {
            let expected = w as f64 / h as f64;
            let actual = info.width as f64 / info.height as f64;
            if (expected - actual).abs() > rules.aspect_tolerance {
                out.push(
                    Diagnostic::warning(self.name(), "COVER_ASPECT_RATIO", Impact::Low, "Cover aspect ratio mismatch")
                        .expected(format!("{w}:{h}"), format!("{actual:.3}"))
                        .suggest("Crop or resize the cover to the recommended ratio"),
                );
            }
        }
        out
    }
}

pub struct PageCountRule;

impl ValidationRule for PageCountRule {
    fn name(&self) -> &'static str { "page_count" }

    fn check(&self, subject: &ValidationSubject<'_>, req: &DestinationRequirements) -> Vec<Diagnostic> {
        let (Some(doc), Some(print)) = (subject.print(), req.print) else { return vec![] };

        if doc.page_count < print.min_pages {
            vec![Diagnostic::critical(self.name(), "PAGE_COUNT_TOO_LOW", "Too few pages for print distribution")
                .expected(format!(">= {} pages", print.min_pages), doc.page_count)
                .suggest("Add content or choose a smaller trim size")]
        } else if doc.page_count > print.max_pages {
            vec![Diagnostic::critical(self.name(), "PAGE_COUNT_TOO_HIGH", "Too many pages for print distribution")
                .expected(format!("<= {} pages", print.max_pages), doc.page_count)
                .suggest("Choose a larger trim size or split into volumes")]
        } else {
            vec![]
        }
    }
}

pub struct TrimSizeRule;

impl ValidationRule for TrimSizeRule {
    fn name(&self) -> &'static str { "trim_size" }

    fn check(&self, subject: &ValidationSubject<'_>, req: &DestinationRequirements) -> Vec<Diagnostic> {
        let (Some(doc), Some(print)) = (subject.print(), req.print) else { return vec![] };
        if print.trims.contains(&doc.trim) {
            return vec![];
        }
        vec![Diagnostic::critical(self.name(), "UNSUPPORTED_TRIM", "Trim size not offered by destination")
            .expected(print.trims.iter().map(|t| t.name()).collect::<Vec<_>>().join(", "), doc.trim)
            .suggest("Rebuild the print document at a supported trim size")]
    }
}

pub struct ColorProfileRule;

impl ValidationRule for ColorProfileRule {
    fn name(&self) -> &'static str { "color_profile" }

    fn check(&self, subject: &ValidationSubject<'_>, req: &DestinationRequirements) -> Vec<Diagnostic> {
        let (Some(doc), Some(print)) = (subject.print(), req.print) else { return vec![] };
        match print.color_profile {
            Some(wanted) if wanted != doc.color_profile => vec![Diagnostic::enforced(
                self.name(),
                "COLOR_PROFILE_MISMATCH",
                print.color_enforcement,
                Impact::High,
                "Color profile differs from destination requirement",
            )
            .expected(format!("{wanted:?}"), format!("{:?}", doc.color_profile))
            .suggest("Convert the interior to the required color profile")],
            _ => vec![],
        }
    }
}

pub struct BleedRule;

impl ValidationRule for BleedRule {
    fn name(&self) -> &'static str { "bleed" }

    fn check(&self, subject: &ValidationSubject<'_>, req: &DestinationRequirements) -> Vec<Diagnostic> {
        let (Some(doc), Some(print)) = (subject.print(), req.print) else { return vec![] };
        match (print.bleed, doc.bleed) {
            (BleedRequirement::Required, false) => vec![Diagnostic::error(self.name(), "BLEED_MISSING", "Destination requires bleed")
                .suggest("Rebuild with bleed enabled")],
            (BleedRequirement::Forbidden, true) => {
                vec![Diagnostic::warning(self.name(), "BLEED_UNEXPECTED", Impact::Medium, "Destination does not use bleed")
                    .suggest("Rebuild without bleed")]
            }
            _ => vec![],
        }
    }
}

// --- Metadata rules ---

pub struct MetadataRule;

impl ValidationRule for MetadataRule {
    fn name(&self) -> &'static str { "metadata" }

    fn check(&self, subject: &ValidationSubject<'_>, req: &DestinationRequirements) -> Vec<Diagnostic> {
        let Some(meta) = subject.metadata else { return vec![] };
        let limits = req.metadata;
        let mut out = vec![];

        if meta.title.trim().is_empty() {
            out.push(Diagnostic::critical(self.name(), "MISSING_TITLE", "Title is required").suggest("Set a title"));
        }
        if meta.author.trim().is_empty() {
            out.push(Diagnostic::critical(self.name(), "MISSING_AUTHOR", "Author is required").suggest("Set an author name"));
        }

        let description = meta.description.trim().chars().count();
        if description == 0 {
            out.push(
                Diagnostic::warning(self.name(), "MISSING_DESCRIPTION", Impact::High, "No description supplied")
                    .suggest("Write a description of at least a few sentences"),
            );
        } else if description < limits.min_description {
            out.push(
                Diagnostic::warning(self.name(), "DESCRIPTION_TOO_SHORT", Impact::Medium, "Description is very short")
                    .expected(format!(">= {} characters", limits.min_description), description)
                    .suggest("Expand the description"),
            );
        } else if description > limits.max_description {
            out.push(
                Diagnostic::error(self.name(), "DESCRIPTION_TOO_LONG", "Description exceeds destination limit")
                    .expected(format!("<= {} characters", limits.max_description), description)
                    .suggest("Shorten the description"),
            );
        }

        if meta.categories.is_empty() {
            out.push(Diagnostic::warning(self.name(), "NO_CATEGORIES", Impact::Low, "No categories supplied").suggest("Choose at least one category"));
        } else if meta.categories.len() > limits.max_categories {
            let diag = if limits.hard_limits {
                Diagnostic::critical(self.name(), "TOO_MANY_CATEGORIES", "Category count exceeds destination limit")
            } else {
                Diagnostic::warning(self.name(), "TOO_MANY_CATEGORIES", Impact::Medium, "More categories than the destination uses")
            };
            out.push(
                diag.expected(format!("<= {}", limits.max_categories), meta.categories.len())
                    .suggest("Remove the least relevant categories"),
            );
        }

        if meta.keywords.is_empty() {
            out.push(Diagnostic::warning(self.name(), "NO_KEYWORDS", Impact::Low, "No keywords supplied").suggest("Add discovery keywords"));
        } else if meta.keywords.len() > limits.max_keywords {
            let diag = if limits.hard_limits {
                Diagnostic::critical(self.name(), "TOO_MANY_KEYWORDS", "Keyword count exceeds destination limit")
            } else {
                Diagnostic::warning(self.name(), "TOO_MANY_KEYWORDS", Impact::Low, "More keywords than the destination uses")
            };
            out.push(
                diag.expected(format!("<= {}", limits.max_keywords), meta.keywords.len())
                    .suggest("Keep the strongest keywords"),
            );
        }

        out
    }
}

/// Validator runs every rule against one destination's requirements.
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(FormatRule),
                Box::new(FileSizeRule),
                Box::new(PackageStructureRule),
                Box::new(CoverRule),
                Box::new(PageCountRule),
                Box::new(TrimSizeRule),
                Box::new(ColorProfileRule),
                Box::new(BleedRule),
                Box::new(MetadataRule),
            ],
        }
    }

    pub fn validate(&self, artifact: &PackagedArtifact, destination: Destination) -> ValidationVerdict {
        self.validate_against(
            ValidationSubject { artifact: Some(artifact), metadata: None },
            &destination.requirements(),
        )
    }

    pub fn validate_with_metadata(
        &self,
        artifact: &PackagedArtifact,
        metadata: &PublicationMetadata,
        destination: Destination,
    ) -> ValidationVerdict {
        self.validate_against(
            ValidationSubject { artifact: Some(artifact), metadata: Some(metadata) },
            &destination.requirements(),
        )
    }

    pub fn validate_metadata(&self, metadata: &PublicationMetadata, destination: Destination) -> ValidationVerdict {
        self.validate_against(
            ValidationSubject { artifact: None, metadata: Some(metadata) },
            &destination.requirements(),
        )
    }

    /// Run every rule against an explicit requirement record.
    pub fn validate_against(&self, subject: ValidationSubject<'_>, requirements: &DestinationRequirements) -> ValidationVerdict {
        let diagnostics: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.check(&subject, requirements))
            .collect();
        ValidationVerdict::from_diagnostics(
            requirements.destination,
            subject.artifact.map(PackagedArtifact::format),
            diagnostics,
        )
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
