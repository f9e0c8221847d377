//! Destination Requirements - Enforceable Contracts
//!
//! Every distribution channel is a variant of [`Destination`] and maps to one
//! strongly-typed [`DestinationRequirements`] record. Identifiers that do not
//! name a known channel parse to [`Destination::Generic`], the documented
//! default entry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::artifact::{EpubVersion, OutputFormat};
use crate::image::ImageEncoding;
use crate::print::{ColorProfile, TrimSize};

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Destination {
    AmazonKdp,
    IngramSpark,
    AppleBooks,
    Kobo,
    GooglePlay,
    BarnesNoble,
    Draft2Digital,
    /// Fallback for unrecognised identifiers.
    Generic,
}

impl Destination {
    pub const ALL: [Destination; 8] = [
        Self::AmazonKdp,
        Self::IngramSpark,
        Self::AppleBooks,
        Self::Kobo,
        Self::GooglePlay,
        Self::BarnesNoble,
        Self::Draft2Digital,
        Self::Generic,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::AmazonKdp => "amazon-kdp",
            Self::IngramSpark => "ingram-spark",
            Self::AppleBooks => "apple-books",
            Self::Kobo => "kobo",
            Self::GooglePlay => "google-play",
            Self::BarnesNoble => "barnes-noble",
            Self::Draft2Digital => "draft2digital",
            Self::Generic => "generic",
        }
    }

    pub fn requirements(self) -> DestinationRequirements {
        DestinationRequirements::for_destination(self)
    }

    /// Lookup that never fails: unknown identifiers fall back to `Generic`.
    pub fn lookup(id: &str) -> Self {
        match id.parse() {
            Ok(d) => d,
            Err(UnknownDestination(id)) => {
                warn!(destination = %id, "unknown destination; using generic requirements");
                Self::Generic
            }
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDestination(pub String);

impl FromStr for Destination {
    type Err = UnknownDestination;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        let found = match normalized.as_str() {
            "amazon-kdp" | "kdp" | "amazon" => Self::AmazonKdp,
            "ingram-spark" | "ingram" | "ingramspark" => Self::IngramSpark,
            "apple-books" | "apple" => Self::AppleBooks,
            "kobo" => Self::Kobo,
            "google-play" | "google" => Self::GooglePlay,
            "barnes-noble" | "barnes-and-noble" | "bn" | "nook" => Self::BarnesNoble,
            "draft2digital" | "d2d" => Self::Draft2Digital,
            "generic" => Self::Generic,
            _ => return Err(UnknownDestination(s.to_string())),
        };
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Requirement records
// ---------------------------------------------------------------------------

/// Whether a destination rejects a violation or only advises against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    Blocking,
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BleedRequirement {
    Required,
    Forbidden,
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverRequirements {
    pub required: bool,
    pub min_width: u32,
    pub min_height: u32,
    pub min_dpi: u32,
    /// Width:height the destination recommends.
    pub aspect_ratio: Option<(u32, u32)>,
    pub aspect_tolerance: f64,
    pub allowed_encodings: &'static [ImageEncoding],
    pub dimensions: Enforcement,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintRequirements {
    pub max_bytes: u64,
    pub min_pages: u32,
    pub max_pages: u32,
    pub color_profile: Option<ColorProfile>,
    pub color_enforcement: Enforcement,
    pub bleed: BleedRequirement,
    pub trims: &'static [TrimSize],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EbookRequirements {
    pub max_bytes: u64,
    pub versions: &'static [EpubVersion],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRequirements {
    pub max_categories: usize,
    pub max_keywords: usize,
    /// Over-limit counts are rejected rather than warned about.
    pub hard_limits: bool,
    pub min_description: usize,
    pub max_description: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRequirements {
    pub destination: Destination,
    pub display_name: &'static str,
    pub ebook: Option<EbookRequirements>,
    pub print: Option<PrintRequirements>,
    pub cover: CoverRequirements,
    pub metadata: MetadataRequirements,
}

const ALL_TRIMS: &[TrimSize] = &TrimSize::ALL;
const BOTH_EPUB: &[EpubVersion] = &[EpubVersion::V2, EpubVersion::V3];
const EPUB3_ONLY: &[EpubVersion] = &[EpubVersion::V3];
const JPEG_PNG: &[ImageEncoding] = &[ImageEncoding::Jpeg, ImageEncoding::Png];
const JPEG_ONLY: &[ImageEncoding] = &[ImageEncoding::Jpeg];

const STANDARD_COVER: CoverRequirements = CoverRequirements {
    required: true,
    min_width: 1400,
    min_height: 2100,
    min_dpi: 72,
    aspect_ratio: Some((2, 3)),
    aspect_tolerance: 0.05,
    allowed_encodings: JPEG_PNG,
    dimensions: Enforcement::Advisory,
};

const STANDARD_METADATA: MetadataRequirements = MetadataRequirements {
    max_categories: 3,
    max_keywords: 7,
    hard_limits: false,
    min_description: 30,
    max_description: 4000,
};

impl DestinationRequirements {
    pub fn for_destination(destination: Destination) -> Self {
        match destination {
            Destination::AmazonKdp => Self {
                destination,
                display_name: "Amazon Kindle Direct Publishing",
                ebook: Some(EbookRequirements { max_bytes: 650 * MB, versions: BOTH_EPUB }),
                print: Some(PrintRequirements {
                    max_bytes: 650 * MB,
                    min_pages: 24,
                    max_pages: 828,
                    color_profile: None,
                    color_enforcement: Enforcement::Advisory,
                    bleed: BleedRequirement::Either,
                    trims: ALL_TRIMS,
                }),
                cover: CoverRequirements { min_width: 1600, min_height: 2560, aspect_ratio: Some((5, 8)), ..STANDARD_COVER },
                metadata: MetadataRequirements { max_categories: 3, max_keywords: 7, hard_limits: true, ..STANDARD_METADATA },
            },
            Destination::IngramSpark => Self {
                destination,
                display_name: "IngramSpark",
                ebook: Some(EbookRequirements { max_bytes: 300 * MB, versions: EPUB3_ONLY }),
                print: Some(PrintRequirements {
                    max_bytes: 1024 * MB,
                    min_pages: 18,
                    max_pages: 1200,
                    color_profile: Some(ColorProfile::Cmyk),
                    color_enforcement: Enforcement::Blocking,
                    bleed: BleedRequirement::Required,
                    trims: ALL_TRIMS,
                }),
                cover: CoverRequirements { min_dpi: 300, dimensions: Enforcement::Blocking, ..STANDARD_COVER },
                metadata: STANDARD_METADATA,
            },
            Destination::AppleBooks => Self {
                destination,
                display_name: "Apple Books",
                ebook: Some(EbookRequirements { max_bytes: 2048 * MB, versions: EPUB3_ONLY }),
                print: None,
                cover: STANDARD_COVER,
                metadata: MetadataRequirements { max_categories: 2, ..STANDARD_METADATA },
            },
            Destination::Kobo => Self {
                destination,
                display_name: "Kobo Writing Life",
                ebook: Some(EbookRequirements { max_bytes: 100 * MB, versions: BOTH_EPUB }),
                print: None,
                cover: STANDARD_COVER,
                metadata: STANDARD_METADATA,
            },
            Destination::GooglePlay => Self {
                destination,
                display_name: "Google Play Books",
                ebook: Some(EbookRequirements { max_bytes: 100 * MB, versions: BOTH_EPUB }),
                print: Some(PrintRequirements {
                    max_bytes: 2048 * MB,
                    min_pages: 1,
                    max_pages: 10_000,
                    color_profile: Some(ColorProfile::Rgb),
                    color_enforcement: Enforcement::Advisory,
                    bleed: BleedRequirement::Either,
                    trims: ALL_TRIMS,
                }),
                cover: CoverRequirements { min_width: 640, min_height: 1024, aspect_ratio: None, ..STANDARD_COVER },
                metadata: MetadataRequirements { max_categories: 5, max_keywords: 10, ..STANDARD_METADATA },
            },
            Destination::BarnesNoble => Self {
                destination,
                display_name: "Barnes & Noble Press",
                ebook: Some(EbookRequirements { max_bytes: 20 * MB, versions: BOTH_EPUB }),
                print: Some(PrintRequirements {
                    max_bytes: 650 * MB,
                    min_pages: 18,
                    max_pages: 800,
                    color_profile: None,
                    color_enforcement: Enforcement::Advisory,
                    bleed: BleedRequirement::Either,
                    trims: &[TrimSize::Digest5x8, TrimSize::Trade55x85, TrimSize::Trade6x9, TrimSize::Letter85x11],
                }),
                cover: CoverRequirements { allowed_encodings: JPEG_ONLY, ..STANDARD_COVER },
                metadata: STANDARD_METADATA,
            },
            Destination::Draft2Digital => Self {
                destination,
                display_name: "Draft2Digital",
                ebook: Some(EbookRequirements { max_bytes: 50 * MB, versions: BOTH_EPUB }),
                print: Some(PrintRequirements {
                    max_bytes: 650 * MB,
                    min_pages: 24,
                    max_pages: 800,
                    color_profile: None,
                    color_enforcement: Enforcement::Advisory,
                    bleed: BleedRequirement::Either,
                    trims: ALL_TRIMS,
                }),
                cover: STANDARD_COVER,
                metadata: STANDARD_METADATA,
            },
            Destination::Generic => Self {
                destination,
                display_name: "Generic distributor",
                ebook: Some(EbookRequirements { max_bytes: 100 * MB, versions: BOTH_EPUB }),
                print: Some(PrintRequirements {
                    max_bytes: 650 * MB,
                    min_pages: 1,
                    max_pages: 1200,
                    color_profile: None,
                    color_enforcement: Enforcement::Advisory,
                    bleed: BleedRequirement::Either,
                    trims: ALL_TRIMS,
                }),
                cover: CoverRequirements { required: false, ..STANDARD_COVER },
                metadata: STANDARD_METADATA,
            },
        }
    }

    pub fn accepts(&self, format: OutputFormat) -> bool {
        match format {
            OutputFormat::Epub => self.ebook.is_some(),
            OutputFormat::Pdf => self.print.is_some(),
        }
    }
}
