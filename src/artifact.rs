//! Packaged artifacts and their transport descriptors
//!
//! Artifacts are produced once per (project, format) and never mutated. A
//! re-conversion produces a new artifact that replaces the old one.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::ImageInfo;
use crate::print::{ColorProfile, PrintSection, TrimSize};

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("Unrecognised artifact: neither an e-book container nor a PDF")]
    UnknownFormat,

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Missing archive entry: {0}")]
    MissingEntry(String),

    #[error("Malformed package markup: {0}")]
    Markup(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("Document has no pages")]
    Empty,

    #[error("Page size {width}x{height}pt matches no known trim size")]
    UnknownTrim { width: f32, height: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Epub,
    Pdf,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Epub => "epub",
            Self::Pdf => "pdf",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            Self::Epub => "application/epub+zip",
            Self::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "epub" | "ebook" => Ok(Self::Epub),
            "pdf" | "print" => Ok(Self::Pdf),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpubVersion {
    V2,
    V3,
}

impl EpubVersion {
    pub fn package_version(self) -> &'static str {
        match self {
            Self::V2 => "2.0",
            Self::V3 => "3.0",
        }
    }
}

impl Default for EpubVersion {
    fn default() -> Self {
        Self::V3
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflowableDocument {
    #[serde(skip)]
    pub binary: Vec<u8>,
    pub byte_size: u64,
    pub checksum: String,
    pub format_version: EpubVersion,
    pub toc_depth: u32,
    pub has_cover: bool,
    #[serde(default)]
    pub cover: Option<ImageInfo>,
    /// `urn:uuid:` identifier minted for this build.
    pub identifier: String,
    pub chapter_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintDocument {
    #[serde(skip)]
    pub binary: Vec<u8>,
    pub byte_size: u64,
    pub checksum: String,
    pub page_count: u32,
    pub trim: TrimSize,
    pub bleed: bool,
    pub color_profile: ColorProfile,
    #[serde(default)]
    pub sections: Vec<PrintSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackagedArtifact {
    Reflowable(ReflowableDocument),
    Print(PrintDocument),
}

/// What travels with an artifact outside the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    pub format: OutputFormat,
    pub media_type: String,
    pub byte_size: u64,
    pub checksum: String,
}

/// Caller-supplied attributes a PDF does not record about itself.
#[derive(Debug, Clone, Copy)]
pub struct PrintHints {
    pub bleed: bool,
    pub color_profile: ColorProfile,
}

impl Default for PrintHints {
    fn default() -> Self {
        Self {
            bleed: false,
            color_profile: ColorProfile::Grayscale,
        }
    }
}

impl PackagedArtifact {
    pub fn format(&self) -> OutputFormat {
        match self {
            Self::Reflowable(_) => OutputFormat::Epub,
            Self::Print(_) => OutputFormat::Pdf,
        }
    }

    pub fn binary(&self) -> &[u8] {
        match self {
            Self::Reflowable(doc) => &doc.binary,
            Self::Print(doc) => &doc.binary,
        }
    }

    pub fn byte_size(&self) -> u64 {
        match self {
            Self::Reflowable(doc) => doc.byte_size,
            Self::Print(doc) => doc.byte_size,
        }
    }

    pub fn checksum(&self) -> &str {
        match self {
            Self::Reflowable(doc) => &doc.checksum,
            Self::Print(doc) => &doc.checksum,
        }
    }

    pub fn descriptor(&self) -> ArtifactDescriptor {
        let format = self.format();
        ArtifactDescriptor {
            format,
            media_type: format.media_type().to_string(),
            byte_size: self.byte_size(),
            checksum: self.checksum().to_string(),
        }
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.binary())
    }

    pub fn as_reflowable(&self) -> Option<&ReflowableDocument> {
        match self {
            Self::Reflowable(doc) => Some(doc),
            Self::Print(_) => None,
        }
    }

    pub fn as_print(&self) -> Option<&PrintDocument> {
        match self {
            Self::Print(doc) => Some(doc),
            Self::Reflowable(_) => None,
        }
    }

    /// Rebuild an artifact record from bytes written earlier.
    pub fn inspect(binary: Vec<u8>, hints: PrintHints) -> Result<Self, InspectError> {
        if binary.starts_with(b"%PDF-") {
            crate::print::inspect(binary, hints.bleed, hints.color_profile).map(Self::Print)
        } else if binary.starts_with(b"PK\x03\x04") {
            crate::epub::inspect(binary).map(Self::Reflowable)
        } else {
            Err(InspectError::UnknownFormat)
        }
    }
}

impl From<ReflowableDocument> for PackagedArtifact {
    fn from(doc: ReflowableDocument) -> Self {
        Self::Reflowable(doc)
    }
}

impl From<PrintDocument> for PackagedArtifact {
    fn from(doc: PrintDocument) -> Self {
        Self::Print(doc)
    }
}
