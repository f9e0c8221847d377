//! Packaging Engine - single entry point for artifact production
//!
//! Pure function of chapters, metadata and an optional cover. Chapter
//! ordinals are checked before anything is built; a structural error never
//! yields a partial artifact.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::artifact::{EpubVersion, OutputFormat, PackagedArtifact, PrintDocument, ReflowableDocument};
use crate::image::{self, ImageInfo};
use crate::manuscript::{ordered_chapters, Chapter, ManuscriptError, PublicationMetadata};
use crate::print::{PrintSpec, TrimSize};

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("Structural error: {0}")]
    Structure(#[from] ManuscriptError),

    #[error("Cover image is required but none was supplied")]
    CoverMissing,

    #[error("Cover image could not be embedded: unrecognised image data")]
    CoverUnreadable,

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Render error: {0}")]
    Render(String),
}

impl PackagingError {
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structure(_))
    }
}

/// Whether a cover that cannot be embedded fails the build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverMode {
    /// Unreadable covers are dropped with a warning.
    #[default]
    Optional,
    /// A missing or unreadable cover fails the build.
    Required,
}

/// A cover that passed probing and will be embedded.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CoverImage<'a> {
    pub data: &'a [u8],
    pub info: ImageInfo,
}

/// Escape the five markup-significant characters.
pub fn escape_markup(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagingEngine {
    pub epub_version: EpubVersion,
    pub cover_mode: CoverMode,
}

impl PackagingEngine {
    pub fn new(epub_version: EpubVersion, cover_mode: CoverMode) -> Self {
        Self { epub_version, cover_mode }
    }

    pub fn build_reflowable_document(
        &self,
        chapters: &[Chapter],
        metadata: &PublicationMetadata,
        cover: Option<&[u8]>,
    ) -> Result<ReflowableDocument, PackagingError> {
        let ordered = ordered_chapters(chapters)?;
        let cover = self.resolve_cover(cover)?;
        let doc = crate::epub::build(&ordered, metadata, cover, self.epub_version)?;

        info!(
            title = %metadata.title,
            chapters = ordered.len(),
            bytes = doc.byte_size,
            has_cover = doc.has_cover,
            "built reflowable document"
        );
        Ok(doc)
    }

    pub fn build_print_document(
        &self,
        chapters: &[Chapter],
        metadata: &PublicationMetadata,
        trim: TrimSize,
        include_bleed: bool,
    ) -> Result<PrintDocument, PackagingError> {
        self.build_print_document_with(chapters, metadata, &PrintSpec::new(trim, include_bleed))
    }

    pub fn build_print_document_with(
        &self,
        chapters: &[Chapter],
        metadata: &PublicationMetadata,
        spec: &PrintSpec,
    ) -> Result<PrintDocument, PackagingError> {
        let ordered = ordered_chapters(chapters)?;
        let doc = crate::print::build(&ordered, metadata, spec)?;

        info!(
            title = %metadata.title,
            trim = %spec.trim,
            pages = doc.page_count,
            bytes = doc.byte_size,
            "built print document"
        );
        Ok(doc)
    }

    /// Build whichever artifact a format calls for.
    pub fn build(
        &self,
        format: OutputFormat,
        chapters: &[Chapter],
        metadata: &PublicationMetadata,
        cover: Option<&[u8]>,
        print: &PrintSpec,
    ) -> Result<PackagedArtifact, PackagingError> {
        match format {
            OutputFormat::Epub => self.build_reflowable_document(chapters, metadata, cover).map(Into::into),
            OutputFormat::Pdf => self.build_print_document_with(chapters, metadata, print).map(Into::into),
        }
    }

    fn resolve_cover<'a>(&self, cover: Option<&'a [u8]>) -> Result<Option<CoverImage<'a>>, PackagingError> {
        let Some(data) = cover else {
            return match self.cover_mode {
                CoverMode::Required => Err(PackagingError::CoverMissing),
                CoverMode::Optional => Ok(None),
            };
        };

        match image::probe(data) {
            Some(info) => Ok(Some(CoverImage { data, info })),
            None if self.cover_mode == CoverMode::Required => Err(PackagingError::CoverUnreadable),
            None => {
                warn!(bytes = data.len(), "cover image unreadable; packaging without cover");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_markup() {
        assert_eq!(escape_markup("plain"), "plain");
        assert!(matches!(escape_markup("plain"), Cow::Borrowed(_)));
        assert_eq!(
            escape_markup(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &apos;Jerry&apos;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_cover_mode_resolution() {
        let optional = PackagingEngine::default();
        assert!(optional.resolve_cover(None).unwrap().is_none());
        assert!(optional.resolve_cover(Some(b"not an image")).unwrap().is_none());

        let required = PackagingEngine::new(EpubVersion::V3, CoverMode::Required);
        assert!(matches!(required.resolve_cover(None), Err(PackagingError::CoverMissing)));
        assert!(matches!(
            required.resolve_cover(Some(b"not an image")),
            Err(PackagingError::CoverUnreadable)
        ));

        let png = crate::image::fixtures::png(160, 256, None);
        let cover = required.resolve_cover(Some(&png)).unwrap().unwrap();
        assert_eq!(cover.info.width, 160);
    }
}
