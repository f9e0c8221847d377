//! Print Document Engine
//!
//! Lays chapters out on fixed-size pages and renders a PDF with the standard
//! Type1 fonts. Page count is always read back from the rendered file.
//!
//! Front matter order is fixed: title page, rights page, contents (only when
//! there is more than one chapter), then chapters in ordinal order.

use std::fmt;
use std::str::FromStr;

use chrono::Datelike;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::{InspectError, PrintDocument};
use crate::hashing::checksum;
use crate::manuscript::{Chapter, PublicationMetadata};
use crate::packaging::PackagingError;

pub const POINTS_PER_INCH: f32 = 72.0;
pub const MARGIN_INCHES: f32 = 0.75;
/// Bleed added beyond trim on each edge by destinations that require it.
pub const BLEED_INCHES: f32 = 0.125;

const BODY_SIZE: f32 = 11.0;
const HEADING_SIZE: f32 = 18.0;
const TITLE_SIZE: f32 = 24.0;
const SUBTITLE_SIZE: f32 = 14.0;
const FOLIO_SIZE: f32 = 9.0;
/// Average Times glyph width as a fraction of the em.
const GLYPH_WIDTH_EM: f32 = 0.5;

// ---------------------------------------------------------------------------
// Trim sizes and color profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrimSize {
    #[serde(rename = "5x8")]
    Digest5x8,
    #[serde(rename = "5.25x8")]
    Digest525x8,
    #[serde(rename = "5.5x8.5")]
    Trade55x85,
    #[serde(rename = "6x9")]
    Trade6x9,
    #[serde(rename = "7x10")]
    Executive7x10,
    #[serde(rename = "8.5x11")]
    Letter85x11,
}

impl TrimSize {
    pub const ALL: [TrimSize; 6] = [
        Self::Digest5x8,
        Self::Digest525x8,
        Self::Trade55x85,
        Self::Trade6x9,
        Self::Executive7x10,
        Self::Letter85x11,
    ];

    /// (width, height) in inches
    pub fn inches(self) -> (f32, f32) {
        match self {
            Self::Digest5x8 => (5.0, 8.0),
            Self::Digest525x8 => (5.25, 8.0),
            Self::Trade55x85 => (5.5, 8.5),
            Self::Trade6x9 => (6.0, 9.0),
            Self::Executive7x10 => (7.0, 10.0),
            Self::Letter85x11 => (8.5, 11.0),
        }
    }

    /// (width, height) in PDF points
    pub fn points(self) -> (f32, f32) {
        let (w, h) = self.inches();
        (w * POINTS_PER_INCH, h * POINTS_PER_INCH)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Digest5x8 => "5x8",
            Self::Digest525x8 => "5.25x8",
            Self::Trade55x85 => "5.5x8.5",
            Self::Trade6x9 => "6x9",
            Self::Executive7x10 => "7x10",
            Self::Letter85x11 => "8.5x11",
        }
    }

    /// Nearest named trim within one point on both axes.
    pub fn from_points(width: f32, height: f32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| {
            let (w, h) = t.points();
            (w - width).abs() <= 1.0 && (h - height).abs() <= 1.0
        })
    }
}

impl fmt::Display for TrimSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrimSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(' ', "");
        Self::ALL
            .into_iter()
            .find(|t| t.name() == normalized)
            .ok_or_else(|| format!("Unknown trim size: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColorProfile {
    Rgb,
    Cmyk,
    Grayscale,
}

impl FromStr for ColorProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rgb" => Ok(Self::Rgb),
            "cmyk" => Ok(Self::Cmyk),
            "grayscale" | "gray" | "grey" => Ok(Self::Grayscale),
            _ => Err(format!("Unknown color profile: {s}")),
        }
    }
}

/// Physical options for a print build. Bleed and color profile are carried
/// onto the artifact untouched; the validator decides whether they suit a
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintSpec {
    pub trim: TrimSize,
    #[serde(default)]
    pub include_bleed: bool,
    #[serde(default = "default_color_profile")]
    pub color_profile: ColorProfile,
}

fn default_color_profile() -> ColorProfile {
    ColorProfile::Grayscale
}

impl Default for PrintSpec {
    fn default() -> Self {
        Self {
            trim: TrimSize::Trade6x9,
            include_bleed: false,
            color_profile: default_color_profile(),
        }
    }
}

impl PrintSpec {
    pub fn new(trim: TrimSize, include_bleed: bool) -> Self {
        Self {
            trim,
            include_bleed,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionKind {
    TitlePage,
    Copyright,
    Contents,
    Chapter { position: u32 },
}

/// Where a front-matter section or chapter starts in the rendered document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintSection {
    #[serde(flatten)]
    pub kind: SectionKind,
    pub title: String,
    pub first_page: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Self::Regular => "F1",
            Self::Bold => "F2",
        }
    }
}

#[derive(Debug, Clone)]
struct Line {
    text: String,
    size: f32,
    font: Font,
    centered: bool,
}

impl Line {
    fn body(text: impl Into<String>) -> Self {
        Self { text: text.into(), size: BODY_SIZE, font: Font::Regular, centered: false }
    }

    fn blank() -> Self {
        Self::body("")
    }

    fn height(&self) -> f32 {
        self.size * 1.35
    }
}

#[derive(Debug, Clone, Default)]
struct Page {
    lines: Vec<Line>,
    folio: bool,
}

/// Text area geometry for one trim size.
#[derive(Debug, Clone, Copy)]
struct Frame {
    width: f32,
    height: f32,
    margin: f32,
}

impl Frame {
    fn for_trim(trim: TrimSize) -> Self {
        let (width, height) = trim.points();
        Self { width, height, margin: MARGIN_INCHES * POINTS_PER_INCH }
    }

    fn text_width(&self) -> f32 {
        self.width - 2.0 * self.margin
    }

    /// Text height minus a reserved folio line.
    fn text_height(&self) -> f32 {
        self.height - 2.0 * self.margin - FOLIO_SIZE * 2.0
    }

    fn chars_per_line(&self, size: f32) -> usize {
        ((self.text_width() / (size * GLYPH_WIDTH_EM)).floor() as usize).max(8)
    }
}

struct Paginator {
    frame: Frame,
    pages: Vec<Page>,
    cursor: f32,
}

impl Paginator {
    fn new(frame: Frame) -> Self {
        Self { frame, pages: vec![], cursor: 0.0 }
    }

    /// Starts a fresh page and returns its 1-based index within this paginator.
    fn start_page(&mut self, folio: bool) -> u32 {
        self.pages.push(Page { lines: vec![], folio });
        self.cursor = 0.0;
        self.pages.len() as u32
    }

    fn push(&mut self, line: Line) {
        let h = line.height();
        if self.pages.is_empty() || self.cursor + h > self.frame.text_height() {
            let folio = self.pages.last().map_or(false, |p| p.folio);
            self.start_page(folio);
        }
        self.cursor += h;
        if let Some(page) = self.pages.last_mut() {
            page.lines.push(line);
        }
    }

    fn push_wrapped(&mut self, text: &str, size: f32, font: Font, centered: bool) {
        for text in wrap(text, self.frame.chars_per_line(size)) {
            self.push(Line { text, size, font, centered });
        }
    }
}

/// Greedy word wrap; words longer than a line are hard split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = vec![];
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(width).collect();
            word = word.chars().skip(width).collect();
            lines.push(head);
        }
        let needed = if current.is_empty() { word.chars().count() } else { current.chars().count() + 1 + word.chars().count() };
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn title_page(p: &mut Paginator, metadata: &PublicationMetadata) {
    p.start_page(false);
    for _ in 0..8 {
        p.push(Line::blank());
    }
    p.push_wrapped(&metadata.title, TITLE_SIZE, Font::Bold, true);
    if let Some(subtitle) = metadata.subtitle.as_deref().filter(|s| !s.trim().is_empty()) {
        p.push(Line::blank());
        p.push_wrapped(subtitle, SUBTITLE_SIZE, Font::Regular, true);
    }
    for _ in 0..4 {
        p.push(Line::blank());
    }
    p.push_wrapped(&metadata.author, SUBTITLE_SIZE, Font::Regular, true);
}

fn copyright_page(p: &mut Paginator, metadata: &PublicationMetadata) {
    p.start_page(false);
    p.push_wrapped(
        &format!("Copyright \u{a9} {} {}", metadata.publication_date.year(), metadata.author),
        BODY_SIZE,
        Font::Regular,
        false,
    );
    p.push(Line::body("All rights reserved."));
    p.push(Line::blank());
    if let Some(isbn) = &metadata.isbn {
        p.push(Line::body(format!("ISBN: {isbn}")));
    }
    p.push(Line::body(format!("First published {}", metadata.publication_date.format("%B %Y"))));
}

fn contents_pages(p: &mut Paginator, entries: &[(&Chapter, u32)]) {
    p.start_page(false);
    p.push_wrapped("Contents", HEADING_SIZE, Font::Bold, false);
    p.push(Line::blank());
    for (chapter, page) in entries {
        p.push_wrapped(
            &format!("{}. {} .... {}", chapter.position, chapter.title, page),
            BODY_SIZE,
            Font::Regular,
            false,
        );
    }
}

/// Lay out chapters alone, returning pages and each chapter's relative first page.
fn chapter_pages(frame: Frame, chapters: &[&Chapter]) -> (Vec<Page>, Vec<u32>) {
    let mut p = Paginator::new(frame);
    let mut starts = Vec::with_capacity(chapters.len());
    for chapter in chapters {
        starts.push(p.start_page(true));
        p.push_wrapped(&chapter.title, HEADING_SIZE, Font::Bold, false);
        p.push(Line::blank());
        for paragraph in chapter.paragraphs() {
            p.push_wrapped(paragraph, BODY_SIZE, Font::Regular, false);
            p.push(Line::blank());
        }
    }
    (p.pages, starts)
}

struct Layout {
    pages: Vec<Page>,
    sections: Vec<PrintSection>,
}

fn layout(chapters: &[&Chapter], metadata: &PublicationMetadata, frame: Frame) -> Layout {
    let mut front = Paginator::new(frame);
    title_page(&mut front, metadata);
    let copyright_first = front.pages.len() as u32 + 1;
    copyright_page(&mut front, metadata);
    let mut sections = vec![
        PrintSection { kind: SectionKind::TitlePage, title: metadata.full_title(), first_page: 1 },
        PrintSection { kind: SectionKind::Copyright, title: "Copyright".into(), first_page: copyright_first },
    ];

    let (body, relative_starts) = chapter_pages(frame, chapters);
    let front_len = front.pages.len() as u32;

    let mut pages = front.pages;
    let mut offset = front_len;

    if chapters.len() > 1 {
        // Contents length depends on the page numbers it prints; settle it.
        let mut guess = 1u32;
        let toc = loop {
            let entries: Vec<_> = chapters
                .iter()
                .zip(&relative_starts)
                .map(|(c, start)| (*c, front_len + guess + start))
                .collect();
            let mut toc = Paginator::new(frame);
            contents_pages(&mut toc, &entries);
            let used = toc.pages.len() as u32;
            if used == guess {
                break toc;
            }
            guess = used;
        };
        sections.push(PrintSection { kind: SectionKind::Contents, title: "Contents".into(), first_page: front_len + 1 });
        offset += toc.pages.len() as u32;
        pages.extend(toc.pages);
    }

    for (chapter, start) in chapters.iter().zip(&relative_starts) {
        sections.push(PrintSection {
            kind: SectionKind::Chapter { position: chapter.position },
            title: chapter.title.clone(),
            first_page: offset + start,
        });
    }
    pages.extend(body);

    Layout { pages, sections }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Standard fonts use WinAnsi; anything outside Latin-1 degrades.
fn pdf_text(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\u{2018}' | '\u{2019}' => out.push(b'\''),
            '\u{201C}' | '\u{201D}' => out.push(b'"'),
            '\u{2013}' | '\u{2014}' => out.push(b'-'),
            '\u{2026}' => out.extend_from_slice(b"..."),
            c if (c as u32) <= 0xFF => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

fn page_content(page: &Page, number: u32, frame: Frame) -> Content {
    let mut operations = vec![];
    let mut y = frame.height - frame.margin;

    for line in &page.lines {
        y -= line.height();
        if line.text.is_empty() {
            continue;
        }
        let x = if line.centered {
            let estimate = line.text.chars().count() as f32 * line.size * GLYPH_WIDTH_EM;
            ((frame.width - estimate) / 2.0).max(frame.margin)
        } else {
            frame.margin
        };
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec![line.font.resource().into(), line.size.into()]));
        operations.push(Operation::new("Td", vec![x.into(), y.into()]));
        operations.push(Operation::new("Tj", vec![Object::string_literal(pdf_text(&line.text))]));
        operations.push(Operation::new("ET", vec![]));
    }

    if page.folio {
        let folio = number.to_string();
        let x = (frame.width - folio.len() as f32 * FOLIO_SIZE * GLYPH_WIDTH_EM) / 2.0;
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F1".into(), FOLIO_SIZE.into()]));
        operations.push(Operation::new("Td", vec![x.into(), (frame.margin / 2.0).into()]));
        operations.push(Operation::new("Tj", vec![Object::string_literal(folio)]));
        operations.push(Operation::new("ET", vec![]));
    }

    Content { operations }
}

fn render(pages: &[Page], metadata: &PublicationMetadata, frame: Frame) -> Result<Vec<u8>, PackagingError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Times-Roman",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Times-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for (index, page) in pages.iter().enumerate() {
        let content = page_content(page, index as u32 + 1, frame);
        let encoded = content.encode().map_err(|e| PackagingError::Render(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id: ObjectId = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), frame.width.into(), frame.height.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(pdf_text(&metadata.full_title())),
        "Author" => Object::string_literal(pdf_text(&metadata.author)),
        "Producer" => Object::string_literal(format!("ForgePress {}", crate::ENGINE_VERSION)),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.compress();

    let mut binary = Vec::new();
    doc.save_to(&mut binary).map_err(|e| PackagingError::Render(e.to_string()))?;
    Ok(binary)
}

/// Count pages by reading the rendered file back.
pub fn rendered_page_count(binary: &[u8]) -> Result<u32, InspectError> {
    let doc = Document::load_mem(binary).map_err(|e| InspectError::Pdf(e.to_string()))?;
    Ok(doc.get_pages().len() as u32)
}

pub(crate) fn build(
    chapters: &[&Chapter],
    metadata: &PublicationMetadata,
    spec: &PrintSpec,
) -> Result<PrintDocument, PackagingError> {
    let frame = Frame::for_trim(spec.trim);
    let Layout { pages, sections } = layout(chapters, metadata, frame);
    let binary = render(&pages, metadata, frame)?;
    let page_count = rendered_page_count(&binary).map_err(|e| PackagingError::Render(e.to_string()))?;

    debug!(
        trim = %spec.trim,
        laid_out = pages.len(),
        page_count,
        "rendered print document"
    );

    Ok(PrintDocument {
        byte_size: binary.len() as u64,
        checksum: checksum(&binary),
        page_count,
        trim: spec.trim,
        bleed: spec.include_bleed,
        color_profile: spec.color_profile,
        sections,
        binary,
    })
}

/// Rebuild a print record from a PDF on disk. Bleed and color profile are
/// not recoverable from the file and come from the caller.
pub(crate) fn inspect(binary: Vec<u8>, bleed: bool, color_profile: ColorProfile) -> Result<PrintDocument, InspectError> {
    let doc = Document::load_mem(&binary).map_err(|e| InspectError::Pdf(e.to_string()))?;
    let pages = doc.get_pages();
    let first = *pages.values().next().ok_or(InspectError::Empty)?;
    let (width, height) = media_box(&doc, first)?;
    let trim = TrimSize::from_points(width, height).ok_or(InspectError::UnknownTrim { width, height })?;

    Ok(PrintDocument {
        byte_size: binary.len() as u64,
        checksum: checksum(&binary),
        page_count: pages.len() as u32,
        trim,
        bleed,
        color_profile,
        sections: vec![],
        binary,
    })
}

/// MediaBox of a page, following `Parent` links for inherited boxes.
fn media_box(doc: &Document, page: ObjectId) -> Result<(f32, f32), InspectError> {
    let pdf_err = |e: lopdf::Error| InspectError::Pdf(e.to_string());
    let mut dict = doc.get_dictionary(page).map_err(pdf_err)?;
    loop {
        if let Ok(rect) = dict.get(b"MediaBox").and_then(Object::as_array) {
            let nums: Vec<f32> = rect.iter().filter_map(|o| o.as_float().ok()).collect();
            if nums.len() == 4 {
                return Ok((nums[2] - nums[0], nums[3] - nums[1]));
            }
        }
        let parent = dict.get(b"Parent").and_then(Object::as_reference).map_err(pdf_err)?;
        dict = doc.get_dictionary(parent).map_err(pdf_err)?;
    }
}
