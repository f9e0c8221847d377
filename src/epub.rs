//! Reflowable Document Builder (EPUB 2/3 container)
//!
//! Archive layout:
//! - `mimetype` first, stored without compression
//! - `META-INF/container.xml` pointing at exactly one package document
//! - `OEBPS/content.opf`, `OEBPS/toc.ncx`, `OEBPS/nav.xhtml`, `OEBPS/styles.css`
//! - `OEBPS/cover.xhtml` and `OEBPS/images/cover.*` only when a cover is embedded
//! - `OEBPS/text/chapter-NNN.xhtml`, one per chapter, deflated
//!
//! Entry timestamps are pinned so identical inputs differ only by the
//! per-build identifier.

use std::fmt::Write as _;
use std::io::{Cursor, Read, Write};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::artifact::{EpubVersion, InspectError, ReflowableDocument};
use crate::hashing::checksum;
use crate::image;
use crate::manuscript::{Chapter, PublicationMetadata};
use crate::packaging::{escape_markup as esc, CoverImage, PackagingError};

pub const MIMETYPE: &str = "application/epub+zip";
pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const PACKAGE_PATH: &str = "OEBPS/content.opf";

const STYLESHEET: &str = "body { font-family: serif; line-height: 1.5; margin: 0 5%; }
h1 { text-align: center; margin: 2em 0 1em; page-break-before: always; }
p { text-indent: 1.5em; margin: 0; text-align: justify; }
p.first { text-indent: 0; }
nav ol { list-style: none; padding: 0; }
.cover { text-align: center; margin: 0; padding: 0; }
.cover img { max-width: 100%; max-height: 100%; }
";

/// A manifest row: (id, href relative to OEBPS, media type, properties).
struct Item {
    id: String,
    href: String,
    media_type: &'static str,
    properties: Option<&'static str>,
}

fn chapter_id(position: u32) -> String {
    format!("chapter-{:03}", position)
}

fn chapter_href(position: u32) -> String {
    format!("text/chapter-{:03}.xhtml", position)
}

fn xhtml(version: EpubVersion, lang: &str, title: &str, css_href: &str, body: &str) -> String {
    let (doctype, ns) = match version {
        EpubVersion::V3 => ("<!DOCTYPE html>", r#" xmlns:epub="http://www.idpf.org/2007/ops""#),
        EpubVersion::V2 => (
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#,
            "",
        ),
    };
    let lang = esc(lang);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
{doctype}
<html xmlns="http://www.w3.org/1999/xhtml"{ns} xml:lang="{lang}" lang="{lang}">
<head>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="{css_href}"/>
</head>
<body>
{body}
</body>
</html>
"#,
        title = esc(title),
    )
}

fn chapter_document(version: EpubVersion, lang: &str, chapter: &Chapter) -> String {
    let mut body = String::new();
    let section_type = match version {
        EpubVersion::V3 => r#" epub:type="chapter""#,
        EpubVersion::V2 => "",
    };
    let _ = writeln!(body, r#"<section id="{}"{}>"#, chapter_id(chapter.position), section_type);
    let _ = writeln!(body, "  <h1>{}</h1>", esc(&chapter.title));
    for (index, paragraph) in chapter.paragraphs().enumerate() {
        let class = if index == 0 { r#" class="first""# } else { "" };
        let text = paragraph.split_whitespace().collect::<Vec<_>>().join(" ");
        let _ = writeln!(body, "  <p{}>{}</p>", class, esc(&text));
    }
    body.push_str("</section>");
    xhtml(version, lang, &chapter.title, "../styles.css", &body)
}

fn nav_document(version: EpubVersion, lang: &str, chapters: &[&Chapter]) -> String {
    let nav_type = match version {
        EpubVersion::V3 => r#" epub:type="toc""#,
        EpubVersion::V2 => "",
    };
    let mut body = format!("<nav{} id=\"toc\">\n  <h1>Contents</h1>\n  <ol>\n", nav_type);
    for chapter in chapters {
        let _ = writeln!(
            body,
            r#"    <li><a href="{}">{}</a></li>"#,
            chapter_href(chapter.position),
            esc(&chapter.title)
        );
    }
    body.push_str("  </ol>\n</nav>");
    xhtml(version, lang, "Contents", "styles.css", &body)
}

fn cover_document(version: EpubVersion, lang: &str, image_href: &str) -> String {
    let body = format!(
        r#"<div class="cover"><img src="{}" alt="Cover"/></div>"#,
        image_href
    );
    xhtml(version, lang, "Cover", "styles.css", &body)
}

fn ncx_document(identifier: &str, metadata: &PublicationMetadata, chapters: &[&Chapter]) -> String {
    let mut points = String::new();
    for (index, chapter) in chapters.iter().enumerate() {
        let _ = write!(
            points,
            r#"    <navPoint id="navpoint-{n}" playOrder="{n}">
      <navLabel><text>{title}</text></navLabel>
      <content src="{href}"/>
    </navPoint>
"#,
            n = index + 1,
            title = esc(&chapter.title),
            href = chapter_href(chapter.position),
        );
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{identifier}"/>
    <meta name="dtb:depth" content="1"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <docAuthor><text>{author}</text></docAuthor>
  <navMap>
{points}  </navMap>
</ncx>
"#,
        title = esc(&metadata.full_title()),
        author = esc(&metadata.author),
    )
}

fn package_document(
    version: EpubVersion,
    identifier: &str,
    metadata: &PublicationMetadata,
    items: &[Item],
    spine: &[String],
    has_cover: bool,
) -> String {
    let mut meta = String::new();
    let date = metadata.publication_date.format("%Y-%m-%d");
    match version {
        EpubVersion::V3 => {
            let _ = writeln!(meta, r#"    <dc:identifier id="book-id">{identifier}</dc:identifier>"#);
        }
        EpubVersion::V2 => {
            let _ = writeln!(
                meta,
                r#"    <dc:identifier id="book-id" opf:scheme="UUID">{identifier}</dc:identifier>"#
            );
        }
    }
    let _ = writeln!(meta, "    <dc:title>{}</dc:title>", esc(&metadata.full_title()));
    let _ = writeln!(meta, "    <dc:creator>{}</dc:creator>", esc(&metadata.author));
    let _ = writeln!(meta, "    <dc:language>{}</dc:language>", esc(&metadata.language));
    let _ = writeln!(meta, "    <dc:date>{date}</dc:date>");
    if !metadata.description.trim().is_empty() {
        let _ = writeln!(meta, "    <dc:description>{}</dc:description>", esc(&metadata.description));
    }
    for category in &metadata.categories {
        let _ = writeln!(meta, "    <dc:subject>{}</dc:subject>", esc(category));
    }
    if version == EpubVersion::V3 {
        let _ = writeln!(meta, r#"    <meta property="dcterms:modified">{date}T00:00:00Z</meta>"#);
    }
    if has_cover {
        let _ = writeln!(meta, r#"    <meta name="cover" content="cover-image"/>"#);
    }

    let mut manifest = String::new();
    for item in items {
        let props = match (version, item.properties) {
            (EpubVersion::V3, Some(p)) => format!(r#" properties="{p}""#),
            _ => String::new(),
        };
        let _ = writeln!(
            manifest,
            r#"    <item id="{}" href="{}" media-type="{}"{}/>"#,
            item.id, item.href, item.media_type, props
        );
    }

    let mut itemrefs = String::new();
    for idref in spine {
        let _ = writeln!(itemrefs, r#"    <itemref idref="{idref}"/>"#);
    }

    let dc_ns = match version {
        EpubVersion::V3 => r#" xmlns:dc="http://purl.org/dc/elements/1.1/""#,
        EpubVersion::V2 => r#" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf""#,
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="{pkg_version}" unique-identifier="book-id">
  <metadata{dc_ns}>
{meta}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{itemrefs}  </spine>
</package>
"#,
        pkg_version = version.package_version(),
    )
}

fn container_document() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{PACKAGE_PATH}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    )
}

pub(crate) fn build(
    chapters: &[&Chapter],
    metadata: &PublicationMetadata,
    cover: Option<CoverImage<'_>>,
    version: EpubVersion,
) -> Result<ReflowableDocument, PackagingError> {
    let identifier = format!("urn:uuid:{}", Uuid::new_v4());
    let lang = metadata.language.as_str();

    let mut items = vec![
        Item { id: "nav".into(), href: "nav.xhtml".into(), media_type: "application/xhtml+xml", properties: Some("nav") },
        Item { id: "ncx".into(), href: "toc.ncx".into(), media_type: "application/x-dtbncx+xml", properties: None },
        Item { id: "css".into(), href: "styles.css".into(), media_type: "text/css", properties: None },
    ];
    let mut spine = vec![];
    // (path inside the archive, bytes)
    let mut entries: Vec<(String, Vec<u8>)> = vec![];

    if let Some(cover) = &cover {
        let image_href = format!("images/cover.{}", cover.info.encoding.extension());
        items.push(Item {
            id: "cover-image".into(),
            href: image_href.clone(),
            media_type: cover.info.encoding.media_type(),
            properties: Some("cover-image"),
        });
        items.push(Item { id: "cover".into(), href: "cover.xhtml".into(), media_type: "application/xhtml+xml", properties: None });
        spine.push("cover".to_string());
        entries.push(("OEBPS/cover.xhtml".into(), cover_document(version, lang, &image_href).into_bytes()));
        entries.push((format!("OEBPS/{image_href}"), cover.data.to_vec()));
    }
    spine.push("nav".to_string());

    for chapter in chapters {
        items.push(Item {
            id: chapter_id(chapter.position),
            href: chapter_href(chapter.position),
            media_type: "application/xhtml+xml",
            properties: None,
        });
        spine.push(chapter_id(chapter.position));
        entries.push((
            format!("OEBPS/{}", chapter_href(chapter.position)),
            chapter_document(version, lang, chapter).into_bytes(),
        ));
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default());
    let deflated = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    zip.start_file("mimetype", stored)?;
    zip.write_all(MIMETYPE.as_bytes())?;

    let fixed = [
        (CONTAINER_PATH.to_string(), container_document().into_bytes()),
        (
            PACKAGE_PATH.to_string(),
            package_document(version, &identifier, metadata, &items, &spine, cover.is_some()).into_bytes(),
        ),
        ("OEBPS/toc.ncx".to_string(), ncx_document(&identifier, metadata, chapters).into_bytes()),
        ("OEBPS/nav.xhtml".to_string(), nav_document(version, lang, chapters).into_bytes()),
        ("OEBPS/styles.css".to_string(), STYLESHEET.as_bytes().to_vec()),
    ];
    for (path, data) in fixed.iter().chain(entries.iter()) {
        zip.start_file(path.as_str(), deflated)?;
        zip.write_all(data)?;
    }

    let binary = zip.finish()?.into_inner();

    Ok(ReflowableDocument {
        byte_size: binary.len() as u64,
        checksum: checksum(&binary),
        format_version: version,
        toc_depth: 1,
        has_cover: cover.is_some(),
        cover: cover.map(|c| c.info),
        identifier,
        chapter_count: chapters.len() as u32,
        binary,
    })
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

fn markup_error(err: impl std::fmt::Display) -> InspectError {
    InspectError::Markup(err.to_string())
}

fn attribute(tag: &BytesStart<'_>, name: &str) -> Result<Option<String>, InspectError> {
    match tag.try_get_attribute(name).map_err(markup_error)? {
        Some(attr) => Ok(Some(attr.unescape_value().map_err(markup_error)?.into_owned())),
        None => Ok(None),
    }
}

/// `full-path` of the first rootfile named by the container document.
fn rootfile_path(container: &str) -> Result<Option<String>, InspectError> {
    let mut reader = Reader::from_str(container);
    loop {
        match reader.read_event().map_err(markup_error)? {
            Event::Start(tag) | Event::Empty(tag) if tag.local_name().as_ref() == b"rootfile" => {
                return attribute(&tag, "full-path");
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

struct ManifestEntry {
    id: String,
    href: String,
    properties: Option<String>,
}

impl ManifestEntry {
    fn is_cover_image(&self) -> bool {
        self.id == "cover-image"
            || self
                .properties
                .as_deref()
                .is_some_and(|p| p.split_whitespace().any(|p| p == "cover-image"))
    }
}

/// The parts of a package document inspection needs.
#[derive(Default)]
struct PackageOutline {
    version: Option<String>,
    identifier: String,
    manifest: Vec<ManifestEntry>,
    spine: Vec<String>,
}

fn package_outline(opf: &str) -> Result<PackageOutline, InspectError> {
    let mut reader = Reader::from_str(opf);
    let mut outline = PackageOutline::default();
    let mut in_identifier = false;

    loop {
        match reader.read_event().map_err(markup_error)? {
            Event::Start(tag) if tag.local_name().as_ref() == b"identifier" => {
                in_identifier = outline.identifier.is_empty();
            }
            Event::Start(tag) | Event::Empty(tag) => match tag.local_name().as_ref() {
                b"package" => outline.version = attribute(&tag, "version")?,
                b"item" => {
                    let (Some(id), Some(href)) = (attribute(&tag, "id")?, attribute(&tag, "href")?) else {
                        return Err(InspectError::Markup("manifest item without id or href".into()));
                    };
                    let properties = attribute(&tag, "properties")?;
                    outline.manifest.push(ManifestEntry { id, href, properties });
                }
                b"itemref" => {
                    if let Some(idref) = attribute(&tag, "idref")? {
                        outline.spine.push(idref);
                    }
                }
                _ => {}
            },
            Event::Text(text) if in_identifier => {
                outline.identifier.push_str(text.unescape().map_err(markup_error)?.trim());
            }
            Event::End(tag) if tag.local_name().as_ref() == b"identifier" => in_identifier = false,
            Event::Eof => return Ok(outline),
            _ => {}
        }
    }
}

pub(crate) fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, path: &str) -> Result<Vec<u8>, InspectError> {
    let mut file = archive
        .by_name(path)
        .map_err(|_| InspectError::MissingEntry(path.to_string()))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|e| InspectError::Archive(e.to_string()))?;
    Ok(data)
}

pub(crate) fn read_text(archive: &mut ZipArchive<Cursor<&[u8]>>, path: &str) -> Result<String, InspectError> {
    String::from_utf8(read_entry(archive, path)?).map_err(|e| InspectError::Archive(e.to_string()))
}

/// Rebuild a reflowable record from a container on disk.
pub(crate) fn inspect(binary: Vec<u8>) -> Result<ReflowableDocument, InspectError> {
    let (version, identifier, chapter_count, cover) = {
        let mut archive = ZipArchive::new(Cursor::new(binary.as_slice()))
            .map_err(|e| InspectError::Archive(e.to_string()))?;

        let container = read_text(&mut archive, CONTAINER_PATH)?;
        let opf_path = rootfile_path(&container)?.ok_or_else(|| InspectError::MissingEntry("rootfile".into()))?;
        let opf = read_text(&mut archive, &opf_path)?;
        let base = opf_path.rsplit_once('/').map(|(dir, _)| format!("{dir}/")).unwrap_or_default();
        let outline = package_outline(&opf)?;

        let version = match outline.version.as_deref() {
            Some(v) if v.starts_with('2') => EpubVersion::V2,
            _ => EpubVersion::V3,
        };
        let chapter_count = outline.spine.iter().filter(|id| id.starts_with("chapter-")).count() as u32;
        let cover_href = outline
            .manifest
            .iter()
            .find(|entry| entry.is_cover_image())
            .map(|entry| format!("{base}{}", entry.href));
        let cover = match cover_href {
            Some(path) => image::probe(&read_entry(&mut archive, &path)?),
            None => None,
        };
        (version, outline.identifier, chapter_count, cover)
    };

    Ok(ReflowableDocument {
        byte_size: binary.len() as u64,
        checksum: checksum(&binary),
        format_version: version,
        toc_depth: 1,
        has_cover: cover.is_some(),
        cover,
        identifier,
        chapter_count,
        binary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_outline_reads_markup_not_text() {
        let opf = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version='2.0'>
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <!-- <dc:identifier>urn:uuid:stale</dc:identifier> -->
    <dc:identifier id="uid">urn:uuid:abc &amp; co</dc:identifier>
  </metadata>
  <manifest>
    <item id='cover-image' href='images/cover.jpg' media-type='image/jpeg'/>
    <item href="text/chapter-001.xhtml" id="chapter-001" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemrefs/><itemref idref="chapter-001"/></spine>
</package>"#;
        let outline = package_outline(opf).unwrap();
        assert_eq!(outline.version.as_deref(), Some("2.0"));
        assert_eq!(outline.identifier, "urn:uuid:abc & co");
        assert_eq!(outline.spine, vec!["chapter-001".to_string()]);
        assert_eq!(outline.manifest.len(), 2);
        assert!(outline.manifest[0].is_cover_image());
        assert_eq!(outline.manifest[0].href, "images/cover.jpg");
        assert!(!outline.manifest[1].is_cover_image());

        let container = r#"<container version="1.0"><rootfiles><rootfile full-path='OPS/book.opf' media-type="application/oebps-package+xml"/></rootfiles></container>"#;
        assert_eq!(rootfile_path(container).unwrap().as_deref(), Some("OPS/book.opf"));
        assert_eq!(rootfile_path("<container/>").unwrap(), None);
        assert!(matches!(package_outline("<package><item id=\"x\"/></package>"), Err(InspectError::Markup(_))));
    }

    #[test]
    fn test_chapter_document_escapes() {
        let chapter = Chapter::new(1, "Fish & <Chips>", "She said \"hi\" & left.");
        let doc = chapter_document(EpubVersion::V3, "en", &chapter);
        assert!(doc.contains("<h1>Fish &amp; &lt;Chips&gt;</h1>"));
        assert!(doc.contains("She said &quot;hi&quot; &amp; left."));
        assert!(!doc.contains("<Chips>"));
    }

    #[test]
    fn test_v2_package_has_no_properties() {
        let meta = PublicationMetadata::new("T", "A", chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let items = vec![Item { id: "nav".into(), href: "nav.xhtml".into(), media_type: "application/xhtml+xml", properties: Some("nav") }];
        let opf = package_document(EpubVersion::V2, "urn:uuid:1", &meta, &items, &["nav".into()], false);
        assert!(opf.contains(r#"version="2.0""#));
        assert!(!opf.contains("properties="));
        assert!(!opf.contains("dcterms:modified"));
    }
}
