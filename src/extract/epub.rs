//! EPUB handler
//!
//! An EPUB is a ZIP container: `META-INF/container.xml` points at the OPF
//! package document, which carries Dublin Core metadata, a manifest of
//! content items, and a spine giving reading order. Text is the spine's
//! XHTML sections stripped of markup, joined by blank lines.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use super::{classify_error, DocumentHandler, DocumentMetadata, ExtractError};

const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

pub struct EpubHandler {
    max_file_size: u64,
}

impl EpubHandler {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }
}

impl DocumentHandler for EpubHandler {
    fn name(&self) -> &'static str {
        "epub"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["epub"]
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    fn extract_text(&self, path: &Path) -> Result<(String, DocumentMetadata), ExtractError> {
        let mut metadata = DocumentMetadata::from_path(path)?;
        let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
        let mut archive = ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| classify_error(path, e.to_string()))?;

        let opf_path = {
            let container = read_entry(path, &mut archive, "META-INF/container.xml")?;
            parse_container(path, &container)?
        };
        let opf_xml = read_entry(path, &mut archive, &opf_path)?;
        let package = parse_package(path, &opf_xml)?;

        metadata.title = package.title;
        metadata.author = package.creator;
        metadata.language = package.language;

        let opf_dir = opf_path
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();

        let mut sections = Vec::new();
        for href in package.spine_hrefs {
            let entry_name = resolve_href(&opf_dir, &href);
            let xhtml = read_entry(path, &mut archive, &entry_name)?;
            let text = strip_markup(path, &xhtml)?;
            if !text.is_empty() {
                sections.push(text);
            }
        }

        Ok((sections.join("\n\n"), metadata))
    }
}

fn read_entry(
    path: &Path,
    archive: &mut ZipArchive<std::io::Cursor<Vec<u8>>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| classify_error(path, format!("missing entry {name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::io(path, e))?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(ExtractError::invalid(
            path,
            format!("archive entry {name} exceeds size limit"),
        ));
    }
    Ok(out)
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes().filter_map(|a| a.ok()).find_map(|a| {
        if a.key.as_ref() == key {
            Some(String::from_utf8_lossy(&a.value).into_owned())
        } else {
            None
        }
    })
}

/// Locate the OPF package path from container.xml.
fn parse_container(path: &Path, xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"rootfile" {
                    if let Some(full_path) = attr_value(&e, b"full-path") {
                        return Ok(full_path);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(classify_error(path, e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Err(ExtractError::invalid(path, "container.xml has no rootfile"))
}

struct Package {
    title: Option<String>,
    creator: Option<String>,
    language: Option<String>,
    /// Manifest hrefs of XHTML items in spine order.
    spine_hrefs: Vec<String>,
}

/// Parse the OPF package document: Dublin Core metadata, the manifest
/// (id → href/media-type), and the spine's itemref order.
fn parse_package(path: &Path, xml: &[u8]) -> Result<Package, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut title = None;
    let mut creator = None;
    let mut language = None;
    let mut manifest: Vec<(String, String, String)> = Vec::new();
    let mut spine_idrefs: Vec<String> = Vec::new();

    let mut in_metadata = false;
    let mut dc_field: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"metadata" => in_metadata = true,
                b"title" if in_metadata => dc_field = Some("title"),
                b"creator" if in_metadata => dc_field = Some("creator"),
                b"language" if in_metadata => dc_field = Some("language"),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => {
                    if let (Some(id), Some(href)) =
                        (attr_value(&e, b"id"), attr_value(&e, b"href"))
                    {
                        let media = attr_value(&e, b"media-type").unwrap_or_default();
                        manifest.push((id, href, media));
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attr_value(&e, b"idref") {
                        spine_idrefs.push(idref);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Some(field) = dc_field {
                    let value = t.unescape().unwrap_or_default().trim().to_string();
                    if !value.is_empty() {
                        match field {
                            "title" => title.get_or_insert(value),
                            "creator" => creator.get_or_insert(value),
                            _ => language.get_or_insert(value),
                        };
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"metadata" => in_metadata = false,
                b"title" | b"creator" | b"language" => dc_field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(classify_error(path, e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let spine_hrefs = spine_idrefs
        .iter()
        .filter_map(|idref| {
            manifest
                .iter()
                .find(|(id, _, media)| id == idref && media == XHTML_MEDIA_TYPE)
                .map(|(_, href, _)| href.clone())
        })
        .collect();

    Ok(Package {
        title,
        creator,
        language,
        spine_hrefs,
    })
}

fn resolve_href(opf_dir: &str, href: &str) -> String {
    let href = href.trim_start_matches("./");
    if opf_dir.is_empty() {
        href.to_string()
    } else {
        format!("{opf_dir}/{href}")
    }
}

/// Block-level end tags that terminate a line of extracted text.
const BLOCK_TAGS: &[&[u8]] = &[
    b"p", b"div", b"li", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6", b"tr", b"blockquote",
];

/// Strip XHTML markup, keeping text content with line breaks at block
/// boundaries.
fn strip_markup(path: &Path, xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default();
                let text = text.trim();
                if !text.is_empty() {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push(' ');
                    }
                    out.push_str(text);
                }
            }
            Ok(Event::End(e)) => {
                if BLOCK_TAGS.contains(&e.local_name().as_ref())
                    && !out.is_empty()
                    && !out.ends_with('\n')
                {
                    out.push('\n');
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"br" && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(classify_error(path, e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_epub(path: &Path) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let opts = SimpleFileOptions::default();

        zip.start_file("META-INF/container.xml", opts).unwrap();
        zip.write_all(
            br#"<container><rootfiles>
                <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
            </rootfiles></container>"#,
        )
        .unwrap();

        zip.start_file("OEBPS/content.opf", opts).unwrap();
        zip.write_all(
            br#"<package xmlns:dc="http://purl.org/dc/elements/1.1/">
                <metadata>
                    <dc:title>A Study in Scarlet</dc:title>
                    <dc:creator>Arthur Conan Doyle</dc:creator>
                    <dc:language>en</dc:language>
                </metadata>
                <manifest>
                    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
                    <item id="ch2" href="ch2.xhtml" media-type="application/xhtml+xml"/>
                    <item id="css" href="style.css" media-type="text/css"/>
                </manifest>
                <spine>
                    <itemref idref="ch1"/>
                    <itemref idref="css"/>
                    <itemref idref="ch2"/>
                </spine>
            </package>"#,
        )
        .unwrap();

        zip.start_file("OEBPS/ch1.xhtml", opts).unwrap();
        zip.write_all(
            br#"<html><body><h1>Chapter 1</h1><p>In the year 1878 I took my degree.</p></body></html>"#,
        )
        .unwrap();

        zip.start_file("OEBPS/ch2.xhtml", opts).unwrap();
        zip.write_all(br#"<html><body><p>The study was a lofty room.</p></body></html>"#)
            .unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_epub_sections_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub");
        write_epub(&path);

        let handler = EpubHandler::new(10 * 1024 * 1024);
        let (text, meta) = handler.extract_text(&path).unwrap();

        assert_eq!(meta.title.as_deref(), Some("A Study in Scarlet"));
        assert_eq!(meta.author.as_deref(), Some("Arthur Conan Doyle"));
        assert_eq!(meta.language.as_deref(), Some("en"));

        // Spine order, non-XHTML itemref dropped, sections blank-line joined
        assert_eq!(
            text,
            "Chapter 1\nIn the year 1878 I took my degree.\n\nThe study was a lofty room."
        );
    }

    #[test]
    fn test_epub_without_container_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.epub");
        let file = File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("mimetype", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        zip.finish().unwrap();

        let handler = EpubHandler::new(10 * 1024 * 1024);
        let err = handler.extract_text(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Invalid { .. }));
    }

    #[test]
    fn test_non_zip_epub_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.epub");
        std::fs::write(&path, "plain text pretending").unwrap();

        let handler = EpubHandler::new(10 * 1024 * 1024);
        assert!(handler.extract_text(&path).is_err());
    }
}
