//! Office document handler: PDF and OOXML (docx, xlsx, pptx)
//!
//! OOXML containers are ZIP archives of XML parts; text lives in `<w:t>`
//! (Word), `<a:t>` (PowerPoint), and shared-string / inline cell values
//! (Excel). Entry reads are bounded to keep hostile archives from
//! expanding unchecked.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use super::{classify_error, DocumentHandler, DocumentMetadata, ExtractError};

/// Maximum decompressed bytes read from a single archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Sheet cap for spreadsheets.
const XLSX_MAX_SHEETS: usize = 100;

pub struct OfficeHandler {
    max_file_size: u64,
}

impl OfficeHandler {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }
}

impl DocumentHandler for OfficeHandler {
    fn name(&self) -> &'static str {
        "office"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["pdf", "docx", "xlsx", "pptx"]
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    fn extract_text(&self, path: &Path) -> Result<(String, DocumentMetadata), ExtractError> {
        let metadata = DocumentMetadata::from_path(path)?;
        let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;

        let text = match metadata.file_type.as_str() {
            "pdf" => extract_pdf(path, &bytes)?,
            "docx" => extract_docx(path, &bytes)?,
            "pptx" => extract_pptx(path, &bytes)?,
            "xlsx" => extract_xlsx(path, &bytes)?,
            other => {
                return Err(ExtractError::invalid(
                    path,
                    format!("unsupported office extension: {other}"),
                ))
            }
        };

        Ok((text, metadata))
    }
}

fn extract_pdf(path: &Path, bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| classify_error(path, e.to_string()))
}

fn open_archive(path: &Path, bytes: &[u8]) -> Result<ZipArchive<std::io::Cursor<Vec<u8>>>, ExtractError> {
    ZipArchive::new(std::io::Cursor::new(bytes.to_vec()))
        .map_err(|e| classify_error(path, e.to_string()))
}

fn read_entry_bounded(
    path: &Path,
    archive: &mut ZipArchive<std::io::Cursor<Vec<u8>>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| classify_error(path, e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::io(path, e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::invalid(
            path,
            format!("archive entry {name} exceeds size limit"),
        ));
    }
    Ok(out)
}

/// Collect the text of every `<t>` element (any namespace), inserting a
/// newline at each paragraph end. Covers both `w:t`/`w:p` and `a:t`/`a:p`.
fn collect_run_text(path: &Path, xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    // No text trimming: whitespace inside <t> runs is significant
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(Event::Text(t)) if in_t => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    if !out.ends_with('\n') && !out.is_empty() {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(classify_error(path, e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn extract_docx(path: &Path, bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(path, bytes)?;
    let xml = read_entry_bounded(path, &mut archive, "word/document.xml")?;
    collect_run_text(path, &xml)
}

/// Archive entry names under `prefix` ending in `.xml`, in numeric order.
fn numbered_entries(
    archive: &ZipArchive<std::io::Cursor<Vec<u8>>>,
    prefix: &str,
) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_pptx(path: &Path, bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(path, bytes)?;
    let slides = numbered_entries(&archive, "ppt/slides/slide");
    let mut sections = Vec::new();
    for name in slides {
        let xml = read_entry_bounded(path, &mut archive, &name)?;
        let text = collect_run_text(path, &xml)?;
        if !text.is_empty() {
            sections.push(text);
        }
    }
    Ok(sections.join("\n\n"))
}

fn extract_xlsx(path: &Path, bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(path, bytes)?;
    let has_shared = archive.file_names().any(|n| n == "xl/sharedStrings.xml");
    let shared = if has_shared {
        let xml = read_entry_bounded(path, &mut archive, "xl/sharedStrings.xml")?;
        parse_shared_strings(path, &xml)?
    } else {
        Vec::new()
    };

    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut lines = Vec::new();
    for name in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_entry_bounded(path, &mut archive, &name)?;
        let cells = parse_sheet_cells(path, &xml, &shared)?;
        if !cells.is_empty() {
            lines.push(cells.join(" "));
        }
    }
    Ok(lines.join("\n"))
}

fn parse_shared_strings(path: &Path, xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut current = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_t => {
                current.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(classify_error(path, e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values in document order: shared-string cells resolve through the
/// shared table, inline/numeric values pass through as written.
fn parse_sheet_cells(
    path: &Path,
    xml: &[u8],
    shared: &[String],
) -> Result<Vec<String>, ExtractError> {
    let mut cells = Vec::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut cell_is_shared = false;
    let mut in_v = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_is_shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" => in_v = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_v => {
                let raw = t.unescape().unwrap_or_default();
                let value = raw.trim();
                if !value.is_empty() {
                    if cell_is_shared {
                        if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                            if !s.is_empty() {
                                cells.push(s.clone());
                            }
                        }
                    } else {
                        cells.push(value.to_string());
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => cell_is_shared = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(classify_error(path, e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells)
}
