//! Multi-format text extraction for uploaded documents.
//!
//! Dispatch is purely on file extension (case-insensitive, no content
//! sniffing) through a registered-handler table, so adding a format is an
//! addition to [`HANDLERS`] rather than an edit to a central conditional.
//! Handlers take raw bytes; the single file read happens in the pipeline
//! layer. Every decode failure is caught and returned as an
//! [`ExtractError`] — nothing panics past this boundary and there is no
//! retry for extraction.

use std::collections::HashMap;
use std::io::Read;

use crate::models::{ExtractionMeta, ExtractionMethod};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum sheets to process in a workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

/// Extraction failure. The German messages are user-facing and rendered
/// by the host verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Dateityp .{0} wird nicht unterstützt")]
    UnsupportedFormat(String),
    #[error("PDF enthält keinen extrahierbaren Text")]
    NoExtractableText,
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("{0}")]
    Io(String),
}

type Handler = fn(&[u8]) -> Result<(String, ExtractionMeta), ExtractError>;

/// Extension → extractor registry. Extensions are stored lowercase.
const HANDLERS: &[(&[&str], Handler)] = &[
    (&["pdf"], extract_pdf),
    (&["docx"], extract_docx),
    (&["xlsx", "xls"], extract_workbook),
    (&["txt", "md", "json"], extract_plain),
];

fn handler_for(extension: &str) -> Option<Handler> {
    let ext = extension.to_ascii_lowercase();
    HANDLERS
        .iter()
        .find(|(exts, _)| exts.contains(&ext.as_str()))
        .map(|(_, handler)| *handler)
}

/// Whether an extension has a registered handler. Used by callers to
/// reject a file before touching its content.
pub fn supported(extension: &str) -> bool {
    handler_for(extension).is_some()
}

/// Extract plain text plus metadata from raw file bytes.
pub fn extract_bytes(
    extension: &str,
    bytes: &[u8],
) -> Result<(String, ExtractionMeta), ExtractError> {
    let handler = handler_for(extension)
        .ok_or_else(|| ExtractError::UnsupportedFormat(extension.to_ascii_lowercase()))?;
    handler(bytes)
}

fn extract_pdf(bytes: &[u8]) -> Result<(String, ExtractionMeta), ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let clean = text.trim();
    if clean.is_empty() {
        return Err(ExtractError::NoExtractableText);
    }

    let mut meta = ExtractionMeta::new(ExtractionMethod::Pdf);
    // Page count and version come from a second parse with lopdf; the text
    // is already decoded, so a broken page tree only degrades the metadata.
    if let Ok(doc) = lopdf::Document::load_mem(bytes) {
        meta.page_count = Some(doc.get_pages().len());
        meta.pdf_version = Some(doc.version.clone());
    }
    Ok((clean.to_string(), meta))
}

/// Read a ZIP entry that may legitimately be absent. `Ok(None)` means the
/// archive has no such entry; every other failure (corrupt data, size-limit
/// breach) is a decode error.
fn read_zip_entry_optional(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Option<Vec<u8>>, ExtractError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
    };
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(Some(out))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    read_zip_entry_optional(archive, name, max_bytes)?
        .ok_or_else(|| ExtractError::Ooxml(format!("ZIP entry {} not found", name)))
}

fn extract_docx(bytes: &[u8]) -> Result<(String, ExtractionMeta), ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;

    let mut out = String::new();
    let mut warnings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(doc_xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        match te.unescape() {
                            Ok(text) => out.push_str(text.as_ref()),
                            Err(e) => warnings.push(format!("unreadable text run: {}", e)),
                        }
                    }
                }
            }
            // Paragraph boundaries become newlines, like raw-text export.
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let mut meta = ExtractionMeta::new(ExtractionMethod::Docx);
    meta.warnings = warnings;
    Ok((out.trim().to_string(), meta))
}

fn extract_workbook(bytes: &[u8]) -> Result<(String, ExtractionMeta), ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheets = read_workbook_sheets(&mut archive)?;
    let rels = read_workbook_rels(&mut archive)?;

    // Sheets render in the workbook's declared order, each `<sheet r:id>`
    // resolved to its worksheet part through the relationship table. Part
    // numbering does not follow tab order, so positional pairing would
    // mislabel reordered workbooks.
    let mut resolved: Vec<(String, String)> = sheets
        .iter()
        .filter_map(|sheet| {
            let id = sheet.rel_id.as_deref()?;
            let part = rels.get(id)?;
            Some((sheet.name.clone(), part.clone()))
        })
        .collect();
    if resolved.is_empty() {
        // Minimal producers omit the relationship part; pair declared
        // names with the numerically sorted worksheet files instead.
        resolved = list_worksheet_files(&mut archive)
            .into_iter()
            .enumerate()
            .map(|(idx, part)| {
                let name = sheets
                    .get(idx)
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| format!("Sheet{}", idx + 1));
                (name, part)
            })
            .collect();
    }

    let mut out = String::new();
    let mut sheet_count = 0usize;
    for (name, part) in resolved.into_iter().take(XLSX_MAX_SHEETS) {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &part, MAX_XML_ENTRY_BYTES)?;
        let sheet_text = extract_sheet_rows(&sheet_xml, &shared_strings)?;
        out.push_str(&format!("=== {} ===\n{}\n\n", name, sheet_text));
        sheet_count += 1;
    }

    let mut meta = ExtractionMeta::new(ExtractionMethod::Xlsx);
    meta.sheet_count = Some(sheet_count);
    Ok((out.trim().to_string(), meta))
}

struct SheetRef {
    name: String,
    rel_id: Option<String>,
}

/// Sheet declarations from `xl/workbook.xml` in document order.
fn read_workbook_sheets(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<SheetRef>, ExtractError> {
    let xml = match read_zip_entry_optional(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)? {
        Some(xml) => xml,
        None => return Ok(Vec::new()),
    };
    let mut sheets = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    let mut name = None;
                    let mut rel_id = None;
                    for attr in e.attributes().flatten() {
                        let key = attr.key.as_ref();
                        if key == b"name" {
                            name = Some(String::from_utf8_lossy(attr.value.as_ref()).into_owned());
                        } else if key.ends_with(b":id") {
                            // The relationship id attribute is namespace
                            // qualified, usually `r:id`.
                            rel_id =
                                Some(String::from_utf8_lossy(attr.value.as_ref()).into_owned());
                        }
                    }
                    if let Some(name) = name {
                        sheets.push(SheetRef { name, rel_id });
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Relationship id → worksheet part path from `xl/_rels/workbook.xml.rels`.
fn read_workbook_rels(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<HashMap<String, String>, ExtractError> {
    let xml =
        match read_zip_entry_optional(archive, "xl/_rels/workbook.xml.rels", MAX_XML_ENTRY_BYTES)? {
            Some(xml) => xml,
            None => return Ok(HashMap::new()),
        };
    let mut rels = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let mut id = None;
                    let mut target = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"Id" => {
                                id =
                                    Some(String::from_utf8_lossy(attr.value.as_ref()).into_owned())
                            }
                            b"Target" => {
                                target =
                                    Some(String::from_utf8_lossy(attr.value.as_ref()).into_owned())
                            }
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(target)) = (id, target) {
                        // Targets are package-absolute or relative to xl/.
                        let part = match target.strip_prefix('/') {
                            Some(absolute) => absolute.to_string(),
                            None => format!("xl/{}", target),
                        };
                        rels.insert(id, part);
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

fn list_worksheet_files(archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    // Workbooks without string cells ship no sharedStrings part.
    let xml = match read_zip_entry_optional(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)? {
        Some(xml) => xml,
        None => return Ok(Vec::new()),
    };
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Serialize one worksheet as tab-separated cells, newline-separated rows.
fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut lines: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" => in_v = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() {
                    if cell_is_shared_str {
                        if let Ok(i) = s.parse::<usize>() {
                            if i < shared_strings.len() {
                                row.push(shared_strings[i].clone());
                                cell_count += 1;
                            }
                        }
                    } else {
                        row.push(s.to_string());
                        cell_count += 1;
                    }
                }
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => cell_is_shared_str = false,
                b"row" => {
                    if !row.is_empty() {
                        lines.push(row.join("\t"));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(lines.join("\n"))
}

fn extract_plain(bytes: &[u8]) -> Result<(String, ExtractionMeta), ExtractError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ExtractError::Io(format!("file is not valid UTF-8: {}", e)))?;
    Ok((
        text.to_string(),
        ExtractionMeta::new(ExtractionMethod::DirectRead),
    ))
}
