//! Text extraction for uploaded documents (plain text, PDF, DOCX).
//!
//! Extraction is a pure transform over a file's bytes: callers supply a path
//! (or bytes) plus a declared file type and get back one UTF-8 string.

use std::io::Read;
use std::path::Path;

use crate::error::ExtractionError;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// File formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Pdf,
    Docx,
}

impl FileKind {
    /// Maps an extension (with or without the leading dot, any case).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "txt" => Some(FileKind::Text),
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Docx),
            _ => None,
        }
    }
}

/// Lower-cased extension of `path` without the dot, or `""`.
pub fn file_type_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Reads and extracts the file at `path`.
///
/// `file_type` is the declared type (e.g. the `file_type` column); when absent
/// the path's extension decides. Unsupported types fail before the file is read.
pub fn extract_file(path: &Path, file_type: Option<&str>) -> Result<String, ExtractionError> {
    let declared = match file_type {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => file_type_of(path),
    };
    let kind = FileKind::from_extension(&declared).ok_or_else(|| unsupported(&declared))?;

    let bytes = std::fs::read(path).map_err(|source| ExtractionError::Io {
        path: path.display().to_string(),
        source,
    })?;

    extract_kind(&bytes, kind)
}

/// Extracts text from in-memory bytes of the given declared type.
pub fn extract_bytes(bytes: &[u8], file_type: &str) -> Result<String, ExtractionError> {
    let kind = FileKind::from_extension(file_type).ok_or_else(|| unsupported(file_type))?;
    extract_kind(bytes, kind)
}

/// Unsupported types are always reported with a leading dot, e.g. `.xyz`.
fn unsupported(file_type: &str) -> ExtractionError {
    ExtractionError::UnsupportedType(format!(".{}", file_type.trim_start_matches('.')))
}

fn extract_kind(bytes: &[u8], kind: FileKind) -> Result<String, ExtractionError> {
    match kind {
        FileKind::Text => Ok(String::from_utf8_lossy(bytes).into_owned()),
        FileKind::Pdf => extract_pdf(bytes),
        FileKind::Docx => extract_docx(bytes),
    }
}

/// Pages are concatenated in order; a page without text contributes nothing.
fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractionError::Pdf(e.to_string()))?;
    Ok(pages.concat())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractionError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractionError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractionError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractionError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    Ok(docx_paragraphs(&doc_xml)?.join("\n"))
}

/// Collects the text of every `<w:p>` in document order. Runs inside a
/// paragraph are concatenated; `<w:tab/>` and `<w:br/>` become `\t` and `\n`.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractionError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_paragraph = false;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    in_paragraph = true;
                    current.clear();
                }
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"p" => {
                    paragraphs.push(std::mem::take(&mut current));
                    in_paragraph = false;
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(String::new()),
                b"tab" if in_paragraph => current.push('\t'),
                b"br" | b"cr" if in_paragraph => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractionError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}
