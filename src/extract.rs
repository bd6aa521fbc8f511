//! Format-polymorphic text extraction.
//!
//! A [`TextExtractor`] is selected from a file's extension (case-insensitive)
//! and turns the file's bytes into one linear UTF-8 text. Unknown extensions
//! select [`TextExtractor::Unsupported`], which extracts nothing and says so.
//!
//! The dispatcher never fails a batch because of one file: [`extract_file`]
//! degrades every failure to an empty text plus the reason, and the file is
//! reported as skipped.

use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Maximum decompressed bytes to read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const PLAIN_TEXT_EXTENSIONS: &[&str] = &[
    "txt", "text", "md", "markdown", "csv", "log", "json", "xml", "html", "htm", "rst",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: .{0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("word-processor extraction failed: {0}")]
    Ooxml(String),
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

/// Extraction capability for one document format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextExtractor {
    PlainText,
    Pdf,
    WordDoc,
    /// Carries the lowercased extension (empty when the file has none).
    Unsupported(String),
}

impl TextExtractor {
    /// Select the extractor for a path by its extension.
    pub fn for_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => TextExtractor::Pdf,
            "docx" => TextExtractor::WordDoc,
            e if PLAIN_TEXT_EXTENSIONS.contains(&e) => TextExtractor::PlainText,
            _ => TextExtractor::Unsupported(ext),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TextExtractor::PlainText => "text",
            TextExtractor::Pdf => "pdf",
            TextExtractor::WordDoc => "docx",
            TextExtractor::Unsupported(_) => "unsupported",
        }
    }

    /// Extract plain text from the file's raw bytes.
    pub fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        match self {
            TextExtractor::PlainText => Ok(String::from_utf8_lossy(bytes).into_owned()),
            TextExtractor::Pdf => extract_pdf(bytes),
            TextExtractor::WordDoc => extract_docx(bytes),
            TextExtractor::Unsupported(ext) => Err(ExtractError::Unsupported(ext.clone())),
        }
    }
}

/// Result of extracting one file. `text` is empty whenever `error` is set.
#[derive(Debug)]
pub struct Extraction {
    pub extractor: TextExtractor,
    pub text: String,
    pub error: Option<ExtractError>,
}

/// Read and extract a file, degrading any failure to an empty text.
pub fn extract_file(path: &Path) -> Extraction {
    let extractor = TextExtractor::for_path(path);
    if let TextExtractor::Unsupported(ext) = &extractor {
        return Extraction {
            error: Some(ExtractError::Unsupported(ext.clone())),
            extractor,
            text: String::new(),
        };
    }

    let result = std::fs::read(path)
        .map_err(ExtractError::from)
        .and_then(|bytes| extractor.extract(&bytes));

    match result {
        Ok(text) => Extraction {
            extractor,
            text,
            error: None,
        },
        Err(e) => Extraction {
            extractor,
            text: String::new(),
            error: Some(e),
        },
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Ooxml("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_word_runs(&doc_xml)
}

/// Concatenate `w:t` runs; paragraphs and breaks become newlines, tabs spaces.
fn extract_word_runs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push(' '),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
