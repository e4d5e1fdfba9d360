// src/extract.rs

use crate::error::ExtractError;
use lopdf::Document;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{info, warn};

/// Declared kind of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Csv,
    Text,
}

impl DocumentKind {
    /// Infer from the file extension; anything unrecognised is text.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("pdf") => DocumentKind::Pdf,
            Some("csv") => DocumentKind::Csv,
            _ => DocumentKind::Text,
        }
    }
}

/// A CSV document as header names plus string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Result of extracting a document.
#[derive(Debug)]
pub enum Extracted {
    /// Free text for the model-based parser.
    Text(String),
    /// Tabular rows for the column-mapping parser.
    Table(CsvTable),
    /// Nothing usable came out; the caller decides whether to warn or skip.
    Empty,
}

/// Read a staged file and extract it.
pub fn extract_file(path: &Path, kind: DocumentKind) -> Result<Extracted, ExtractError> {
    let bytes = std::fs::read(path)?;
    extract_bytes(&bytes, kind)
}

/// Main entry point: raw bytes plus declared kind.
pub fn extract_bytes(bytes: &[u8], kind: DocumentKind) -> Result<Extracted, ExtractError> {
    match kind {
        DocumentKind::Pdf => {
            let text = extract_pdf_text(bytes)?;
            Ok(non_empty(text))
        }
        DocumentKind::Csv => {
            let table = read_csv_table(bytes)?;
            if table.rows.is_empty() {
                Ok(Extracted::Empty)
            } else {
                Ok(Extracted::Table(table))
            }
        }
        DocumentKind::Text => {
            let text = String::from_utf8(bytes.to_vec())?;
            Ok(non_empty(text))
        }
    }
}

fn non_empty(text: String) -> Extracted {
    if text.trim().is_empty() {
        Extracted::Empty
    } else {
        Extracted::Text(text)
    }
}

/// Concatenate per-page text with newline separators.
///
/// Pages are read with lopdf first. If that yields nothing (unusual font
/// encodings), pdf-extract gets a second pass over the whole file. An
/// image-only PDF comes back as an empty string.
pub fn extract_pdf_text(pdf_bytes: &[u8]) -> Result<String, ExtractError> {
    let doc = Document::load_mem(pdf_bytes)
        .map_err(|e| ExtractError::Pdf(format!("failed to parse PDF: {e}")))?;

    let pages = doc.get_pages();
    let mut page_texts = Vec::with_capacity(pages.len());
    for page_num in pages.keys() {
        match without_panics(|| doc.extract_text(&[*page_num]).map_err(|e| e.to_string())) {
            Ok(text) => page_texts.push(text),
            Err(e) => warn!(page = page_num, error = %e, "Page text extraction failed"),
        }
    }
    let text = page_texts.join("\n");
    if !text.trim().is_empty() {
        info!(pages = pages.len(), chars = text.len(), "Text extracted from PDF");
        return Ok(text);
    }

    match without_panics(|| pdf_extract::extract_text_from_mem(pdf_bytes).map_err(|e| e.to_string())) {
        Ok(text) => {
            info!(chars = text.len(), "Text extracted with pdf-extract");
            Ok(text)
        }
        Err(e) => {
            warn!(error = %e, "pdf-extract failed, treating PDF as empty");
            Ok(String::new())
        }
    }
}

/// Run one text backend. A panic inside it becomes an error.
fn without_panics<F>(backend: F) -> Result<String, String>
where
    F: FnOnce() -> Result<String, String>,
{
    match panic::catch_unwind(AssertUnwindSafe(backend)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("PDF backend panicked: {message}"))
        }
    }
}

/// Parse CSV bytes into headers and rows. Ragged rows are allowed.
pub fn read_csv_table(bytes: &[u8]) -> Result<CsvTable, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(CsvTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_garbage_bytes() {
        let result = extract_bytes(b"this is not a pdf", DocumentKind::Pdf);
        assert!(matches!(result, Err(ExtractError::Pdf(_))));
    }

    #[test]
    fn test_backend_panic_becomes_error() {
        let result = without_panics(|| panic!("unsupported encoding Identity-H"));
        assert_eq!(
            result,
            Err("PDF backend panicked: unsupported encoding Identity-H".to_string())
        );

        let code = 7;
        let result = without_panics(|| panic!("font {code} missing"));
        assert_eq!(result, Err("PDF backend panicked: font 7 missing".to_string()));

        assert_eq!(without_panics(|| Ok("text".to_string())), Ok("text".to_string()));
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(DocumentKind::from_path(&PathBuf::from("a/INV.PDF")), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_path(&PathBuf::from("rows.csv")), DocumentKind::Csv);
        assert_eq!(DocumentKind::from_path(&PathBuf::from("notes.txt")), DocumentKind::Text);
        assert_eq!(DocumentKind::from_path(&PathBuf::from("README")), DocumentKind::Text);
    }

    #[test]
    fn test_text_decodes_utf8() {
        let result = extract_bytes("Billet de train Paris-Lyon".as_bytes(), DocumentKind::Text);
        assert!(matches!(result, Ok(Extracted::Text(t)) if t.contains("Lyon")));
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let result = extract_bytes(&[0x66, 0x6f, 0xff, 0xfe], DocumentKind::Text);
        assert!(matches!(result, Err(ExtractError::Decode(_))));
    }

    #[test]
    fn test_whitespace_text_is_empty() {
        let result = extract_bytes(b"  \n\t ", DocumentKind::Text).unwrap();
        assert!(matches!(result, Extracted::Empty));
    }

    #[test]
    fn test_csv_table() {
        let csv = b"product, qty ,unit_price\nPaper ream,10,2.5\n,,\nToner,2\n";
        let Extracted::Table(table) = extract_bytes(csv, DocumentKind::Csv).unwrap() else {
            panic!("expected a table");
        };
        assert_eq!(table.headers, vec!["product", "qty", "unit_price"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["Toner", "2"]);
    }

    #[test]
    fn test_header_only_csv_is_empty() {
        let result = extract_bytes(b"product,qty\n", DocumentKind::Csv).unwrap();
        assert!(matches!(result, Extracted::Empty));
    }

    #[test]
    fn test_extract_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice.txt");
        std::fs::write(&path, "Ramette papier x10").unwrap();
        let result = extract_file(&path, DocumentKind::Text).unwrap();
        assert!(matches!(result, Extracted::Text(_)));
    }
}
