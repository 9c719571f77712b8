//! PDF text extraction.
//!
//! Produces a linearized text stream with page breaks preserved as form
//! feeds, which the section segmenter consumes. Encrypted and unparseable
//! documents map onto the extraction failure taxonomy.

use std::path::Path;

use lopdf::Document;
use tracing::{debug, instrument};

use super::ExtractError;

/// Page-break marker inserted between pages in the linearized stream.
pub const PAGE_BREAK: char = '\u{0C}';

/// Extracts the full text of a PDF, page by page.
///
/// # Errors
///
/// - [`ExtractError::Encrypted`] for password-protected documents
/// - [`ExtractError::ParseError`] when the document cannot be loaded
/// - [`ExtractError::Empty`] when no page yields any text (scanned PDFs)
#[instrument(skip(pdf_path), fields(path = %pdf_path.display()))]
pub fn extract_text(pdf_path: &Path) -> Result<String, ExtractError> {
    let document =
        Document::load(pdf_path).map_err(|e| ExtractError::ParseError(e.to_string()))?;

    if document.is_encrypted() {
        return Err(ExtractError::Encrypted);
    }

    let mut pages_text = Vec::new();
    for (page_number, _) in document.get_pages() {
        // A page that fails text extraction degrades to an empty page
        // rather than failing the document.
        let text = document.extract_text(&[page_number]).unwrap_or_default();
        pages_text.push(text);
    }

    let joined = pages_text.join(&PAGE_BREAK.to_string());
    if joined.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    debug!(pages = pages_text.len(), chars = joined.len(), "text extracted");
    Ok(joined)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_missing_file_is_parse_error() {
        let result = extract_text(Path::new("/nonexistent/file.pdf"));
        assert!(matches!(result, Err(ExtractError::ParseError(_))));
    }

    #[test]
    fn test_extract_text_garbage_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-pdf.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();
        let result = extract_text(&path);
        assert!(matches!(result, Err(ExtractError::ParseError(_))));
    }
}
