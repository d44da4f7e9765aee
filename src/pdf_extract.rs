// src/pdf_extract.rs

use crate::document::{Document, DocumentKind, Page};
use crate::error::Result;
use lopdf::Document as PdfDocument;
use std::{fs, path::Path};
use time::OffsetDateTime;
use tracing::{info, warn};

/// Result of attempting to read page text from a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// Page text, one entry per page in page order.
    Pages(Vec<Page>),
    /// Image-only report, needs OCR before it can be parsed.
    ScannedImage,
    Error(String),
}

/// Fewer non-whitespace characters than this across the document means the
/// text layer is missing.
const MIN_TEXT_CHARS: usize = 30;

/// Share of image-only pages above which the whole report counts as scanned.
const SCANNED_RATIO: f64 = 0.8;

pub fn extract_pages(pdf_bytes: &[u8]) -> PdfContent {
    let doc = match PdfDocument::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned");
        return PdfContent::ScannedImage;
    }

    let mut pages = Vec::new();
    for (index, number) in doc.get_pages().keys().enumerate() {
        match doc.extract_text(&[*number]) {
            Ok(text) => pages.push(Page::new(index + 1, text)),
            Err(e) => {
                warn!(page = number, error = %e, "Page text extraction failed");
                pages.push(Page::new(index + 1, String::new()));
            }
        }
    }

    let meaningful = pages
        .iter()
        .flat_map(|p| p.text.chars())
        .filter(|c| !c.is_whitespace())
        .count();
    if meaningful < MIN_TEXT_CHARS {
        info!(chars = meaningful, "Extracted text too short, treating as scanned");
        return PdfContent::ScannedImage;
    }
    info!(pages = pages.len(), chars = meaningful, "Text extracted");
    PdfContent::Pages(pages)
}

/// A page counts as image-only when its resources carry XObjects but no fonts.
fn looks_like_scanned(doc: &PdfDocument) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let resource_non_empty = |page_dict: &lopdf::Dictionary, key: &[u8]| {
        page_dict
            .get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok())
            .and_then(|res| res.get(key).ok())
            .and_then(|o| doc.dereference(o).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok())
            .is_some_and(|d| !d.is_empty())
    };

    let image_only = pages
        .values()
        .filter_map(|id| doc.get_object(*id).ok())
        .filter_map(|obj| obj.as_dict().ok())
        .filter(|page| resource_non_empty(page, b"XObject") && !resource_non_empty(page, b"Font"))
        .count();

    let ratio = image_only as f64 / pages.len() as f64;
    info!(
        total_pages = pages.len(),
        image_only,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );
    ratio >= SCANNED_RATIO
}

/// Load a local report PDF. Scanned or unreadable files yield `None`.
pub fn load_document(path: &Path, kind: DocumentKind) -> Result<Option<Document>> {
    let bytes = fs::read(path)?;
    let retrieved_at = fs::metadata(path)?
        .modified()
        .map(OffsetDateTime::from)
        .unwrap_or_else(|_| OffsetDateTime::now_utc());
    let id = path.display().to_string();

    let span = tracing::info_span!("pdf", file = %id);
    let _guard = span.enter();

    match extract_pages(&bytes) {
        PdfContent::Pages(pages) => Ok(Some(Document {
            id,
            retrieved_at,
            kind,
            pages,
        })),
        PdfContent::ScannedImage => {
            warn!("Report is scanned, skipped");
            Ok(None)
        }
        PdfContent::Error(e) => {
            tracing::error!(error = %e, "Failed to read report");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes() {
        let result = extract_pages(b"this is not a pdf");
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn test_unreadable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Daily report 2021-08-10.pdf");
        fs::write(&path, b"not a pdf").unwrap();
        let loaded = load_document(&path, DocumentKind::DailyReport).unwrap();
        assert!(loaded.is_none());
    }
}
