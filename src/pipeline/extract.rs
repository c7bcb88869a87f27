//! Text extraction: document bytes → plain bill text.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and is not safe to call
//! from async contexts. [`extract_document`] moves the work onto Tokio's
//! blocking pool so worker threads never stall on a large PDF.
//!
//! ## Page failures
//!
//! A page whose text layer cannot be read contributes an empty string; only
//! a document that yields no non-whitespace text at all is a failure, and
//! that failure is a value ([`Extraction::Empty`]), not an error, because an
//! image-only scan is an expected input.

use crate::error::AuditError;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Message returned to callers when a document has no text layer.
pub const EXTRACTION_FAILED_MESSAGE: &str =
    "Could not extract text from PDF. Please ensure the PDF is not scanned/image-only.";

/// Pulls per-page text out of a PDF.
///
/// Implementations are blocking; [`extract_document`] calls them from the
/// blocking pool.
pub trait TextExtractor: Send + Sync {
    /// One entry per page; `None` for a page whose text could not be read.
    ///
    /// # Errors
    /// Only for document-level failures (cannot bind pdfium, cannot open the PDF).
    fn extract_pages(&self, pdf: &[u8]) -> Result<Vec<Option<String>>, AuditError>;
}

/// Result of running the extractor over a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// At least one page had non-whitespace text.
    Text(ExtractedText),
    /// Every page was empty, whitespace-only or unreadable.
    Empty { pages: usize },
}

/// Text of a whole document, pages joined with `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub pages: usize,
}

impl ExtractedText {
    /// A plain-text bill; counts as one page.
    pub fn from_plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pages: 1,
        }
    }

    /// Length in characters (not bytes).
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// The prefix sent to the model.
    pub fn truncated(&self, max_chars: usize) -> &str {
        truncate_chars(&self.text, max_chars)
    }
}

/// What a payload looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

/// Classify a payload by its leading bytes.
///
/// # Errors
/// [`AuditError::EmptyPayload`] for no bytes,
/// [`AuditError::UnsupportedDocument`] for non-PDF binary data.
pub fn sniff(bytes: &[u8]) -> Result<DocumentKind, AuditError> {
    if bytes.is_empty() {
        return Err(AuditError::EmptyPayload);
    }
    if bytes.starts_with(b"%PDF") {
        return Ok(DocumentKind::Pdf);
    }
    if std::str::from_utf8(bytes).is_ok() {
        return Ok(DocumentKind::PlainText);
    }
    Err(AuditError::UnsupportedDocument {
        magic: bytes.iter().take(4).copied().collect(),
    })
}

/// Turn a payload into bill text.
///
/// PDFs go through `extractor` on the blocking pool; UTF-8 payloads are
/// taken as the bill text directly.
pub async fn extract_document(
    extractor: Arc<dyn TextExtractor>,
    bytes: Vec<u8>,
) -> Result<Extraction, AuditError> {
    match sniff(&bytes)? {
        DocumentKind::PlainText => {
            let text = String::from_utf8(bytes)
                .map_err(|e| AuditError::Internal(format!("utf-8 after sniff: {e}")))?;
            debug!("Payload is plain text ({} bytes)", text.len());
            Ok(join_pages(vec![Some(text)]))
        }
        DocumentKind::Pdf => {
            let pages = tokio::task::spawn_blocking(move || extractor.extract_pages(&bytes))
                .await
                .map_err(|e| AuditError::Internal(format!("Extraction task panicked: {}", e)))??;
            Ok(join_pages(pages))
        }
    }
}

/// Join per-page text with `\n`, treating unreadable pages as empty.
pub fn join_pages(pages: Vec<Option<String>>) -> Extraction {
    let count = pages.len();
    let text = pages
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        warn!("No extractable text in {} page(s)", count);
        Extraction::Empty { pages: count }
    } else {
        Extraction::Text(ExtractedText { text, pages: count })
    }
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// [`TextExtractor`] over the pdfium library.
///
/// pdfium is bound on every call, in this order: the configured path,
/// `PDFIUM_LIB_PATH`, the working directory, the system library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumExtractor {
    library_path: Option<PathBuf>,
}

impl PdfiumExtractor {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    fn bind(&self) -> Result<Pdfium, AuditError> {
        let explicit = self
            .library_path
            .clone()
            .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

        let bindings = match explicit {
            Some(path) => Pdfium::bind_to_library(&path),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| AuditError::PdfiumBindingFailed(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }
}

impl TextExtractor for PdfiumExtractor {
    fn extract_pages(&self, pdf: &[u8]) -> Result<Vec<Option<String>>, AuditError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| AuditError::CorruptPdf {
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let texts = pages
            .iter()
            .enumerate()
            .map(|(idx, page)| match page.text() {
                Ok(text) => Some(text.all()),
                Err(e) => {
                    warn!("Page {}: text extraction failed: {:?}", idx + 1, e);
                    None
                }
            })
            .collect();

        Ok(texts)
    }
}

// ── Static extractor ─────────────────────────────────────────────────────

/// A [`TextExtractor`] that returns fixed pages and counts its calls.
#[derive(Debug, Default)]
pub struct StaticExtractor {
    pages: Vec<Option<String>>,
    calls: AtomicUsize,
}

impl StaticExtractor {
    pub fn new(pages: Vec<Option<String>>) -> Self {
        Self {
            pages,
            calls: AtomicUsize::new(0),
        }
    }

    /// Pages whose text is the given strings.
    pub fn with_text<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(pages.into_iter().map(|p| Some(p.into())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextExtractor for StaticExtractor {
    fn extract_pages(&self, _pdf: &[u8]) -> Result<Vec<Option<String>>, AuditError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.clone())
    }
}
