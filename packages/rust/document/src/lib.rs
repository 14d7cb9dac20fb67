//! Uploaded document admission and text extraction.
//!
//! The pipeline only ever sees text: this crate decides which uploads are
//! admitted and turns PDF bytes into plain text. Extraction quality is not
//! this crate's concern; an exposé without a text layer simply fails.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};

use exposecast_shared::{ExposecastError, Result};

/// File extensions accepted for upload (lowercase, without the dot).
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf"];

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(\n[ \t]*)+").expect("valid regex"));

static INLINE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}]{2,}").expect("valid regex"));

/// Whether `filename` carries an admitted extension.
///
/// The extension is the text after the last dot, compared case-insensitively.
/// Names without a dot are rejected.
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS
            .iter()
            .any(|allowed| ext.eq_ignore_ascii_case(allowed)),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Turns raw document bytes into text.
///
/// Implementations are blocking; async callers run them on a blocking thread.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, bytes: &[u8]) -> Result<String>;
}

/// PDF text extractor for digital PDFs with an embedded text layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    fn extract_text(&self, bytes: &[u8]) -> Result<String> {
        let raw = pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
            warn!(error = %e, "PDF text extraction failed");
            ExposecastError::Document(format!("failed to extract text from PDF: {e}"))
        })?;

        let text = normalize_text(&raw);
        if text.is_empty() {
            return Err(ExposecastError::Document(
                "failed to extract text from PDF: no text layer found".into(),
            ));
        }

        debug!(chars = text.chars().count(), "extracted PDF text");
        Ok(text)
    }
}

/// Collapse the layout whitespace PDF extraction leaves behind.
fn normalize_text(raw: &str) -> String {
    let text = INLINE_SPACE.replace_all(raw, " ");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}
