//! Content extraction adapter.
//!
//! Binary document parsing lives outside this crate; the pipeline only sees
//! the [`ContentExtractor`] seam. [`PlainTextExtractor`] covers UTF-8 text and
//! Markdown sources and normalises page breaks into `--- Page N ---` markers,
//! which is the page format the pattern extractor understands.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ExtractionError;

/// Output of an extraction adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    pub text: String,
    /// Opaque image references (paths, URLs, object keys).
    pub images: Vec<String>,
    /// Opaque table references.
    pub tables: Vec<String>,
    pub pages: usize,
}

/// Turns raw document bytes into text.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractionError>;
}

static IMAGE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\((?P<src>[^)\s]+)[^)]*\)").expect("valid regex"));
static PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^--- Page \d+ ---$").expect("valid regex"));

/// Extractor for UTF-8 text and Markdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl ContentExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractionError> {
        let decoded =
            std::str::from_utf8(bytes).map_err(|e| ExtractionError::Decode(e.to_string()))?;
        let normalized = decoded.replace("\r\n", "\n").replace('\r', "\n");

        if normalized.trim().is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }

        let (text, pages) = if normalized.contains('\u{c}') {
            paginate(&normalized)
        } else {
            let markers = PAGE_MARKER.find_iter(&normalized).count();
            (normalized, markers.max(1))
        };

        let images = IMAGE_REF
            .captures_iter(&text)
            .filter_map(|c| c.name("src").map(|m| m.as_str().to_string()))
            .collect();

        Ok(ExtractedContent {
            tables: table_refs(&text),
            images,
            text,
            pages,
        })
    }
}

/// Rewrites form-feed separated pages into explicit page markers.
fn paginate(text: &str) -> (String, usize) {
    let pages: Vec<&str> = text.split('\u{c}').collect();
    let mut out = String::with_capacity(text.len() + pages.len() * 16);
    for (idx, page) in pages.iter().enumerate() {
        out.push_str(&format!("--- Page {} ---\n", idx + 1));
        out.push_str(page.trim_matches('\n'));
        out.push('\n');
    }
    (out, pages.len())
}

/// Markdown pipe tables, one reference per contiguous block.
fn table_refs(text: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let mut in_table = false;
    for (line_no, line) in text.lines().enumerate() {
        let is_row = line.trim_start().starts_with('|') && line.trim_end().ends_with('|');
        if is_row && !in_table {
            refs.push(format!("table@line{}", line_no + 1));
        }
        in_table = is_row;
    }
    refs
}
