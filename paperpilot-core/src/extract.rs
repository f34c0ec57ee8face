//! Document text extraction.
//!
//! PDF extraction uses lopdf, pulling text page by page. A page that fails
//! to decode is skipped with a warning rather than failing the document;
//! only a document that yields no text at all is an error.

use crate::error::ExtractError;
use crate::stages::leading_excerpt;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Raw text plus best-effort metadata pulled from a source document.
/// Metadata fields are heuristic; absent values are `None` and the
/// structuring stage fills the gaps.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub text: String,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub abstract_text: Option<String>,
    pub year: Option<i32>,
    pub page_count: usize,
}

/// Turns a source file into text. Object-safe so the pipeline can run
/// against fixture extractors in tests.
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError>;
}

/// lopdf-backed PDF extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl DocumentExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractError> {
        let doc = lopdf::Document::load(path).map_err(|e| ExtractError::Unreadable {
            path: path.display().to_string(),
            message: format!("Failed to load PDF: {e}"),
        })?;

        let pages = doc.get_pages();
        let page_count = pages.len();
        debug!(path = %path.display(), page_count, "Extracting PDF text");

        let mut text = String::new();
        for page_num in pages.keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(page_text) => {
                    text.push_str(&page_text);
                    text.push('\n');
                }
                Err(e) => {
                    warn!(path = %path.display(), page = page_num, error = %e,
                        "Failed to extract page text, skipping");
                }
            }
        }

        if text.trim().is_empty() {
            return Err(ExtractError::Empty {
                path: path.display().to_string(),
            });
        }

        let mut extracted = sniff_metadata(&text);
        extracted.page_count = page_count;
        Ok(extracted)
    }
}

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid literal regex"));
static ABSTRACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\babstract\b").expect("valid literal regex"));
static INTRODUCTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bintroduction\b").expect("valid literal regex"));

/// Best-effort metadata from raw text: first plausible line as title, a
/// publication-style year, and the block between "Abstract" and
/// "Introduction" headings.
fn sniff_metadata(text: &str) -> ExtractedDocument {
    let mut out = ExtractedDocument {
        text: text.to_string(),
        ..Default::default()
    };

    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    out.title = lines
        .clone()
        .find(|l| l.len() >= 8 && l.len() <= 200 && !l.chars().all(|c| c.is_numeric()))
        .map(str::to_string);

    // Author lines in papers tend to follow the title and read as a
    // name list rather than prose.
    if let Some(title) = &out.title {
        out.authors = lines
            .by_ref()
            .skip_while(|l| *l != title.as_str())
            .skip(1)
            .find(|l| looks_like_author_line(l))
            .map(str::to_string);
    }

    out.year = YEAR_RE
        .find(text)
        .and_then(|m| m.as_str().parse::<i32>().ok());

    out.abstract_text = extract_abstract(text);
    out
}

fn looks_like_author_line(line: &str) -> bool {
    let words = line.split_whitespace().count();
    words >= 2
        && words <= 20
        && !line.chars().any(|c| c.is_numeric())
        && (line.contains(',') || line.contains(" and ") || words <= 6)
}

/// Longest block taken when no Introduction heading bounds the abstract.
const ABSTRACT_FALLBACK_CHARS: usize = 2000;

fn extract_abstract(text: &str) -> Option<String> {
    let heading = ABSTRACT_RE.find(text)?;
    let tail = &text[heading.end()..];
    let block = match INTRODUCTION_RE.find(tail) {
        Some(m) => &tail[..m.start()],
        None => leading_excerpt(tail, ABSTRACT_FALLBACK_CHARS),
    };
    let block = block.trim_start_matches([':', '.', '-', '—']).trim();
    if block.is_empty() {
        None
    } else {
        Some(block.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Attention Is All You Need

Ashish Vaswani, Noam Shazeer, Niki Parmar

Abstract
The dominant sequence transduction models are based on recurrent networks.
We propose a new architecture.

1 Introduction
Recurrent neural networks have long dominated sequence modeling.
Published in NeurIPS 2017.
";

    #[test]
    fn sniffs_title_authors_year_abstract() {
        let doc = sniff_metadata(SAMPLE);
        assert_eq!(doc.title.as_deref(), Some("Attention Is All You Need"));
        assert_eq!(
            doc.authors.as_deref(),
            Some("Ashish Vaswani, Noam Shazeer, Niki Parmar")
        );
        assert_eq!(doc.year, Some(2017));
        let abstract_text = doc.abstract_text.unwrap();
        assert!(abstract_text.starts_with("The dominant sequence"));
        assert!(!abstract_text.to_lowercase().contains("introduction"));
    }

    #[test]
    fn accented_abstract_without_introduction_is_clamped() {
        // No Introduction heading, so the fallback cut applies; it must
        // land on a char boundary even in fully multi-byte text.
        let text = format!("Abstract\n{}", "é".repeat(2500));
        let doc = sniff_metadata(&text);
        let abstract_text = doc.abstract_text.unwrap();
        assert!(abstract_text.chars().count() <= 2000);
        assert!(abstract_text.chars().all(|c| c == 'é'));
    }

    #[test]
    fn abstract_heading_match_is_case_insensitive() {
        let text = "Title Line Of The Paper\n\nABSTRACT\nWe résumé prior work.\n\nINTRODUCTION\nBody.";
        let doc = sniff_metadata(text);
        assert_eq!(doc.abstract_text.as_deref(), Some("We résumé prior work."));
    }

    #[test]
    fn missing_metadata_is_none_not_an_error() {
        let doc = sniff_metadata("x\ny\nz");
        assert_eq!(doc.title, None);
        assert_eq!(doc.year, None);
        assert_eq!(doc.abstract_text, None);
        assert_eq!(doc.text, "x\ny\nz");
    }

    #[test]
    fn unreadable_pdf_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-pdf.pdf");
        std::fs::write(&path, b"plain text, not a pdf").unwrap();
        let result = PdfExtractor.extract(&path);
        assert!(matches!(result, Err(ExtractError::Unreadable { .. })));
    }
}
