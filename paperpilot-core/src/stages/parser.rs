//! Structuring stage: turn an extracted document into a stored paper
//! record with model-assisted metadata.
//!
//! The model is asked for TITLE / AUTHORS / YEAR / ABSTRACT labels over a
//! leading excerpt of the text. A paper is stored even when the model is
//! unavailable or its response carries no usable labels; in that case the
//! extractor's heuristics fill in, then the source file stem, and the
//! outcome is reported as stored-with-defaults rather than failed.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::extract::{DocumentExtractor, ExtractedDocument};
use crate::llm::CompletionProvider;
use crate::stages::{leading_excerpt, sections};
use crate::store::Store;
use crate::types::{CompletionRequest, Message, NewPaper};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const LABELS: &[&str] = &["TITLE", "AUTHORS", "YEAR", "ABSTRACT"];

const SYSTEM_PROMPT: &str = "You are a research paper metadata extractor. \
Read the excerpt and report the paper's metadata.\n\n\
Output format:\n\
TITLE: [the paper's title]\n\
AUTHORS: [comma-separated author names]\n\
YEAR: [four-digit publication year, or UNKNOWN]\n\
ABSTRACT: [the paper's abstract]\n\n\
Report only what the excerpt supports. Do not invent values.";

/// How a paper ended up in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseDisposition {
    /// Metadata came from a usable model response.
    Structured,
    /// The model was unavailable or unhelpful; heuristics and defaults
    /// filled the record.
    StoredWithDefaults,
}

#[derive(Debug, Clone, Copy)]
pub struct ParseOutcome {
    pub paper_id: i64,
    pub disposition: ParseDisposition,
}

pub struct Parser {
    store: Arc<Store>,
    provider: Arc<dyn CompletionProvider>,
    extractor: Arc<dyn DocumentExtractor>,
    config: PipelineConfig,
}

impl Parser {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn CompletionProvider>,
        extractor: Arc<dyn DocumentExtractor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            extractor,
            config,
        }
    }

    /// Extract, structure, and store one document. Extraction failure
    /// fails the paper; completion failure does not.
    pub async fn parse(&self, path: &Path) -> Result<ParseOutcome, PipelineError> {
        let doc = self.extractor.extract(path)?;
        let excerpt = leading_excerpt(&doc.text, self.config.limits.summary_input_chars);

        let (metadata, disposition) = match self.structure(excerpt).await {
            Ok(Some(meta)) => (meta, ParseDisposition::Structured),
            Ok(None) => {
                debug!(path = %path.display(), "No usable labels in structuring response");
                (StructuredMetadata::default(), ParseDisposition::StoredWithDefaults)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Structuring completion failed, storing with defaults");
                (StructuredMetadata::default(), ParseDisposition::StoredWithDefaults)
            }
        };

        let paper = build_paper(path, &doc, metadata);
        let paper_id = self.store.insert_paper(&paper)?;
        debug!(paper_id, title = %paper.title, ?disposition, "Stored paper");
        Ok(ParseOutcome {
            paper_id,
            disposition,
        })
    }

    async fn structure(
        &self,
        excerpt: &str,
    ) -> Result<Option<StructuredMetadata>, crate::error::LlmError> {
        let prompt = format!("Document excerpt:\n\n{excerpt}");
        let request = CompletionRequest {
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(&prompt)],
            tools: None,
            temperature: self.config.llm.temperature,
            max_tokens: Some(self.config.llm.max_tokens),
            format: Some(json!({
                "type": "object",
                "properties": {
                    "TITLE": {"type": "string"},
                    "AUTHORS": {"type": "string"},
                    "YEAR": {"type": "string"},
                    "ABSTRACT": {"type": "string"}
                }
            })),
        };
        let response = self.provider.complete(request).await?;
        let text = response.message.content.as_text().unwrap_or_default();
        let parsed = parse_metadata(&text);
        Ok(parsed)
    }
}

#[derive(Debug, Default)]
struct StructuredMetadata {
    title: Option<String>,
    authors: Option<String>,
    year: Option<i32>,
    abstract_text: Option<String>,
}

/// `None` when the response carries none of the expected labels.
fn parse_metadata(text: &str) -> Option<StructuredMetadata> {
    let parsed = sections::parse_sections(text, LABELS);
    if parsed.is_empty() {
        return None;
    }
    let year = sections::joined(&parsed, "year")
        .as_deref()
        .and_then(parse_year);
    Some(StructuredMetadata {
        title: sections::joined(&parsed, "title"),
        authors: sections::joined(&parsed, "authors"),
        year,
        abstract_text: sections::joined(&parsed, "abstract"),
    })
}

fn parse_year(raw: &str) -> Option<i32> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).take(4).collect();
    let year = digits.parse::<i32>().ok()?;
    (1900..=2100).contains(&year).then_some(year)
}

fn build_paper(path: &Path, doc: &ExtractedDocument, meta: StructuredMetadata) -> NewPaper {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.clone());

    NewPaper {
        title: meta
            .title
            .or_else(|| doc.title.clone())
            .unwrap_or(stem),
        authors: meta
            .authors
            .or_else(|| doc.authors.clone())
            .unwrap_or_default(),
        abstract_text: meta
            .abstract_text
            .or_else(|| doc.abstract_text.clone())
            .unwrap_or_default(),
        year: meta.year.or(doc.year),
        full_text: doc.text.clone(),
        file_path: path.display().to_string(),
        file_name,
        page_count: doc.page_count,
    }
}
