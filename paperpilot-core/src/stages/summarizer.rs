//! Summarization stage: one structured summary per stored paper.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, StageError, StoreError};
use crate::llm::CompletionProvider;
use crate::stages::{leading_excerpt, sections};
use crate::store::Store;
use crate::types::{CompletionRequest, Message, NewSummary, Summary};
use std::sync::Arc;
use tracing::{debug, info};

const LABELS: &[&str] = &[
    "SUMMARY",
    "KEY_FINDINGS",
    "METHODOLOGY",
    "CONTRIBUTIONS",
    "LIMITATIONS",
];

const SYSTEM_PROMPT: &str = "You are a research paper summarizer. Analyze papers \
and provide structured summaries.\n\n\
Output format:\n\
SUMMARY: [2-3 sentence overview of the paper's main contribution and findings]\n\
KEY_FINDINGS: [Bullet points of main results and discoveries]\n\
METHODOLOGY: [Research methods and approaches used]\n\
CONTRIBUTIONS: [Novel contributions to the field]\n\
LIMITATIONS: [Limitations and future work needed]\n\n\
Guidelines:\n\
- Be concise and technical\n\
- Report only what the paper supports";

/// When the response carries no SUMMARY label, the overview falls back to
/// this many leading characters of the raw response.
const OVERVIEW_FALLBACK_CHARS: usize = 500;

pub struct Summarizer {
    store: Arc<Store>,
    provider: Arc<dyn CompletionProvider>,
    config: PipelineConfig,
}

impl Summarizer {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn CompletionProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Summarize one paper and store the result, replacing any earlier
    /// summary for the same paper. Completion failure fails the paper's
    /// summary; it does not store a partial record.
    pub async fn summarize(&self, paper_id: i64) -> Result<Summary, PipelineError> {
        let paper = self.store.get_paper(paper_id).map_err(|e| match e {
            StoreError::PaperNotFound { id } => {
                PipelineError::Stage(StageError::PaperNotFound { id })
            }
            other => PipelineError::Store(other),
        })?;

        let excerpt = leading_excerpt(&paper.full_text, self.config.limits.summary_input_chars);
        let prompt = format!(
            "Analyze this research paper:\n\n\
             Title: {}\n\
             Authors: {}\n\
             Abstract: {}\n\n\
             Full Text (leading excerpt):\n{}",
            paper.title, paper.authors, paper.abstract_text, excerpt,
        );

        debug!(paper_id, title = %paper.title, "Requesting summary");
        let response = self
            .provider
            .complete(CompletionRequest {
                messages: vec![Message::system(SYSTEM_PROMPT), Message::user(&prompt)],
                tools: None,
                temperature: self.config.llm.temperature,
                max_tokens: Some(self.config.llm.max_tokens),
                format: None,
            })
            .await?;

        let text = response.message.content.as_text().unwrap_or_default();
        let summary = parse_summary(&text);
        self.store.upsert_summary(paper_id, &summary)?;
        info!(paper_id, "Summary stored");
        self.store.get_summary(paper_id).map_err(PipelineError::from)
    }
}

/// Parse the labeled response. A missing SUMMARY section falls back to
/// the response's leading text; other missing sections are empty.
fn parse_summary(response: &str) -> NewSummary {
    let parsed = sections::parse_sections(response, LABELS);
    let joined = |key: &str| sections::joined(&parsed, key).unwrap_or_default();
    NewSummary {
        overview: sections::joined(&parsed, "summary").unwrap_or_else(|| {
            leading_excerpt(response, OVERVIEW_FALLBACK_CHARS)
                .trim()
                .to_string()
        }),
        key_findings: joined("key_findings"),
        methodology: joined("methodology"),
        contributions: joined("contributions"),
        limitations: joined("limitations"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use crate::types::NewPaper;

    fn stored_paper(store: &Store) -> i64 {
        store
            .insert_paper(&NewPaper {
                title: "A Paper".into(),
                authors: "A. Author".into(),
                abstract_text: "An abstract.".into(),
                year: Some(2020),
                full_text: "Body text. ".repeat(500),
                file_path: "/papers/a.pdf".into(),
                file_name: "a.pdf".into(),
                page_count: 4,
            })
            .unwrap()
    }

    const STRUCTURED: &str = "\
SUMMARY: The paper proposes a method.\n\
KEY_FINDINGS:\n- it works\n- it is fast\n\
METHODOLOGY: Benchmarks on public data.\n\
CONTRIBUTIONS: A new method.\n\
LIMITATIONS: Only tested on one dataset.";

    #[tokio::test]
    async fn stores_structured_summary() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let paper_id = stored_paper(&store);
        let provider = Arc::new(MockProvider::with_response(STRUCTURED));
        let summarizer = Summarizer::new(store.clone(), provider, PipelineConfig::default());

        let summary = summarizer.summarize(paper_id).await.unwrap();
        assert_eq!(summary.overview, "The paper proposes a method.");
        assert_eq!(summary.key_findings, "- it works - it is fast");
        assert_eq!(summary.limitations, "Only tested on one dataset.");
    }

    #[tokio::test]
    async fn prompt_excerpt_is_bounded() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let paper_id = stored_paper(&store);
        let provider = Arc::new(MockProvider::with_response(STRUCTURED));
        let config = PipelineConfig::default();
        let summarizer = Summarizer::new(store, provider.clone(), config.clone());

        summarizer.summarize(paper_id).await.unwrap();
        let requests = provider.requests();
        let prompt = requests[0].messages[1].content.as_text().unwrap().to_string();
        // Paper body is ~5500 chars; the prompt must carry at most the
        // configured excerpt plus the metadata header.
        assert!(prompt.len() < config.limits.summary_input_chars + 400);
    }

    #[tokio::test]
    async fn rerun_replaces_summary_idempotently() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let paper_id = stored_paper(&store);
        let provider = Arc::new(MockProvider::with_response(STRUCTURED));
        let summarizer = Summarizer::new(store.clone(), provider, PipelineConfig::default());

        let first = summarizer.summarize(paper_id).await.unwrap();
        let second = summarizer.summarize(paper_id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_summaries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unlabeled_response_becomes_overview_excerpt() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let paper_id = stored_paper(&store);
        let provider = Arc::new(MockProvider::with_response(
            "Free-form prose without any labels at all.",
        ));
        let summarizer = Summarizer::new(store, provider, PipelineConfig::default());

        let summary = summarizer.summarize(paper_id).await.unwrap();
        assert_eq!(summary.overview, "Free-form prose without any labels at all.");
        assert_eq!(summary.key_findings, "");
    }

    #[tokio::test]
    async fn missing_paper_is_a_stage_error() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let provider = Arc::new(MockProvider::new());
        let summarizer = Summarizer::new(store, provider, PipelineConfig::default());

        let err = summarizer.summarize(42).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Stage(StageError::PaperNotFound { id: 42 })
        ));
    }
}
