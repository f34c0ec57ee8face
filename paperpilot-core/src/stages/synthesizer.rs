//! Synthesis stage: a corpus-level analysis plus a mini-survey over all
//! summarized papers.
//!
//! Runs two completions. The first produces the narrative and the
//! THEMES / GAPS / DIRECTIONS lists; the second writes a mini-survey in
//! Markdown with inline `[n]` citations numbered in paper-id order. A
//! References section is appended when the model leaves it out, and the
//! survey is truncated to the configured word cap at a sentence boundary.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, StageError};
use crate::llm::CompletionProvider;
use crate::stages::sections;
use crate::store::Store;
use crate::types::{CompletionRequest, Message, NewSynthesis, Paper, Summary, Synthesis};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info};

const ANALYSIS_LABELS: &[&str] = &["SYNTHESIS", "THEMES", "GAPS", "DIRECTIONS"];

const ANALYSIS_SYSTEM_PROMPT: &str = "You are a research synthesis expert. \
Analyze a collection of paper summaries and identify what connects them.\n\n\
Output format:\n\
SYNTHESIS: [narrative synthesis across all papers]\n\
THEMES: [bullet list of common themes]\n\
GAPS: [bullet list of research gaps]\n\
DIRECTIONS: [bullet list of promising future directions]";

const SURVEY_SYSTEM_PROMPT: &str = "You are a survey writer. Write a concise \
mini-survey in Markdown over the given papers. Cite papers inline with \
bracketed numbers like [1], using the numbering given. End with a \
References section listing each number, title, and authors.";

pub struct Synthesizer {
    store: Arc<Store>,
    provider: Arc<dyn CompletionProvider>,
    config: PipelineConfig,
}

impl Synthesizer {
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

    /// Synthesize across every summarized paper and store the singleton
    /// record, replacing any earlier synthesis.
    pub async fn synthesize(&self) -> Result<Synthesis, PipelineError> {
        let pairs = self.summarized_pairs()?;
        if pairs.is_empty() {
            return Err(StageError::InsufficientData { summaries: 0 }.into());
        }
        debug!(papers = pairs.len(), "Synthesizing corpus");

        let digest = corpus_digest(&pairs);
        let analysis = self.complete(ANALYSIS_SYSTEM_PROMPT, &digest).await?;
        let parsed = sections::parse_sections(&analysis, ANALYSIS_LABELS);

        let survey_raw = self.complete(SURVEY_SYSTEM_PROMPT, &digest).await?;
        let survey = finish_survey(
            &survey_raw,
            &pairs,
            self.config.limits.survey_word_cap,
        );

        let record = NewSynthesis {
            narrative: sections::joined(&parsed, "synthesis")
                .unwrap_or_else(|| analysis.trim().to_string()),
            themes: sections::list_items(&parsed, "themes"),
            gaps: sections::list_items(&parsed, "gaps"),
            directions: sections::list_items(&parsed, "directions"),
            papers_included: pairs.iter().map(|(p, _)| p.id).collect(),
            survey,
        };
        self.store.upsert_synthesis(&record)?;
        info!(papers = record.papers_included.len(), "Synthesis stored");
        self.store.get_synthesis().map_err(PipelineError::from)
    }

    /// Paper and summary pairs in paper-id order; papers without a
    /// summary are left out.
    fn summarized_pairs(&self) -> Result<Vec<(Paper, Summary)>, PipelineError> {
        let papers = self.store.list_papers()?;
        let mut pairs = Vec::new();
        for paper in papers {
            match self.store.get_summary(paper.id) {
                Ok(summary) => pairs.push((paper, summary)),
                Err(crate::error::StoreError::SummaryNotFound { .. }) => {}
                Err(other) => return Err(other.into()),
            }
        }
        Ok(pairs)
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, PipelineError> {
        let response = self
            .provider
            .complete(CompletionRequest {
                messages: vec![Message::system(system), Message::user(prompt)],
                tools: None,
                temperature: self.config.llm.temperature,
                max_tokens: Some(self.config.llm.max_tokens),
                format: None,
            })
            .await?;
        Ok(response
            .message
            .content
            .as_text()
            .unwrap_or_default()
            .to_string())
    }
}

/// Numbered digest of every paper and its summary, fed to both
/// completions so citation numbers line up.
fn corpus_digest(pairs: &[(Paper, Summary)]) -> String {
    let mut digest = String::new();
    for (n, (paper, summary)) in pairs.iter().enumerate() {
        let _ = writeln!(
            digest,
            "[{num}] {title} ({year})\nAuthors: {authors}\nOverview: {overview}\nKey findings: {findings}\n",
            num = n + 1,
            title = paper.title,
            year = paper
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "n.d.".to_string()),
            authors = paper.authors,
            overview = summary.overview,
            findings = summary.key_findings,
        );
    }
    digest
}

/// Append a References section when missing, then enforce the word cap.
fn finish_survey(raw: &str, pairs: &[(Paper, Summary)], word_cap: usize) -> String {
    let mut survey = raw.trim().to_string();
    if !survey.to_lowercase().contains("references") {
        survey.push_str("\n\n## References\n");
        for (n, (paper, _)) in pairs.iter().enumerate() {
            let _ = writeln!(survey, "[{}] {}. {}", n + 1, paper.title, paper.authors);
        }
    }
    truncate_words(&survey, word_cap)
}

/// Truncate to at most `word_cap` whitespace-separated words, cutting at
/// the sentence boundary nearest below the cap. Newlines count as
/// boundaries so list and reference lines survive whole.
fn truncate_words(text: &str, word_cap: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= word_cap {
        return text.trim().to_string();
    }

    // Byte offset of the end of the word_cap-th word.
    let mut seen = 0usize;
    let mut cut = text.len();
    let mut offset = 0usize;
    for word in text.split_whitespace() {
        let start = match text[offset..].find(word) {
            Some(i) => offset + i,
            None => break,
        };
        offset = start + word.len();
        seen += 1;
        if seen == word_cap {
            cut = offset;
            break;
        }
    }

    let head = &text[..cut];
    let boundary = head
        .rfind(['.', '!', '?'])
        .map(|i| i + 1)
        .or_else(|| head.rfind('\n'))
        .unwrap_or(cut);
    text[..boundary].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use crate::types::{NewPaper, NewSummary};

    fn seed_paper(store: &Store, n: usize) -> i64 {
        store
            .insert_paper(&NewPaper {
                title: format!("Paper {n}"),
                authors: format!("Author {n}"),
                abstract_text: "Abstract.".into(),
                year: Some(2020),
                full_text: "Body.".into(),
                file_path: format!("/papers/{n}.pdf"),
                file_name: format!("{n}.pdf"),
                page_count: 2,
            })
            .unwrap()
    }

    fn seed_summary(store: &Store, paper_id: i64) {
        store
            .upsert_summary(
                paper_id,
                &NewSummary {
                    overview: format!("Overview of paper {paper_id}."),
                    key_findings: "- a finding".into(),
                    methodology: String::new(),
                    contributions: String::new(),
                    limitations: String::new(),
                },
            )
            .unwrap();
    }

    const ANALYSIS: &str = "\
SYNTHESIS: The papers converge on scalable methods.\n\
THEMES:\n- scalability\n- evaluation rigor\n\
GAPS:\n- limited datasets\n\
DIRECTIONS:\n- broader benchmarks";

    #[tokio::test]
    async fn zero_summaries_is_insufficient_data() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        seed_paper(&store, 1);
        let synthesizer = Synthesizer::new(
            store,
            Arc::new(MockProvider::new()),
            PipelineConfig::default(),
        );
        let err = synthesizer.synthesize().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Stage(StageError::InsufficientData { summaries: 0 })
        ));
    }

    #[tokio::test]
    async fn synthesizes_over_summarized_papers_only() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let p1 = seed_paper(&store, 1);
        let p2 = seed_paper(&store, 2);
        seed_paper(&store, 3);
        seed_summary(&store, p1);
        seed_summary(&store, p2);

        let provider = Arc::new(MockProvider::new());
        provider.queue_response(MockProvider::text_response(ANALYSIS));
        provider.queue_response(MockProvider::text_response(
            "Both papers study scaling [1][2].",
        ));
        let synthesizer = Synthesizer::new(store, provider, PipelineConfig::default());

        let synthesis = synthesizer.synthesize().await.unwrap();
        assert_eq!(synthesis.narrative, "The papers converge on scalable methods.");
        assert_eq!(synthesis.themes, vec!["scalability", "evaluation rigor"]);
        assert_eq!(synthesis.gaps, vec!["limited datasets"]);
        assert_eq!(synthesis.papers_included, vec![p1, p2]);
        assert_eq!(synthesis.paper_count, 2);
    }

    #[tokio::test]
    async fn references_are_appended_when_missing() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let p1 = seed_paper(&store, 1);
        seed_summary(&store, p1);

        let provider = Arc::new(MockProvider::new());
        provider.queue_response(MockProvider::text_response(ANALYSIS));
        provider.queue_response(MockProvider::text_response("A survey citing [1]."));
        let synthesizer = Synthesizer::new(store, provider, PipelineConfig::default());

        let synthesis = synthesizer.synthesize().await.unwrap();
        assert!(synthesis.survey.contains("## References"));
        assert!(synthesis.survey.contains("[1] Paper 1. Author 1"));
    }

    #[tokio::test]
    async fn rerun_replaces_singleton() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let p1 = seed_paper(&store, 1);
        seed_summary(&store, p1);
        let synthesizer = Synthesizer::new(
            store.clone(),
            Arc::new(MockProvider::with_response(ANALYSIS)),
            PipelineConfig::default(),
        );

        let first = synthesizer.synthesize().await.unwrap();
        let second = synthesizer.synthesize().await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.counts().unwrap().syntheses, 1);
    }

    #[test]
    fn word_cap_cuts_at_sentence_boundary() {
        let text = "One two three. Four five six seven. Eight nine ten eleven twelve.";
        let capped = truncate_words(text, 6);
        assert_eq!(capped, "One two three.");
        assert_eq!(truncate_words(text, 100), text);
    }

    #[test]
    fn newline_counts_as_a_boundary() {
        let text = "Heading without period\n[1] Alpha Beta\n[2] Gamma Delta Epsilon Zeta";
        let capped = truncate_words(text, 7);
        assert_eq!(capped, "Heading without period\n[1] Alpha Beta");
    }
}
