//! Pipeline orchestration: parse, summarize, synthesize, and write file
//! outputs, accumulating per-stage reports.
//!
//! Individual paper failures are recorded and the run continues; only an
//! unavailable store aborts the run. Cancellation is cooperative, checked
//! between stages and between papers, so an in-flight completion always
//! runs to completion.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::extract::DocumentExtractor;
use crate::llm::CompletionProvider;
use crate::stages::{ParseDisposition, Parser, Summarizer, Synthesizer};
use crate::store::{Store, StoreCounts};
use crate::types::{Paper, Synthesis};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Where a run currently is, or how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    NotStarted,
    Parsing,
    Summarizing,
    Synthesizing,
    /// Every stage completed without failures.
    Done,
    /// The run completed but some items failed or were cancelled.
    PartiallyFailed,
    /// The store became unavailable; remaining stages were skipped.
    Fatal,
}

/// One item that failed within a stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageFailure {
    /// Source path or paper id the failure belongs to.
    pub item: String,
    pub error: String,
}

/// Outcome of one stage across all its items.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    /// Paper ids that went through the stage.
    pub succeeded: Vec<i64>,
    pub failed: Vec<StageFailure>,
    /// Paper ids stored with default metadata instead of a structured
    /// response. Only populated by the parsing stage.
    pub defaulted: Vec<i64>,
}

impl StageReport {
    fn record_failure(&mut self, item: impl Into<String>, err: &PipelineError) {
        self.failed.push(StageFailure {
            item: item.into(),
            error: err.to_string(),
        });
    }
}

/// Full account of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub parsing: StageReport,
    pub summarizing: StageReport,
    pub synthesizing: StageReport,
    pub synthesis_id: Option<i64>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            state: RunState::NotStarted,
            parsing: StageReport::default(),
            summarizing: StageReport::default(),
            synthesizing: StageReport::default(),
            synthesis_id: None,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.parsing.failed.is_empty()
            || !self.summarizing.failed.is_empty()
            || !self.synthesizing.failed.is_empty()
    }
}

pub struct Orchestrator {
    store: Arc<Store>,
    parser: Parser,
    summarizer: Summarizer,
    synthesizer: Synthesizer,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn CompletionProvider>,
        extractor: Arc<dyn DocumentExtractor>,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let parser = Parser::new(
            store.clone(),
            provider.clone(),
            extractor,
            config.clone(),
        );
        let summarizer = Summarizer::new(store.clone(), provider.clone(), config.clone());
        let synthesizer = Synthesizer::new(store.clone(), provider, config.clone());
        Self {
            store,
            parser,
            summarizer,
            synthesizer,
            config,
            cancel,
        }
    }

    /// Run the full pipeline over the given documents.
    pub async fn run(&self, paths: &[PathBuf]) -> RunReport {
        let mut report = RunReport::new();

        report.state = RunState::Parsing;
        info!(documents = paths.len(), "Parsing stage started");
        for path in paths {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled during parsing");
                report.state = RunState::PartiallyFailed;
                return report;
            }
            match self.parser.parse(path).await {
                Ok(outcome) => {
                    report.parsing.succeeded.push(outcome.paper_id);
                    if outcome.disposition == ParseDisposition::StoredWithDefaults {
                        report.parsing.defaulted.push(outcome.paper_id);
                    }
                    if let Err(e) = self.write_paper_metadata(outcome.paper_id) {
                        warn!(paper_id = outcome.paper_id, error = %e, "Failed to write metadata output");
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(path = %path.display(), error = %e, "Store unavailable, aborting run");
                    report.parsing.record_failure(path.display().to_string(), &e);
                    report.state = RunState::Fatal;
                    return report;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse document");
                    report.parsing.record_failure(path.display().to_string(), &e);
                }
            }
        }

        report.state = RunState::Summarizing;
        info!(papers = report.parsing.succeeded.len(), "Summarization stage started");
        let parsed_ids = report.parsing.succeeded.clone();
        for paper_id in parsed_ids {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled during summarization");
                report.state = RunState::PartiallyFailed;
                return report;
            }
            match self.summarizer.summarize(paper_id).await {
                Ok(_) => {
                    report.summarizing.succeeded.push(paper_id);
                    if let Err(e) = self.write_paper_summary(paper_id) {
                        warn!(paper_id, error = %e, "Failed to write summary output");
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(paper_id, error = %e, "Store unavailable, aborting run");
                    report.summarizing.record_failure(paper_id.to_string(), &e);
                    report.state = RunState::Fatal;
                    return report;
                }
                Err(e) => {
                    warn!(paper_id, error = %e, "Failed to summarize paper");
                    report.summarizing.record_failure(paper_id.to_string(), &e);
                }
            }
        }

        report.state = RunState::Synthesizing;
        if self.cancel.is_cancelled() {
            warn!("Run cancelled before synthesis");
            report.state = RunState::PartiallyFailed;
            return report;
        }
        match self.synthesizer.synthesize().await {
            Ok(synthesis) => {
                report.synthesizing.succeeded = synthesis.papers_included.clone();
                report.synthesis_id = Some(synthesis.id);
                if let Err(e) = self.write_synthesis_outputs(&synthesis) {
                    warn!(error = %e, "Failed to write synthesis outputs");
                }
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Store unavailable, aborting run");
                report.synthesizing.record_failure("synthesis", &e);
                report.state = RunState::Fatal;
                return report;
            }
            Err(e) => {
                warn!(error = %e, "Synthesis failed");
                report.synthesizing.record_failure("synthesis", &e);
            }
        }

        report.state = if report.has_failures() {
            RunState::PartiallyFailed
        } else {
            RunState::Done
        };
        info!(state = ?report.state, "Pipeline run finished");
        report
    }

    /// Record counts, for progress reporting.
    pub fn progress(&self) -> Result<StoreCounts, PipelineError> {
        self.store.counts().map_err(PipelineError::from)
    }

    fn paper_dir(&self, paper_id: i64) -> PathBuf {
        self.config.paths.data_dir.join(format!("paper_{paper_id}"))
    }

    fn write_paper_metadata(&self, paper_id: i64) -> Result<(), PipelineError> {
        let paper = self.store.get_paper(paper_id)?;
        let dir = self.paper_dir(paper_id);
        std::fs::create_dir_all(&dir)?;
        write_json(&dir.join("metadata.json"), &metadata_view(&paper))
    }

    fn write_paper_summary(&self, paper_id: i64) -> Result<(), PipelineError> {
        let summary = self.store.get_summary(paper_id)?;
        let dir = self.paper_dir(paper_id);
        std::fs::create_dir_all(&dir)?;
        write_json(&dir.join("summary.json"), &summary)
    }

    fn write_synthesis_outputs(&self, synthesis: &Synthesis) -> Result<(), PipelineError> {
        std::fs::create_dir_all(&self.config.paths.data_dir)?;
        write_json(
            &self.config.paths.data_dir.join("synthesis.json"),
            synthesis,
        )?;
        let survey_path = self.config.paths.data_dir.join("mini_survey.md");
        std::fs::write(&survey_path, &synthesis.survey)?;
        info!(path = %survey_path.display(), "Wrote mini-survey");
        Ok(())
    }
}

/// Metadata output leaves out the full text, which can run to megabytes.
fn metadata_view(paper: &Paper) -> serde_json::Value {
    serde_json::json!({
        "id": paper.id,
        "title": paper.title,
        "authors": paper.authors,
        "abstract": paper.abstract_text,
        "year": paper.year,
        "file_path": paper.file_path,
        "file_name": paper.file_name,
        "page_count": paper.page_count,
        "created_at": paper.created_at,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
