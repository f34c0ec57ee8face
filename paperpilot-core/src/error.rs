//! Error types for the PaperPilot core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the completion client, storage, document extraction, stage
//! preconditions, and configuration.

use std::path::PathBuf;

/// Top-level error type for the PaperPilot core library.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether this error must abort the whole run.
    ///
    /// Only the backing store becoming unreachable is fatal; everything
    /// else is recorded at the item or stage boundary and processing
    /// continues.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Store(StoreError::Unavailable { .. }))
    }
}

/// Errors from completion client interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Request rejected by model endpoint (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Rate limited by model endpoint, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Connection to model endpoint failed: {message}")]
    Connection { message: String },

    #[error("Completion unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },
}

/// Errors from the persistent store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage unavailable: {message}")]
    Unavailable { message: String },

    #[error("Paper not found: {id}")]
    PaperNotFound { id: i64 },

    #[error("No summary stored for paper {paper_id}")]
    SummaryNotFound { paper_id: i64 },

    #[error("No synthesis stored")]
    SynthesisNotFound,
}

/// Errors from document extraction. Always recoverable at the
/// per-document boundary.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Unreadable document {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("No text content extracted from {path}")]
    Empty { path: String },
}

/// Stage precondition errors.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Paper {id} not present in store")]
    PaperNotFound { id: i64 },

    #[error("Insufficient data for synthesis: {summaries} summaries stored, at least 1 required")]
    InsufficientData { summaries: usize },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_unavailable_is_fatal() {
        let err = PipelineError::Store(StoreError::Unavailable {
            message: "database locked".into(),
        });
        assert!(err.is_fatal());
    }

    #[test]
    fn per_item_errors_are_not_fatal() {
        let extract = PipelineError::Extract(ExtractError::Empty {
            path: "a.pdf".into(),
        });
        assert!(!extract.is_fatal());

        let llm = PipelineError::Llm(LlmError::Unavailable {
            attempts: 3,
            message: "connection refused".into(),
        });
        assert!(!llm.is_fatal());

        let stage = PipelineError::Stage(StageError::InsufficientData { summaries: 0 });
        assert!(!stage.is_fatal());
    }
}
