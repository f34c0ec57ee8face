//! # PaperPilot Core
//!
//! Core library for the PaperPilot research-paper analysis pipeline.
//! Provides the orchestrator, pipeline stages (structuring, summarization,
//! synthesis), the completion client, document extraction, the SQLite
//! store, the interactive chat session, configuration, and fundamental
//! types.

pub mod chat;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod orchestrator;
pub mod stages;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root.
pub use chat::{AnswerStrategy, ChatAnswer, ChatSession};
pub use config::{LlmConfig, PipelineConfig, RetryConfig, load_config};
pub use error::{
    ConfigError, ExtractError, LlmError, PipelineError, StageError, StoreError,
};
pub use extract::{DocumentExtractor, ExtractedDocument, PdfExtractor};
pub use llm::{CompletionProvider, MockProvider, OllamaProvider, RetryingProvider};
pub use orchestrator::{Orchestrator, RunReport, RunState, StageFailure, StageReport};
pub use stages::{ParseDisposition, ParseOutcome, Parser, Summarizer, Synthesizer};
pub use store::{Store, StoreCounts};
pub use types::{
    CompletionRequest, CompletionResponse, Content, ConversationTurn, Message, NewPaper,
    NewSummary, NewSynthesis, Paper, Role, Summary, Synthesis, ToolDefinition,
};
