//! Core type definitions for PaperPilot.
//!
//! Conversation messages and completion request/response types used by the
//! completion client, plus the domain records persisted by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Content within a message: text, tool call, or tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        output: String,
        is_error: bool,
    },
    MultiPart {
        parts: Vec<Content>,
    },
}

impl Content {
    /// Create a simple text content.
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    /// Create a tool call content.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Content::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Create a tool result content.
    pub fn tool_result(
        call_id: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Content::ToolResult {
            call_id: call_id.into(),
            output: output.into(),
            is_error,
        }
    }

    /// Returns the text if this is plain text content.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A single message in a conversation sent to the completion client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn new(role: Role, content: Content) -> Self {
        Self { role, content }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, Content::text(text))
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, Content::text(text))
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Content::text(text))
    }
}

/// Definition of a callable tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A request to the completion client.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    /// Optional structured-output schema hint. The client forwards it
    /// verbatim and makes no parsing guarantee; callers parse defensively.
    pub format: Option<serde_json::Value>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            tools: None,
            temperature: 0.0,
            max_tokens: None,
            format: None,
        }
    }
}

/// A response from the completion client.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub message: Message,
    pub model: String,
    pub finish_reason: Option<String>,
}

// --- Domain records ---

/// A parsed research paper as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: i64,
    pub title: String,
    pub authors: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub year: Option<i32>,
    pub full_text: String,
    pub file_path: String,
    pub file_name: String,
    pub page_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Paper fields produced by the parser stage, before the store assigns
/// an identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPaper {
    pub title: String,
    pub authors: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub year: Option<i32>,
    pub full_text: String,
    pub file_path: String,
    pub file_name: String,
    pub page_count: usize,
}

/// A structured summary of a single paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub paper_id: i64,
    pub overview: String,
    pub key_findings: String,
    pub methodology: String,
    pub contributions: String,
    pub limitations: String,
    pub created_at: DateTime<Utc>,
}

/// Summary fields produced by the summarizer stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSummary {
    pub overview: String,
    pub key_findings: String,
    pub methodology: String,
    pub contributions: String,
    pub limitations: String,
}

/// The cross-paper synthesis record. At most one exists at a time;
/// re-running synthesis replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub id: i64,
    pub narrative: String,
    pub themes: Vec<String>,
    pub gaps: Vec<String>,
    pub directions: Vec<String>,
    pub papers_included: Vec<i64>,
    pub paper_count: usize,
    /// Rendered mini-survey with inline citations, bounded by the
    /// configured word cap.
    pub survey: String,
    pub created_at: DateTime<Utc>,
}

/// Synthesis fields produced by the synthesizer stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSynthesis {
    pub narrative: String,
    pub themes: Vec<String>,
    pub gaps: Vec<String>,
    pub directions: Vec<String>,
    pub papers_included: Vec<i64>,
    pub survey: String,
}

/// A single turn of an interactive chat session. Never persisted;
/// lifetime is one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}
