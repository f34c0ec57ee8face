//! Interactive question answering over the stored corpus.
//!
//! A session prefers tool-mediated answers: the model is offered read-only
//! store tools and gets up to a bounded number of sequential tool rounds.
//! When a round errors, the store goes away, or the bound runs out, the
//! turn is retried against a context snapshot built once at session start.
//! The caller always gets an answer or a worded refusal; tool-round
//! errors never escape the session.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, StoreError};
use crate::llm::CompletionProvider;
use crate::stages::leading_excerpt as excerpt;
use crate::store::Store;
use crate::types::{
    CompletionRequest, Content, ConversationTurn, Message, Role, ToolDefinition,
};
use serde_json::{Value, json};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

const UNABLE_TO_ANSWER: &str =
    "I wasn't able to answer that from the analyzed papers. The language model \
     could not be reached; please try again.";

/// How a turn was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStrategy {
    /// The model answered through read-only store tools.
    ToolMediated,
    /// Fallback: a single completion over the preloaded context snapshot.
    ContextOnly,
}

#[derive(Debug, Clone)]
pub struct ChatAnswer {
    pub text: String,
    pub strategy: AnswerStrategy,
}

/// Read-only store tools offered to the model during tool-mediated turns.
struct ToolRegistry {
    store: Arc<Store>,
    excerpt_chars: usize,
}

impl ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let no_args = json!({"type": "object", "properties": {}});
        let paper_id_arg = json!({
            "type": "object",
            "properties": {"paper_id": {"type": "integer", "description": "Paper identifier"}},
            "required": ["paper_id"]
        });
        vec![
            ToolDefinition {
                name: "list_papers".into(),
                description: "List all analyzed papers with id, title, authors, and year".into(),
                parameters: no_args.clone(),
            },
            ToolDefinition {
                name: "get_paper".into(),
                description: "Get one paper's metadata and abstract by id".into(),
                parameters: paper_id_arg.clone(),
            },
            ToolDefinition {
                name: "list_summaries".into(),
                description: "List all paper summaries with paper id and overview".into(),
                parameters: no_args.clone(),
            },
            ToolDefinition {
                name: "get_summary".into(),
                description: "Get the full structured summary for a paper by id".into(),
                parameters: paper_id_arg,
            },
            ToolDefinition {
                name: "get_synthesis".into(),
                description: "Get the cross-paper synthesis: narrative, themes, gaps, directions"
                    .into(),
                parameters: no_args,
            },
        ]
    }

    /// Invoke a tool by name. Not-found and bad-argument errors come back
    /// as `Ok(Err(message))` so they can be fed to the model; only an
    /// unavailable store is an `Err`.
    fn invoke(&self, name: &str, arguments: &Value) -> Result<Result<Value, String>, StoreError> {
        let result = match name {
            "list_papers" => self.store.list_papers().map(|papers| {
                json!(papers
                    .iter()
                    .map(|p| json!({
                        "id": p.id,
                        "title": p.title,
                        "authors": p.authors,
                        "year": p.year,
                    }))
                    .collect::<Vec<_>>())
            }),
            "get_paper" => match paper_id_from(arguments) {
                Some(id) => self.store.get_paper(id).map(|p| {
                    json!({
                        "id": p.id,
                        "title": p.title,
                        "authors": p.authors,
                        "year": p.year,
                        "abstract": p.abstract_text,
                        "page_count": p.page_count,
                        "file_name": p.file_name,
                    })
                }),
                None => return Ok(Err("get_paper requires an integer paper_id".into())),
            },
            "list_summaries" => self.store.list_summaries().map(|summaries| {
                json!(summaries
                    .iter()
                    .map(|s| json!({
                        "paper_id": s.paper_id,
                        "overview": excerpt(&s.overview, self.excerpt_chars),
                    }))
                    .collect::<Vec<_>>())
            }),
            "get_summary" => match paper_id_from(arguments) {
                Some(id) => self
                    .store
                    .get_summary(id)
                    .map(|s| serde_json::to_value(&s).unwrap_or(Value::Null)),
                None => return Ok(Err("get_summary requires an integer paper_id".into())),
            },
            "get_synthesis" => self
                .store
                .get_synthesis()
                .map(|s| serde_json::to_value(&s).unwrap_or(Value::Null)),
            other => return Ok(Err(format!("Unknown tool: {other}"))),
        };

        match result {
            Ok(value) => Ok(Ok(value)),
            Err(e @ StoreError::Unavailable { .. }) => Err(e),
            Err(e) => Ok(Err(e.to_string())),
        }
    }
}

fn paper_id_from(arguments: &Value) -> Option<i64> {
    arguments.get("paper_id").and_then(Value::as_i64)
}

/// Tool calls carried by a response message, whether a lone call or a
/// multi-part message mixing text with one or more calls.
fn tool_calls_in(content: &Content) -> Vec<(&str, &str, &Value)> {
    match content {
        Content::ToolCall {
            id,
            name,
            arguments,
        } => vec![(id.as_str(), name.as_str(), arguments)],
        Content::MultiPart { parts } => parts
            .iter()
            .filter_map(|part| match part {
                Content::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some((id.as_str(), name.as_str(), arguments)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub struct ChatSession {
    provider: Arc<dyn CompletionProvider>,
    tools: ToolRegistry,
    config: PipelineConfig,
    snapshot: String,
    history: Vec<ConversationTurn>,
    paper_count: usize,
}

impl ChatSession {
    /// Build a session, taking the context snapshot up front.
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn CompletionProvider>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let snapshot = build_snapshot(&store, config.limits.abstract_excerpt_chars)?;
        let paper_count = store.counts()?.papers;
        Ok(Self {
            provider,
            tools: ToolRegistry {
                store,
                excerpt_chars: config.limits.tool_overview_excerpt_chars,
            },
            config,
            snapshot,
            history: Vec::new(),
            paper_count,
        })
    }

    /// True when no papers have been analyzed yet.
    pub fn is_empty(&self) -> bool {
        self.paper_count == 0
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Answer one question. Never returns an error; failures degrade to
    /// the context-only strategy and finally to a worded refusal.
    pub async fn ask(&mut self, question: &str) -> ChatAnswer {
        self.history.push(ConversationTurn::user(question));

        let answer = match self.tool_mediated(question).await {
            Some(text) => ChatAnswer {
                text,
                strategy: AnswerStrategy::ToolMediated,
            },
            None => {
                debug!("Falling back to context-only answer");
                ChatAnswer {
                    text: self.context_only(question).await,
                    strategy: AnswerStrategy::ContextOnly,
                }
            }
        };
        self.history.push(ConversationTurn::assistant(&answer.text));
        answer
    }

    /// Up to `max_tool_rounds` sequential rounds with tools offered.
    /// `None` means the fallback should run.
    async fn tool_mediated(&self, question: &str) -> Option<String> {
        let system = format!(
            "You are a research assistant answering questions about {count} analyzed \
             research papers. Use the tools to look up papers, summaries, and the \
             synthesis. Answer from the stored analyses only.",
            count = self.paper_count,
        );
        let mut messages = vec![Message::system(&system)];
        messages.extend(self.history_messages());
        messages.push(Message::user(question));

        for round in 0..self.config.chat.max_tool_rounds {
            let request = CompletionRequest {
                messages: messages.clone(),
                tools: Some(self.tools.definitions()),
                temperature: self.config.chat.temperature,
                max_tokens: Some(self.config.llm.max_tokens),
                format: None,
            };
            let response = match self.provider.complete(request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(round, error = %e, "Tool-mediated completion failed");
                    return None;
                }
            };

            let calls = tool_calls_in(&response.message.content);
            if calls.is_empty() {
                let text = response
                    .message
                    .content
                    .as_text()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                if !text.is_empty() {
                    return Some(text);
                }
                warn!(round, "Empty tool-mediated answer");
                return None;
            }

            messages.push(response.message.clone());
            for (id, name, arguments) in calls {
                debug!(round, tool = %name, "Tool call requested");
                let outcome = match self.tools.invoke(name, arguments) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(tool = %name, error = %e, "Store unavailable during tool call");
                        return None;
                    }
                };
                let (output, is_error) = match outcome {
                    Ok(value) => (value.to_string(), false),
                    Err(message) => (message, true),
                };
                messages.push(Message::new(
                    Role::Tool,
                    Content::tool_result(id, output, is_error),
                ));
            }
        }
        warn!(rounds = self.config.chat.max_tool_rounds, "Tool rounds exhausted");
        None
    }

    /// Single completion over the snapshot, no tools.
    async fn context_only(&self, question: &str) -> String {
        let system = format!(
            "You are a research assistant. Answer the question using only the \
             following context from analyzed papers.\n\n{}",
            self.snapshot,
        );
        let mut messages = vec![Message::system(&system)];
        messages.extend(self.history_messages());
        messages.push(Message::user(question));

        let request = CompletionRequest {
            messages,
            tools: None,
            temperature: self.config.chat.temperature,
            max_tokens: Some(self.config.llm.max_tokens),
            format: None,
        };
        match self.provider.complete(request).await {
            Ok(response) => {
                let text = response
                    .message
                    .content
                    .as_text()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                if text.is_empty() {
                    UNABLE_TO_ANSWER.to_string()
                } else {
                    text
                }
            }
            Err(e) => {
                warn!(error = %e, "Context-only completion failed");
                UNABLE_TO_ANSWER.to_string()
            }
        }
    }

    /// Prior turns as messages. The current question is excluded; it is
    /// already the last history entry when a strategy runs.
    fn history_messages(&self) -> Vec<Message> {
        let prior = self.history.len().saturating_sub(1);
        self.history[..prior]
            .iter()
            .map(|turn| match turn.role {
                Role::User => Message::user(&turn.text),
                _ => Message::assistant(&turn.text),
            })
            .collect()
    }
}

/// One-shot context snapshot: every paper's metadata and abstract
/// excerpt, every summary, and the synthesis when present.
fn build_snapshot(store: &Store, excerpt_chars: usize) -> Result<String, StoreError> {
    let mut snapshot = String::from("Analyzed papers:\n");
    for paper in store.list_papers()? {
        let _ = writeln!(
            snapshot,
            "- [{}] {} ({}) by {}\n  Abstract: {}",
            paper.id,
            paper.title,
            paper
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "n.d.".to_string()),
            paper.authors,
            excerpt(&paper.abstract_text, excerpt_chars),
        );
    }

    snapshot.push_str("\nSummaries:\n");
    for summary in store.list_summaries()? {
        let _ = writeln!(
            snapshot,
            "- Paper {}: {}\n  Key findings: {}",
            summary.paper_id, summary.overview, summary.key_findings,
        );
    }

    match store.get_synthesis() {
        Ok(synthesis) => {
            let _ = writeln!(
                snapshot,
                "\nSynthesis:\n{}\nThemes: {}\nGaps: {}\nDirections: {}",
                synthesis.narrative,
                synthesis.themes.join("; "),
                synthesis.gaps.join("; "),
                synthesis.directions.join("; "),
            );
        }
        Err(StoreError::SynthesisNotFound) => {}
        Err(e) => return Err(e),
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use crate::types::{NewPaper, NewSummary};

    fn seeded_store() -> Arc<Store> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let id = store
            .insert_paper(&NewPaper {
                title: "Scaling Laws".into(),
                authors: "A. Researcher".into(),
                abstract_text: "We study scaling.".into(),
                year: Some(2022),
                full_text: "Body.".into(),
                file_path: "/papers/scaling.pdf".into(),
                file_name: "scaling.pdf".into(),
                page_count: 9,
            })
            .unwrap();
        store
            .upsert_summary(
                id,
                &NewSummary {
                    overview: "Scaling helps.".into(),
                    key_findings: "- more is better".into(),
                    methodology: String::new(),
                    contributions: String::new(),
                    limitations: String::new(),
                },
            )
            .unwrap();
        store
    }

    fn session(provider: MockProvider) -> ChatSession {
        ChatSession::new(
            seeded_store(),
            Arc::new(provider),
            PipelineConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn direct_text_answer_is_tool_mediated() {
        let mut session = session(MockProvider::with_response("Scaling improves accuracy."));
        let answer = session.ask("What did the papers find?").await;
        assert_eq!(answer.strategy, AnswerStrategy::ToolMediated);
        assert_eq!(answer.text, "Scaling improves accuracy.");
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn tool_call_round_then_answer() {
        let provider = MockProvider::new();
        provider.queue_response(MockProvider::tool_call_response("list_papers", json!({})));
        provider.queue_response(MockProvider::text_response(
            "One paper: Scaling Laws (2022).",
        ));
        let mut session = session(provider);

        let answer = session.ask("What papers are analyzed?").await;
        assert_eq!(answer.strategy, AnswerStrategy::ToolMediated);
        assert!(answer.text.contains("Scaling Laws"));
    }

    #[tokio::test]
    async fn parallel_tool_calls_are_all_dispatched() {
        use crate::types::CompletionResponse;

        let provider = Arc::new(MockProvider::new());
        provider.queue_response(CompletionResponse {
            message: Message::new(
                Role::Assistant,
                Content::MultiPart {
                    parts: vec![
                        Content::text("Looking these up."),
                        Content::tool_call("call_a", "list_papers", json!({})),
                        Content::tool_call("call_b", "get_summary", json!({"paper_id": 1})),
                    ],
                },
            ),
            model: "mock-model".into(),
            finish_reason: Some("tool_calls".into()),
        });
        provider.queue_response(MockProvider::text_response(
            "One paper on scaling, summarized.",
        ));
        let mut session = ChatSession::new(
            seeded_store(),
            provider.clone(),
            PipelineConfig::default(),
        )
        .unwrap();

        let answer = session.ask("What is stored?").await;
        assert_eq!(answer.strategy, AnswerStrategy::ToolMediated);
        assert_eq!(answer.text, "One paper on scaling, summarized.");

        // The second round must carry one result per requested call.
        let requests = provider.requests();
        let results: Vec<_> = requests[1]
            .messages
            .iter()
            .filter_map(|m| match &m.content {
                Content::ToolResult { call_id, is_error, .. } => Some((call_id.clone(), *is_error)),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec![("call_a".to_string(), false), ("call_b".to_string(), false)]);
    }

    #[tokio::test]
    async fn tool_error_is_fed_back_not_fatal() {
        let provider = MockProvider::new();
        provider.queue_response(MockProvider::tool_call_response(
            "get_paper",
            json!({"paper_id": 99}),
        ));
        provider.queue_response(MockProvider::text_response("No such paper exists."));
        let mut session = session(provider);

        let answer = session.ask("Tell me about paper 99").await;
        assert_eq!(answer.strategy, AnswerStrategy::ToolMediated);
        assert_eq!(answer.text, "No such paper exists.");
    }

    #[tokio::test]
    async fn completion_failure_falls_back_to_context_only() {
        // Tool-bearing requests fail; the plain snapshot request succeeds.
        let provider = MockProvider::failing_on_tools("From the context: scaling helps.");
        let mut session = session(provider);

        let answer = session.ask("What helps?").await;
        assert_eq!(answer.strategy, AnswerStrategy::ContextOnly);
        assert_eq!(answer.text, "From the context: scaling helps.");
    }

    #[tokio::test]
    async fn exhausted_rounds_fall_back() {
        let provider = MockProvider::new();
        for _ in 0..10 {
            provider.queue_response(MockProvider::tool_call_response("list_papers", json!({})));
        }
        provider.queue_response(MockProvider::text_response("Answer from context."));
        let mut session = session(provider);

        let answer = session.ask("Loop forever?").await;
        assert_eq!(answer.strategy, AnswerStrategy::ContextOnly);
    }

    #[tokio::test]
    async fn total_failure_yields_worded_refusal() {
        let provider = MockProvider::new();
        for _ in 0..10 {
            provider.queue_error(crate::error::LlmError::Connection {
                message: "refused".into(),
            });
        }
        let mut session = session(provider);

        let answer = session.ask("Anyone there?").await;
        assert_eq!(answer.strategy, AnswerStrategy::ContextOnly);
        assert!(answer.text.contains("try again"));
        // The refusal still lands in history.
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn empty_store_is_detectable() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let session = ChatSession::new(
            store,
            Arc::new(MockProvider::new()),
            PipelineConfig::default(),
        )
        .unwrap();
        assert!(session.is_empty());
    }

    #[test]
    fn snapshot_includes_papers_and_summaries() {
        let store = seeded_store();
        let snapshot = build_snapshot(&store, 300).unwrap();
        assert!(snapshot.contains("Scaling Laws"));
        assert!(snapshot.contains("Scaling helps."));
        assert!(!snapshot.contains("Synthesis:\n"));
    }
}
