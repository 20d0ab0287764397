//! Guard rails for LLM tool-calling loops.
//!
//! `tether-rs` keeps an agentic tool-use loop inside the model's context
//! window and recovers usable arguments from imperfect model output. It does
//! not talk to any provider: token counting and context-limit lookup are
//! injected capabilities, and every operation is synchronous and
//! deterministic.
//!
//! # Getting started
//!
//! ```
//! use tether_rs::prelude::*;
//!
//! let limits = ModelContextTable::default();
//! let counter = CharRatioCounter::default();
//! let enforcer = BudgetEnforcer::new(counter, limits, RuntimeKnobs::default());
//!
//! let messages = vec![
//!     Message::system("You are a helpful coding assistant."),
//!     Message::user("Read src/main.rs and summarize it."),
//! ];
//! let outcome = enforcer.enforce("gpt-4o-mini", &messages, None, Some(1024));
//! assert!(!outcome.audit.truncated());
//!
//! let (args, audit) = parse_arguments(Some("```json\n{\"path\": \"src/main.rs\",}\n```"), None);
//! assert_eq!(audit.outcome, SalvageOutcome::Ok);
//! assert_eq!(args["path"], "src/main.rs");
//!
//! let mut state = ToolLoopState::new();
//! let sig = ToolLoopState::signature("read_file", &serde_json::Value::Object(args));
//! state.record(&sig);
//! assert!(!state.is_repeated(&sig, 2));
//! ```
//!
//! # Where to find things
//!
//! - **Budget enforcement:** [`BudgetEnforcer`](context::budget::BudgetEnforcer)
//!   drops old messages, clamps tool output, and disables tools when headroom
//!   runs out. It reports what it did in a
//!   [`BudgetAudit`](context::audit::BudgetAudit).
//!
//! - **Capabilities:** implement [`TokenCounter`](context::tokens::TokenCounter)
//!   and [`ContextLimitResolver`](context::limits::ContextLimitResolver) to plug
//!   in a real tokenizer or model catalogue. The defaults are a chars-per-token
//!   estimate and a built-in model family table.
//!
//! - **Argument salvage:** [`parse_arguments`](tools::salvage::parse_arguments)
//!   repairs fenced, trailing-comma and truncated JSON.
//!
//! - **Loop bounds:** [`ToolLoopState`](tools::loop_state::ToolLoopState)
//!   counts rounds and repeated call signatures.
//!
//! - **Configuration:** [`TetherConfig`](config::TetherConfig) loads runtime
//!   knobs from TOML files and `TETHER_*` environment variables.
//!
//! - **Action plans:** [`plan`] validates planner output before execution.

pub mod config;
pub mod context;
pub mod plan;
pub mod prelude;
pub mod tools;

use serde::{Deserialize, Serialize};

// ── Request types ──────────────────────────────────────────────────

/// The outgoing chat request the budget enforcer adjusts.
///
/// Only the fields the guard rails read or rewrite are modelled; provider
/// specific parameters live with the caller.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32", default)]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parallel_tool_calls: Option<bool>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Text content, or the empty string for content-less messages.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Check the structural invariants of a conversation: at most one
    /// system message, first if present, and every tool result carries the
    /// id of the call it answers.
    pub fn validate_sequence(messages: &[Message]) -> Result<(), MessageError> {
        for (index, msg) in messages.iter().enumerate() {
            match msg.role {
                MessageRole::System if index != 0 => {
                    return Err(MessageError::MisplacedSystem { index });
                }
                MessageRole::Tool
                    if msg.tool_call_id.as_deref().is_none_or(|id| id.is_empty()) =>
                {
                    return Err(MessageError::MissingToolCallId { index });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Structural problems in a message list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("system message at index {index} must be the first and only system message")]
    MisplacedSystem { index: usize },
    #[error("tool message at index {index} has no tool_call_id")]
    MissingToolCallId { index: usize },
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model. `arguments` is the raw string the
/// model produced and may need salvaging.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content.as_deref(), Some("hello"));

        let assist = Message::assistant_text("prefill");
        assert_eq!(assist.role, MessageRole::Assistant);

        let tool = Message::tool_result("call-1", "result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(tool.text(), "result");
    }

    #[test]
    fn chat_request_skips_unset_fields() {
        let req = ChatRequest {
            model: "test-model".into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("parallel_tool_calls").is_none());
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::tool_result("c1", "ok")).unwrap();
        assert!(json.contains(r#""role":"tool""#));
        assert!(json.contains(r#""tool_call_id":"c1""#));
    }

    #[test]
    fn validate_sequence_accepts_well_formed() {
        let msgs = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::tool_result("c1", "out"),
        ];
        assert!(Message::validate_sequence(&msgs).is_ok());
    }

    #[test]
    fn validate_sequence_rejects_late_system() {
        let msgs = vec![Message::user("hi"), Message::system("sys")];
        assert_eq!(
            Message::validate_sequence(&msgs),
            Err(MessageError::MisplacedSystem { index: 1 })
        );
    }

    #[test]
    fn validate_sequence_rejects_tool_without_id() {
        let mut tool = Message::tool_result("", "out");
        assert_eq!(
            Message::validate_sequence(std::slice::from_ref(&tool)),
            Err(MessageError::MissingToolCallId { index: 0 })
        );
        tool.tool_call_id = None;
        assert!(Message::validate_sequence(&[tool]).is_err());
    }
}
