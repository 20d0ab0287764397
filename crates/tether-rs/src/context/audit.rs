//! Structured reports produced by the budget enforcer.
//!
//! Every field serializes under the names below; enum values serialize as
//! lowercase snake case. Telemetry consumers depend on this shape.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What a truncation step did.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TruncationKind {
    DropOldMessages,
    ClampToolMessage,
    DisableTools,
}

impl std::fmt::Display for TruncationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TruncationKind::DropOldMessages => write!(f, "drop_old_messages"),
            TruncationKind::ClampToolMessage => write!(f, "clamp_tool_message"),
            TruncationKind::DisableTools => write!(f, "disable_tools"),
        }
    }
}

/// Token change for one clamped tool message.
///
/// `message_index` points into the message list as it stood after the drop
/// phase (the list the enforcer returns).
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct ToolClampDelta {
    pub message_index: usize,
    pub before_tokens: usize,
    pub after_tokens: usize,
}

/// One step taken by the enforcer. Steps are recorded in the order applied:
/// drop, clamp, disable.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct TruncationStep {
    pub kind: TruncationKind,
    #[serde(default)]
    pub tokens_saved: usize,
    #[serde(default)]
    pub removed_messages: usize,
    #[serde(default)]
    pub tool_clamps: Vec<ToolClampDelta>,
    #[serde(default)]
    pub note: Option<String>,
}

impl TruncationStep {
    pub(crate) fn new(kind: TruncationKind) -> Self {
        Self {
            kind,
            tokens_saved: 0,
            removed_messages: 0,
            tool_clamps: Vec::new(),
            note: None,
        }
    }

    pub(crate) fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Report of a single enforcement call.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct BudgetAudit {
    pub model: String,
    pub max_context: usize,
    pub output_reserve: usize,
    pub total_tokens_before: usize,
    pub total_tokens_after: usize,
    /// `max_context - output_reserve`, saturating at zero.
    pub budget_tokens: usize,
    #[serde(default)]
    pub steps: Vec<TruncationStep>,
    #[serde(default)]
    pub tools_disabled: bool,
    /// RFC 3339 time the audit was stamped. Absent unless the caller calls
    /// [`stamp`](Self::stamp), which keeps enforcement deterministic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<String>,
}

impl BudgetAudit {
    /// The zero-valued audit returned when enforcement cannot run (unknown
    /// model, empty model name).
    pub fn noop(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_context: 0,
            output_reserve: 0,
            total_tokens_before: 0,
            total_tokens_after: 0,
            budget_tokens: 0,
            steps: Vec::new(),
            tools_disabled: false,
            recorded_at: None,
        }
    }

    /// Whether enforcement changed anything the model will see.
    pub fn truncated(&self) -> bool {
        self.total_tokens_after < self.total_tokens_before || self.tools_disabled
    }

    /// Total messages removed by the drop phase.
    pub fn removed_messages(&self) -> usize {
        self.steps.iter().map(|s| s.removed_messages).sum()
    }

    /// The step of the given kind, if it was recorded.
    pub fn step(&self, kind: TruncationKind) -> Option<&TruncationStep> {
        self.steps.iter().find(|s| s.kind == kind)
    }

    /// Attach the current UTC time.
    pub fn stamp(mut self) -> Self {
        self.recorded_at = Some(chrono::Utc::now().to_rfc3339());
        self
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        let kinds: Vec<String> = self.steps.iter().map(|s| s.kind.to_string()).collect();
        format!(
            "budget[{}]: {} -> {} tokens (budget {}, max {}, reserve {}) steps=[{}]{}",
            self.model,
            self.total_tokens_before,
            self.total_tokens_after,
            self.budget_tokens,
            self.max_context,
            self.output_reserve,
            kinds.join(","),
            if self.tools_disabled { " tools_disabled" } else { "" },
        )
    }
}
