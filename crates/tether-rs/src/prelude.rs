//! Convenience re-exports for common `tether-rs` types.
//!
//! ```ignore
//! use tether_rs::prelude::*;
//! ```
//!
//! Covers what a loop driver needs on every round: messages, the budget
//! enforcer and its default capabilities, argument salvage, and loop
//! counters. Plan validation and config loading live in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatRequest, Message, MessageRole, ToolCall, ToolDef};

// ── Context budget ──────────────────────────────────────────────────
pub use crate::context::{
    BudgetAudit, BudgetEnforcer, BudgetOutcome, CharRatioCounter, ContextLimitResolver,
    ModelContextTable, TokenCounter, TruncationKind,
};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::RuntimeKnobs;

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    JsonSalvageAudit, LoopDecision, LoopLimits, SalvageOutcome, ToolLoopState, parse_arguments,
    parse_tool_call,
};
