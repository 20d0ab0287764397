//! Context window management: token counting, model limits, and budget
//! enforcement.
//!
//! The context window is the scarcest resource in any LLM agent. This module
//! keeps every outgoing request inside it:
//!
//! 1. **[`tokens`]**: the [`TokenCounter`] capability and a chars-per-token
//!    estimator for callers without a tokenizer.
//!
//! 2. **[`limits`]**: the [`ContextLimitResolver`] capability and a built-in
//!    model table honoring deployment aliases and explicit overrides.
//!
//! 3. **[`budget`]**: [`BudgetEnforcer`] drops the oldest messages, clamps
//!    oversized tool output (via [`clamp`]), and disables tool use when the
//!    remaining headroom falls inside the configured margin.
//!
//! 4. **[`audit`]**: the structured [`BudgetAudit`] describing every step the
//!    enforcer took, for logging and telemetry.

pub mod audit;
pub mod budget;
pub mod clamp;
pub mod limits;
pub mod tokens;

// Re-export commonly used items at the module level.
pub use audit::{BudgetAudit, ToolClampDelta, TruncationKind, TruncationStep};
pub use budget::{BudgetEnforcer, BudgetOutcome, TOOLS_DISABLED_ADVISORY, advisory_message};
pub use limits::{ContextLimitResolver, ModelContextTable};
pub use tokens::{CharRatioCounter, DEFAULT_CHARS_PER_TOKEN, TokenCounter};
