//! Tool-call plumbing that sits between the model and tool execution.
//!
//! - [`salvage`] recovers argument objects from imperfect model output.
//! - [`loop_state`] bounds how many calls a loop may make, and how often the
//!   same call may repeat.

pub mod loop_state;
pub mod salvage;

pub use loop_state::{LoopDecision, LoopLimits, ToolLoopAudit, ToolLoopState};
pub use salvage::{JsonSalvageAudit, SalvageOutcome, parse_arguments, parse_tool_call};
