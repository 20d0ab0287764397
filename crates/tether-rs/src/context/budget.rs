//! Context budget enforcement: keeps each outgoing request inside the
//! model's context window.
//!
//! Before every model call the orchestrator hands the pending message list
//! to [`BudgetEnforcer::enforce`]. The enforcer works in three phases, each
//! recorded as a [`TruncationStep`] in the returned [`BudgetAudit`]:
//!
//! 1. **Drop**: remove the oldest non-system messages, one at a time, until
//!    the list fits. The system message and the most recent message always
//!    survive.
//! 2. **Clamp**: if dropping was not enough, cut oversized tool results down
//!    to the configured character cap, keeping head and tail.
//! 3. **Disable tools**: when the remaining headroom is inside the configured
//!    margin, strip the tool declarations and tell the model to answer
//!    directly. This runs whether or not anything was truncated.
//!
//! Enforcement never fails. An unknown model degrades to a zero-valued audit
//! and the request passes through untouched, so a budgeting problem can never
//! block the conversation.
//!
//! # Example
//!
//! ```
//! use tether_rs::prelude::*;
//!
//! let limits = ModelContextTable::new().with_override("tiny-model", 64);
//! let enforcer = BudgetEnforcer::new(
//!     CharRatioCounter::with_ratio(1.0),
//!     limits,
//!     RuntimeKnobs::default().with_output_reserve(8).with_disable_margin(0),
//! );
//!
//! let messages = vec![
//!     Message::system("sys"),
//!     Message::user("an old question that no longer matters"),
//!     Message::user("latest"),
//! ];
//! let outcome = enforcer.enforce("tiny-model", &messages, None, None);
//! assert_eq!(outcome.messages.len(), 2);
//! assert_eq!(outcome.audit.removed_messages(), 1);
//! ```

use tracing::{debug, info, warn};

use crate::config::RuntimeKnobs;
use crate::context::audit::{BudgetAudit, ToolClampDelta, TruncationKind, TruncationStep};
use crate::context::clamp::clamp_content;
use crate::context::limits::ContextLimitResolver;
use crate::context::tokens::TokenCounter;
use crate::{ChatRequest, Message, MessageRole, ToolDef};

/// Text of the assistant message appended when tools are disabled.
pub const TOOLS_DISABLED_ADVISORY: &str =
    "Tooling disabled due to low remaining context. Please answer directly without calling tools.";

/// The synthetic assistant message appended when tools are disabled.
pub fn advisory_message() -> Message {
    Message::assistant_text(TOOLS_DISABLED_ADVISORY)
}

/// Result of one enforcement call.
#[derive(Debug, Clone)]
pub struct BudgetOutcome {
    /// Messages to send, after dropping, clamping, and the optional advisory.
    pub messages: Vec<Message>,
    /// Tool declarations to send; `None` when tools were disabled or none
    /// were supplied.
    pub tools: Option<Vec<ToolDef>>,
    pub audit: BudgetAudit,
}

/// Enforces the context budget for a model.
///
/// Generic over its capabilities so callers can pass owned values or
/// borrow long-lived ones (`&MyTokenizer`).
#[derive(Debug, Clone)]
pub struct BudgetEnforcer<C, R> {
    counter: C,
    limits: R,
    knobs: RuntimeKnobs,
}

impl<C, R> BudgetEnforcer<C, R>
where
    C: TokenCounter,
    R: ContextLimitResolver,
{
    pub fn new(counter: C, limits: R, knobs: RuntimeKnobs) -> Self {
        Self {
            counter,
            limits,
            knobs,
        }
    }

    /// The knobs this enforcer was built with.
    pub fn knobs(&self) -> &RuntimeKnobs {
        &self.knobs
    }

    /// Enforce the budget on a message list and optional tool declarations.
    ///
    /// `requested_output_tokens` is the request's `max_tokens`; `None` or
    /// zero falls back to [`RuntimeKnobs::output_reserve_tokens`].
    pub fn enforce(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[ToolDef]>,
        requested_output_tokens: Option<u32>,
    ) -> BudgetOutcome {
        let max_context = match self.resolve_limit(model) {
            Some(limit) => limit,
            None => {
                warn!("budget: no context limit for model {model:?}; skipping enforcement");
                return BudgetOutcome {
                    messages: messages.to_vec(),
                    tools: tools.map(<[ToolDef]>::to_vec),
                    audit: BudgetAudit::noop(model),
                };
            }
        };

        let output_reserve = match requested_output_tokens {
            Some(n) if n > 0 => n as usize,
            _ => self.knobs.output_reserve_tokens,
        };
        let budget = max_context.saturating_sub(output_reserve);

        let mut working = messages.to_vec();
        let total_before = self.count(&working, model);
        let mut total = total_before;
        let mut steps = Vec::new();

        if total > budget {
            if let Some(step) = self.drop_phase(&mut working, model, budget, &mut total) {
                steps.push(step);
            }
            if total > budget
                && let Some(step) = self.clamp_phase(&mut working, model, budget, &mut total)
            {
                steps.push(step);
            }
        }

        let mut out_tools = tools.map(<[ToolDef]>::to_vec);
        let tools_requested = tools.is_some_and(|t| !t.is_empty());
        let headroom = max_context.saturating_sub(total);
        let margin = self.knobs.tool_disable_margin_tokens;
        let tools_disabled = tools_requested && headroom <= margin;
        if tools_disabled {
            debug!("budget: headroom {headroom} <= margin {margin}; disabling tools");
            out_tools = None;
            working.push(advisory_message());
            steps.push(TruncationStep::new(TruncationKind::DisableTools).with_note(format!(
                "Remaining context within {margin} tokens of limit; tools removed."
            )));
        }

        let total_after = self.count(&working, model);
        let audit = BudgetAudit {
            model: model.to_string(),
            max_context,
            output_reserve,
            total_tokens_before: total_before,
            total_tokens_after: total_after,
            budget_tokens: budget,
            steps,
            tools_disabled,
            recorded_at: None,
        };

        if audit.truncated() {
            info!("{}", audit.to_log_string());
        } else {
            debug!("{}", audit.to_log_string());
        }

        BudgetOutcome {
            messages: working,
            tools: out_tools,
            audit,
        }
    }

    /// Enforce the budget on a request in place.
    ///
    /// Uses the request's `max_tokens` as the output reserve. When tools are
    /// disabled, both `tools` and `parallel_tool_calls` are removed.
    pub fn enforce_request(&self, request: &mut ChatRequest) -> BudgetAudit {
        let outcome = self.enforce(
            &request.model,
            &request.messages,
            request.tools.as_deref(),
            Some(request.max_tokens),
        );
        request.messages = outcome.messages;
        if outcome.audit.tools_disabled {
            request.tools = None;
            request.parallel_tool_calls = None;
        }
        outcome.audit
    }

    fn resolve_limit(&self, model: &str) -> Option<usize> {
        if model.trim().is_empty() {
            return None;
        }
        self.limits.context_limit(model).filter(|&limit| limit > 0)
    }

    fn count(&self, messages: &[Message], model: &str) -> usize {
        self.counter.count_messages(messages, model)
    }

    /// Remove the oldest droppable message until the list fits or only the
    /// system message and the most recent message remain.
    fn drop_phase(
        &self,
        working: &mut Vec<Message>,
        model: &str,
        budget: usize,
        total: &mut usize,
    ) -> Option<TruncationStep> {
        let start = *total;
        let mut removed = 0;

        while *total > budget {
            let last = working.len().saturating_sub(1);
            let Some(idx) = working
                .iter()
                .enumerate()
                .position(|(i, m)| i != last && m.role != MessageRole::System)
            else {
                break;
            };
            working.remove(idx);
            removed += 1;
            *total = self.count(working, model);
        }

        if removed == 0 {
            return None;
        }
        debug!("budget: dropped {removed} message(s), {start} -> {total} tokens");
        let mut step = TruncationStep::new(TruncationKind::DropOldMessages).with_note(
            "System message kept; oldest user/assistant/tool messages dropped first.",
        );
        step.removed_messages = removed;
        step.tokens_saved = start.saturating_sub(*total);
        Some(step)
    }

    /// Clamp tool results, oldest first, until the list fits.
    fn clamp_phase(
        &self,
        working: &mut [Message],
        model: &str,
        budget: usize,
        total: &mut usize,
    ) -> Option<TruncationStep> {
        let start = *total;
        let cap = self.knobs.tool_message_char_cap;
        let mut deltas = Vec::new();

        for idx in 0..working.len() {
            if *total <= budget {
                break;
            }
            if working[idx].role != MessageRole::Tool {
                continue;
            }
            let Some(content) = working[idx].content.as_deref() else {
                continue;
            };
            let Some(clamped) = clamp_content(content, cap) else {
                continue;
            };
            let before_tokens = self.counter.count(content, model);
            let after_tokens = self.counter.count(&clamped, model);
            if after_tokens >= before_tokens {
                continue;
            }
            working[idx].content = Some(clamped);
            deltas.push(ToolClampDelta {
                message_index: idx,
                before_tokens,
                after_tokens,
            });
            *total = self.count(working, model);
        }

        if deltas.is_empty() {
            return None;
        }
        debug!(
            "budget: clamped {} tool message(s) to {cap} chars, {start} -> {total} tokens",
            deltas.len()
        );
        let mut step = TruncationStep::new(TruncationKind::ClampToolMessage)
            .with_note(format!("Tool outputs clamped to {cap} characters (head and tail kept)."));
        step.tokens_saved = start.saturating_sub(*total);
        step.tool_clamps = deltas;
        Some(step)
    }
}
