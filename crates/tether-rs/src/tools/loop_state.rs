//! Bounds on the tool-calling loop.
//!
//! A model stuck in a loop tends to call the same tool with the same
//! arguments again and again, or just never stops calling tools. The loop
//! driver records each executed call here and asks [`ToolLoopState::check`]
//! before running the next one.
//!
//! Calls are keyed by a canonical signature: the tool name plus its
//! arguments serialized with sorted keys and no whitespace, so
//! `{"b":1,"a":2}` and `{ "a": 2, "b": 1 }` are the same call.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RuntimeKnobs;

/// Per-conversation loop counters. One instance per conversation; not
/// meant to be shared across threads.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolLoopState {
    /// Tool calls recorded so far.
    pub rounds: u32,
    /// Signature to number of times it was recorded.
    #[serde(default)]
    pub sig_counts: BTreeMap<String, u32>,
}

/// The caps a loop is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub round_cap: u32,
    pub repeat_cap: u32,
}

impl From<&RuntimeKnobs> for LoopLimits {
    fn from(knobs: &RuntimeKnobs) -> Self {
        Self {
            round_cap: knobs.tool_round_cap,
            repeat_cap: knobs.tool_repeat_cap,
        }
    }
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self::from(&RuntimeKnobs::default())
    }
}

/// What the loop driver should do with the next call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopDecision {
    Continue,
    RoundCapReached { rounds: u32, cap: u32 },
    RepeatedCall { signature: String, count: u32, cap: u32 },
}

impl LoopDecision {
    pub fn should_stop(&self) -> bool {
        !matches!(self, LoopDecision::Continue)
    }
}

/// Snapshot of loop counters and the caps in force, for telemetry.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct ToolLoopAudit {
    pub rounds: u32,
    pub round_cap: u32,
    pub repeat_cap: u32,
    pub sig_counts: BTreeMap<String, u32>,
}

impl ToolLoopState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one executed call: bumps the round counter and the count for
    /// `signature`.
    pub fn record(&mut self, signature: &str) {
        self.rounds = self.rounds.saturating_add(1);
        let count = self.sig_counts.entry(signature.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        debug!("loop: round {} recorded {signature} (x{count})", self.rounds);
    }

    /// Record a call by name and arguments. Returns the signature used.
    pub fn record_call(&mut self, name: &str, args: &Value) -> String {
        let sig = Self::signature(name, args);
        self.record(&sig);
        sig
    }

    pub fn is_over_round_cap(&self, cap: u32) -> bool {
        self.rounds >= cap
    }

    /// Whether `signature` has already been recorded `cap` or more times.
    pub fn is_repeated(&self, signature: &str, cap: u32) -> bool {
        self.count(signature) >= cap
    }

    pub fn count(&self, signature: &str) -> u32 {
        self.sig_counts.get(signature).copied().unwrap_or(0)
    }

    /// Check the next call against `limits`. The round cap wins when both
    /// are hit.
    pub fn check(&self, signature: &str, limits: &LoopLimits) -> LoopDecision {
        if self.is_over_round_cap(limits.round_cap) {
            warn!("loop: round cap {} reached", limits.round_cap);
            return LoopDecision::RoundCapReached {
                rounds: self.rounds,
                cap: limits.round_cap,
            };
        }
        if self.is_repeated(signature, limits.repeat_cap) {
            warn!(
                "loop: {signature} already called {} times (cap {})",
                self.count(signature),
                limits.repeat_cap
            );
            return LoopDecision::RepeatedCall {
                signature: signature.to_string(),
                count: self.count(signature),
                cap: limits.repeat_cap,
            };
        }
        LoopDecision::Continue
    }

    pub fn audit(&self, limits: &LoopLimits) -> ToolLoopAudit {
        ToolLoopAudit {
            rounds: self.rounds,
            round_cap: limits.round_cap,
            repeat_cap: limits.repeat_cap,
            sig_counts: self.sig_counts.clone(),
        }
    }

    /// Canonical signature of a call: `name:` followed by the arguments as
    /// compact JSON with object keys sorted at every level. Integral floats
    /// render as integers, so `10`, `10.0` and `1e1` agree.
    pub fn signature(name: &str, args: &Value) -> String {
        let body = serde_json::to_string(&canonicalize(args)).unwrap_or_default();
        format!("{name}:{body}")
    }
}

/// Largest magnitude below which every integer is exactly representable as
/// an `f64` (2^53).
const MAX_EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

/// Rebuild `value` with sorted object keys and normalized numbers. Keys are
/// inserted in order so the result stays sorted even with `preserve_order`.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(n) => canonical_number(n),
        other => other.clone(),
    }
}

fn canonical_number(n: &serde_json::Number) -> Value {
    if n.is_i64() || n.is_u64() {
        return Value::Number(n.clone());
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() <= MAX_EXACT_F64_INT => {
            // Exact: |f| <= 2^53 and integral.
            Value::from(f as i64)
        }
        _ => Value::Number(n.clone()),
    }
}
