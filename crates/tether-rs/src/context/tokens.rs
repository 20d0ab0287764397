//! Token counting capability.
//!
//! The budget enforcer never tokenizes text itself. Callers inject a
//! [`TokenCounter`]: a real tokenizer binding, a provider's counting
//! endpoint behind a cache, or the [`CharRatioCounter`] estimate shipped
//! here. Whatever the implementation, it must be pure: the same input must
//! always produce the same count.

use crate::Message;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Fixed framing cost per message (role marker, separators).
pub const TOKENS_PER_MESSAGE: usize = 3;

/// Fixed cost priming the assistant reply, added once per message list.
pub const REPLY_PRIMING_TOKENS: usize = 3;

/// Counts tokens for a model.
pub trait TokenCounter {
    /// Count tokens in a piece of text.
    fn count(&self, content: &str, model: &str) -> usize;

    /// Count tokens in a whole message list, including per-message framing
    /// and the tool calls carried by assistant messages.
    fn count_messages(&self, messages: &[Message], model: &str) -> usize {
        let body: usize = messages
            .iter()
            .map(|m| {
                let calls: usize = m
                    .tool_calls
                    .iter()
                    .flatten()
                    .map(|c| {
                        self.count(&c.function.name, model) + self.count(&c.function.arguments, model)
                    })
                    .sum();
                TOKENS_PER_MESSAGE + self.count(m.text(), model) + calls
            })
            .sum();
        body + REPLY_PRIMING_TOKENS
    }
}

impl<T: TokenCounter + ?Sized> TokenCounter for &T {
    fn count(&self, content: &str, model: &str) -> usize {
        (**self).count(content, model)
    }

    fn count_messages(&self, messages: &[Message], model: &str) -> usize {
        (**self).count_messages(messages, model)
    }
}

/// Estimates tokens from character counts.
///
/// Model-agnostic: the `model` argument is ignored. Pass a calibrated ratio
/// from historical API usage data via [`with_ratio`](Self::with_ratio) when
/// one is available.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioCounter {
    chars_per_token: f64,
}

impl CharRatioCounter {
    /// Create a counter with a custom chars-per-token ratio. Non-positive
    /// ratios fall back to the default.
    pub fn with_ratio(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    /// The ratio in use.
    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }
}

impl Default for CharRatioCounter {
    fn default() -> Self {
        Self::with_ratio(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenCounter for CharRatioCounter {
    fn count(&self, content: &str, _model: &str) -> usize {
        let chars = content.chars().count();
        (chars as f64 / self.chars_per_token).ceil() as usize
    }
}

/// A [`TokenCounter`] backed by a closure `(content, model) -> tokens`.
///
/// Message-list counting uses the trait's default framing.
///
/// ```
/// use tether_rs::context::tokens::{FnTokenCounter, TokenCounter};
///
/// let words = FnTokenCounter::new(|text: &str, _model: &str| text.split_whitespace().count());
/// assert_eq!(words.count("three little words", "any-model"), 3);
/// ```
pub struct FnTokenCounter<F> {
    f: F,
}

impl<F> FnTokenCounter<F>
where
    F: Fn(&str, &str) -> usize,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> TokenCounter for FnTokenCounter<F>
where
    F: Fn(&str, &str) -> usize,
{
    fn count(&self, content: &str, model: &str) -> usize {
        (self.f)(content, model)
    }
}
