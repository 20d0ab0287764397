//! Context window lookup by model name.

use std::collections::HashMap;

use crate::config::ModelContextOverrides;

/// Resolves a model identifier (or deployment alias) to its maximum context
/// size in tokens. `None` means the model is unknown.
pub trait ContextLimitResolver {
    fn context_limit(&self, model: &str) -> Option<usize>;
}

impl<T: ContextLimitResolver + ?Sized> ContextLimitResolver for &T {
    fn context_limit(&self, model: &str) -> Option<usize> {
        (**self).context_limit(model)
    }
}

/// Friendly names users pass on the command line or in config files.
const FRIENDLY_ALIASES: &[(&str, &str)] = &[
    ("fast", "gpt-4o-mini"),
    ("cheap", "gpt-4o-mini"),
    ("4o-mini", "gpt-4o-mini"),
    ("4o", "gpt-4o"),
    ("sonnet", "claude-3-5-sonnet-20240620"),
    ("claude-sonnet", "claude-3-5-sonnet-20240620"),
    ("gemini-pro", "gemini-1.5-pro"),
];

/// Map a friendly alias to its model id. Unknown names are returned trimmed
/// and otherwise untouched; empty names yield `None`.
pub fn canonicalize_model(name: &str) -> Option<String> {
    let key = name.trim();
    if key.is_empty() {
        return None;
    }
    let lower = key.to_lowercase();
    let alias = FRIENDLY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, model)| (*model).to_string());
    Some(alias.unwrap_or_else(|| key.to_string()))
}

/// Lookup the built-in context size for a model family.
///
/// Matches on the model name segment (after the last `/` in paths like
/// `"anthropic/claude-sonnet-4"`) so org prefixes don't affect the result.
pub fn builtin_context_limit(model: &str) -> Option<usize> {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();

    // Order matters: more specific families first.
    if name.starts_with("gpt-4.1") {
        Some(1_047_576)
    } else if name.starts_with("gpt-5") {
        Some(400_000)
    } else if name.starts_with("gpt-4o") || name.starts_with("gpt-4-turbo") {
        Some(128_000)
    } else if name.starts_with("gpt-4-32k") {
        Some(32_768)
    } else if name.starts_with("gpt-4") {
        Some(8_192)
    } else if name.starts_with("gpt-3.5-turbo") {
        Some(16_385)
    } else if name.starts_with("o1-mini") {
        Some(128_000)
    } else if name.starts_with("o1") || name.starts_with("o3") || name.starts_with("o4") {
        Some(200_000)
    } else if name.contains("claude") {
        Some(200_000)
    } else if name.starts_with("gemini-1.5-pro") {
        Some(2_097_152)
    } else if name.starts_with("gemini") {
        Some(1_048_576)
    } else if name.contains("deepseek") || name.contains("llama") || name.starts_with("glm") {
        Some(128_000)
    } else if name.starts_with("mistral-large") {
        Some(128_000)
    } else if name.starts_with("mistral") {
        Some(32_000)
    } else {
        None
    }
}

/// Default [`ContextLimitResolver`]: deployment aliases, explicit overrides,
/// then the built-in family table.
///
/// Resolution order for a model `m`:
/// 1. friendly alias (`"4o-mini"` → `"gpt-4o-mini"`),
/// 2. explicit override for `m`,
/// 3. deployment map `m` → base model, then an explicit override for the base,
/// 4. built-in table for the base.
#[derive(Debug, Clone, Default)]
pub struct ModelContextTable {
    deployment_to_base: HashMap<String, String>,
    context_overrides: HashMap<String, usize>,
}

impl ModelContextTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from the configured alias and override maps.
    pub fn from_overrides(overrides: &ModelContextOverrides) -> Self {
        Self {
            deployment_to_base: overrides.deployment_to_base.clone(),
            context_overrides: overrides.context_overrides.clone(),
        }
    }

    /// Map a deployment name to its base model.
    pub fn with_deployment(mut self, deployment: impl Into<String>, base: impl Into<String>) -> Self {
        self.deployment_to_base.insert(deployment.into(), base.into());
        self
    }

    /// Pin an explicit context size for a model or deployment.
    pub fn with_override(mut self, model: impl Into<String>, tokens: usize) -> Self {
        self.context_overrides.insert(model.into(), tokens);
        self
    }

    /// The base model a name resolves to after alias and deployment mapping.
    pub fn base_model(&self, model: &str) -> Option<String> {
        let model = canonicalize_model(model)?;
        Some(
            self.deployment_to_base
                .get(&model)
                .cloned()
                .unwrap_or(model),
        )
    }
}

impl ContextLimitResolver for ModelContextTable {
    fn context_limit(&self, model: &str) -> Option<usize> {
        let model = canonicalize_model(model)?;
        if let Some(&tokens) = self.context_overrides.get(&model) {
            return Some(tokens);
        }
        let base = self.deployment_to_base.get(&model).unwrap_or(&model);
        if let Some(&tokens) = self.context_overrides.get(base) {
            return Some(tokens);
        }
        builtin_context_limit(base)
    }
}
