//! Runtime configuration: budget knobs, loop caps, and model context maps.
//!
//! Everything has a sensible default, so [`TetherConfig::default()`] is a
//! complete configuration. [`TetherConfig::load()`] layers, in order of
//! increasing precedence:
//!
//! 1. built-in defaults,
//! 2. `~/.tether/config.toml`,
//! 3. `./.tether.toml`,
//! 4. `TETHER_*` environment variables.
//!
//! # Examples
//!
//! ```
//! use tether_rs::config::RuntimeKnobs;
//!
//! let knobs = RuntimeKnobs::default()
//!     .with_round_cap(8)
//!     .with_repeat_cap(3)
//!     .with_output_reserve(4096);
//! assert_eq!(knobs.tool_round_cap, 8);
//! ```
//!
//! A config file only needs the keys it changes:
//!
//! ```toml
//! [runtime]
//! tool_round_cap = 12
//! tool_disable_margin_tokens = 6000
//!
//! [context.deployment_to_base]
//! "o3-mini-dev" = "o3-mini"
//!
//! [context.context_overrides]
//! "gpt-4o-mini" = 64000
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Headroom (tokens) below which tool declarations are stripped.
pub const DEFAULT_TOOL_DISABLE_MARGIN_TOKENS: usize = 3_500;
/// Maximum tool-calling rounds per turn.
pub const DEFAULT_TOOL_ROUND_CAP: u32 = 20;
/// Maximum identical calls (same signature) per turn.
pub const DEFAULT_TOOL_REPEAT_CAP: u32 = 2;
/// Tokens reserved for the model's reply when the request sets none.
pub const DEFAULT_OUTPUT_RESERVE: usize = 1_024;
/// Character cap applied to tool results during the clamp phase.
pub const DEFAULT_TOOL_MESSAGE_CHAR_CAP: usize = 16_000;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "TETHER_";

/// Tunable limits for tool use and output reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeKnobs {
    /// Tools are disabled once `max_context - used <= margin`. Default: `3500`.
    pub tool_disable_margin_tokens: usize,
    /// Round cap per conversation turn. Default: `20`.
    pub tool_round_cap: u32,
    /// Repeat cap per call signature. Default: `2`.
    pub tool_repeat_cap: u32,
    /// Output reserve used when a request sets no `max_tokens`. Default: `1024`.
    pub output_reserve_tokens: usize,
    /// Tool result character cap for clamping. Default: `16000`.
    pub tool_message_char_cap: usize,
}

impl Default for RuntimeKnobs {
    fn default() -> Self {
        Self {
            tool_disable_margin_tokens: DEFAULT_TOOL_DISABLE_MARGIN_TOKENS,
            tool_round_cap: DEFAULT_TOOL_ROUND_CAP,
            tool_repeat_cap: DEFAULT_TOOL_REPEAT_CAP,
            output_reserve_tokens: DEFAULT_OUTPUT_RESERVE,
            tool_message_char_cap: DEFAULT_TOOL_MESSAGE_CHAR_CAP,
        }
    }
}

impl RuntimeKnobs {
    pub fn with_disable_margin(mut self, tokens: usize) -> Self {
        self.tool_disable_margin_tokens = tokens;
        self
    }

    pub fn with_round_cap(mut self, rounds: u32) -> Self {
        self.tool_round_cap = rounds;
        self
    }

    pub fn with_repeat_cap(mut self, repeats: u32) -> Self {
        self.tool_repeat_cap = repeats;
        self
    }

    pub fn with_output_reserve(mut self, tokens: usize) -> Self {
        self.output_reserve_tokens = tokens;
        self
    }

    pub fn with_tool_message_char_cap(mut self, chars: usize) -> Self {
        self.tool_message_char_cap = chars;
        self
    }
}

/// Deployment aliases and explicit context sizes.
///
/// `deployment_to_base` maps tenant-specific deployment names to the model
/// they serve, e.g. `"o3-mini-dev" → "o3-mini"`. `context_overrides` pins a
/// context size for a model or deployment, bypassing the built-in table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelContextOverrides {
    pub deployment_to_base: HashMap<String, String>,
    pub context_overrides: HashMap<String, usize>,
}

/// Top-level configuration bundle. Serializable so it can be handed across
/// process boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub runtime: RuntimeKnobs,
    pub context: ModelContextOverrides,
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid merged configuration: {0}")]
    Invalid(#[source] toml::de::Error),
    #[error("environment variable {name}={value:?} is not a valid non-negative integer")]
    InvalidEnv { name: String, value: String },
}

impl TetherConfig {
    /// Config files consulted by [`load`](Self::load), lowest precedence first.
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(2);
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".tether").join("config.toml"));
        }
        paths.push(PathBuf::from(".tether.toml"));
        paths
    }

    /// Load from the default file locations and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(&Self::default_paths(), |name| std::env::var(name).ok())
    }

    /// Load from explicit paths and an environment lookup. Missing files are
    /// skipped; later files override earlier ones key by key.
    pub fn load_with<P, E>(paths: &[P], env: E) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        E: Fn(&str) -> Option<String>,
    {
        let mut merged = toml::Value::Table(toml::Table::new());
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let layer: toml::Value = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            debug!("config: merged {}", path.display());
            merge_toml_value(&mut merged, layer);
        }

        let mut config: TetherConfig = merged.try_into().map_err(ConfigError::Invalid)?;
        config.runtime.apply_env(env)?;
        Ok(config)
    }
}

impl RuntimeKnobs {
    /// Apply `TETHER_*` overrides from an environment lookup.
    fn apply_env<E>(&mut self, env: E) -> Result<(), ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| -> Result<Option<u64>, ConfigError> {
            let name = format!("{ENV_PREFIX}{key}");
            match env(&name) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidEnv { name, value }),
            }
        };

        if let Some(v) = lookup("TOOL_DISABLE_MARGIN_TOKENS")? {
            self.tool_disable_margin_tokens = clamp_usize(v);
        }
        if let Some(v) = lookup("TOOL_ROUND_CAP")? {
            self.tool_round_cap = clamp_u32(v);
        }
        if let Some(v) = lookup("TOOL_REPEAT_CAP")? {
            self.tool_repeat_cap = clamp_u32(v);
        }
        if let Some(v) = lookup("OUTPUT_RESERVE_TOKENS")? {
            self.output_reserve_tokens = clamp_usize(v);
        }
        if let Some(v) = lookup("TOOL_MESSAGE_CHAR_CAP")? {
            self.tool_message_char_cap = clamp_usize(v);
        }
        Ok(())
    }
}

fn clamp_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

fn clamp_usize(v: u64) -> usize {
    usize::try_from(v).unwrap_or(usize::MAX)
}

/// Recursively merge `overlay` into `base`; tables merge key by key, any
/// other value replaces.
fn merge_toml_value(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_toml_value(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
