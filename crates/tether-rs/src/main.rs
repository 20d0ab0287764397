//! Inspect what the tether guard rails would do to real payloads.
//!
//! Runtime knobs come from `~/.tether/config.toml`, `./.tether.toml`, and
//! `TETHER_*` environment variables.
//!
//! # Examples
//!
//! ```sh
//! # Repair raw tool-call arguments from stdin
//! echo '```json {"path": "src/main.rs",} ```' | tether salvage --fn-name read_file
//!
//! # Fit a conversation into a model's context window
//! tether -v enforce --messages convo.json --model gpt-4o --tools tools.json
//!
//! # Canonical loop signature of a call
//! tether signature --tool grep --args '{"pattern": "todo", "path": "."}'
//!
//! # JSON Schemas of the audit records
//! tether schema
//! ```

use std::io::{self, Read};
use std::process;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tether_rs::config::TetherConfig;
use tether_rs::context::{BudgetAudit, BudgetEnforcer, CharRatioCounter, ModelContextTable};
use tether_rs::plan::PlanItem;
use tether_rs::tools::{
    JsonSalvageAudit, SalvageOutcome, ToolLoopAudit, ToolLoopState, parse_arguments,
};
use tether_rs::{Message, ToolDef};
use tracing::Level;

/// Inspect what the tether guard rails would do to real payloads.
#[derive(Parser)]
#[command(name = "tether", version)]
struct Cli {
    /// Log verbosity on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Salvage tool-call arguments and print them with the audit
    Salvage {
        /// Read the raw arguments from this file instead of stdin
        #[arg(long)]
        file: Option<String>,

        /// Tool name to record in the audit
        #[arg(long)]
        fn_name: Option<String>,
    },

    /// Enforce the context budget on a message list
    Enforce {
        /// JSON file holding an array of chat messages
        #[arg(long)]
        messages: String,

        /// Model id used to resolve the context window
        #[arg(long)]
        model: String,

        /// JSON file holding an array of tool definitions
        #[arg(long)]
        tools: Option<String>,

        /// Requested completion size (defaults to the configured reserve)
        #[arg(long)]
        max_tokens: Option<u32>,
    },

    /// Print the canonical loop signature of a tool call
    Signature {
        /// Tool name
        #[arg(long)]
        tool: String,

        /// Arguments as JSON (salvaged if malformed)
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Print JSON Schemas of the audit and plan records
    Schema,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Salvage { file, fn_name } => run_salvage(file.as_deref(), fn_name.as_deref()),
        Command::Enforce {
            messages,
            model,
            tools,
            max_tokens,
        } => run_enforce(&messages, &model, tools.as_deref(), max_tokens),
        Command::Signature { tool, args } => run_signature(&tool, &args).map(Value::String),
        Command::Schema => run_schema(),
    };

    let value = match result {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let rendered = match &value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    println!("{rendered}");
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn read_input(file: Option<&str>) -> Result<String, String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read '{path}': {e}")),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(buf)
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, String> {
    let content = read_input(Some(path))?;
    serde_json::from_str(&content).map_err(|e| format!("failed to parse '{path}': {e}"))
}

fn run_salvage(file: Option<&str>, fn_name: Option<&str>) -> Result<Value, String> {
    let raw = read_input(file)?;
    // Shells append a newline to piped input; it is not part of the payload.
    let raw = raw.strip_suffix('\n').unwrap_or(&raw);
    let (arguments, audit) = parse_arguments(Some(raw), fn_name);
    Ok(json!({ "arguments": arguments, "audit": audit }))
}

fn run_enforce(
    messages_path: &str,
    model: &str,
    tools_path: Option<&str>,
    max_tokens: Option<u32>,
) -> Result<Value, String> {
    let config = TetherConfig::load().map_err(|e| e.to_string())?;
    let messages: Vec<Message> = read_json(messages_path)?;
    Message::validate_sequence(&messages).map_err(|e| e.to_string())?;
    let tools: Option<Vec<ToolDef>> = tools_path.map(read_json::<Vec<ToolDef>>).transpose()?;

    let limits = ModelContextTable::from_overrides(&config.context);
    let enforcer = BudgetEnforcer::new(CharRatioCounter::default(), limits, config.runtime);
    let outcome = enforcer.enforce(model, &messages, tools.as_deref(), max_tokens);

    Ok(json!({
        "messages": outcome.messages,
        "tools": outcome.tools,
        "audit": outcome.audit.stamp(),
    }))
}

fn run_signature(tool: &str, args: &str) -> Result<String, String> {
    let (map, audit) = parse_arguments(Some(args), Some(tool));
    if audit.outcome == SalvageOutcome::Failed {
        let reason = audit.error.unwrap_or_default();
        return Err(format!("unusable arguments for '{tool}': {reason}"));
    }
    Ok(ToolLoopState::signature(tool, &Value::Object(map)))
}

fn run_schema() -> Result<Value, String> {
    let schemas = json!({
        "BudgetAudit": schemars::schema_for!(BudgetAudit),
        "JsonSalvageAudit": schemars::schema_for!(JsonSalvageAudit),
        "ToolLoopState": schemars::schema_for!(ToolLoopState),
        "ToolLoopAudit": schemars::schema_for!(ToolLoopAudit),
        "PlanItem": schemars::schema_for!(PlanItem),
    });
    Ok(schemas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_of_repairable_args() {
        let sig = run_signature("grep", "{\"pattern\": \"todo\",}").unwrap();
        assert_eq!(sig, "grep:{\"pattern\":\"todo\"}");
    }

    #[test]
    fn signature_of_empty_args() {
        assert_eq!(run_signature("ls", "{}").unwrap(), "ls:{}");
        assert_eq!(run_signature("ls", "").unwrap(), "ls:{}");
    }

    #[test]
    fn signature_rejects_unusable_args() {
        let err = run_signature("grep", "this is not json").unwrap_err();
        assert!(err.contains("grep"));
        assert!(err.len() > "unusable arguments for 'grep': ".len());
    }
}
