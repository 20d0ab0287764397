//! Tool-call argument salvage.
//!
//! Models regularly emit arguments that are almost JSON: wrapped in a
//! markdown fence, carrying a trailing comma, cut off before the closing
//! braces, or with every quote escaped. [`parse_arguments`] recovers a
//! key/value mapping from such strings without guessing at content: it only
//! strips fences, removes trailing commas, collapses stray escaped quotes,
//! and restores bracket balance. Anything else is reported as a failure in
//! the returned [`JsonSalvageAudit`].
//!
//! The function is total: it never panics and never returns an error, so a
//! malformed tool call becomes a tool-execution error the model can see
//! rather than a crashed loop.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::ToolCall;

/// How a salvage attempt ended.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SalvageOutcome {
    Ok,
    Empty,
    Failed,
}

/// Diagnostic record of one salvage attempt. Lengths are in characters.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct JsonSalvageAudit {
    /// Name of the tool whose arguments were parsed, when known.
    pub source_function_name: Option<String>,
    pub outcome: SalvageOutcome,
    /// Parser error message for failed attempts.
    pub error: Option<String>,
    pub len_original: usize,
    /// Length after trimming and fence removal.
    pub len_cleaned: usize,
    /// Length of the final string handed to the parser.
    pub len_candidate: usize,
}

impl JsonSalvageAudit {
    fn new(fn_name: Option<&str>, outcome: SalvageOutcome) -> Self {
        Self {
            source_function_name: fn_name.map(str::to_string),
            outcome,
            error: None,
            len_original: 0,
            len_cleaned: 0,
            len_candidate: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == SalvageOutcome::Ok
    }
}

/// Parse a raw argument string into a JSON object, repairing common model
/// output artifacts when a direct parse fails.
///
/// ```
/// use tether_rs::tools::salvage::{parse_arguments, SalvageOutcome};
///
/// let (args, audit) = parse_arguments(Some(r#"{"a": {"b": 1"#), Some("lookup"));
/// assert_eq!(audit.outcome, SalvageOutcome::Ok);
/// assert_eq!(args["a"]["b"], 1);
///
/// let (args, audit) = parse_arguments(None, None);
/// assert!(args.is_empty());
/// assert_eq!(audit.outcome, SalvageOutcome::Empty);
/// ```
pub fn parse_arguments(raw: Option<&str>, fn_name: Option<&str>) -> (Map<String, Value>, JsonSalvageAudit) {
    let raw = match raw {
        Some(s) if !s.is_empty() => s,
        _ => return (Map::new(), JsonSalvageAudit::new(fn_name, SalvageOutcome::Empty)),
    };
    let len_original = raw.chars().count();

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        let mut audit = JsonSalvageAudit::new(fn_name, SalvageOutcome::Ok);
        audit.len_original = len_original;
        audit.len_cleaned = len_original;
        audit.len_candidate = len_original;
        return (map, audit);
    }

    let cleaned = strip_code_fence(raw);
    let repair = repair_candidate(cleaned);

    let mut audit = JsonSalvageAudit::new(fn_name, SalvageOutcome::Ok);
    audit.len_original = len_original;
    audit.len_cleaned = cleaned.chars().count();
    audit.len_candidate = repair.text.chars().count();

    let error = match serde_json::from_str::<Value>(&repair.text) {
        Ok(Value::Object(map)) => {
            debug!(
                "salvage{}: repaired arguments ({} closer(s) appended, {} trailing comma(s), {} escaped quote(s))",
                label(fn_name),
                repair.closers_appended,
                repair.commas_removed,
                repair.quotes_collapsed,
            );
            return (map, audit);
        }
        Ok(other) => format!("arguments must be a JSON object, got {}", json_kind(&other)),
        Err(e) => e.to_string(),
    };

    warn!("salvage{}: unrecoverable arguments: {error}", label(fn_name));
    audit.outcome = SalvageOutcome::Failed;
    audit.error = Some(error);
    (Map::new(), audit)
}

/// Salvage the arguments of a model-issued tool call.
pub fn parse_tool_call(call: &ToolCall) -> (Map<String, Value>, JsonSalvageAudit) {
    parse_arguments(Some(&call.function.arguments), Some(&call.function.name))
}

fn label(fn_name: Option<&str>) -> String {
    fn_name.map(|n| format!("[{n}]")).unwrap_or_default()
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Trim and remove an enclosing markdown code fence with an optional
/// language tag. Input that isn't entirely fenced is only trimmed.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return trimmed;
    };

    let tag_len: usize = inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        .map(char::len_utf8)
        .sum();
    let after_tag = inner.get(tag_len..).unwrap_or(inner);
    let tag_ends_cleanly = after_tag.is_empty()
        || after_tag.starts_with(|c: char| c.is_whitespace() || c == '{' || c == '[');
    if tag_len > 0 && tag_ends_cleanly {
        after_tag.trim()
    } else {
        inner.trim()
    }
}

/// The string handed to the final parse, plus what the repair did.
#[derive(Debug, Default, PartialEq, Eq)]
struct Repair {
    text: String,
    closers_appended: usize,
    commas_removed: usize,
    quotes_collapsed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lex {
    Outside,
    /// Inside a string literal. `escaped_delims` marks a string opened by a
    /// stray `\"`, which is closed by the next `\"` as well.
    Str { escaped_delims: bool, escape: bool },
}

/// Extract the first top-level JSON structure from `cleaned` and repair it
/// in a single pass.
///
/// Tracks string literals (honoring escapes) and a stack of expected
/// closers. Text before the first opener is skipped; scanning stops at the
/// closer that balances it. Along the way, trailing commas before a closer
/// are dropped and backslash runs in front of a quote outside a string
/// collapse to a bare quote. If input ends with the structure still open,
/// the pending closers are appended innermost first, provided the structure
/// holds some content: a dangling `{` is never turned into `{}`.
fn repair_candidate(cleaned: &str) -> Repair {
    let chars: Vec<char> = cleaned.chars().collect();
    let mut repair = Repair::default();
    let mut stack: Vec<char> = Vec::new();
    let mut lex = Lex::Outside;
    let mut started = false;
    let mut balanced = false;
    let mut has_content = false;
    // Whitespace after a held-back comma; `Some` while a comma is held.
    let mut held_comma: Option<String> = None;

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        match lex {
            Lex::Str {
                escaped_delims,
                escape,
            } => {
                if escape {
                    repair.emit(started, ch);
                    lex = Lex::Str {
                        escaped_delims,
                        escape: false,
                    };
                } else if ch == '\\' {
                    if escaped_delims && let Some(next) = escaped_quote_end(&chars, i) {
                        repair.emit(started, '"');
                        repair.quotes_collapsed += usize::from(started);
                        lex = Lex::Outside;
                        i = next;
                        continue;
                    }
                    repair.emit(started, ch);
                    lex = Lex::Str {
                        escaped_delims,
                        escape: true,
                    };
                } else {
                    repair.emit(started, ch);
                    if ch == '"' {
                        lex = Lex::Outside;
                    }
                }
            }
            Lex::Outside => {
                if ch.is_whitespace() {
                    match held_comma.as_mut() {
                        Some(ws) => ws.push(ch),
                        None => repair.emit(started, ch),
                    }
                    i += 1;
                    continue;
                }

                if let Some(ws) = held_comma.take() {
                    if ch == '}' || ch == ']' {
                        repair.commas_removed += 1;
                    } else {
                        repair.text.push(',');
                    }
                    repair.text.push_str(&ws);
                }

                match ch {
                    '{' | '[' => {
                        started = true;
                        stack.push(if ch == '{' { '}' } else { ']' });
                        repair.emit(started, ch);
                    }
                    '}' | ']' => {
                        repair.emit(started, ch);
                        if stack.last() == Some(&ch) {
                            stack.pop();
                            if started && stack.is_empty() {
                                balanced = true;
                                break;
                            }
                        }
                    }
                    ',' if started => {
                        has_content = true;
                        held_comma = Some(String::new());
                    }
                    '\\' => {
                        if let Some(next) = escaped_quote_end(&chars, i) {
                            repair.emit(started, '"');
                            repair.quotes_collapsed += usize::from(started);
                            has_content |= started;
                            lex = Lex::Str {
                                escaped_delims: true,
                                escape: false,
                            };
                            i = next;
                            continue;
                        }
                        has_content |= started;
                        repair.emit(started, ch);
                    }
                    '"' => {
                        has_content |= started;
                        repair.emit(started, ch);
                        lex = Lex::Str {
                            escaped_delims: false,
                            escape: false,
                        };
                    }
                    _ => {
                        has_content |= started;
                        repair.emit(started, ch);
                    }
                }
            }
        }
        i += 1;
    }

    if !started {
        return Repair {
            text: cleaned.to_string(),
            ..Repair::default()
        };
    }

    if !balanced {
        if held_comma.take().is_some() {
            repair.commas_removed += 1;
        }
        if has_content {
            for closer in stack.iter().rev() {
                repair.text.push(*closer);
                repair.closers_appended += 1;
            }
        }
    }
    repair
}

impl Repair {
    fn emit(&mut self, started: bool, ch: char) {
        if started {
            self.text.push(ch);
        }
    }
}

/// If `chars[at..]` is one or more backslashes followed by a quote, the
/// index just past the quote.
fn escaped_quote_end(chars: &[char], at: usize) -> Option<usize> {
    let mut j = at;
    while j < chars.len() && chars[j] == '\\' {
        j += 1;
    }
    (j > at && j < chars.len() && chars[j] == '"').then_some(j + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: &str) -> (Value, JsonSalvageAudit) {
        let (map, audit) = parse_arguments(Some(raw), None);
        (Value::Object(map), audit)
    }

    #[test]
    fn none_and_empty_are_empty() {
        let (map, audit) = parse_arguments(None, None);
        assert!(map.is_empty());
        assert_eq!(audit.outcome, SalvageOutcome::Empty);
        assert_eq!(audit.len_original, 0);

        let (map, audit) = parse_arguments(Some(""), Some("ls"));
        assert!(map.is_empty());
        assert_eq!(audit.outcome, SalvageOutcome::Empty);
        assert_eq!(audit.source_function_name.as_deref(), Some("ls"));
    }

    #[test]
    fn fast_path_reports_equal_lengths() {
        let (value, audit) = parse(r#"{"a":1}"#);
        assert_eq!(value, json!({"a": 1}));
        assert_eq!(audit.outcome, SalvageOutcome::Ok);
        assert_eq!(audit.len_original, 7);
        assert_eq!(audit.len_cleaned, 7);
        assert_eq!(audit.len_candidate, 7);
        assert!(audit.error.is_none());
    }

    #[test]
    fn fenced_with_trailing_comma() {
        let (value, audit) = parse("```json\n{\"a\":1,}\n```");
        assert_eq!(value, json!({"a": 1}));
        assert!(audit.is_ok());
        assert_eq!(audit.len_cleaned, 8);
        assert_eq!(audit.len_candidate, 7);
    }

    #[test]
    fn fence_without_language_tag() {
        let (value, audit) = parse("```\n{\"path\": \"a.rs\"}\n```");
        assert_eq!(value, json!({"path": "a.rs"}));
        assert!(audit.is_ok());
    }

    #[test]
    fn unclosed_nested_structure_is_balanced() {
        let (value, audit) = parse(r#"{"a": {"b": 1"#);
        assert_eq!(value, json!({"a": {"b": 1}}));
        assert!(audit.is_ok());
        assert_eq!(audit.len_candidate, audit.len_cleaned + 2);
    }

    #[test]
    fn unclosed_array_inside_object() {
        let (value, _) = parse(r#"{"paths": ["a.rs", "b.rs""#);
        assert_eq!(value, json!({"paths": ["a.rs", "b.rs"]}));
    }

    #[test]
    fn truncated_after_comma() {
        let (value, audit) = parse(r#"{"a": 1, "b": [1, 2,"#);
        assert_eq!(value, json!({"a": 1, "b": [1, 2]}));
        assert!(audit.is_ok());
    }

    #[test]
    fn prose_with_dangling_brace_fails() {
        let (value, audit) = parse("not json at all {");
        assert_eq!(value, json!({}));
        assert_eq!(audit.outcome, SalvageOutcome::Failed);
        assert!(!audit.error.unwrap().is_empty());
    }

    #[test]
    fn plain_prose_fails() {
        let (_, audit) = parse("I could not decide which tool to call.");
        assert_eq!(audit.outcome, SalvageOutcome::Failed);
        assert!(audit.error.is_some());
    }

    #[test]
    fn extracts_first_structure_after_prose() {
        let (value, audit) = parse(r#"Sure! Here are the arguments: {"q": "rust"} hope that helps"#);
        assert_eq!(value, json!({"q": "rust"}));
        assert_eq!(audit.len_candidate, 13);
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let (value, _) = parse(r#"{"pattern": "fn main() {", "path": "src/}main.rs""#);
        assert_eq!(value, json!({"pattern": "fn main() {", "path": "src/}main.rs"}));
    }

    #[test]
    fn escaped_quotes_inside_strings_survive() {
        let (value, _) = parse(r#"{"msg": "say \"hi\"", }"#);
        assert_eq!(value, json!({"msg": "say \"hi\""}));
    }

    #[test]
    fn commas_inside_strings_survive() {
        let (value, _) = parse(r#"{"csv": "a,}b", "n": 1,}"#);
        assert_eq!(value, json!({"csv": "a,}b", "n": 1}));
    }

    #[test]
    fn escaped_json_is_unescaped() {
        let (value, audit) = parse(r#"{\"path\": \"src/lib.rs\", \"line\": 3}"#);
        assert_eq!(value, json!({"path": "src/lib.rs", "line": 3}));
        assert!(audit.is_ok());
    }

    #[test]
    fn top_level_array_is_rejected() {
        let (value, audit) = parse("[1, 2,]");
        assert_eq!(value, json!({}));
        assert_eq!(audit.outcome, SalvageOutcome::Failed);
        assert!(audit.error.unwrap().contains("array"));
    }

    #[test]
    fn fast_path_scalar_is_rejected() {
        let (_, audit) = parse("42");
        assert_eq!(audit.outcome, SalvageOutcome::Failed);
        assert!(audit.error.unwrap().contains("number"));
    }

    #[test]
    fn repair_is_deterministic() {
        let raw = "```json\n{\"a\": [1, {\"b\": \"x\",\n";
        assert_eq!(parse(raw), parse(raw));
        assert_eq!(parse(raw).0, json!({"a": [1, {"b": "x"}]}));
    }

    #[test]
    fn tool_call_name_is_recorded() {
        let call = ToolCall {
            id: "c1".into(),
            call_type: crate::CallType::Function,
            function: crate::FunctionCallData {
                name: "grep".into(),
                arguments: "{\"pattern\": \"todo\",}".into(),
            },
        };
        let (map, audit) = parse_tool_call(&call);
        assert_eq!(map["pattern"], "todo");
        assert_eq!(audit.source_function_name.as_deref(), Some("grep"));
    }

    #[test]
    fn outcome_serializes_lowercase() {
        assert_eq!(serde_json::to_value(SalvageOutcome::Failed).unwrap(), "failed");
        let (_, audit) = parse_arguments(None, None);
        let json = serde_json::to_value(&audit).unwrap();
        assert_eq!(json["outcome"], "empty");
        assert!(json.get("source_function_name").is_some());
    }

    #[test]
    fn strip_fence_variants() {
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```JSON {}```"), "{}");
        assert_eq!(strip_code_fence("```{}```"), "{}");
        assert_eq!(strip_code_fence("```"), "```");
    }

    #[test]
    fn repair_reports_what_it_did() {
        let repair = repair_candidate(r#"{"a": [1,"#);
        assert_eq!(repair.text, r#"{"a": [1]}"#);
        assert_eq!(repair.closers_appended, 2);
        assert_eq!(repair.commas_removed, 1);
        assert_eq!(repair.quotes_collapsed, 0);
    }

    #[test]
    fn dangling_openers_are_not_closed() {
        let repair = repair_candidate("[{ ");
        assert_eq!(repair.closers_appended, 0);
        assert_eq!(repair.text, "[{ ");
    }
}
