//! End-to-end tests: a simulated tool loop driven through config loading,
//! budget enforcement, argument salvage, and loop bounds.

use serde_json::{Value, json};
use tether_rs::config::TetherConfig;
use tether_rs::context::{TruncationKind, advisory_message};
use tether_rs::prelude::*;
use tether_rs::{CallType, FunctionCallData};

const MODEL: &str = "tiny";

/// One token per char; "tiny" has a 400-token window.
fn enforcer(knobs: RuntimeKnobs) -> BudgetEnforcer<CharRatioCounter, ModelContextTable> {
    BudgetEnforcer::new(
        CharRatioCounter::with_ratio(1.0),
        ModelContextTable::new().with_override(MODEL, 400),
        knobs,
    )
}

fn tools() -> Vec<ToolDef> {
    vec![ToolDef::new(
        "list_files",
        "List files in a directory",
        json!({"type": "object", "properties": {"dir": {"type": "string"}}}),
    )]
}

fn call(id: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.into(),
        call_type: CallType::Function,
        function: FunctionCallData {
            name: "list_files".into(),
            arguments: arguments.into(),
        },
    }
}

/// Conversation after one tool round with a large result.
fn conversation_after_big_result() -> Vec<Message> {
    vec![
        Message::system("sys"),
        Message::user("list the files"),
        Message::assistant_tool_calls(vec![call("call_1", "{\"dir\": \".\"}")]),
        Message::tool_result("call_1", "x".repeat(1_000)),
    ]
}

#[test]
fn small_conversation_passes_through() {
    let knobs = RuntimeKnobs::default()
        .with_disable_margin(100)
        .with_tool_message_char_cap(120);
    let messages = vec![Message::system("sys"), Message::user("list the files")];
    let tools = tools();

    let out = enforcer(knobs).enforce(MODEL, &messages, Some(&tools), Some(50));

    assert_eq!(out.messages, messages);
    assert_eq!(out.tools.as_deref(), Some(tools.as_slice()));
    assert!(!out.audit.truncated());
    assert!(out.audit.steps.is_empty());
    assert_eq!(out.audit.total_tokens_before, 26);
    assert_eq!(out.audit.budget_tokens, 350);
}

#[test]
fn big_tool_result_is_dropped_around_then_clamped() {
    let knobs = RuntimeKnobs::default()
        .with_disable_margin(100)
        .with_tool_message_char_cap(120);
    let tools = tools();
    let messages = conversation_after_big_result();

    let out = enforcer(knobs).enforce(MODEL, &messages, Some(&tools), Some(50));
    let kinds: Vec<_> = out.audit.steps.iter().map(|s| s.kind).collect();

    assert_eq!(
        kinds,
        vec![TruncationKind::DropOldMessages, TruncationKind::ClampToolMessage]
    );
    assert_eq!(out.audit.removed_messages(), 2);
    assert_eq!(out.messages.len(), 2);
    assert_eq!(out.messages[0], messages[0]);

    let tool_text = out.messages[1].text();
    assert_eq!(tool_text.chars().count(), 120);
    assert!(tool_text.contains("[... truncated ...]"));
    assert_eq!(out.messages[1].tool_call_id.as_deref(), Some("call_1"));

    assert!(out.tools.is_some());
    assert_eq!(out.audit.total_tokens_after, 132);
    assert!(out.audit.total_tokens_after <= out.audit.budget_tokens);
    assert!(out.audit.total_tokens_after < out.audit.total_tokens_before);
}

#[test]
fn tools_disabled_when_headroom_is_thin() {
    let knobs = RuntimeKnobs::default()
        .with_disable_margin(300)
        .with_tool_message_char_cap(120);
    let tools = tools();

    let out = enforcer(knobs).enforce(MODEL, &conversation_after_big_result(), Some(&tools), Some(50));

    assert!(out.audit.tools_disabled);
    assert!(out.tools.is_none());
    assert_eq!(out.messages.last(), Some(&advisory_message()));
    assert_eq!(
        out.audit.steps.last().map(|s| s.kind),
        Some(TruncationKind::DisableTools)
    );
}

#[test]
fn enforce_request_strips_tool_fields() {
    let knobs = RuntimeKnobs::default()
        .with_disable_margin(300)
        .with_tool_message_char_cap(120);
    let mut request = ChatRequest {
        model: MODEL.into(),
        messages: conversation_after_big_result(),
        max_tokens: 50,
        tools: Some(tools()),
        parallel_tool_calls: Some(true),
    };

    let audit = enforcer(knobs).enforce_request(&mut request);

    assert!(audit.tools_disabled);
    assert!(request.tools.is_none());
    assert!(request.parallel_tool_calls.is_none());
    assert_eq!(request.messages.last(), Some(&advisory_message()));
}

#[test]
fn unknown_model_is_a_noop() {
    let messages = conversation_after_big_result();
    let tools = tools();
    let enforcer = BudgetEnforcer::new(
        CharRatioCounter::default(),
        ModelContextTable::new(),
        RuntimeKnobs::default(),
    );

    let out = enforcer.enforce("house-model-v0", &messages, Some(&tools), None);

    assert_eq!(out.messages, messages);
    assert_eq!(out.tools.as_deref(), Some(tools.as_slice()));
    assert_eq!(out.audit, BudgetAudit::noop("house-model-v0"));
}

#[test]
fn salvaged_calls_feed_loop_bounds() {
    let knobs = RuntimeKnobs::default().with_repeat_cap(2).with_round_cap(10);
    let limits = LoopLimits::from(&knobs);
    let mut state = ToolLoopState::new();

    // Same call twice, formatted differently each time.
    let first = call("call_1", "```json\n{\"dir\": \".\",}\n```");
    let second = call("call_2", "{\"dir\":\".\"");

    let (args, audit) = parse_tool_call(&first);
    assert_eq!(audit.outcome, SalvageOutcome::Ok);
    assert_eq!(audit.source_function_name.as_deref(), Some("list_files"));
    let sig = state.record_call(&first.function.name, &Value::Object(args));
    assert_eq!(sig, "list_files:{\"dir\":\".\"}");
    assert_eq!(state.check(&sig, &limits), LoopDecision::Continue);

    let (args, audit) = parse_tool_call(&second);
    assert!(audit.is_ok());
    let sig_again = ToolLoopState::signature(&second.function.name, &Value::Object(args));
    assert_eq!(sig_again, sig);
    state.record(&sig_again);

    assert_eq!(state.rounds, 2);
    assert!(state.check(&sig, &limits).should_stop());
    assert_eq!(
        state.check(&sig, &limits),
        LoopDecision::RepeatedCall {
            signature: sig,
            count: 2,
            cap: 2
        }
    );
}

#[test]
fn unrecoverable_arguments_become_a_failed_audit() {
    let (args, audit) = parse_tool_call(&call("call_9", "not json at all {"));
    assert!(args.is_empty());
    assert_eq!(audit.outcome, SalvageOutcome::Failed);
    assert!(audit.error.is_some_and(|e| !e.is_empty()));
}

#[test]
fn config_file_and_env_drive_enforcement() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[runtime]\ntool_disable_margin_tokens = 300\n\n[context.context_overrides]\ntiny = 400\n",
    )
    .unwrap();

    let config = TetherConfig::load_with(&[&path], |name| {
        (name == "TETHER_TOOL_MESSAGE_CHAR_CAP").then(|| "120".to_string())
    })
    .unwrap();
    assert_eq!(config.runtime.tool_disable_margin_tokens, 300);
    assert_eq!(config.runtime.tool_message_char_cap, 120);

    let enforcer = BudgetEnforcer::new(
        CharRatioCounter::with_ratio(1.0),
        ModelContextTable::from_overrides(&config.context),
        config.runtime,
    );
    let tools = tools();
    let out = enforcer.enforce(MODEL, &conversation_after_big_result(), Some(&tools), Some(50));

    assert_eq!(out.audit.max_context, 400);
    assert!(out.audit.tools_disabled);
    assert!(out.audit.step(TruncationKind::ClampToolMessage).is_some());
}
