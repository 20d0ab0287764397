//! Planner output: coding actions and the rules they must satisfy before an
//! agent executes them.
//!
//! A planner model emits one JSON object per plan item, tagged by `kind`.
//! [`parse_plan_item`] salvages the raw text with
//! [`parse_arguments`](crate::tools::salvage::parse_arguments), deserializes
//! it, and runs [`Action::validate`]. The checks keep an agent from touching
//! the project root, from retrieving half the repository, and from editing a
//! file it hasn't read.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::tools::salvage::{SalvageOutcome, parse_arguments};

/// Most files an action may ask to retrieve.
pub const MAX_MINIMAL_FILES: usize = 5;

/// Most lines an expected outcome may span.
pub const MAX_EXPECTED_OUTCOME_LINES: usize = 20;

/// Paths that name the project root rather than something inside it.
const ROOT_PATHS: &[&str] = &["", ".", "/", "\\", "./", ".\\", "../", "..\\", "root"];

/// Returns `true` if `path` (ignoring surrounding whitespace) names the root.
pub fn is_root_path(path: &str) -> bool {
    ROOT_PATHS.contains(&path.trim())
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Retrieve,
    RetrieveAndUpdate,
    RetrieveAndCreate,
    RetrieveUpdateAndCreate,
    Delete,
    BashCommand,
    ShellCommand,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Retrieve => "retrieve",
            Operation::RetrieveAndUpdate => "retrieve-and-update",
            Operation::RetrieveAndCreate => "retrieve-and-create",
            Operation::RetrieveUpdateAndCreate => "retrieve-update-and-create",
            Operation::Delete => "delete",
            Operation::BashCommand => "bash-command",
            Operation::ShellCommand => "shell-command",
        }
    }

    /// Operations that write to `target_path` and so must read it first.
    pub fn requires_target_retrieval(self) -> bool {
        matches!(
            self,
            Operation::RetrieveAndUpdate
                | Operation::RetrieveAndCreate
                | Operation::RetrieveUpdateAndCreate
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file to retrieve before the action runs.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct MinimalFile {
    pub id: Option<String>,
    pub why: Option<String>,
}

/// A concrete, atomic coding action.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct Action {
    pub intent: String,
    pub operation: Operation,
    #[serde(default)]
    pub minimal_files_to_retrieve: Vec<MinimalFile>,
    pub target_path: String,
    pub edit_sketch: Vec<String>,
    pub expected_outcome: Vec<String>,
}

/// A change the planner refuses to make, with an optional workaround.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BlockedAction {
    pub intent: String,
    pub blocked_reason: String,
    #[serde(default)]
    pub alternative: Option<String>,
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PlanItem {
    Action(Action),
    Blocked(BlockedAction),
}

/// The ordered plan for one user request.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq, Eq)]
pub struct ReasoningPlan {
    pub actions: Vec<PlanItem>,
    #[serde(default)]
    pub constraints: Option<String>,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan item is not valid JSON: {0}")]
    Unparseable(String),
    #[error("plan item has an unexpected shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("{field} must not point at the project root")]
    RootPath { field: &'static str },
    #[error("minimal_files_to_retrieve lists {count} files (at most {max})", max = MAX_MINIMAL_FILES)]
    TooManyFiles { count: usize },
    #[error("edit_sketch must not be empty")]
    EmptyEditSketch,
    #[error("expected_outcome has {lines} lines (expected 1 to {max})", max = MAX_EXPECTED_OUTCOME_LINES)]
    ExpectedOutcomeLength { lines: usize },
    #[error("{operation} requires retrieving the target first (add {target} to minimal_files_to_retrieve)")]
    TargetNotRetrieved { operation: Operation, target: String },
    #[error("plan has no actions")]
    EmptyPlan,
}

impl Action {
    pub fn validate(&self) -> Result<(), PlanError> {
        if is_root_path(&self.target_path) {
            return Err(PlanError::RootPath {
                field: "target_path",
            });
        }
        if self
            .minimal_files_to_retrieve
            .iter()
            .any(|f| f.id.as_deref().is_some_and(is_root_path))
        {
            return Err(PlanError::RootPath {
                field: "minimal_files_to_retrieve.id",
            });
        }
        if self.minimal_files_to_retrieve.len() > MAX_MINIMAL_FILES {
            return Err(PlanError::TooManyFiles {
                count: self.minimal_files_to_retrieve.len(),
            });
        }
        if self.edit_sketch.is_empty() {
            return Err(PlanError::EmptyEditSketch);
        }
        let lines = self.expected_outcome.len();
        if !(1..=MAX_EXPECTED_OUTCOME_LINES).contains(&lines) {
            return Err(PlanError::ExpectedOutcomeLength { lines });
        }
        if self.operation.requires_target_retrieval() && !self.retrieves(&self.target_path) {
            return Err(PlanError::TargetNotRetrieved {
                operation: self.operation,
                target: self.target_path.clone(),
            });
        }
        Ok(())
    }

    /// Whether `path` is in the retrieve list.
    pub fn retrieves(&self, path: &str) -> bool {
        self.minimal_files_to_retrieve
            .iter()
            .any(|f| f.id.as_deref() == Some(path))
    }
}

impl PlanItem {
    pub fn validate(&self) -> Result<(), PlanError> {
        match self {
            PlanItem::Action(action) => action.validate(),
            PlanItem::Blocked(_) => Ok(()),
        }
    }
}

impl ReasoningPlan {
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.actions.is_empty() {
            return Err(PlanError::EmptyPlan);
        }
        self.actions.iter().try_for_each(PlanItem::validate)
    }
}

/// Salvage, deserialize, and validate one plan item from raw model output.
pub fn parse_plan_item(raw: &str) -> Result<PlanItem, PlanError> {
    let item: PlanItem = serde_json::from_value(salvage_object(raw)?)?;
    item.validate()?;
    if let PlanItem::Action(action) = &item {
        debug!("plan: accepted {} on {}", action.operation, action.target_path);
    }
    Ok(item)
}

/// Salvage, deserialize, and validate a whole plan.
pub fn parse_plan(raw: &str) -> Result<ReasoningPlan, PlanError> {
    let plan: ReasoningPlan = serde_json::from_value(salvage_object(raw)?)?;
    plan.validate()?;
    Ok(plan)
}

fn salvage_object(raw: &str) -> Result<Value, PlanError> {
    let (map, audit) = parse_arguments(Some(raw), None);
    match audit.outcome {
        SalvageOutcome::Ok => Ok(Value::Object(map)),
        SalvageOutcome::Empty => Err(PlanError::Unparseable("empty input".into())),
        SalvageOutcome::Failed => Err(PlanError::Unparseable(audit.error.unwrap_or_default())),
    }
}
