//! Shared types for the execution engine.
//!
//! Wire-facing types (`Step`, `Tool`, `RepairPlan`) mirror the JSON the
//! planner, the diagnostician and the tool library exchange, so their serde
//! representation is part of the contract.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position in the plan.
    pub step_number: u32,
    #[serde(flatten)]
    pub task: StepTask,
}

/// Kind-specific payload of a step, tagged by `task` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepTask {
    /// Run a tool already in the library; `details` is its name.
    UseExistingTool { details: String },
    /// Synthesize a new tool from a free-text description.
    CreateNewTool {
        details: String,
        suggested_name: String,
        description: String,
    },
    /// Derive a new tool from an existing one.
    ModifyExistingTool {
        tool_to_modify: String,
        modification_details: String,
        suggested_name: String,
        description: String,
    },
    /// Generate an acceptance check whose exit status is the verdict.
    CreateVerificationTool {
        details: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggested_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

/// Wire tags accepted for `StepTask`.
pub const STEP_TASK_KINDS: [&str; 4] = [
    "USE_EXISTING_TOOL",
    "CREATE_NEW_TOOL",
    "MODIFY_EXISTING_TOOL",
    "CREATE_VERIFICATION_TOOL",
];

impl StepTask {
    pub fn kind(&self) -> &'static str {
        match self {
            StepTask::UseExistingTool { .. } => STEP_TASK_KINDS[0],
            StepTask::CreateNewTool { .. } => STEP_TASK_KINDS[1],
            StepTask::ModifyExistingTool { .. } => STEP_TASK_KINDS[2],
            StepTask::CreateVerificationTool { .. } => STEP_TASK_KINDS[3],
        }
    }

    /// Whether a successful run of this step should be saved to the tool library.
    pub fn persists_tool(&self) -> bool {
        matches!(
            self,
            StepTask::CreateNewTool { .. } | StepTask::ModifyExistingTool { .. }
        )
    }

    /// One-line summary used when announcing the plan.
    pub fn summary(&self) -> &str {
        match self {
            StepTask::UseExistingTool { details }
            | StepTask::CreateNewTool { details, .. }
            | StepTask::CreateVerificationTool { details, .. } => details,
            StepTask::ModifyExistingTool { tool_to_modify, .. } => tool_to_modify,
        }
    }
}

impl Step {
    /// Stem for the script file this step executes.
    pub fn script_stem(&self) -> &str {
        match &self.task {
            StepTask::UseExistingTool { details } => details,
            StepTask::CreateNewTool { suggested_name, .. }
            | StepTask::ModifyExistingTool { suggested_name, .. } => suggested_name,
            StepTask::CreateVerificationTool { suggested_name, .. } => {
                suggested_name.as_deref().unwrap_or("verification")
            }
        }
    }

    /// Point `suggested_name` at the name the tool was actually stored under.
    pub fn rebind_suggested_name(&mut self, stored_name: &str) {
        match &mut self.task {
            StepTask::CreateNewTool { suggested_name, .. }
            | StepTask::ModifyExistingTool { suggested_name, .. } => {
                *suggested_name = stored_name.to_string();
            }
            StepTask::CreateVerificationTool { suggested_name, .. } => {
                *suggested_name = Some(stored_name.to_string());
            }
            StepTask::UseExistingTool { .. } => {}
        }
    }
}

/// Ordered steps produced once per run (or per restart after repair).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Plan {
    pub steps: Vec<Step>,
}

/// A persisted, reusable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub code: String,
}

/// Outcome of running one artifact in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// How to react to one classified fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixStrategy {
    pub should_retry: bool,
    pub retry_delay: Duration,
    pub suggestion: String,
    /// Groups faults of the same class for retry accounting.
    pub error_fingerprint: String,
}

/// Context carried into a run that modifies the result of a previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationContext {
    pub original_goal: String,
    pub modification_request: String,
    pub last_code: Option<String>,
    pub failure_reason: Option<String>,
}

/// Strategy chosen by the diagnostician.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairStrategy {
    AttemptSelfRepair,
    RequestUserIntervention,
}

/// One action of a repair plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairStep {
    RunCommand {
        command: String,
        #[serde(default)]
        description: String,
    },
    WriteAndExecuteScript {
        details: String,
        #[serde(default)]
        description: String,
    },
    RequestUserAction { instructions_for_user: String },
}

impl RepairStep {
    pub fn description(&self) -> &str {
        match self {
            RepairStep::RunCommand { description, .. }
            | RepairStep::WriteAndExecuteScript { description, .. } => description,
            RepairStep::RequestUserAction { instructions_for_user } => instructions_for_user,
        }
    }
}

/// Structured root-cause analysis plus remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPlan {
    pub root_cause_analysis: String,
    pub strategy: RepairStrategy,
    #[serde(rename = "plan", alias = "steps")]
    pub steps: Vec<RepairStep>,
}

impl RepairPlan {
    /// Operator instructions collected from `REQUEST_USER_ACTION` steps.
    pub fn user_instructions(&self) -> String {
        let instructions: Vec<&str> = self
            .steps
            .iter()
            .filter_map(|step| match step {
                RepairStep::RequestUserAction {
                    instructions_for_user,
                } => Some(instructions_for_user.as_str()),
                _ => None,
            })
            .collect();
        if instructions.is_empty() {
            return self.root_cause_analysis.clone();
        }
        instructions.join("\n")
    }
}

/// Terminal state of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalState {
    Done,
    Failed,
    /// The diagnostician asked for operator action; never retried automatically.
    NeedsHumanAction { instructions: String },
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Done => "done",
            TerminalState::Failed => "failed",
            TerminalState::NeedsHumanAction { .. } => "needs_human_action",
        }
    }
}

/// Lifecycle phases of a run, recorded in order of entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Planning,
    Executing(u32),
    Done,
    Fatal,
    Diagnosing,
    Repairing,
    Restarting,
    Escalated,
    Terminal,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => write!(f, "INIT"),
            Phase::Planning => write!(f, "PLANNING"),
            Phase::Executing(step) => write!(f, "EXECUTING({step})"),
            Phase::Done => write!(f, "DONE"),
            Phase::Fatal => write!(f, "FATAL"),
            Phase::Diagnosing => write!(f, "DIAGNOSING"),
            Phase::Repairing => write!(f, "REPAIRING"),
            Phase::Restarting => write!(f, "RESTART PRIMARY"),
            Phase::Escalated => write!(f, "ESCALATED"),
            Phase::Terminal => write!(f, "TERMINAL"),
        }
    }
}

/// Result handed back to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: TerminalState,
    /// Human-readable failure reason or operator instructions.
    pub reason: Option<String>,
    /// Code of the last step that produced an artifact.
    pub last_code: Option<String>,
    /// Output of the last failing script, if any.
    pub failure_reason: Option<String>,
    /// Number of full restarts after self-repair.
    pub restarts: u32,
    /// Names tools were stored under during this run.
    pub saved_tools: Vec<String>,
    pub phases: Vec<Phase>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.state == TerminalState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_deserializes_flattened_task_tag() {
        let step: Step = serde_json::from_str(
            r#"{"step_number": 1, "task": "CREATE_NEW_TOOL", "details": "list .txt files",
                "suggested_name": "list_text_files", "description": "Lists text files"}"#,
        )
        .expect("parse step");
        assert_eq!(step.step_number, 1);
        assert_eq!(step.task.kind(), "CREATE_NEW_TOOL");
        assert!(step.task.persists_tool());
        assert_eq!(step.script_stem(), "list_text_files");
    }

    #[test]
    fn verification_step_names_are_optional() {
        let step: Step = serde_json::from_str(
            r#"{"step_number": 2, "task": "CREATE_VERIFICATION_TOOL", "details": "check output"}"#,
        )
        .expect("parse step");
        assert!(!step.task.persists_tool());
        assert_eq!(step.script_stem(), "verification");
    }

    #[test]
    fn rebind_updates_suggested_name() {
        let mut step = Step {
            step_number: 1,
            task: StepTask::ModifyExistingTool {
                tool_to_modify: "a".to_string(),
                modification_details: "b".to_string(),
                suggested_name: "list_files".to_string(),
                description: "c".to_string(),
            },
        };
        step.rebind_suggested_name("list_files_2");
        assert_eq!(step.script_stem(), "list_files_2");
    }

    #[test]
    fn repair_plan_reads_plan_key() {
        let plan: RepairPlan = serde_json::from_str(
            r#"{"root_cause_analysis": "proxy", "strategy": "REQUEST_USER_INTERVENTION",
                "plan": [{"task": "REQUEST_USER_ACTION", "instructions_for_user": "disable the proxy"}]}"#,
        )
        .expect("parse repair plan");
        assert_eq!(plan.strategy, RepairStrategy::RequestUserIntervention);
        assert_eq!(plan.user_instructions(), "disable the proxy");
    }

    #[test]
    fn phase_display_matches_state_names() {
        assert_eq!(Phase::Executing(3).to_string(), "EXECUTING(3)");
        assert_eq!(Phase::Restarting.to_string(), "RESTART PRIMARY");
    }
}
