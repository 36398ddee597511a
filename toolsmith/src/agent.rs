//! Agent orchestrator: plan, acquire, execute, persist, and escalate.
//!
//! A run moves through `INIT → PLANNING → EXECUTING(i) → DONE`. A fault that
//! escapes the retry coordinator moves it to `FATAL → DIAGNOSING → REPAIRING`
//! and from there either restarts the whole primary task (after a successful
//! self-repair) or ends as `ESCALATED` / failed.

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};

use crate::agents::coder::CodeDispatcher;
use crate::agents::diagnostician::{Diagnostician, FailureContext};
use crate::agents::planner::{Planner, planning_goal};
use crate::core::fault::Fault;
use crate::core::types::{
    IterationContext, Phase, RepairStrategy, RunOutcome, Step, StepTask, TerminalState,
};
use crate::events::EventSink;
use crate::io::config::AgentConfig;
use crate::io::generator::Generator;
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::ScriptRunner;
use crate::io::tool_store::{SaveOutcome, ToolStore};
use crate::retry::{DEFAULT_MAX_RETRIES, Retrier, Sleeper};

/// Run policy knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub max_retries: u32,
    pub max_restarts: u32,
    pub verify: bool,
    pub prompt_budget_bytes: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_restarts: 1,
            verify: false,
            prompt_budget_bytes: 40_000,
        }
    }
}

impl AgentSettings {
    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            max_restarts: cfg.max_restarts,
            verify: cfg.verify,
            prompt_budget_bytes: cfg.prompt_budget_bytes,
        }
    }
}

/// Collaborators a run needs. All of them may be shared across threads.
#[derive(Clone, Copy)]
pub struct AgentDeps<'a> {
    pub generator: &'a dyn Generator,
    pub runner: &'a dyn ScriptRunner,
    pub store: &'a ToolStore,
    pub sleeper: &'a dyn Sleeper,
    pub sink: &'a dyn EventSink,
}

pub struct Agent<'a> {
    deps: AgentDeps<'a>,
    settings: AgentSettings,
    prompts: PromptBuilder,
}

/// Mutable bookkeeping for one run.
#[derive(Debug, Default)]
struct RunState {
    phases: Vec<Phase>,
    last_code: Option<String>,
    failure_reason: Option<String>,
    failed_step: Option<String>,
    saved_tools: Vec<String>,
    restarts: u32,
}

impl<'a> Agent<'a> {
    pub fn new(deps: AgentDeps<'a>, settings: AgentSettings) -> Self {
        let prompts = PromptBuilder::new(settings.prompt_budget_bytes);
        Self {
            deps,
            settings,
            prompts,
        }
    }

    /// Run `goal` to a terminal state. Never panics or returns an error.
    ///
    /// With `iteration`, planning works from the previous run's context and
    /// modify steps start from its code.
    #[instrument(skip_all, fields(verify = self.settings.verify, iterating = iteration.is_some()))]
    pub fn run(&self, goal: &str, iteration: Option<&IterationContext>) -> RunOutcome {
        let mut state = RunState::default();
        self.enter(&mut state, Phase::Init);
        self.announce(goal, iteration);

        loop {
            let fault = match self.run_primary(goal, iteration, &mut state) {
                Ok(()) => {
                    self.deps
                        .sink
                        .emit("All steps completed, task finished successfully.");
                    self.enter(&mut state, Phase::Done);
                    return self.finish(state, TerminalState::Done, None);
                }
                Err(fault) => fault,
            };

            self.enter(&mut state, Phase::Fatal);
            error!(err = %format!("{fault:#}"), restarts = state.restarts, "primary task failed");
            self.deps
                .sink
                .emit(&format!("Unrecoverable error: {fault:#}"));

            if state.restarts > 0 && state.restarts >= self.settings.max_restarts {
                let reason = format!("failed again after {} restart(s): {fault:#}", state.restarts);
                return self.finish(state, TerminalState::Failed, Some(reason));
            }

            match self.escalate(goal, &fault, &mut state) {
                Escalation::Restart => {
                    state.restarts += 1;
                    self.enter(&mut state, Phase::Restarting);
                    self.deps
                        .sink
                        .emit("Self-repair succeeded, restarting the original task...");
                }
                Escalation::Terminal(terminal, reason) => {
                    return self.finish(state, terminal, Some(reason));
                }
            }
        }
    }

    fn announce(&self, goal: &str, iteration: Option<&IterationContext>) {
        let sink = self.deps.sink;
        match iteration {
            Some(ctx) => {
                sink.emit(&format!("Continuing task: {}", ctx.original_goal));
                sink.emit(&format!("New request: {}", ctx.modification_request));
            }
            None => sink.emit(&format!("New task: {goal}")),
        }
        sink.emit(&format!("Using generator: {}", self.deps.generator.name()));
        if self.settings.verify {
            sink.emit("Self-verification mode is on");
        }
    }

    /// Plan once, then execute every step in order.
    fn run_primary(
        &self,
        goal: &str,
        iteration: Option<&IterationContext>,
        state: &mut RunState,
    ) -> Result<()> {
        let deps = self.deps;
        let retrier = Retrier::new(self.settings.max_retries, deps.sleeper, deps.sink);
        let planner = Planner::new(deps.generator, &self.prompts, deps.sink);
        let coder = CodeDispatcher::new(deps.generator, deps.store, &self.prompts, deps.sink);

        self.enter(state, Phase::Planning);
        state.failed_step = None;
        state.failure_reason = None;
        let plan_goal = planning_goal(goal, self.settings.verify);
        let plan = retrier.with_retry("planning", || {
            let tools = deps.store.list()?;
            planner.create_plan(&plan_goal, &tools, iteration)
        })?;

        deps.sink.emit("Plan:");
        for step in &plan.steps {
            deps.sink.emit(&format!(
                "  - {}: {} - {}",
                step.step_number,
                step.task.kind(),
                step.task.summary()
            ));
        }

        for mut step in plan.steps {
            self.enter(state, Phase::Executing(step.step_number));
            state.failed_step = Some(serde_json::to_string(&step).context("serialize step")?);
            deps.sink.emit(&format!(
                "--- Executing step {}: {} ---",
                step.step_number,
                step.task.kind()
            ));

            let code = retrier.with_retry("code acquisition", || {
                coder.acquire(&step, goal, iteration)
            })?;
            state.last_code = Some(code.clone());

            retrier.with_retry("step execution", || self.execute(&step, &code, state))?;

            if step.task.persists_tool() {
                self.persist(&mut step, &code, state)?;
            }
        }
        Ok(())
    }

    /// Run one step's code; a failed run becomes a non-retryable fault.
    fn execute(&self, step: &Step, code: &str, state: &mut RunState) -> Result<()> {
        let result = self.deps.runner.run_script(code, step.script_stem());
        let shown = if result.output.trim().is_empty() {
            "[no output]"
        } else {
            result.output.as_str()
        };
        self.deps.sink.emit(&format!("Execution output:\n{shown}"));
        if result.success {
            return Ok(());
        }
        state.failure_reason = Some(result.output);
        Err(Fault::ScriptExecution(format!(
            "script for step {} exited unsuccessfully",
            step.step_number
        ))
        .into())
    }

    /// Save a create/modify step's tool and point the step at the stored name.
    fn persist(&self, step: &mut Step, code: &str, state: &mut RunState) -> Result<()> {
        let (name, description) = match &step.task {
            StepTask::CreateNewTool {
                suggested_name,
                description,
                ..
            }
            | StepTask::ModifyExistingTool {
                suggested_name,
                description,
                ..
            } => (suggested_name.clone(), description.clone()),
            _ => return Ok(()),
        };
        let outcome = self
            .deps
            .store
            .save(&name, &description, code)
            .with_context(|| format!("save tool '{name}'"))?;
        let sink = self.deps.sink;
        match &outcome {
            SaveOutcome::Created(saved) => sink.emit(&format!("Tool '{saved}' saved.")),
            SaveOutcome::Unchanged(saved) => {
                sink.emit(&format!("Tool '{saved}' already stored with identical code."));
            }
            SaveOutcome::Renamed { requested, name } => sink.emit(&format!(
                "Tool '{requested}' already exists with different code; saved as '{name}'."
            )),
        }
        if let SaveOutcome::Renamed { name, .. } = &outcome {
            step.rebind_suggested_name(name);
            sink.emit(&format!(
                "Step {} now refers to tool '{}'.",
                step.step_number,
                step.script_stem()
            ));
        }
        if !matches!(outcome, SaveOutcome::Unchanged(_)) {
            state.saved_tools.push(outcome.name().to_string());
        }
        debug!(step = ?step, name = %outcome.name(), "step tool persisted");
        Ok(())
    }

    /// Diagnose a fatal fault and decide how the run continues.
    fn escalate(&self, goal: &str, fault: &anyhow::Error, state: &mut RunState) -> Escalation {
        let deps = self.deps;
        self.enter(state, Phase::Diagnosing);

        let mut error_log = format!("{fault:#}");
        if let Some(output) = &state.failure_reason {
            error_log.push('\n');
            error_log.push_str(output);
        }
        let context = FailureContext {
            goal: goal.to_string(),
            failed_step: state
                .failed_step
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
            error_log,
        };

        let coder = CodeDispatcher::new(deps.generator, deps.store, &self.prompts, deps.sink);
        let diagnostician =
            Diagnostician::new(deps.generator, &self.prompts, &coder, deps.runner, deps.sink);

        let Some(plan) = diagnostician.diagnose(&context) else {
            deps.sink
                .emit("Diagnosis failed, no repair plan. Task terminated.");
            return Escalation::Terminal(
                TerminalState::Failed,
                format!("diagnosis failed after: {fault:#}"),
            );
        };

        self.enter(state, Phase::Repairing);
        match plan.strategy {
            RepairStrategy::RequestUserIntervention => {
                let instructions = plan.user_instructions();
                self.enter(state, Phase::Escalated);
                warn!("operator intervention requested");
                deps.sink
                    .emit("The agent cannot resolve this on its own and needs your help.");
                deps.sink.emit(&format!("Instructions:\n{instructions}"));
                Escalation::Terminal(
                    TerminalState::NeedsHumanAction {
                        instructions: instructions.clone(),
                    },
                    instructions,
                )
            }
            RepairStrategy::AttemptSelfRepair => {
                if state.restarts >= self.settings.max_restarts {
                    deps.sink
                        .emit("Self-repair is not allowed to restart the task. Task terminated.");
                    return Escalation::Terminal(
                        TerminalState::Failed,
                        format!("restart budget exhausted: {fault:#}"),
                    );
                }
                deps.sink.emit("Attempting self-repair...");
                if diagnostician.apply(&plan.steps) {
                    info!("self-repair succeeded");
                    Escalation::Restart
                } else {
                    deps.sink.emit("Self-repair failed. Task terminated.");
                    Escalation::Terminal(
                        TerminalState::Failed,
                        format!("self-repair failed for: {}", plan.root_cause_analysis),
                    )
                }
            }
        }
    }

    fn enter(&self, state: &mut RunState, phase: Phase) {
        debug!(%phase, "phase");
        state.phases.push(phase);
    }

    fn finish(
        &self,
        mut state: RunState,
        terminal: TerminalState,
        reason: Option<String>,
    ) -> RunOutcome {
        self.enter(&mut state, Phase::Terminal);
        info!(state = terminal.as_str(), restarts = state.restarts, "run finished");
        RunOutcome {
            state: terminal,
            reason,
            last_code: state.last_code,
            failure_reason: state.failure_reason,
            restarts: state.restarts,
            saved_tools: state.saved_tools,
            phases: state.phases,
        }
    }
}

enum Escalation {
    Restart,
    Terminal(TerminalState, String),
}
