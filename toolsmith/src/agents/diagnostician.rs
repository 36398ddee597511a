//! Diagnosis of fatal faults and execution of self-repair plans.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::coder::CodeDispatcher;
use crate::core::types::{RepairPlan, RepairStep};
use crate::core::wire::parse_repair_plan;
use crate::events::EventSink;
use crate::io::generator::Generator;
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::ScriptRunner;

/// Suggested name for scripts written during repair.
pub const REPAIR_SCRIPT_NAME: &str = "repair_script";

/// What the diagnostician is told about a fatal fault.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailureContext {
    pub goal: String,
    /// JSON of the step that was executing, or `N/A` when planning failed.
    pub failed_step: String,
    pub error_log: String,
}

pub struct Diagnostician<'a> {
    generator: &'a dyn Generator,
    prompts: &'a PromptBuilder,
    coder: &'a CodeDispatcher<'a>,
    runner: &'a dyn ScriptRunner,
    sink: &'a dyn EventSink,
}

impl<'a> Diagnostician<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        prompts: &'a PromptBuilder,
        coder: &'a CodeDispatcher<'a>,
        runner: &'a dyn ScriptRunner,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            generator,
            prompts,
            coder,
            runner,
            sink,
        }
    }

    /// Ask for a root-cause analysis and repair plan.
    ///
    /// Every failure here (prompt, generator, parsing, schema) yields `None`.
    #[instrument(skip_all)]
    pub fn diagnose(&self, context: &FailureContext) -> Option<RepairPlan> {
        self.sink
            .emit("Fatal error encountered, starting diagnosis...");
        let result = serde_json::to_string_pretty(context)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.prompts.diagnostician(&json))
            .and_then(|prompt| self.generator.ask(&prompt.system, &prompt.user))
            .and_then(|response| parse_repair_plan(&response));
        match result {
            Ok(plan) => {
                info!(strategy = ?plan.strategy, steps = plan.steps.len(), "repair plan received");
                self.sink
                    .emit(&format!("Root cause: {}", plan.root_cause_analysis));
                Some(plan)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "diagnosis failed");
                self.sink
                    .emit(&format!("Diagnosis itself failed: {err:#}"));
                None
            }
        }
    }

    /// Execute self-repair steps in order, stopping at the first failure.
    #[instrument(skip_all, fields(steps = steps.len()))]
    pub fn apply(&self, steps: &[RepairStep]) -> bool {
        for step in steps {
            self.sink
                .emit(&format!("Running repair step: {}", step.description()));
            let result = match step {
                RepairStep::RunCommand { command, .. } => {
                    let result = self.runner.run_command(command);
                    self.sink.emit(&format!("Command output:\n{}", result.output));
                    result.success
                }
                RepairStep::WriteAndExecuteScript { details, .. } => {
                    match self.coder.create_code(details) {
                        Ok(code) => {
                            let result = self.runner.run_script(&code, REPAIR_SCRIPT_NAME);
                            self.sink
                                .emit(&format!("Repair script output:\n{}", result.output));
                            result.success
                        }
                        Err(err) => {
                            warn!(err = %format!("{err:#}"), "repair script generation failed");
                            false
                        }
                    }
                }
                RepairStep::RequestUserAction {
                    instructions_for_user,
                } => {
                    self.sink.emit(&format!(
                        "Repair step needs the operator and cannot run automatically: {instructions_for_user}"
                    ));
                    false
                }
            };
            if !result {
                self.sink.emit(&format!(
                    "Repair step '{}' failed.",
                    step.description()
                ));
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fault::Fault;
    use crate::core::types::{ExecutionResult, RepairStrategy};
    use crate::events::NullSink;
    use crate::test_support::{ScriptedGenerator, ScriptedRunner, temp_store};

    fn context() -> FailureContext {
        FailureContext {
            goal: "report hardware".to_string(),
            failed_step: "N/A".to_string(),
            error_log: "SSL DECRYPTION FAILED".to_string(),
        }
    }

    fn run_command(command: &str) -> RepairStep {
        RepairStep::RunCommand {
            command: command.to_string(),
            description: format!("run {command}"),
        }
    }

    #[test]
    fn diagnose_parses_plan_and_sends_context() {
        let (_temp, store) = temp_store();
        let generator = ScriptedGenerator::new().answer(
            r#"```json
{"root_cause_analysis": "proxy", "strategy": "REQUEST_USER_INTERVENTION",
 "plan": [{"task": "REQUEST_USER_ACTION", "instructions_for_user": "disable the proxy"}]}
```"#,
        );
        let prompts = PromptBuilder::new(10_000);
        let runner = ScriptedRunner::new();
        let coder = CodeDispatcher::new(&generator, &store, &prompts, &NullSink);
        let diagnostician = Diagnostician::new(&generator, &prompts, &coder, &runner, &NullSink);

        let plan = diagnostician.diagnose(&context()).expect("plan");
        assert_eq!(plan.strategy, RepairStrategy::RequestUserIntervention);
        assert_eq!(plan.user_instructions(), "disable the proxy");
        assert!(generator.prompts()[0].1.contains("SSL DECRYPTION FAILED"));
    }

    #[test]
    fn diagnose_failures_yield_none() {
        let (_temp, store) = temp_store();
        let generator = ScriptedGenerator::new()
            .answer("not json")
            .answer(r#"{"strategy": "ATTEMPT_SELF_REPAIR", "plan": []}"#)
            .fail(Fault::Connection("down".to_string()));
        let prompts = PromptBuilder::new(10_000);
        let runner = ScriptedRunner::new();
        let coder = CodeDispatcher::new(&generator, &store, &prompts, &NullSink);
        let diagnostician = Diagnostician::new(&generator, &prompts, &coder, &runner, &NullSink);

        for _ in 0..3 {
            assert!(diagnostician.diagnose(&context()).is_none());
        }
    }

    #[test]
    fn apply_stops_at_first_failing_step() {
        let (_temp, store) = temp_store();
        let generator = ScriptedGenerator::new();
        let prompts = PromptBuilder::new(10_000);
        let runner = ScriptedRunner::new()
            .command_result(ExecutionResult::success("upgraded"))
            .command_result(ExecutionResult::failure("no such package"));
        let coder = CodeDispatcher::new(&generator, &store, &prompts, &NullSink);
        let diagnostician = Diagnostician::new(&generator, &prompts, &coder, &runner, &NullSink);

        let steps = vec![
            run_command("pip install --upgrade certifi"),
            run_command("pip install nothing"),
            run_command("never run"),
        ];
        assert!(!diagnostician.apply(&steps));
        assert_eq!(
            runner.commands(),
            vec!["pip install --upgrade certifi", "pip install nothing"]
        );
    }

    #[test]
    fn apply_runs_generated_repair_script() {
        let (_temp, store) = temp_store();
        let generator = ScriptedGenerator::new().answer("import os\nprint(os.environ.get('HTTPS_PROXY'))");
        let prompts = PromptBuilder::new(10_000);
        let runner = ScriptedRunner::new().script_result(ExecutionResult::success("None"));
        let coder = CodeDispatcher::new(&generator, &store, &prompts, &NullSink);
        let diagnostician = Diagnostician::new(&generator, &prompts, &coder, &runner, &NullSink);

        let steps = vec![RepairStep::WriteAndExecuteScript {
            details: "print proxy variables".to_string(),
            description: "inspect proxy".to_string(),
        }];
        assert!(diagnostician.apply(&steps));
        let scripts = runner.scripts();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].0, REPAIR_SCRIPT_NAME);
        assert!(scripts[0].1.starts_with("import os"));
    }

    #[test]
    fn user_action_inside_self_repair_fails_the_repair() {
        let (_temp, store) = temp_store();
        let generator = ScriptedGenerator::new();
        let prompts = PromptBuilder::new(10_000);
        let runner = ScriptedRunner::succeeding();
        let coder = CodeDispatcher::new(&generator, &store, &prompts, &NullSink);
        let diagnostician = Diagnostician::new(&generator, &prompts, &coder, &runner, &NullSink);

        let steps = vec![RepairStep::RequestUserAction {
            instructions_for_user: "plug in the cable".to_string(),
        }];
        assert!(!diagnostician.apply(&steps));
        assert!(runner.commands().is_empty());
    }
}
