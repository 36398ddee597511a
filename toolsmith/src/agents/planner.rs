//! Goal planner: turns a goal (or an iteration request) into a validated plan.

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::types::{IterationContext, Plan, Tool};
use crate::core::wire::parse_plan;
use crate::events::EventSink;
use crate::io::generator::Generator;
use crate::io::prompt::PromptBuilder;

const VERIFY_SUFFIX: &str =
    "Important: after the task is complete, add a verification step that checks the result.";

/// Words that show a goal already asks for verification.
const VERIFY_WORDS: [&str; 4] = ["verify", "verification", "验证", "check that"];

pub struct Planner<'a> {
    generator: &'a dyn Generator,
    prompts: &'a PromptBuilder,
    sink: &'a dyn EventSink,
}

impl<'a> Planner<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        prompts: &'a PromptBuilder,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            generator,
            prompts,
            sink,
        }
    }

    /// Ask the generator for a plan given the current tool inventory.
    #[instrument(skip_all, fields(tools = tools.len(), iterating = iteration.is_some()))]
    pub fn create_plan(
        &self,
        goal: &str,
        tools: &[Tool],
        iteration: Option<&IterationContext>,
    ) -> Result<Plan> {
        let prompt = self.prompts.planner(goal, tools, iteration)?;
        self.sink.emit("Requesting a plan...");
        let response = self.generator.ask(&prompt.system, &prompt.user)?;
        let plan = parse_plan(&response)?;
        debug!(steps = plan.steps.len(), "plan parsed");
        Ok(plan)
    }
}

/// Goal text sent to the planner, with the verification request appended in
/// verify mode unless the goal already asks for it.
pub fn planning_goal(goal: &str, verify: bool) -> String {
    let lower = goal.to_lowercase();
    if !verify || VERIFY_WORDS.iter().any(|word| lower.contains(word)) {
        return goal.to_string();
    }
    format!("{goal}\n\n{VERIFY_SUFFIX}")
}
