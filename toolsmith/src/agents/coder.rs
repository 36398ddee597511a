//! Code acquisition: library lookup, generation, modification and
//! verification scripts.

use anyhow::{Result, bail};
use tracing::{debug, instrument};

use crate::core::fault::Fault;
use crate::core::text::{contains_traceback, strip_markdown_fences};
use crate::core::types::{IterationContext, Step, StepTask};
use crate::events::EventSink;
use crate::io::generator::Generator;
use crate::io::prompt::{Prompt, PromptBuilder};
use crate::io::tool_store::ToolStore;

/// Produces the code a step will execute.
pub struct CodeDispatcher<'a> {
    generator: &'a dyn Generator,
    store: &'a ToolStore,
    prompts: &'a PromptBuilder,
    sink: &'a dyn EventSink,
}

impl<'a> CodeDispatcher<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        store: &'a ToolStore,
        prompts: &'a PromptBuilder,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            generator,
            store,
            prompts,
            sink,
        }
    }

    /// Code for `step`. Never returns empty code.
    #[instrument(skip_all, fields(step = step.step_number, kind = step.task.kind()))]
    pub fn acquire(
        &self,
        step: &Step,
        goal: &str,
        iteration: Option<&IterationContext>,
    ) -> Result<String> {
        match &step.task {
            StepTask::UseExistingTool { details } => {
                self.sink
                    .emit(&format!("Loading existing tool '{details}'"));
                match self.store.get(details)? {
                    Some(code) if !code.trim().is_empty() => Ok(code),
                    _ => Err(Fault::CodeUnavailable(format!(
                        "tool '{details}' is not in the library"
                    ))
                    .into()),
                }
            }
            StepTask::CreateNewTool { details, .. } => self.create_code(details),
            StepTask::ModifyExistingTool {
                tool_to_modify,
                modification_details,
                ..
            } => {
                let original = match iteration.and_then(|ctx| ctx.last_code.clone()) {
                    Some(code) => Some(code),
                    None => self.store.get(tool_to_modify)?,
                };
                match original.filter(|code| !code.trim().is_empty()) {
                    Some(code) => self.modify_code(&code, modification_details),
                    None => {
                        self.sink.emit(&format!(
                            "Tool '{tool_to_modify}' to modify was not found; creating a new tool instead."
                        ));
                        self.create_code(modification_details)
                    }
                }
            }
            StepTask::CreateVerificationTool { details, .. } => {
                self.verification_code(goal, details)
            }
        }
    }

    /// Generate a fresh script from a task description.
    pub fn create_code(&self, details: &str) -> Result<String> {
        self.sink
            .emit(&format!("Generating code for: {}", first_line(details)));
        self.generate(self.prompts.coder(details)?)
    }

    /// Rewrite `code` according to `request`.
    pub fn modify_code(&self, code: &str, request: &str) -> Result<String> {
        self.sink
            .emit(&format!("Modifying code: {}", first_line(request)));
        self.generate(self.prompts.modifier(code, request)?)
    }

    /// Generate an acceptance script for `goal`.
    pub fn verification_code(&self, goal: &str, details: &str) -> Result<String> {
        self.sink.emit("Generating verification script...");
        self.generate(self.prompts.verifier(goal, details)?)
    }

    fn generate(&self, prompt: Prompt) -> Result<String> {
        let raw = self.generator.ask(&prompt.system, &prompt.user)?;
        let code = clean_code(&raw)?;
        debug!(bytes = code.len(), "code acquired");
        Ok(code)
    }
}

/// Strip fences and reject answers that are empty or carry a stack trace.
pub fn clean_code(raw: &str) -> Result<String> {
    let code = strip_markdown_fences(raw);
    if code.is_empty() {
        bail!(Fault::CodeUnavailable("generator returned empty code".to_string()));
    }
    if contains_traceback(&code) {
        bail!(Fault::CodeUnavailable(
            "generator returned a traceback instead of code".to_string()
        ));
    }
    Ok(code)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}
