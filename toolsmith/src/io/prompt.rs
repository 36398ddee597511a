//! Prompt builder for the planner, coder, modifier, verifier and diagnostician.
//!
//! User prompts are minijinja templates split into sections by
//! `<!-- section:KEY required|droppable -->` markers. When a rendered prompt
//! exceeds the byte budget, droppable sections go first (tool inventory, then
//! previous failure, then previous code) and the last section is truncated as
//! a last resort. Source code handed over for modification is never cut; an
//! over-budget modify prompt is an error instead.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::fault::Fault;
use crate::core::types::{IterationContext, Tool};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const MODIFIER_TEMPLATE: &str = include_str!("prompts/modifier.md");
const VERIFIER_TEMPLATE: &str = include_str!("prompts/verifier.md");
const DIAGNOSTICIAN_TEMPLATE: &str = include_str!("prompts/diagnostician.md");

const PLANNER_SYSTEM: &str = include_str!("prompts/system/planner.md");
const CODER_SYSTEM: &str = include_str!("prompts/system/coder.md");
const MODIFIER_SYSTEM: &str = include_str!("prompts/system/modifier.md");
const VERIFIER_SYSTEM: &str = include_str!("prompts/system/verifier.md");
const DIAGNOSTICIAN_SYSTEM: &str = include_str!("prompts/system/diagnostician.md");

/// Droppable sections in the order they are sacrificed.
const DROP_ORDER: [&str; 3] = ["tools", "failure", "previous_code"];

/// Sections that must reach the generator whole.
const INTACT: [&str; 1] = ["code"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
});

/// A system prompt paired with its rendered user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Renders prompts within a byte budget.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("planner", PLANNER_TEMPLATE),
            ("coder", CODER_TEMPLATE),
            ("modifier", MODIFIER_TEMPLATE),
            ("verifier", VERIFIER_TEMPLATE),
            ("diagnostician", DIAGNOSTICIAN_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("embedded prompt templates are valid");
        }
        Self { env, budget_bytes }
    }

    /// Planning prompt: tool inventory plus either the goal or the iteration context.
    pub fn planner(
        &self,
        goal: &str,
        tools: &[Tool],
        iteration: Option<&IterationContext>,
    ) -> Result<Prompt> {
        let inventory: Vec<_> = tools
            .iter()
            .map(|tool| context! { name => &tool.name, description => &tool.description })
            .collect();
        let user = self.render(
            "planner",
            context! {
                goal => goal.trim(),
                tools => inventory,
                iteration => iteration,
            },
        )?;
        Ok(Prompt {
            system: PLANNER_SYSTEM.trim().to_string(),
            user,
        })
    }

    pub fn coder(&self, details: &str) -> Result<Prompt> {
        let user = self.render("coder", context! { details => details.trim() })?;
        Ok(Prompt {
            system: CODER_SYSTEM.trim().to_string(),
            user,
        })
    }

    pub fn modifier(&self, code: &str, request: &str) -> Result<Prompt> {
        let user = self.render(
            "modifier",
            context! { code => code.trim_end(), request => request.trim() },
        )?;
        Ok(Prompt {
            system: MODIFIER_SYSTEM.trim().to_string(),
            user,
        })
    }

    pub fn verifier(&self, goal: &str, details: &str) -> Result<Prompt> {
        let user = self.render(
            "verifier",
            context! { goal => goal.trim(), details => details.trim() },
        )?;
        Ok(Prompt {
            system: VERIFIER_SYSTEM.trim().to_string(),
            user,
        })
    }

    /// `context_json` is the serialized failure context.
    pub fn diagnostician(&self, context_json: &str) -> Result<Prompt> {
        let user = self.render("diagnostician", context! { context => context_json })?;
        Ok(Prompt {
            system: DIAGNOSTICIAN_SYSTEM.trim().to_string(),
            user,
        })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let rendered = self.env.get_template(name)?.render(ctx)?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes)?;
        Ok(join_sections(&sections))
    }
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<(String, bool, usize, usize)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                caps[1].to_string(),
                &caps[2] == "required",
                whole.start(),
                whole.end(),
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (key, required, _, body_start)) in markers.iter().enumerate() {
        let body_end = markers
            .get(i + 1)
            .map_or(rendered.len(), |next| next.2);
        let content = rendered[*body_start..body_end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(Section {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[Section]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget(sections: &mut Vec<Section>, budget: usize) -> Result<()> {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return Ok(());
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return Ok(());
    }
    if let Some(section) = sections.iter().find(|s| INTACT.contains(&s.key.as_str())) {
        return Err(Fault::InvalidArgument(format!(
            "section '{}' is {} bytes and cannot be cut to fit the prompt budget of {budget} bytes; raise prompt_budget_bytes",
            section.key,
            section.content.len()
        ))
        .into());
    }
    let Some(last) = sections.last_mut() else {
        return Ok(());
    };
    let others = total - last.content.len();
    let allowed = budget.saturating_sub(others);
    let before_len = last.content.len();
    const NOTICE: &str = "\n[truncated]";
    let keep = floor_char_boundary(&last.content, allowed.saturating_sub(NOTICE.len()));
    last.content.truncate(keep);
    if allowed > NOTICE.len() {
        last.content.push_str(NOTICE);
    }
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
    Ok(())
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    (0..=index)
        .rev()
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(0)
}

fn join_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
