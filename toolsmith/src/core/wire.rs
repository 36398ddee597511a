//! Parsing of planner and diagnostician responses.
//!
//! Both responses are JSON. Fences are stripped before parsing; the value is
//! checked against an embedded JSON Schema before it is deserialized, so a
//! structurally wrong answer surfaces as [`Fault::MalformedResponse`] and an
//! answer that is not JSON at all surfaces as a `serde_json::Error`.

use std::collections::BTreeSet;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::fault::Fault;
use crate::core::text::strip_markdown_fences;
use crate::core::types::{Plan, RepairPlan, STEP_TASK_KINDS, Step};

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
const REPAIR_PLAN_SCHEMA: &str = include_str!("../../schemas/repair_plan.schema.json");

/// Parse a planner response into a validated [`Plan`].
pub fn parse_plan(response: &str) -> Result<Plan> {
    let cleaned = strip_markdown_fences(response);
    let value: Value = serde_json::from_str(&cleaned).context("parse plan json")?;
    let Some(items) = value.as_array() else {
        return Err(Fault::MalformedResponse("plan must be a JSON array".to_string()).into());
    };
    for item in items {
        if let Some(task) = item.get("task").and_then(Value::as_str)
            && !STEP_TASK_KINDS.contains(&task)
        {
            return Err(Fault::UnknownTaskKind(task.to_string()).into());
        }
    }
    validate_schema(PLAN_SCHEMA, &value, "plan")?;
    let steps: Vec<Step> = deserialize(value, "plan")?;
    Plan::new(steps)
}

/// Parse a diagnostician response into a [`RepairPlan`].
pub fn parse_repair_plan(response: &str) -> Result<RepairPlan> {
    let cleaned = strip_markdown_fences(response);
    let value: Value = serde_json::from_str(&cleaned).context("parse repair plan json")?;
    validate_schema(REPAIR_PLAN_SCHEMA, &value, "repair plan")?;
    deserialize(value, "repair plan")
}

impl Plan {
    /// Build a plan, enforcing 1-based, strictly increasing, unique step numbers.
    pub fn new(steps: Vec<Step>) -> Result<Self> {
        if steps.is_empty() {
            return Err(Fault::MalformedResponse("plan has no steps".to_string()).into());
        }
        let errors = step_number_violations(&steps);
        if !errors.is_empty() {
            return Err(Fault::MalformedResponse(errors.join("; ")).into());
        }
        Ok(Self { steps })
    }
}

fn step_number_violations(steps: &[Step]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = BTreeSet::new();
    let mut previous = 0u32;
    for step in steps {
        if step.step_number == 0 {
            errors.push("step numbers are 1-based".to_string());
        }
        if !seen.insert(step.step_number) {
            errors.push(format!("duplicate step number {}", step.step_number));
        } else if step.step_number <= previous {
            errors.push(format!(
                "step {} follows step {} (must be strictly increasing)",
                step.step_number, previous
            ));
        }
        previous = previous.max(step.step_number);
    }
    errors
}

fn validate_schema(schema: &str, instance: &Value, label: &str) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(schema).with_context(|| format!("parse {label} schema"))?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid {label} schema: {err}"))?;
    if compiled.is_valid(instance) {
        return Ok(());
    }
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    Err(Fault::MalformedResponse(format!(
        "{label} schema validation failed: {}",
        messages.join("; ")
    ))
    .into())
}

fn deserialize<T: DeserializeOwned>(value: Value, label: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|err| {
        Fault::MalformedResponse(format!("{label} does not match the expected shape: {err}"))
            .into()
    })
}
