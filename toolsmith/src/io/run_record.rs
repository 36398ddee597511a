//! Record of the most recent run (`.toolsmith/last_run.json`).
//!
//! `toolsmith iterate` reads it back to build the iteration context for a
//! follow-up request.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{IterationContext, RunOutcome};

/// File name of the run record inside the state directory.
pub const LAST_RUN_FILE: &str = "last_run.json";

/// Persisted summary of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastRun {
    pub goal: String,
    /// Terminal state name (`done`, `failed`, `needs_human_action`).
    pub state: String,
    pub reason: Option<String>,
    pub last_code: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl LastRun {
    pub fn from_outcome(goal: &str, outcome: &RunOutcome) -> Self {
        Self {
            goal: goal.to_string(),
            state: outcome.state.as_str().to_string(),
            reason: outcome.reason.clone(),
            last_code: outcome.last_code.clone(),
            failure_reason: outcome.failure_reason.clone(),
        }
    }

    /// Build the context for a follow-up run that changes this one's result.
    ///
    /// A run that ended `done` never reports a failure reason.
    pub fn to_iteration_context(&self, modification_request: &str) -> IterationContext {
        let failure_reason = if self.state == "done" {
            None
        } else {
            self.failure_reason.clone().or_else(|| self.reason.clone())
        };
        IterationContext {
            original_goal: self.goal.clone(),
            modification_request: modification_request.to_string(),
            last_code: self.last_code.clone(),
            failure_reason,
        }
    }
}

pub fn load_last_run(path: &Path) -> Result<LastRun> {
    debug!(path = %path.display(), "loading run record");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run record {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse run record {}", path.display()))
}

/// Atomically write the run record (temp file + rename).
pub fn write_last_run(path: &Path, record: &LastRun) -> Result<()> {
    debug!(path = %path.display(), state = %record.state, "writing run record");
    let mut buf = serde_json::to_string_pretty(record)?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
