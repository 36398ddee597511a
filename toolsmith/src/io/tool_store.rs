//! Tool library persisted as a JSON array of `{name, description, code}`.
//!
//! Tools are never overwritten: saving different code under a taken name
//! stores a new record under the first free `<name>_N` instead.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::text::sanitize_tool_name;
use crate::core::types::Tool;

/// What [`ToolStore::save`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new record was appended under the requested name.
    Created(String),
    /// A record with this name and byte-identical code already existed.
    Unchanged(String),
    /// The requested name held different code; stored under `name` instead.
    Renamed { requested: String, name: String },
}

impl SaveOutcome {
    /// Name the tool is stored under.
    pub fn name(&self) -> &str {
        match self {
            SaveOutcome::Created(name) | SaveOutcome::Unchanged(name) => name,
            SaveOutcome::Renamed { name, .. } => name,
        }
    }
}

/// File-backed tool library. Share it across runs as `Arc<ToolStore>`.
#[derive(Debug)]
pub struct ToolStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ToolStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every tool keyed by name.
    ///
    /// A missing or blank file is an empty library; a corrupt file is an error.
    pub fn load(&self) -> Result<BTreeMap<String, Tool>> {
        let _guard = self.guard()?;
        Ok(self
            .read_records()?
            .into_iter()
            .map(|tool| (tool.name.clone(), tool))
            .collect())
    }

    /// All tools sorted by name.
    pub fn list(&self) -> Result<Vec<Tool>> {
        Ok(self.load()?.into_values().collect())
    }

    /// Code of the tool stored under exactly `name`.
    pub fn get(&self, name: &str) -> Result<Option<String>> {
        let _guard = self.guard()?;
        Ok(self
            .read_records()?
            .into_iter()
            .find(|tool| tool.name == name)
            .map(|tool| tool.code))
    }

    /// Persist a tool without ever replacing existing code.
    #[instrument(skip(self, description, code), fields(path = %self.path.display()))]
    pub fn save(&self, name: &str, description: &str, code: &str) -> Result<SaveOutcome> {
        let _guard = self.guard()?;
        let mut records = self
            .read_records()
            .context("refusing to overwrite unreadable tool library")?;

        let requested = match sanitize_tool_name(name) {
            sanitized if sanitized.is_empty() => fallback_name(),
            sanitized => sanitized,
        };

        let outcome = match records.iter().find(|tool| tool.name == requested) {
            Some(existing) if existing.code == code => {
                debug!(name = %requested, "identical tool already stored");
                return Ok(SaveOutcome::Unchanged(requested));
            }
            Some(_) => {
                let fresh = first_free_name(&records, &requested);
                SaveOutcome::Renamed {
                    requested,
                    name: fresh,
                }
            }
            None => SaveOutcome::Created(requested),
        };

        records.push(Tool {
            name: outcome.name().to_string(),
            description: description.to_string(),
            code: code.to_string(),
        });
        self.write_records(&records)?;
        info!(name = %outcome.name(), total = records.len(), "tool saved");
        Ok(outcome)
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| anyhow!("tool library lock poisoned"))
    }

    fn read_records(&self) -> Result<Vec<Tool>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read tool library {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("parse tool library {}", self.path.display()))
    }

    fn write_records(&self, records: &[Tool]) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(records).context("serialize tool library")?;
        buf.push('\n');
        super::write_atomic(&self.path, &buf)
    }
}

fn first_free_name(records: &[Tool], base: &str) -> String {
    (2u64..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| records.iter().all(|tool| &tool.name != candidate))
        .unwrap_or_else(|| format!("{base}_{}", records.len() + 2))
}

fn fallback_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("tool_{millis}")
}
