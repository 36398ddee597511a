//! Agent configuration stored under `.toolsmith/config.toml`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable that overrides `generator.command` (whitespace-split).
pub const GENERATOR_ENV: &str = "TOOLSMITH_GENERATOR";

/// Agent configuration (TOML).
///
/// Missing fields default to the values the CLI ships with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Attempts allowed per fault fingerprint inside one retried operation.
    pub max_retries: u32,

    /// Full restarts of the primary task allowed after a successful self-repair.
    pub max_restarts: u32,

    /// Ask the planner to append a verification step.
    pub verify: bool,

    /// JSON file holding the tool library.
    pub tool_library_path: PathBuf,

    /// Directory generated scripts are written to before execution.
    pub scripts_dir: PathBuf,

    /// File extension of generated scripts (without the dot).
    pub script_extension: String,

    /// Interpreter invocation; the script path is appended as the last argument.
    pub interpreter: Vec<String>,

    /// Wall-clock limit for one generated script.
    pub script_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes per stream.
    pub output_limit_bytes: usize,

    /// Maximum bytes of a user prompt before low-priority sections are dropped.
    pub prompt_budget_bytes: usize,

    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command that reads a prompt on stdin and prints the answer on stdout.
    pub command: Vec<String>,

    /// Wall-clock limit for one generator call.
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string(), "-".to_string()],
            timeout_secs: 10 * 60,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_restarts: 1,
            verify: false,
            tool_library_path: PathBuf::from("tool_library.json"),
            scripts_dir: PathBuf::from("generated_scripts"),
            script_extension: "py".to_string(),
            interpreter: vec!["python3".to_string()],
            script_timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
            prompt_budget_bytes: 40_000,
            generator: GeneratorConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.script_timeout_secs == 0 {
            return Err(anyhow!("script_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.interpreter.is_empty() || self.interpreter[0].trim().is_empty() {
            return Err(anyhow!("interpreter must be a non-empty array"));
        }
        if self.script_extension.contains('.') || self.script_extension.contains('/') {
            return Err(anyhow!("script_extension must be a bare extension such as \"py\""));
        }
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator.timeout_secs)
    }

    /// Apply `TOOLSMITH_GENERATOR` if it is set and non-blank.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = env::var(GENERATOR_ENV) {
            self.apply_generator_override(&raw);
        }
    }

    fn apply_generator_override(&mut self, raw: &str) {
        let command: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
        if !command.is_empty() {
            debug!(?command, "generator command overridden from environment");
            self.generator.command = command;
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".toolsmith/config.toml");
        let cfg = AgentConfig {
            verify: true,
            max_restarts: 2,
            ..AgentConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_retries = 5\n[generator]\ncommand = [\"llm\"]\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.generator.command, vec!["llm"]);
        assert_eq!(cfg.generator.timeout_secs, 600);
        assert_eq!(cfg.interpreter, vec!["python3"]);
    }

    #[test]
    fn rejects_zero_retries_and_empty_interpreter() {
        let cfg = AgentConfig {
            max_retries: 0,
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = AgentConfig {
            interpreter: Vec::new(),
            ..AgentConfig::default()
        };
        assert!(cfg.validate().unwrap_err().to_string().contains("interpreter"));
    }

    #[test]
    fn generator_override_splits_on_whitespace() {
        let mut cfg = AgentConfig::default();
        cfg.apply_generator_override("  ");
        assert_eq!(cfg.generator.command, GeneratorConfig::default().command);
        cfg.apply_generator_override("llm -m gpt-4o");
        assert_eq!(cfg.generator.command, vec!["llm", "-m", "gpt-4o"]);
    }
}
