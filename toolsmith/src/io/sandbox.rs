//! Sandboxed execution of generated scripts and repair commands.
//!
//! "Sandboxed" here means process isolation only: each script runs as a child
//! process with a wall-clock limit and bounded output capture. Nothing stops a
//! script from touching the filesystem or network.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{self, Command};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::text::{sanitize_tool_name, split_command_line};
use crate::core::types::ExecutionResult;
use crate::io::config::AgentConfig;
use crate::io::process::{CapturedOutput, run_with_timeout};

static SCRIPT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Executes code and shell-free commands, reporting failures as data.
///
/// Implementations never return an error: anything that goes wrong ends up in
/// a failed [`ExecutionResult`] so the caller decides what a failure means.
pub trait ScriptRunner: Send + Sync {
    /// Write `code` to a fresh file derived from `suggested_name` and run it.
    fn run_script(&self, code: &str, suggested_name: &str) -> ExecutionResult;

    /// Tokenize `command` and spawn it directly (no shell).
    fn run_command(&self, command: &str) -> ExecutionResult;
}

/// Runs scripts with a configured interpreter under a scripts directory.
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    scripts_dir: PathBuf,
    interpreter: Vec<String>,
    extension: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl SandboxRunner {
    pub fn new(
        scripts_dir: impl Into<PathBuf>,
        interpreter: Vec<String>,
        extension: impl Into<String>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            interpreter,
            extension: extension.into(),
            timeout,
            output_limit_bytes,
        }
    }

    /// Build a runner whose relative paths resolve against `root`.
    pub fn from_config(root: &Path, cfg: &AgentConfig) -> Self {
        Self::new(
            root.join(&cfg.scripts_dir),
            cfg.interpreter.clone(),
            cfg.script_extension.clone(),
            cfg.script_timeout(),
            cfg.output_limit_bytes,
        )
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    fn write_script(&self, code: &str, suggested_name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.scripts_dir)
            .with_context(|| format!("create scripts dir {}", self.scripts_dir.display()))?;
        let path = self
            .scripts_dir
            .join(unique_script_name(suggested_name, &self.extension));
        fs::write(&path, code).with_context(|| format!("write script {}", path.display()))?;
        Ok(path)
    }

    fn interpreter_command(&self, script: &Path) -> Result<Command> {
        let (program, args) = self
            .interpreter
            .split_first()
            .context("interpreter is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(script);
        Ok(cmd)
    }
}

impl ScriptRunner for SandboxRunner {
    #[instrument(skip(self, code), fields(bytes = code.len()))]
    fn run_script(&self, code: &str, suggested_name: &str) -> ExecutionResult {
        let path = match self.write_script(code, suggested_name) {
            Ok(path) => path,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to write script");
                return ExecutionResult::failure(format!("Failed to write script: {err:#}"));
            }
        };
        let cmd = match self.interpreter_command(&path) {
            Ok(cmd) => cmd,
            Err(err) => return ExecutionResult::failure(format!("{err:#}")),
        };

        let output = match run_with_timeout(cmd, None, self.timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                warn!(script = %path.display(), err = %format!("{err:#}"), "failed to run script");
                return ExecutionResult::failure(format!(
                    "Unexpected error while running {}: {err:#}",
                    path.display()
                ));
            }
        };
        info!(
            script = %path.display(),
            exit_code = ?output.status.code(),
            timed_out = output.timed_out,
            "script finished"
        );
        script_result(&output, self.timeout)
    }

    #[instrument(skip(self))]
    fn run_command(&self, command: &str) -> ExecutionResult {
        let words = match split_command_line(command) {
            Ok(words) => words,
            Err(err) => return ExecutionResult::failure(format!("Invalid command: {err:#}")),
        };
        let Some((program, args)) = words.split_first() else {
            return ExecutionResult::failure("Invalid command: empty command line");
        };
        let mut cmd = Command::new(program);
        cmd.args(args);

        let output = match run_with_timeout(cmd, None, self.timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                warn!(program = %program, err = %format!("{err:#}"), "failed to run command");
                return ExecutionResult::failure(format!("Failed to run `{command}`: {err:#}"));
            }
        };
        info!(program = %program, exit_code = ?output.status.code(), "command finished");
        if output.timed_out {
            return ExecutionResult::failure(format!(
                "command timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        let combined = output.combined_text();
        if output.status.success() {
            ExecutionResult::success(combined)
        } else if combined.trim().is_empty() {
            ExecutionResult::failure(exit_status_message("command", &output))
        } else {
            ExecutionResult::failure(combined)
        }
    }
}

/// Map captured script output to a result.
///
/// Success carries stdout. Failure carries stderr, or the combined output when
/// stderr is empty, or a generic status line when both are empty.
fn script_result(output: &CapturedOutput, timeout: Duration) -> ExecutionResult {
    if output.timed_out {
        let mut message = format!("script timed out after {}s", timeout.as_secs());
        let partial = output.combined_text();
        if !partial.trim().is_empty() {
            message.push('\n');
            message.push_str(&partial);
        }
        return ExecutionResult::failure(message);
    }
    if output.status.success() {
        return ExecutionResult::success(output.stdout_text());
    }
    let stderr = output.stderr_text();
    if !stderr.trim().is_empty() {
        return ExecutionResult::failure(stderr);
    }
    let combined = output.combined_text();
    if !combined.trim().is_empty() {
        return ExecutionResult::failure(combined);
    }
    ExecutionResult::failure(exit_status_message("script", output))
}

fn exit_status_message(what: &str, output: &CapturedOutput) -> String {
    match output.status.code() {
        Some(code) => format!("{what} exited with status {code}"),
        None => format!("{what} was terminated by a signal"),
    }
}

/// `<sanitized stem>_<millis>_<pid>_<seq>.<ext>`, unique within and across processes.
fn unique_script_name(suggested_name: &str, extension: &str) -> String {
    let stem = sanitize_tool_name(suggested_name.trim_end_matches(&format!(".{extension}")));
    let stem = if stem.is_empty() { "tool".to_string() } else { stem };
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = SCRIPT_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = format!("{stem}_{millis}_{}_{seq}.{extension}", process::id());
    debug!(%name, "allocated script name");
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_runner(dir: &Path) -> SandboxRunner {
        SandboxRunner::new(
            dir.join("scripts"),
            vec!["sh".to_string()],
            "sh",
            Duration::from_secs(10),
            10_000,
        )
    }

    #[test]
    fn script_names_are_unique_and_sanitized() {
        let a = unique_script_name("list files!", "py");
        let b = unique_script_name("list files!", "py");
        assert_ne!(a, b);
        assert!(a.starts_with("listfiles_"));
        assert!(a.ends_with(".py"));
        assert!(unique_script_name("???", "py").starts_with("tool_"));
        assert!(unique_script_name("repair_script.py", "py").starts_with("repair_script_"));
    }

    #[cfg(unix)]
    #[test]
    fn successful_script_returns_stdout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = sh_runner(temp.path());
        let result = runner.run_script("echo hello\necho noise 1>&2\n", "greet");
        assert_eq!(result, ExecutionResult::success("hello\n"));
        let written: Vec<_> = fs::read_dir(runner.scripts_dir())
            .expect("scripts dir")
            .collect();
        assert_eq!(written.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn failing_script_prefers_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = sh_runner(temp.path());
        let result = runner.run_script("echo partial\necho boom 1>&2\nexit 3\n", "fail");
        assert!(!result.success);
        assert_eq!(result.output, "boom\n");
    }

    #[cfg(unix)]
    #[test]
    fn failing_script_without_stderr_uses_stdout_then_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = sh_runner(temp.path());
        let result = runner.run_script("echo only stdout\nexit 1\n", "fail");
        assert_eq!(result, ExecutionResult::failure("only stdout\n"));

        let result = runner.run_script("exit 4\n", "silent");
        assert_eq!(result, ExecutionResult::failure("script exited with status 4"));
    }

    #[cfg(unix)]
    #[test]
    fn script_timeout_is_a_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = SandboxRunner::new(
            temp.path().join("scripts"),
            vec!["sh".to_string()],
            "sh",
            Duration::from_millis(200),
            1000,
        );
        let result = runner.run_script("exec sleep 5\n", "slow");
        assert!(!result.success);
        assert!(result.output.contains("timed out after"));
    }

    #[test]
    fn missing_interpreter_is_a_failure_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = SandboxRunner::new(
            temp.path().join("scripts"),
            vec!["definitely-not-an-interpreter-7f3a".to_string()],
            "py",
            Duration::from_secs(5),
            1000,
        );
        let result = runner.run_script("print('hi')", "hi");
        assert!(!result.success);
        assert!(result.output.contains("Unexpected error"));
    }

    #[cfg(unix)]
    #[test]
    fn run_command_tokenizes_and_combines_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = sh_runner(temp.path());
        let result = runner.run_command(r#"sh -c "echo out; echo err 1>&2""#);
        assert!(result.success);
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));

        let result = runner.run_command("sh -c 'exit 2'");
        assert_eq!(result, ExecutionResult::failure("command exited with status 2"));
    }

    #[test]
    fn run_command_rejects_empty_and_unbalanced_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = sh_runner(temp.path());
        assert!(!runner.run_command("   ").success);
        let result = runner.run_command("echo 'unterminated");
        assert!(!result.success);
        assert!(result.output.contains("unterminated"));
    }
}
