//! Text generator backend.
//!
//! The [`Generator`] trait decouples planning, coding and diagnosis from the
//! model backend. [`CommandGenerator`] shells out to a CLI (by default
//! `codex exec -`) that reads the prompt on stdin and prints the answer on
//! stdout. Tests use scripted generators that return canned answers.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::fault::Fault;
use crate::io::config::AgentConfig;
use crate::io::process::run_with_timeout;

/// Produces text from a system prompt and a user prompt.
pub trait Generator: Send + Sync {
    fn ask(&self, system: &str, user: &str) -> Result<String>;

    /// Backend name shown in progress output.
    fn name(&self) -> String;
}

/// Generator that pipes the prompt through an external command.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self::new(
            cfg.generator.command.clone(),
            cfg.generator_timeout(),
            cfg.output_limit_bytes,
        )
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(backend = %self.name(), timeout_secs = self.timeout.as_secs()))]
    fn ask(&self, system: &str, user: &str) -> Result<String> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(Fault::InvalidArgument(
                "generator command is empty; check the API key and model configuration"
                    .to_string(),
            )
            .into());
        };
        let mut cmd = Command::new(program);
        cmd.args(args);

        let prompt = compose_prompt(system, user);
        debug!(prompt_bytes = prompt.len(), "invoking generator");
        let output = match run_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "generator could not be started");
                return Err(Fault::InvalidArgument(format!(
                    "generator `{program}` could not be started ({err:#}); check the API key and model configuration"
                ))
                .into());
            }
        };

        if output.timed_out {
            return Err(Fault::Timeout(format!(
                "generator timed out after {}s",
                self.timeout.as_secs()
            ))
            .into());
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generator failed");
            return Err(classify_generator_failure(&output.stderr_text()).into());
        }

        if output.stdout_truncated > 0 {
            warn!(
                dropped_bytes = output.stdout_truncated,
                limit = self.output_limit_bytes,
                "generator answer over limit"
            );
            return Err(Fault::MalformedResponse(format!(
                "generator answer exceeded output limit of {} bytes",
                self.output_limit_bytes
            ))
            .into());
        }

        let answer = output.stdout_text().trim().to_string();
        if answer.is_empty() {
            return Err(Fault::MalformedResponse("generator returned no output".to_string()))
                .context("read generator answer");
        }
        info!(answer_bytes = answer.len(), "generator answered");
        Ok(answer)
    }

    fn name(&self) -> String {
        self.command.join(" ")
    }
}

/// Single stdin prompt for CLI backends that take no separate system prompt.
pub fn compose_prompt(system: &str, user: &str) -> String {
    format!(
        "<system>\n{}\n</system>\n\n{}\n",
        system.trim(),
        user.trim()
    )
}

/// Map a failed generator invocation to a fault the classifier understands.
fn classify_generator_failure(stderr: &str) -> Fault {
    let detail = stderr.trim();
    let lower = detail.to_lowercase();
    if lower.contains("blocked") {
        Fault::Runtime(format!("response blocked by the provider: {detail}"))
    } else if ["connection", "network", "dns", "unreachable"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        Fault::Connection(detail.to_string())
    } else if ["api key", "api_key", "unauthorized", "401"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        Fault::InvalidArgument(format!("API Key rejected: {detail}"))
    } else if lower.contains("timed out") || lower.contains("timeout") {
        Fault::Timeout(detail.to_string())
    } else {
        Fault::Runtime(format!("generator failed: {detail}"))
    }
}
