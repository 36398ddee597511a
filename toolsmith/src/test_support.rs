//! Scripted doubles for the generator, the script runner, sleeping and the
//! event sink. Exposed to integration tests through the `test-support` feature.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;

use crate::core::fault::Fault;
use crate::core::types::ExecutionResult;
use crate::events::EventSink;
use crate::io::generator::Generator;
use crate::io::sandbox::ScriptRunner;
use crate::io::tool_store::ToolStore;
use crate::retry::Sleeper;

/// Tool library in a fresh temporary directory. Keep the guard alive for as
/// long as the store is used.
pub fn temp_store() -> (tempfile::TempDir, ToolStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = ToolStore::new(temp.path().join("tool_library.json"));
    (temp, store)
}

/// Generator that replays queued answers and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    answers: Mutex<VecDeque<Result<String, Fault>>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful answer.
    pub fn answer(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// Queue a fault.
    pub fn fail(self, fault: Fault) -> Self {
        self.push(Err(fault));
        self
    }

    pub fn push(&self, answer: Result<String, Fault>) {
        self.answers
            .lock()
            .expect("answers lock")
            .push_back(answer);
    }

    /// `(system, user)` pairs in call order.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().expect("answers lock").len()
    }
}

impl Generator for ScriptedGenerator {
    fn ask(&self, system: &str, user: &str) -> Result<String> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push((system.to_string(), user.to_string()));
        let next = self.answers.lock().expect("answers lock").pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(fault)) => Err(fault.into()),
            None => Err(Fault::Runtime("no scripted answer left".to_string()).into()),
        }
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

/// Script runner that replays queued results and records what it was asked to run.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    results: Mutex<VecDeque<ExecutionResult>>,
    command_results: Mutex<VecDeque<ExecutionResult>>,
    fallback: Option<ExecutionResult>,
    scripts: Mutex<Vec<(String, String)>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// Runner that fails once its queues are empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner that succeeds with `ok` once its queues are empty.
    pub fn succeeding() -> Self {
        Self {
            fallback: Some(ExecutionResult::success("ok")),
            ..Self::default()
        }
    }

    /// Queue a result for the next `run_script` call.
    pub fn script_result(self, result: ExecutionResult) -> Self {
        self.results
            .lock()
            .expect("results lock")
            .push_back(result);
        self
    }

    /// Queue a result for the next `run_command` call.
    pub fn command_result(self, result: ExecutionResult) -> Self {
        self.command_results
            .lock()
            .expect("command results lock")
            .push_back(result);
        self
    }

    /// `(suggested_name, code)` pairs in call order.
    pub fn scripts(&self) -> Vec<(String, String)> {
        self.scripts.lock().expect("scripts lock").clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }

    fn next(&self, queue: &Mutex<VecDeque<ExecutionResult>>) -> ExecutionResult {
        queue
            .lock()
            .expect("queue lock")
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| ExecutionResult::failure("no scripted result left"))
    }
}

impl ScriptRunner for ScriptedRunner {
    fn run_script(&self, code: &str, suggested_name: &str) -> ExecutionResult {
        self.scripts
            .lock()
            .expect("scripts lock")
            .push((suggested_name.to_string(), code.to_string()));
        self.next(&self.results)
    }

    fn run_command(&self, command: &str) -> ExecutionResult {
        self.commands
            .lock()
            .expect("commands lock")
            .push(command.to_string());
        self.next(&self.command_results)
    }
}

/// Sleeper that records requested pauses without sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().expect("sleeper lock").clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().expect("sleeper lock").push(duration);
    }
}

/// Event sink that keeps every line.
#[derive(Debug, Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("sink lock").clone()
    }

    /// Whether any line contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .expect("sink lock")
            .iter()
            .any(|line| line.contains(needle))
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, line: &str) {
        self.lines.lock().expect("sink lock").push(line.to_string());
    }
}
