//! End-to-end agent runs against a real tool library and a real sandbox.
//!
//! The generator is scripted; scripts are shell scripts run by `sh` so the
//! tests do not depend on a Python installation.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use toolsmith::agent::{Agent, AgentDeps, AgentSettings};
use toolsmith::core::types::{Phase, RunOutcome, TerminalState};
use toolsmith::io::run_record::{LastRun, load_last_run, write_last_run};
use toolsmith::io::sandbox::SandboxRunner;
use toolsmith::io::tool_store::ToolStore;
use toolsmith::test_support::{CollectingSink, RecordingSleeper, ScriptedGenerator};

struct Harness {
    temp: tempfile::TempDir,
    store: ToolStore,
    runner: SandboxRunner,
    sleeper: RecordingSleeper,
    sink: CollectingSink,
}

impl Harness {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ToolStore::new(temp.path().join("tool_library.json"));
        let runner = SandboxRunner::new(
            temp.path().join("generated_scripts"),
            vec!["sh".to_string()],
            "sh",
            Duration::from_secs(10),
            10_000,
        );
        Self {
            temp,
            store,
            runner,
            sleeper: RecordingSleeper::default(),
            sink: CollectingSink::default(),
        }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    fn run(&self, generator: &ScriptedGenerator, goal: &str) -> RunOutcome {
        self.run_with(generator, goal, None)
    }

    fn run_with(
        &self,
        generator: &ScriptedGenerator,
        goal: &str,
        iteration: Option<&toolsmith::core::types::IterationContext>,
    ) -> RunOutcome {
        let deps = AgentDeps {
            generator,
            runner: &self.runner,
            store: &self.store,
            sleeper: &self.sleeper,
            sink: &self.sink,
        };
        Agent::new(deps, AgentSettings::default()).run(goal, iteration)
    }
}

fn create_plan(name: &str) -> String {
    format!(
        r#"[{{"step_number": 1, "task": "CREATE_NEW_TOOL", "details": "print a greeting",
            "suggested_name": "{name}", "description": "Prints a greeting"}}]"#
    )
}

/// A created tool is saved, then reused by name in a later run without
/// another code generation call.
#[test]
fn created_tool_is_reused_by_a_later_run() {
    let h = Harness::new();
    let first = ScriptedGenerator::new()
        .answer(create_plan("greet"))
        .answer("```sh\necho hello\n```");
    let outcome = h.run(&first, "say hello");
    assert!(outcome.success(), "{:?}", outcome.reason);
    assert_eq!(outcome.saved_tools, vec!["greet"]);
    assert!(h.sink.saw("hello"));

    let second = ScriptedGenerator::new()
        .answer(r#"[{"step_number": 1, "task": "USE_EXISTING_TOOL", "details": "greet"}]"#);
    let outcome = h.run(&second, "say hello again");
    assert!(outcome.success(), "{:?}", outcome.reason);
    assert_eq!(second.prompts().len(), 1);
    assert!(second.prompts()[0].1.contains("- greet: Prints a greeting"));
    assert_eq!(outcome.last_code.as_deref(), Some("echo hello"));

    let scripts = fs::read_dir(h.root().join("generated_scripts"))
        .expect("scripts dir")
        .count();
    assert_eq!(scripts, 2);
}

/// A failing script escalates straight to diagnosis, and a self-repair whose
/// command succeeds restarts the task from a fresh plan.
#[test]
fn failing_script_is_repaired_and_task_restarted() {
    let h = Harness::new();
    let marker = h.root().join("repaired");
    let generator = ScriptedGenerator::new()
        .answer(create_plan("check_marker"))
        .answer(format!("test -f {}", marker.display()))
        .answer(format!(
            r#"{{"root_cause_analysis": "marker file missing", "strategy": "ATTEMPT_SELF_REPAIR",
                "plan": [{{"task": "RUN_COMMAND", "command": "touch {}", "description": "create marker"}}]}}"#,
            marker.display()
        ))
        .answer(create_plan("check_marker"))
        .answer(format!("test -f {} && echo present", marker.display()));

    let outcome = h.run(&generator, "make sure the marker exists");

    assert!(outcome.success(), "{:?}", outcome.reason);
    assert!(marker.exists());
    assert_eq!(outcome.restarts, 1);
    assert!(h.sleeper.slept().is_empty());
    let fatal_at = outcome
        .phases
        .iter()
        .position(|p| *p == Phase::Fatal)
        .expect("fatal phase");
    assert_eq!(outcome.phases[fatal_at + 1], Phase::Diagnosing);
    assert!(outcome.phases.contains(&Phase::Restarting));
    assert!(h.sink.saw("marker file missing"));
}

/// Diagnosis that asks for the operator ends the run without a restart.
#[test]
fn operator_instructions_end_the_run() {
    let h = Harness::new();
    let generator = ScriptedGenerator::new()
        .answer(create_plan("fetch"))
        .answer("echo 'SSL: DECRYPTION_FAILED' 1>&2; exit 1")
        .answer(
            r#"{"root_cause_analysis": "TLS interception", "strategy": "REQUEST_USER_INTERVENTION",
                "plan": [{"task": "REQUEST_USER_ACTION", "instructions_for_user": "Turn off the corporate proxy and retry."}]}"#,
        );

    let outcome = h.run(&generator, "download a file");

    assert_eq!(
        outcome.state,
        TerminalState::NeedsHumanAction {
            instructions: "Turn off the corporate proxy and retry.".to_string()
        }
    );
    assert_eq!(
        outcome.failure_reason.as_deref(),
        Some("SSL: DECRYPTION_FAILED\n")
    );
    assert!(h.store.load().expect("load").is_empty());
    assert!(h.sink.saw("Turn off the corporate proxy"));
}

/// The run record feeds an iteration that modifies the previous code.
#[test]
fn iteration_modifies_code_from_the_last_run() {
    let h = Harness::new();
    let first = ScriptedGenerator::new()
        .answer(create_plan("greet"))
        .answer("echo hello");
    let outcome = h.run(&first, "say hello");
    assert!(outcome.success());

    let record_path = h.root().join(".toolsmith/last_run.json");
    write_last_run(&record_path, &LastRun::from_outcome("say hello", &outcome)).expect("record");
    let context = load_last_run(&record_path)
        .expect("load record")
        .to_iteration_context("greet in French");

    let second = ScriptedGenerator::new()
        .answer(
            r#"[{"step_number": 1, "task": "MODIFY_EXISTING_TOOL", "tool_to_modify": "greet",
                "modification_details": "print bonjour instead", "suggested_name": "greet",
                "description": "Prints a French greeting"}]"#,
        )
        .answer("echo bonjour");
    let outcome = h.run_with(&second, "greet in French", Some(&context));

    assert!(outcome.success(), "{:?}", outcome.reason);
    let prompts = second.prompts();
    assert!(prompts[0].1.contains("Original goal: say hello"));
    assert!(prompts[0].1.contains("greet in French"));
    assert!(prompts[1].1.contains("echo hello"));
    assert_eq!(outcome.saved_tools, vec!["greet_2"]);
    let tools = h.store.load().expect("load");
    assert_eq!(tools["greet"].code, "echo hello");
    assert_eq!(tools["greet_2"].code, "echo bonjour");
}
