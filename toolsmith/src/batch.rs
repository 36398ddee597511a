//! Concurrent runs of independent goals.
//!
//! Each goal gets its own OS thread and its own [`Agent`]. The tool library is
//! the only shared mutable state; its internal lock serializes saves.

use std::thread;

use tracing::{error, info};

use crate::agent::{Agent, AgentDeps, AgentSettings};
use crate::core::types::{Phase, RunOutcome, TerminalState};
use crate::events::PrefixedSink;

/// Run every goal concurrently and return outcomes in input order.
///
/// Event lines are prefixed with the 1-based goal index.
pub fn run_batch(deps: AgentDeps<'_>, settings: &AgentSettings, goals: &[String]) -> Vec<RunOutcome> {
    info!(goals = goals.len(), "starting batch");
    thread::scope(|scope| {
        let handles: Vec<_> = goals
            .iter()
            .enumerate()
            .map(|(idx, goal)| {
                let settings = settings.clone();
                scope.spawn(move || {
                    let sink = PrefixedSink::new(format!("goal-{}", idx + 1), deps.sink);
                    let agent = Agent::new(AgentDeps { sink: &sink, ..deps }, settings);
                    agent.run(goal, None)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    error!("batch run thread panicked");
                    RunOutcome {
                        state: TerminalState::Failed,
                        reason: Some("run thread panicked".to_string()),
                        last_code: None,
                        failure_reason: None,
                        restarts: 0,
                        saved_tools: Vec::new(),
                        phases: vec![Phase::Terminal],
                    }
                })
            })
            .collect()
    })
}
