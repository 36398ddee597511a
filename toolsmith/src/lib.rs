//! Autonomous task agent that plans, writes, runs and reuses its own tools.
//!
//! Given a free-text goal, the agent asks a generator for a stepwise plan,
//! acquires a script for each step (from its tool library or by generating
//! one), runs it as a child process, and saves successful new tools for later
//! runs. Faults are classified and retried within bounds; a fault that cannot
//! be retried away is diagnosed, and the agent either repairs its environment
//! and starts over or hands instructions to the operator.
//!
//! - **[`core`]**: pure logic (types, fault classification, response parsing).
//! - **[`io`]**: side effects (config, processes, tool library, generator, prompts).
//! - **[`agents`]**: generator-backed roles (planner, coder, diagnostician).
//! - **[`agent`]** and **[`batch`]**: run orchestration.

pub mod agent;
pub mod agents;
pub mod batch;
pub mod core;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
