//! Deterministic, pure logic shared by the engine.
//!
//! Core modules are free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod fault;
pub mod text;
pub mod types;
pub mod wire;
