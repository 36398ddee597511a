//! Generator-backed roles: planning, code acquisition and diagnosis.

pub mod coder;
pub mod diagnostician;
pub mod planner;
