//! # PagePilot Executor
//!
//! Runs execution plans step by step against a page driver, tracking each
//! step through an explicit state machine and producing a report that
//! survives partial failure.

pub mod executor;

pub use executor::{ExecutionFailure, PlanExecutor};
