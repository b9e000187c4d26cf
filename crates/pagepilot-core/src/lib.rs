//! # PagePilot Core
//!
//! Shared data model for the PagePilot automation engine.
//!
//! ## Contents
//!
//! - Task lifecycle types and the status transition graph
//! - Execution plans and the closed set of atomic actions
//! - Parse result types (interactive elements, content blocks)
//! - Engine-wide error taxonomy
//! - Reusable exponential backoff policy
//! - Configuration schema (loaded from TOML by the binary)

pub mod backoff;
pub mod config;
pub mod error;
pub mod parse;
pub mod plan;
pub mod progress;
pub mod task;

pub use backoff::BackoffPolicy;
pub use config::{
    CacheConfig, EngineConfig, ExecutorConfig, FingerprintProfile, ParserConfig, PoolConfig,
    ServerConfig, WebhookConfig, WebhookEndpoint, WorkerConfig,
};
pub use error::{AutomationError, ErrorDetails, ErrorKind};
pub use parse::{
    BoundingBox, ContentBlock, InteractiveElement, PageMeta, ParseOptions, ParseResult,
};
pub use plan::{
    ActionStep, AtomicAction, ExecutionPlan, ExecutionReport, RecoveryStrategy, StepReport,
    StepState, Validation,
};
pub use progress::{NoopProgress, ProgressReporter};
pub use task::{Task, TaskKind, TaskResult, TaskSpec, TaskStatus};
