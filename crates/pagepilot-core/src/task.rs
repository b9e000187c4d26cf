//! Task definition, status graph and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AutomationError, ErrorDetails};
use crate::parse::{ParseOptions, ParseResult};
use crate::plan::{ExecutionPlan, ExecutionReport};

/// What kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Semantic page parse.
    Parse,
    /// Ordered action plan execution.
    Execute,
}

/// Task status.
///
/// Transitions follow the graph
/// `Queued -> Processing -> {Completed, Failed, Cancelled}` with
/// `Failed -> Queued` allowed only while the retry budget lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker.
    Queued,
    /// Bound to a worker and a browser context.
    Processing,
    /// Finished successfully.
    Completed,
    /// Exhausted or non-retryable failure.
    Failed,
    /// Cooperatively cancelled.
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the transition `self -> next` is on the graph.
    ///
    /// `can_retry` gates the `Failed -> Queued` edge.
    pub fn can_transition(self, next: TaskStatus, can_retry: bool) -> bool {
        match (self, next) {
            (TaskStatus::Queued, TaskStatus::Processing) => true,
            (TaskStatus::Processing, TaskStatus::Completed) => true,
            (TaskStatus::Processing, TaskStatus::Failed) => true,
            (TaskStatus::Processing, TaskStatus::Cancelled) => true,
            (TaskStatus::Failed, TaskStatus::Queued) => can_retry,
            _ => false,
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Queued
    }
}

/// Submission payload: a URL to parse or a plan to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSpec {
    /// Parse a page into a semantic model.
    Parse {
        url: String,
        #[serde(default)]
        options: ParseOptions,
    },
    /// Run an ordered plan of atomic actions.
    Execute { plan: ExecutionPlan },
}

impl TaskSpec {
    /// Kind tag for the task record.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskSpec::Parse { .. } => TaskKind::Parse,
            TaskSpec::Execute { .. } => TaskKind::Execute,
        }
    }
}

/// A unit of asynchronous work tracked through its lifecycle.
///
/// Owned exclusively by the coordinator; every status change goes through
/// [`Task::transition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: Uuid,
    /// Parse or execute.
    pub kind: TaskKind,
    /// Task owner, used to select webhook endpoints.
    pub owner: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Coarse progress, 0..=100.
    pub progress_percentage: u8,
    /// Human-readable description of the current phase or step.
    pub current_step: Option<String>,
    /// Number of whole-task retries performed.
    pub retry_count: u32,
    /// Maximum whole-task retries allowed.
    pub max_retries: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the first worker picked the task up.
    pub started_at: Option<DateTime<Utc>>,
    /// Time a terminal state was reached.
    pub completed_at: Option<DateTime<Utc>>,
    /// Structured failure details when `status == Failed`.
    pub error_details: Option<ErrorDetails>,
    /// Reference into the result store.
    pub result_ref: Option<Uuid>,
    /// Immutable work description.
    pub spec: TaskSpec,
}

impl Task {
    /// Create a queued task from a spec.
    pub fn new(spec: TaskSpec, owner: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: spec.kind(),
            owner: owner.into(),
            status: TaskStatus::Queued,
            progress_percentage: 0,
            current_step: None,
            retry_count: 0,
            max_retries: 2,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_details: None,
            result_ref: None,
            spec,
        }
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Whether a failed task may be re-queued.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Apply a status transition, updating timestamps.
    ///
    /// Rejects any edge not on the lifecycle graph.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), AutomationError> {
        if !self.status.can_transition(next, self.can_retry()) {
            return Err(AutomationError::Internal(format!(
                "illegal task transition {:?} -> {:?} for {}",
                self.status, next, self.id
            )));
        }

        match next {
            TaskStatus::Processing => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Queued => {
                // Re-queued retry: progress restarts, the error is kept for
                // inspection until the next attempt overwrites it.
                self.progress_percentage = 0;
                self.current_step = None;
                self.completed_at = None;
            }
        }

        self.status = next;
        Ok(())
    }
}

/// Terminal output of a task, stored in the result store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResult {
    /// Semantic model of the parsed page.
    Parse { result: ParseResult },
    /// Per-step execution report, including partial results on failure.
    Execute { report: ExecutionReport },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_spec() -> TaskSpec {
        TaskSpec::Parse {
            url: "https://example.com".to_string(),
            options: ParseOptions::default(),
        }
    }

    #[test]
    fn test_task_new() {
        let task = Task::new(parse_spec(), "acme");
        assert_eq!(task.kind, TaskKind::Parse);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.progress_percentage, 0);
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = Task::new(parse_spec(), "acme");
        task.transition(TaskStatus::Processing).unwrap();
        assert!(task.started_at.is_some());
        task.transition(TaskStatus::Completed).unwrap();
        assert!(task.completed_at.is_some());
        assert!(task.status.is_terminal());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut task = Task::new(parse_spec(), "acme");
        // Cannot complete without processing.
        assert!(task.transition(TaskStatus::Completed).is_err());
        // Cannot cancel from the queue; cancellation flows through a worker.
        assert!(task.transition(TaskStatus::Cancelled).is_err());

        task.transition(TaskStatus::Processing).unwrap();
        task.transition(TaskStatus::Cancelled).unwrap();
        // Terminal states are sticky apart from Failed -> Queued.
        assert!(task.transition(TaskStatus::Queued).is_err());
    }

    #[test]
    fn test_retry_edge_respects_budget() {
        let mut task = Task::new(parse_spec(), "acme").with_max_retries(1);
        task.transition(TaskStatus::Processing).unwrap();
        task.transition(TaskStatus::Failed).unwrap();

        assert!(task.can_retry());
        task.transition(TaskStatus::Queued).unwrap();
        task.retry_count += 1;

        task.transition(TaskStatus::Processing).unwrap();
        task.transition(TaskStatus::Failed).unwrap();
        // Budget exhausted, the retry edge is closed.
        assert!(!task.can_retry());
        assert!(task.transition(TaskStatus::Queued).is_err());
    }

    #[test]
    fn test_spec_kind_roundtrip() {
        let json = serde_json::json!({
            "kind": "parse",
            "url": "https://example.com",
        });
        let spec: TaskSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.kind(), TaskKind::Parse);
    }
}
