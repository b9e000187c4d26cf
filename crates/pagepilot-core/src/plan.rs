//! Execution plans: the closed set of atomic actions, step options,
//! validation criteria and per-step reports.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of atomic browser actions.
///
/// Matching on this enum is exhaustive everywhere; an unrecognized action
/// is a deserialization error, never a silent fallthrough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AtomicAction {
    /// Click the element matched by `selector`.
    Click { selector: String },
    /// Type `text` into the element matched by `selector`.
    Type {
        selector: String,
        text: String,
        #[serde(default)]
        clear_first: bool,
    },
    /// Navigate the page to `url`.
    Navigate { url: String },
    /// Wait for a selector to appear and/or a fixed duration.
    Wait {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    /// Scroll the page by the given deltas.
    Scroll {
        #[serde(default)]
        delta_x: f64,
        delta_y: f64,
    },
    /// Select `value` in the `<select>` matched by `selector`.
    Select { selector: String, value: String },
    /// Submit the form containing the element matched by `selector`.
    Submit { selector: String },
    /// Capture a screenshot of the page.
    Screenshot {
        #[serde(default)]
        full_page: bool,
    },
    /// Hover over the element matched by `selector`.
    Hover { selector: String },
    /// Press a single key (e.g. "Enter", "Escape").
    KeyPress { key: String },
}

impl AtomicAction {
    /// Stable action name used in reports and logs.
    pub fn name(&self) -> &'static str {
        match self {
            AtomicAction::Click { .. } => "click",
            AtomicAction::Type { .. } => "type",
            AtomicAction::Navigate { .. } => "navigate",
            AtomicAction::Wait { .. } => "wait",
            AtomicAction::Scroll { .. } => "scroll",
            AtomicAction::Select { .. } => "select",
            AtomicAction::Submit { .. } => "submit",
            AtomicAction::Screenshot { .. } => "screenshot",
            AtomicAction::Hover { .. } => "hover",
            AtomicAction::KeyPress { .. } => "key_press",
        }
    }

    /// The selector this action targets, if it has one.
    pub fn target(&self) -> Option<&str> {
        match self {
            AtomicAction::Click { selector }
            | AtomicAction::Type { selector, .. }
            | AtomicAction::Select { selector, .. }
            | AtomicAction::Submit { selector }
            | AtomicAction::Hover { selector } => Some(selector),
            AtomicAction::Wait { selector, .. } => selector.as_deref(),
            AtomicAction::Navigate { .. }
            | AtomicAction::Scroll { .. }
            | AtomicAction::Screenshot { .. }
            | AtomicAction::KeyPress { .. } => None,
        }
    }

    /// Type-specific default timeout.
    ///
    /// Navigation and waits legitimately take longer than input events.
    pub fn default_timeout(&self) -> Duration {
        match self {
            AtomicAction::Navigate { .. } => Duration::from_secs(60),
            AtomicAction::Wait { .. } => Duration::from_secs(45),
            _ => Duration::from_secs(30),
        }
    }
}

/// Post-step validation criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Validation {
    /// A selector must match at least one element.
    SelectorExists { selector: String },
    /// A selector must match no elements.
    SelectorMissing { selector: String },
    /// The page URL must contain the fragment.
    UrlContains { fragment: String },
    /// The element's text content must contain `text`.
    TextContains { selector: String, text: String },
}

/// One step of a plan: an action plus execution options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    /// The action to perform.
    pub action: AtomicAction,
    /// Per-step timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Optional steps may fail without aborting the plan.
    #[serde(default)]
    pub optional: bool,
    /// Capture a before/after screenshot pair around this step.
    #[serde(default)]
    pub capture: bool,
    /// Validation applied after the action executes.
    #[serde(default)]
    pub validation: Option<Validation>,
}

impl ActionStep {
    /// Wrap an action with default options.
    pub fn new(action: AtomicAction) -> Self {
        Self {
            action,
            timeout_ms: None,
            optional: false,
            capture: false,
            validation: None,
        }
    }

    /// Mark the step optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Enable before/after capture.
    pub fn with_capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Attach a validation criterion.
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Effective timeout: the override or the action's type default.
    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.action.default_timeout())
    }
}

/// What to do when a non-optional step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Abort the plan; later steps are never attempted.
    Abort,
    /// Refresh the page and retry the failing step once, then abort.
    RefreshAndRetry,
}

impl Default for RecoveryStrategy {
    fn default() -> Self {
        RecoveryStrategy::Abort
    }
}

/// An ordered plan of atomic actions. Immutable once a task starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Steps, executed strictly in order.
    pub steps: Vec<ActionStep>,
    /// Recovery strategy applied on step failure.
    #[serde(default)]
    pub recovery: RecoveryStrategy,
}

impl ExecutionPlan {
    /// Create a plan with the default (abort) recovery strategy.
    pub fn new(steps: Vec<ActionStep>) -> Self {
        Self {
            steps,
            recovery: RecoveryStrategy::default(),
        }
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Per-step state machine positions, recorded in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    ResolvingTarget,
    Executing,
    Validating,
    Succeeded,
    Failed,
}

/// Outcome record for a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    /// Step index within the plan.
    pub index: usize,
    /// Action name.
    pub action: String,
    /// Final state of the step machine.
    pub state: StepState,
    /// Target-resolution attempts used.
    pub attempts: u32,
    /// Error message for failed steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Screenshot taken before the action, when capture is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_screenshot: Option<String>,
    /// Screenshot taken after the action, when capture is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_screenshot: Option<String>,
    /// When the step started executing.
    pub started_at: DateTime<Utc>,
    /// When the step reached a final state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepReport {
    /// Start a report for a step.
    pub fn begin(index: usize, action: &AtomicAction) -> Self {
        Self {
            index,
            action: action.name().to_string(),
            state: StepState::Pending,
            attempts: 0,
            error: None,
            before_screenshot: None,
            after_screenshot: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Close the report in a final state.
    pub fn finish(&mut self, state: StepState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }
}

/// Execution report for a whole plan, including partial progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Reports for every step that was started. Steps after an abort point
    /// are absent, never attempted.
    pub steps: Vec<StepReport>,
    /// Number of steps that succeeded.
    pub completed_steps: usize,
    /// Index of the step that aborted the plan, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<usize>,
}

impl ExecutionReport {
    /// Empty report for a plan of `len` steps.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            completed_steps: 0,
            aborted_at: None,
        }
    }
}

impl Default for ExecutionReport {
    fn default() -> Self {
        Self::new()
    }
}
