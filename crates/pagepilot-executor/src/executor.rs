//! Step-by-step plan execution.
//!
//! Each step moves through an explicit state machine: target resolution
//! (with retries), execution under a per-step deadline, then validation.
//! Failures in optional steps are recorded and skipped; failures in
//! required steps trigger the plan's recovery strategy. Steps after an
//! abort point are never attempted.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pagepilot_browser::PageDriver;
use pagepilot_core::{
    ActionStep, AtomicAction, AutomationError, ExecutionPlan, ExecutionReport, ExecutorConfig,
    ProgressReporter, RecoveryStrategy, StepReport, StepState, Validation,
};

/// A failed plan run, carrying the partial report alongside the error.
///
/// Everything executed before the abort point stays in `report` so the
/// caller can persist partial results.
#[derive(Debug)]
pub struct ExecutionFailure {
    /// The error that aborted the plan.
    pub error: AutomationError,
    /// Ordinal (1-based) of the step that aborted the plan.
    pub step_index: usize,
    /// Report for every step that was started.
    pub report: ExecutionReport,
}

/// Executes plans against an acquired page driver.
pub struct PlanExecutor {
    config: ExecutorConfig,
}

impl PlanExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run `plan` to completion or to its abort point.
    ///
    /// Cancellation is observed at step boundaries; a step that has started
    /// runs to its own completion or timeout.
    pub async fn execute(
        &self,
        driver: &Arc<dyn PageDriver>,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<ExecutionReport, ExecutionFailure> {
        let total = plan.len().max(1);
        let mut report = ExecutionReport::new();

        for (index, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                report.aborted_at = Some(index);
                return Err(ExecutionFailure {
                    error: AutomationError::Cancelled,
                    step_index: index + 1,
                    report,
                });
            }

            progress.report(
                ((index * 100) / total) as u8,
                &format!("step {}/{}: {}", index + 1, plan.len(), step.action.name()),
            );

            let (step_report, outcome) = self.run_step(driver, index, step).await;
            report.steps.push(step_report);

            let error = match outcome {
                Ok(()) => {
                    report.completed_steps += 1;
                    continue;
                }
                Err(error) => error,
            };

            if step.optional {
                warn!(
                    "Optional step {} ({}) failed, continuing: {}",
                    index,
                    step.action.name(),
                    error
                );
                continue;
            }

            match plan.recovery {
                RecoveryStrategy::Abort => {
                    report.aborted_at = Some(index);
                    return Err(ExecutionFailure {
                        error,
                        step_index: index + 1,
                        report,
                    });
                }
                RecoveryStrategy::RefreshAndRetry => {
                    warn!(
                        "Step {} ({}) failed, refreshing and retrying once: {}",
                        index,
                        step.action.name(),
                        error
                    );
                    if let Err(refresh_err) = driver.refresh().await {
                        warn!("Refresh before retry failed: {}", refresh_err);
                    }
                    if cancel.is_cancelled() {
                        report.aborted_at = Some(index);
                        return Err(ExecutionFailure {
                            error: AutomationError::Cancelled,
                            step_index: index + 1,
                            report,
                        });
                    }

                    let (retry_report, retry_outcome) = self.run_step(driver, index, step).await;
                    report.steps.push(retry_report);
                    match retry_outcome {
                        Ok(()) => report.completed_steps += 1,
                        Err(retry_error) => {
                            report.aborted_at = Some(index);
                            return Err(ExecutionFailure {
                                error: retry_error,
                                step_index: index + 1,
                                report,
                            });
                        }
                    }
                }
            }
        }

        progress.report(100, "done");
        Ok(report)
    }

    /// Drive one step through resolve, execute and validate.
    async fn run_step(
        &self,
        driver: &Arc<dyn PageDriver>,
        index: usize,
        step: &ActionStep,
    ) -> (StepReport, Result<(), AutomationError>) {
        let mut report = StepReport::begin(index, &step.action);

        if step.capture {
            report.before_screenshot = self.capture(driver).await;
        }

        // `wait` resolves its own selector as part of the action itself.
        let resolve_target = match &step.action {
            AtomicAction::Wait { .. } => None,
            other => other.target(),
        };
        if let Some(selector) = resolve_target {
            report.state = StepState::ResolvingTarget;
            if let Err(error) = self.resolve_target(driver, selector, &mut report).await {
                report.error = Some(error.to_string());
                report.finish(StepState::Failed);
                return (report, Err(error));
            }
        }

        report.state = StepState::Executing;
        let deadline = step.timeout();
        let performed = match timeout(deadline, self.perform(driver, &step.action, deadline)).await
        {
            Ok(result) => result,
            Err(_) => Err(AutomationError::StepTimeout {
                action: step.action.name().to_string(),
                timeout_ms: deadline.as_millis() as u64,
            }),
        };
        match performed {
            Ok(screenshot) => {
                if let Some(data) = screenshot {
                    report.after_screenshot = Some(data);
                }
            }
            Err(error) => {
                report.error = Some(error.to_string());
                report.finish(StepState::Failed);
                return (report, Err(error));
            }
        }

        if let Some(validation) = &step.validation {
            report.state = StepState::Validating;
            if let Err(error) = self.validate(driver, validation).await {
                report.error = Some(error.to_string());
                report.finish(StepState::Failed);
                return (report, Err(error));
            }
        }

        if step.capture {
            report.after_screenshot = self.capture(driver).await;
        }

        report.finish(StepState::Succeeded);
        debug!(
            "Step {} ({}) succeeded in {} attempt(s)",
            index,
            step.action.name(),
            report.attempts.max(1)
        );
        (report, Ok(()))
    }

    /// Poll the target until it is actionable or attempts run out.
    async fn resolve_target(
        &self,
        driver: &Arc<dyn PageDriver>,
        selector: &str,
        report: &mut StepReport,
    ) -> Result<(), AutomationError> {
        let attempts = self.config.resolve_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            report.attempts = attempt;
            let state = driver.element_state(selector).await?;
            if state.actionable() {
                return Ok(());
            }

            let error = if !state.exists {
                AutomationError::ElementNotFound {
                    selector: selector.to_string(),
                }
            } else if !state.attached {
                AutomationError::ElementStale {
                    selector: selector.to_string(),
                }
            } else if !state.visible {
                AutomationError::ValidationFailed {
                    reason: format!("{} is not visible", selector),
                }
            } else {
                AutomationError::ValidationFailed {
                    reason: format!("{} is disabled", selector),
                }
            };
            last_error = Some(error);

            if attempt < attempts {
                sleep(Duration::from_millis(self.config.resolve_retry_delay_ms)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| AutomationError::ElementNotFound {
            selector: selector.to_string(),
        }))
    }

    /// Perform the action itself. Screenshot actions return their image.
    async fn perform(
        &self,
        driver: &Arc<dyn PageDriver>,
        action: &AtomicAction,
        deadline: Duration,
    ) -> Result<Option<String>, AutomationError> {
        match action {
            AtomicAction::Click { selector } => driver.click(selector).await?,
            AtomicAction::Type {
                selector,
                text,
                clear_first,
            } => driver.type_text(selector, text, *clear_first).await?,
            AtomicAction::Navigate { url } => driver.navigate(url, deadline).await?,
            AtomicAction::Wait {
                selector,
                duration_ms,
            } => {
                if let Some(selector) = selector {
                    driver.wait_for_selector(selector, deadline).await?;
                }
                if let Some(ms) = duration_ms {
                    sleep(Duration::from_millis(*ms)).await;
                }
            }
            AtomicAction::Scroll { delta_x, delta_y } => {
                driver.scroll(*delta_x, *delta_y).await?
            }
            AtomicAction::Select { selector, value } => driver.select(selector, value).await?,
            AtomicAction::Submit { selector } => driver.submit(selector).await?,
            AtomicAction::Screenshot { full_page } => {
                return driver.screenshot(*full_page).await.map(Some);
            }
            AtomicAction::Hover { selector } => driver.hover(selector).await?,
            AtomicAction::KeyPress { key } => driver.press_key(key).await?,
        }
        Ok(None)
    }

    /// Check a post-step validation criterion.
    async fn validate(
        &self,
        driver: &Arc<dyn PageDriver>,
        validation: &Validation,
    ) -> Result<(), AutomationError> {
        match validation {
            Validation::SelectorExists { selector } => {
                let state = driver.element_state(selector).await?;
                if !state.exists {
                    return Err(AutomationError::ValidationFailed {
                        reason: format!("expected {} to exist", selector),
                    });
                }
            }
            Validation::SelectorMissing { selector } => {
                let state = driver.element_state(selector).await?;
                if state.exists {
                    return Err(AutomationError::ValidationFailed {
                        reason: format!("expected {} to be absent", selector),
                    });
                }
            }
            Validation::UrlContains { fragment } => {
                let url = driver.current_url().await?;
                if !url.contains(fragment.as_str()) {
                    return Err(AutomationError::ValidationFailed {
                        reason: format!("url {} does not contain {}", url, fragment),
                    });
                }
            }
            Validation::TextContains { selector, text } => {
                let quoted = serde_json::Value::String(selector.clone()).to_string();
                let script = format!(
                    "(document.querySelector({})?.textContent || '')",
                    quoted
                );
                let value = driver.evaluate(&script).await?;
                let content = value.as_str().unwrap_or_default();
                if !content.contains(text.as_str()) {
                    return Err(AutomationError::ValidationFailed {
                        reason: format!("{} text does not contain {:?}", selector, text),
                    });
                }
            }
        }
        Ok(())
    }

    /// Best-effort screenshot for capture pairs.
    async fn capture(&self, driver: &Arc<dyn PageDriver>) -> Option<String> {
        match driver.screenshot(false).await {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Capture screenshot failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagepilot_browser::testing::FakeDriver;
    use pagepilot_browser::ElementState;
    use pagepilot_core::NoopProgress;

    fn executor() -> PlanExecutor {
        PlanExecutor::new(ExecutorConfig {
            resolve_attempts: 3,
            resolve_retry_delay_ms: 0,
        })
    }

    fn click(selector: &str) -> ActionStep {
        ActionStep::new(AtomicAction::Click {
            selector: selector.to_string(),
        })
    }

    fn as_driver(fake: &Arc<FakeDriver>) -> Arc<dyn PageDriver> {
        fake.clone()
    }

    #[tokio::test]
    async fn test_plan_runs_steps_in_order() {
        let fake = FakeDriver::new();
        let plan = ExecutionPlan::new(vec![
            click("#open"),
            ActionStep::new(AtomicAction::Type {
                selector: "#q".to_string(),
                text: "rust".to_string(),
                clear_first: false,
            }),
        ]);

        let report = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap();

        assert_eq!(report.completed_steps, 2);
        assert_eq!(report.aborted_at, None);
        assert!(report
            .steps
            .iter()
            .all(|s| s.state == StepState::Succeeded));
        let calls = fake.calls();
        let click_pos = calls.iter().position(|c| c == "click:#open").unwrap();
        let type_pos = calls.iter().position(|c| c == "type:#q:rust").unwrap();
        assert!(click_pos < type_pos);
    }

    #[tokio::test]
    async fn test_resolution_retries_until_actionable() {
        let fake = FakeDriver::new();
        fake.push_element_state(
            "#late",
            ElementState {
                exists: false,
                ..ElementState::default()
            },
        );
        fake.push_element_state(
            "#late",
            ElementState {
                exists: true,
                visible: true,
                enabled: true,
                attached: true,
                bounding_box: None,
            },
        );
        let plan = ExecutionPlan::new(vec![click("#late")]);

        let report = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap();

        assert_eq!(report.completed_steps, 1);
        assert_eq!(report.steps[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_abort_skips_remaining_steps() {
        let fake = FakeDriver::new();
        fake.push_element_state(
            "#missing",
            ElementState {
                exists: false,
                ..ElementState::default()
            },
        );
        let plan = ExecutionPlan::new(vec![click("#missing"), click("#after")]);

        let failure = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            AutomationError::ElementNotFound { .. }
        ));
        assert_eq!(failure.step_index, 1);
        assert_eq!(failure.report.aborted_at, Some(0));
        assert_eq!(failure.report.steps.len(), 1);
        assert_eq!(failure.report.steps[0].attempts, 3);
        // The second step was never attempted.
        assert!(!fake.calls().iter().any(|c| c.contains("#after")));
    }

    #[tokio::test]
    async fn test_failing_middle_step_reports_second_ordinal() {
        let fake = FakeDriver::new();
        fake.push_element_state(
            "#hidden",
            ElementState {
                exists: true,
                attached: true,
                enabled: true,
                visible: false,
                bounding_box: None,
            },
        );
        let plan = ExecutionPlan::new(vec![click("#first"), click("#hidden"), click("#third")]);

        let failure = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap_err();

        // Steps are reported by ordinal: the second step failed.
        assert_eq!(failure.step_index, 2);
        assert!(matches!(
            failure.error,
            AutomationError::ValidationFailed { .. }
        ));
        // The first step's result is preserved, the third never ran.
        assert_eq!(failure.report.steps[0].state, StepState::Succeeded);
        assert_eq!(failure.report.completed_steps, 1);
        assert!(!fake.calls().iter().any(|c| c.contains("#third")));
    }

    #[tokio::test]
    async fn test_optional_step_failure_continues() {
        let fake = FakeDriver::new();
        fake.fail_next(
            "click",
            AutomationError::Protocol("node detached".to_string()),
        );
        let plan = ExecutionPlan::new(vec![click("#banner").optional(), click("#main")]);

        let report = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap();

        assert_eq!(report.completed_steps, 1);
        assert_eq!(report.steps[0].state, StepState::Failed);
        assert_eq!(report.steps[1].state, StepState::Succeeded);
        assert!(fake.calls().iter().any(|c| c == "click:#main"));
    }

    #[tokio::test]
    async fn test_refresh_and_retry_recovers_once() {
        let fake = FakeDriver::new();
        fake.fail_next("click", AutomationError::Network("reset".to_string()));
        let plan = ExecutionPlan {
            steps: vec![click("#flaky")],
            recovery: RecoveryStrategy::RefreshAndRetry,
        };

        let report = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap();

        assert_eq!(report.completed_steps, 1);
        // Both the failed attempt and the successful retry are recorded.
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].state, StepState::Failed);
        assert_eq!(report.steps[1].state, StepState::Succeeded);
        assert!(fake.calls().iter().any(|c| c == "refresh"));
    }

    #[tokio::test]
    async fn test_refresh_and_retry_aborts_on_second_failure() {
        let fake = FakeDriver::new();
        fake.fail_next("click", AutomationError::Network("reset".to_string()));
        fake.fail_next("click", AutomationError::Network("reset again".to_string()));
        let plan = ExecutionPlan {
            steps: vec![click("#flaky"), click("#after")],
            recovery: RecoveryStrategy::RefreshAndRetry,
        };

        let failure = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap_err();

        assert!(matches!(failure.error, AutomationError::Network(_)));
        assert_eq!(failure.report.aborted_at, Some(0));
        assert!(!fake.calls().iter().any(|c| c.contains("#after")));
    }

    #[tokio::test]
    async fn test_validation_failure_fails_step() {
        let fake = FakeDriver::new();
        fake.push_element_state(
            "#popup",
            ElementState {
                exists: true,
                visible: true,
                enabled: true,
                attached: true,
                bounding_box: None,
            },
        );
        let plan = ExecutionPlan::new(vec![click("#close").with_validation(
            Validation::SelectorMissing {
                selector: "#popup".to_string(),
            },
        )]);

        let failure = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            AutomationError::ValidationFailed { .. }
        ));
        assert_eq!(failure.report.steps[0].state, StepState::Failed);
    }

    #[tokio::test]
    async fn test_url_validation_passes() {
        let fake = FakeDriver::new();
        let plan = ExecutionPlan::new(vec![ActionStep::new(AtomicAction::Navigate {
            url: "https://example.com/dashboard".to_string(),
        })
        .with_validation(Validation::UrlContains {
            fragment: "dashboard".to_string(),
        })]);

        let report = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap();

        assert_eq!(report.completed_steps, 1);
    }

    #[tokio::test]
    async fn test_capture_records_screenshot_pair() {
        let fake = FakeDriver::new();
        let plan = ExecutionPlan::new(vec![click("#go").with_capture()]);

        let report = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap();

        assert_eq!(
            report.steps[0].before_screenshot.as_deref(),
            Some("fake-screenshot-1")
        );
        assert_eq!(
            report.steps[0].after_screenshot.as_deref(),
            Some("fake-screenshot-2")
        );
    }

    #[tokio::test]
    async fn test_screenshot_action_stores_image() {
        let fake = FakeDriver::new();
        let plan = ExecutionPlan::new(vec![ActionStep::new(AtomicAction::Screenshot {
            full_page: true,
        })]);

        let report = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap();

        assert_eq!(
            report.steps[0].after_screenshot.as_deref(),
            Some("fake-screenshot-1")
        );
        assert!(fake.calls().iter().any(|c| c == "screenshot:full"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_deadline_enforced() {
        let fake = FakeDriver::new();
        let plan = ExecutionPlan::new(vec![ActionStep {
            timeout_ms: Some(1_000),
            ..ActionStep::new(AtomicAction::Wait {
                selector: None,
                duration_ms: Some(60_000),
            })
        }]);

        let failure = executor()
            .execute(
                &as_driver(&fake),
                &plan,
                &CancellationToken::new(),
                &NoopProgress,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            AutomationError::StepTimeout { timeout_ms: 1_000, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancellation_observed_at_step_boundary() {
        let fake = FakeDriver::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let plan = ExecutionPlan::new(vec![click("#never")]);

        let failure = executor()
            .execute(&as_driver(&fake), &plan, &cancel, &NoopProgress)
            .await
            .unwrap_err();

        assert!(matches!(failure.error, AutomationError::Cancelled));
        assert!(failure.report.steps.is_empty());
        assert!(fake.calls().is_empty());
    }
}
