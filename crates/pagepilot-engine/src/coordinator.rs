//! Task coordinator: owns the lifecycle of every task.
//!
//! Submissions are persisted, queued FIFO and drained by a fixed set of
//! workers. Each worker acquires a pooled browser context for exactly one
//! task attempt; the RAII guard returns the context on every exit path.
//! Terminal transitions fan out to the webhook dispatcher.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pagepilot_browser::{BrowserContextPool, PoolStats};
use pagepilot_core::{
    AutomationError, ErrorDetails, Task, TaskResult, TaskSpec, TaskStatus, WorkerConfig,
};
use pagepilot_executor::PlanExecutor;
use pagepilot_parser::SemanticParser;

use crate::queue::TaskQueue;
use crate::store::TaskStore;
use crate::webhook::{WebhookDispatcher, WebhookEvent};

/// One failed task attempt.
struct TaskFailure {
    error: AutomationError,
    partial: Option<TaskResult>,
    step_index: Option<usize>,
}

impl TaskFailure {
    fn new(error: AutomationError) -> Self {
        Self {
            error,
            partial: None,
            step_index: None,
        }
    }
}

/// Central task orchestrator.
pub struct TaskCoordinator {
    worker_config: WorkerConfig,
    store: Arc<dyn TaskStore>,
    queue: Arc<TaskQueue>,
    pool: BrowserContextPool,
    parser: Arc<SemanticParser>,
    executor: Arc<PlanExecutor>,
    webhooks: Arc<WebhookDispatcher>,
    results: DashMap<Uuid, TaskResult>,
    cancels: DashMap<Uuid, CancellationToken>,
    live_progress: DashMap<Uuid, (u8, String)>,
    shutdown: CancellationToken,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl TaskCoordinator {
    pub fn new(
        worker_config: WorkerConfig,
        pool: BrowserContextPool,
        store: Arc<dyn TaskStore>,
        parser: Arc<SemanticParser>,
        executor: Arc<PlanExecutor>,
        webhooks: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            worker_config,
            store,
            queue: Arc::new(TaskQueue::new()),
            pool,
            parser,
            executor,
            webhooks,
            results: DashMap::new(),
            cancels: DashMap::new(),
            live_progress: DashMap::new(),
            shutdown: CancellationToken::new(),
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker set.
    pub fn start(self: &Arc<Self>) {
        let count = self.worker_config.count.max(1);
        let mut workers = self.workers.lock();
        for worker_id in 0..count {
            let this = self.clone();
            workers.push(tokio::spawn(async move {
                this.worker_loop(worker_id).await;
            }));
        }
        info!("Coordinator started with {} workers", count);
    }

    /// Stop accepting work, drain the workers and close the pool.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
        self.pool.shutdown().await;
        info!("Coordinator stopped");
    }

    /// Accept a task: persist it, register a cancellation token, queue it.
    pub async fn submit(
        &self,
        spec: TaskSpec,
        owner: impl Into<String>,
    ) -> Result<Task, AutomationError> {
        let task = Task::new(spec, owner).with_max_retries(self.worker_config.max_retries);
        self.store.save(&task).await?;
        self.cancels.insert(task.id, CancellationToken::new());
        self.queue.enqueue(task.id);
        info!("Task {} submitted ({:?})", task.id, task.kind);
        Ok(task)
    }

    /// Current task record, with live progress overlaid while processing.
    pub async fn status(&self, id: &Uuid) -> Result<Option<Task>, AutomationError> {
        let Some(mut task) = self.store.load(id).await? else {
            return Ok(None);
        };
        if task.status == TaskStatus::Processing {
            if let Some(progress) = self.live_progress.get(id) {
                task.progress_percentage = progress.0;
                task.current_step = Some(progress.1.clone());
            }
        }
        Ok(Some(task))
    }

    /// Stored result for a task, if one exists.
    pub fn result(&self, id: &Uuid) -> Option<TaskResult> {
        self.results.get(id).map(|r| r.clone())
    }

    /// Request cooperative cancellation.
    ///
    /// Returns `false` for unknown or already-terminal tasks. A queued task
    /// still flows through a worker, which observes the token at its first
    /// checkpoint.
    pub async fn cancel(&self, id: &Uuid) -> Result<bool, AutomationError> {
        let Some(task) = self.store.load(id).await? else {
            return Ok(false);
        };
        if task.status.is_terminal() {
            return Ok(false);
        }
        match self.cancels.get(id) {
            Some(token) => {
                token.cancel();
                info!("Cancellation requested for task {}", id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Browser pool counters.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Undeliverable webhook events.
    pub fn webhook_dead_letters(&self) -> Vec<crate::webhook::DeadLetter> {
        self.webhooks.dead_letters()
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!("Worker {} started", worker_id);
        loop {
            let id = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                id = self.queue.recv() => id,
            };
            if let Err(e) = self.process(worker_id, id).await {
                error!("Worker {} internal failure on task {}: {}", worker_id, id, e);
            }
        }
        debug!("Worker {} stopped", worker_id);
    }

    /// Run one attempt of one task.
    async fn process(&self, worker_id: usize, id: Uuid) -> Result<(), AutomationError> {
        let Some(mut task) = self.store.load(&id).await? else {
            warn!("Task {} missing from store, dropping", id);
            return Ok(());
        };
        if task.status != TaskStatus::Queued {
            warn!("Task {} dequeued in state {:?}, skipping", id, task.status);
            return Ok(());
        }

        let cancel = self
            .cancels
            .get(&id)
            .map(|t| t.value().clone())
            .unwrap_or_default();

        task.transition(TaskStatus::Processing)?;
        self.store.save(&task).await?;
        debug!("Worker {} picked up task {}", worker_id, id);

        if cancel.is_cancelled() {
            return self.finish_cancelled(task, None).await;
        }

        match self.run_attempt(&task, &cancel).await {
            Ok(result) => self.finish_completed(task, result).await,
            Err(failure) if matches!(failure.error, AutomationError::Cancelled) => {
                self.finish_cancelled(task, failure.partial).await
            }
            Err(failure) => self.finish_failed(task, failure).await,
        }
    }

    /// Acquire a context and run the task's spec against it.
    async fn run_attempt(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, TaskFailure> {
        let mut guard = self.pool.acquire().await.map_err(TaskFailure::new)?;
        let driver = guard.driver();
        let id = task.id;
        let reporter = |percent: u8, step: &str| {
            self.live_progress.insert(id, (percent, step.to_string()));
        };

        match &task.spec {
            TaskSpec::Parse { url, options } => {
                match self
                    .parser
                    .parse(driver.clone(), url, options, cancel, &reporter)
                    .await
                {
                    Ok(result) => Ok(TaskResult::Parse { result }),
                    Err(error) => {
                        if matches!(error, AutomationError::Protocol(_)) {
                            guard.flag_discard();
                        }
                        Err(TaskFailure::new(error))
                    }
                }
            }
            TaskSpec::Execute { plan } => {
                match self.executor.execute(&driver, plan, cancel, &reporter).await {
                    Ok(report) => Ok(TaskResult::Execute { report }),
                    Err(failure) => {
                        if matches!(failure.error, AutomationError::Protocol(_)) {
                            guard.flag_discard();
                        }
                        Err(TaskFailure {
                            error: failure.error,
                            partial: Some(TaskResult::Execute {
                                report: failure.report,
                            }),
                            step_index: Some(failure.step_index),
                        })
                    }
                }
            }
        }
    }

    async fn finish_completed(
        &self,
        mut task: Task,
        result: TaskResult,
    ) -> Result<(), AutomationError> {
        let summary = Self::summarize(&result);
        self.results.insert(task.id, result);
        task.result_ref = Some(task.id);
        task.progress_percentage = 100;
        task.current_step = Some("done".to_string());
        task.transition(TaskStatus::Completed)?;
        self.store.save(&task).await?;
        self.cleanup(&task.id);
        info!("Task {} completed", task.id);
        self.emit(&task, summary);
        Ok(())
    }

    async fn finish_cancelled(
        &self,
        mut task: Task,
        partial: Option<TaskResult>,
    ) -> Result<(), AutomationError> {
        let summary = match &partial {
            Some(result) => Self::summarize(result),
            None => json!({}),
        };
        if let Some(result) = partial {
            self.results.insert(task.id, result);
            task.result_ref = Some(task.id);
        }
        task.transition(TaskStatus::Cancelled)?;
        self.store.save(&task).await?;
        self.cleanup(&task.id);
        info!("Task {} cancelled", task.id);
        self.emit(&task, summary);
        Ok(())
    }

    async fn finish_failed(
        &self,
        mut task: Task,
        failure: TaskFailure,
    ) -> Result<(), AutomationError> {
        let mut details = ErrorDetails::from_error(&failure.error);
        if let Some(index) = failure.step_index {
            details = details.with_step_index(index);
        }
        let summary = match &failure.partial {
            Some(result) => Self::summarize(result),
            None => json!({ "error": failure.error.to_string() }),
        };
        if let Some(result) = failure.partial {
            self.results.insert(task.id, result);
            task.result_ref = Some(task.id);
        }
        task.error_details = Some(details);
        task.transition(TaskStatus::Failed)?;

        if failure.error.is_transient() && task.can_retry() {
            task.transition(TaskStatus::Queued)?;
            task.retry_count += 1;
            self.store.save(&task).await?;
            self.live_progress.remove(&task.id);

            let policy = &self.worker_config.retry_backoff;
            let delay = policy
                .delay_for(task.retry_count)
                .unwrap_or(Duration::from_millis(policy.base_delay_ms));
            warn!(
                "Task {} failed ({}), retry {}/{} in {:?}",
                task.id, failure.error, task.retry_count, task.max_retries, delay
            );
            let queue = self.queue.clone();
            let id = task.id;
            tokio::spawn(async move {
                sleep(delay).await;
                queue.enqueue(id);
            });
            return Ok(());
        }

        self.store.save(&task).await?;
        self.cleanup(&task.id);
        error!("Task {} failed permanently: {}", task.id, failure.error);
        self.emit(&task, summary);
        Ok(())
    }

    fn cleanup(&self, id: &Uuid) {
        self.cancels.remove(id);
        self.live_progress.remove(id);
    }

    fn emit(&self, task: &Task, summary: Value) {
        let event = WebhookEvent::terminal(task.id, task.status, &task.owner, summary);
        let dispatcher = self.webhooks.clone();
        tokio::spawn(async move {
            dispatcher.dispatch(event).await;
        });
    }

    fn summarize(result: &TaskResult) -> Value {
        match result {
            TaskResult::Parse { result } => json!({
                "elements": result.elements.len(),
                "blocks": result.blocks.len(),
                "degraded": result.degraded,
                "confidence": result.confidence,
            }),
            TaskResult::Execute { report } => json!({
                "completed_steps": report.completed_steps,
                "steps_started": report.steps.len(),
                "aborted_at": report.aborted_at,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;
    use pagepilot_browser::testing::{FakeDriver, FakeFactory};
    use pagepilot_browser::ElementState;
    use pagepilot_core::{
        ActionStep, AtomicAction, BackoffPolicy, CacheConfig, ErrorKind, ExecutionPlan,
        ExecutorConfig, ParseOptions, ParserConfig, PoolConfig, WebhookConfig,
    };
    use pagepilot_parser::ResultCache;

    struct Harness {
        coordinator: Arc<TaskCoordinator>,
        factory: Arc<FakeFactory>,
    }

    fn harness(pool_size: usize, workers: usize) -> Harness {
        harness_with_webhooks(pool_size, workers, WebhookConfig {
            endpoints: Vec::new(),
            request_timeout_ms: 1_000,
            retry: BackoffPolicy::default(),
        })
    }

    fn harness_with_webhooks(
        pool_size: usize,
        workers: usize,
        webhooks: WebhookConfig,
    ) -> Harness {
        let factory = Arc::new(FakeFactory::default());
        let pool = BrowserContextPool::new(
            PoolConfig {
                max_size: pool_size,
                acquire_timeout_ms: 5_000,
                ..PoolConfig::default()
            },
            factory.clone(),
        );
        let cache = Arc::new(ResultCache::new());
        let parser = Arc::new(SemanticParser::new(
            ParserConfig::default(),
            cache,
            Duration::from_secs(CacheConfig::default().ttl_secs),
        ));
        let executor = Arc::new(PlanExecutor::new(ExecutorConfig {
            resolve_attempts: 2,
            resolve_retry_delay_ms: 0,
        }));
        let coordinator = Arc::new(TaskCoordinator::new(
            WorkerConfig {
                count: workers,
                max_retries: 1,
                retry_backoff: BackoffPolicy {
                    base_delay_ms: 1,
                    multiplier: 2.0,
                    max_delay_ms: 10,
                    max_attempts: 5,
                },
            },
            pool,
            Arc::new(MemoryTaskStore::new()),
            parser,
            executor,
            Arc::new(WebhookDispatcher::new(webhooks)),
        ));
        coordinator.start();
        Harness {
            coordinator,
            factory,
        }
    }

    fn parse_spec(url: &str) -> TaskSpec {
        TaskSpec::Parse {
            url: url.to_string(),
            options: ParseOptions::default(),
        }
    }

    fn click_plan(selector: &str) -> TaskSpec {
        TaskSpec::Execute {
            plan: ExecutionPlan::new(vec![ActionStep::new(AtomicAction::Click {
                selector: selector.to_string(),
            })]),
        }
    }

    async fn wait_terminal(coordinator: &TaskCoordinator, id: &Uuid) -> Task {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let task = coordinator.status(id).await.unwrap().unwrap();
                if task.status.is_terminal() {
                    return task;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not reach a terminal state")
    }

    /// Seed the pool with one context so its driver can be scripted.
    async fn seeded_driver(harness: &Harness) -> Arc<FakeDriver> {
        // Run a trivial plan so the pool creates and parks one context.
        let warmup = harness
            .coordinator
            .submit(click_plan("#warmup"), "test")
            .await
            .unwrap();
        wait_terminal(&harness.coordinator, &warmup.id).await;
        harness.factory.drivers()[0].clone()
    }

    #[tokio::test]
    async fn test_parse_task_completes() {
        let harness = harness(2, 2);
        let task = harness
            .coordinator
            .submit(parse_spec("https://example.com"), "acme")
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Queued);

        let done = wait_terminal(&harness.coordinator, &task.id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress_percentage, 100);
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());
        assert!(matches!(
            harness.coordinator.result(&task.id),
            Some(TaskResult::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_contexts_released_after_success_and_failure() {
        let harness = harness(2, 2);

        let ok = harness
            .coordinator
            .submit(click_plan("#fine"), "acme")
            .await
            .unwrap();
        wait_terminal(&harness.coordinator, &ok.id).await;

        let driver = harness.factory.drivers()[0].clone();
        driver.push_element_state(
            "#gone",
            ElementState {
                exists: false,
                ..ElementState::default()
            },
        );
        let failing = harness
            .coordinator
            .submit(click_plan("#gone"), "acme")
            .await
            .unwrap();
        let done = wait_terminal(&harness.coordinator, &failing.id).await;

        assert_eq!(done.status, TaskStatus::Failed);
        let stats = harness.coordinator.pool_stats();
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrent_contexts() {
        let harness = harness(2, 4);
        let mut ids = Vec::new();
        for i in 0..10 {
            let task = harness
                .coordinator
                .submit(click_plan(&format!("#item-{}", i)), "acme")
                .await
                .unwrap();
            ids.push(task.id);
        }

        for id in &ids {
            let done = wait_terminal(&harness.coordinator, id).await;
            assert_eq!(done.status, TaskStatus::Completed);
        }
        assert!(harness.factory.created() <= 2);
        assert_eq!(harness.coordinator.pool_stats().active, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_requeues_and_succeeds() {
        let harness = harness(1, 1);
        let driver = seeded_driver(&harness).await;
        driver.fail_next("navigate", AutomationError::Network("reset".to_string()));

        let task = harness
            .coordinator
            .submit(parse_spec("https://example.com"), "acme")
            .await
            .unwrap();
        let done = wait_terminal(&harness.coordinator, &task.id).await;

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.retry_count, 1);
    }

    #[tokio::test]
    async fn test_non_transient_failure_is_terminal_with_partial_result() {
        let harness = harness(1, 1);
        let driver = seeded_driver(&harness).await;
        driver.push_element_state(
            "#missing",
            ElementState {
                exists: false,
                ..ElementState::default()
            },
        );

        let task = harness
            .coordinator
            .submit(click_plan("#missing"), "acme")
            .await
            .unwrap();
        let done = wait_terminal(&harness.coordinator, &task.id).await;

        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.retry_count, 0);
        let details = done.error_details.unwrap();
        assert_eq!(details.kind, ErrorKind::ElementNotFound);
        assert_eq!(details.step_index, Some(1));
        // The partial report survives.
        match harness.coordinator.result(&task.id) {
            Some(TaskResult::Execute { report }) => {
                assert_eq!(report.aborted_at, Some(0));
                assert_eq!(report.completed_steps, 0);
            }
            other => panic!("expected partial execute report, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_step_failure_keeps_first_and_skips_third() {
        let harness = harness(1, 1);
        let driver = seeded_driver(&harness).await;
        driver.push_element_state(
            "#hidden",
            ElementState {
                exists: true,
                attached: true,
                enabled: true,
                visible: false,
                bounding_box: None,
            },
        );

        let spec = TaskSpec::Execute {
            plan: ExecutionPlan::new(vec![
                ActionStep::new(AtomicAction::Click {
                    selector: "#first".to_string(),
                }),
                ActionStep::new(AtomicAction::Click {
                    selector: "#hidden".to_string(),
                }),
                ActionStep::new(AtomicAction::Click {
                    selector: "#third".to_string(),
                }),
            ]),
        };
        let task = harness.coordinator.submit(spec, "acme").await.unwrap();
        let done = wait_terminal(&harness.coordinator, &task.id).await;

        assert_eq!(done.status, TaskStatus::Failed);
        let details = done.error_details.unwrap();
        assert_eq!(details.kind, ErrorKind::ValidationFailed);
        // Steps are numbered from 1; the second step failed.
        assert_eq!(details.step_index, Some(2));
        match harness.coordinator.result(&task.id) {
            Some(TaskResult::Execute { report }) => {
                assert_eq!(report.completed_steps, 1);
                assert_eq!(report.steps[0].state, pagepilot_core::StepState::Succeeded);
            }
            other => panic!("expected partial execute report, got {:?}", other),
        }
        assert!(!driver.calls().iter().any(|c| c.contains("#third")));
    }

    #[tokio::test]
    async fn test_cancel_processing_task() {
        let harness = harness(1, 1);
        let spec = TaskSpec::Execute {
            plan: ExecutionPlan::new(
                (0..5)
                    .map(|_| {
                        ActionStep::new(AtomicAction::Wait {
                            selector: None,
                            duration_ms: Some(100),
                        })
                    })
                    .collect(),
            ),
        };
        let task = harness.coordinator.submit(spec, "acme").await.unwrap();

        sleep(Duration::from_millis(150)).await;
        assert!(harness.coordinator.cancel(&task.id).await.unwrap());

        let done = wait_terminal(&harness.coordinator, &task.id).await;
        assert_eq!(done.status, TaskStatus::Cancelled);
        // The plan was cut short at a step boundary.
        match harness.coordinator.result(&task.id) {
            Some(TaskResult::Execute { report }) => {
                assert!(report.completed_steps < 5);
                assert!(report.aborted_at.is_some());
            }
            other => panic!("expected partial execute report, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_queued_task_flows_through_worker() {
        let harness = harness(1, 1);
        let blocker = harness
            .coordinator
            .submit(
                TaskSpec::Execute {
                    plan: ExecutionPlan::new(vec![ActionStep::new(AtomicAction::Wait {
                        selector: None,
                        duration_ms: Some(200),
                    })]),
                },
                "acme",
            )
            .await
            .unwrap();
        let victim = harness
            .coordinator
            .submit(click_plan("#never"), "acme")
            .await
            .unwrap();
        assert!(harness.coordinator.cancel(&victim.id).await.unwrap());

        let done = wait_terminal(&harness.coordinator, &victim.id).await;
        assert_eq!(done.status, TaskStatus::Cancelled);
        // It still passed through Processing on its way out.
        assert!(done.started_at.is_some());

        wait_terminal(&harness.coordinator, &blocker.id).await;
    }

    #[tokio::test]
    async fn test_cancel_terminal_task_is_a_noop() {
        let harness = harness(1, 1);
        let task = harness
            .coordinator
            .submit(click_plan("#done"), "acme")
            .await
            .unwrap();
        wait_terminal(&harness.coordinator, &task.id).await;

        assert!(!harness.coordinator.cancel(&task.id).await.unwrap());
        let after = harness.coordinator.status(&task.id).await.unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_webhook_emitted_on_completion() {
        use wiremock::matchers::{body_partial_json, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "event": "task.completed" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let harness = harness_with_webhooks(
            1,
            1,
            WebhookConfig {
                endpoints: vec![pagepilot_core::WebhookEndpoint {
                    url: format!("{}/hook", server.uri()),
                    owner: None,
                }],
                request_timeout_ms: 1_000,
                retry: BackoffPolicy::default(),
            },
        );
        let task = harness
            .coordinator
            .submit(click_plan("#notify"), "acme")
            .await
            .unwrap();
        wait_terminal(&harness.coordinator, &task.id).await;

        // Delivery is spawned off the worker; give it a moment.
        sleep(Duration::from_millis(100)).await;
        assert!(harness.coordinator.webhook_dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_dead_letter_leaves_task_completed() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let harness = harness_with_webhooks(
            1,
            1,
            WebhookConfig {
                endpoints: vec![pagepilot_core::WebhookEndpoint {
                    url: format!("{}/hook", server.uri()),
                    owner: None,
                }],
                request_timeout_ms: 1_000,
                retry: BackoffPolicy {
                    base_delay_ms: 1,
                    multiplier: 2.0,
                    max_delay_ms: 10,
                    max_attempts: 2,
                },
            },
        );
        let task = harness
            .coordinator
            .submit(click_plan("#notify"), "acme")
            .await
            .unwrap();
        let done = wait_terminal(&harness.coordinator, &task.id).await;
        assert_eq!(done.status, TaskStatus::Completed);

        // Let the spawned delivery exhaust its attempts.
        sleep(Duration::from_millis(200)).await;
        let dead = harness.coordinator.webhook_dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);

        // Delivery failure never feeds back into the task record.
        let after = harness.coordinator.status(&task.id).await.unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::Completed);
        assert!(after.result_ref.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers() {
        let harness = harness(1, 2);
        let task = harness
            .coordinator
            .submit(click_plan("#last"), "acme")
            .await
            .unwrap();
        wait_terminal(&harness.coordinator, &task.id).await;

        harness.coordinator.shutdown().await;
        assert_eq!(harness.coordinator.pool_stats().active, 0);
    }
}
