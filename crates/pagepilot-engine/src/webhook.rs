//! Webhook delivery on terminal task transitions.
//!
//! Delivery is at-least-once per endpoint with exponential backoff; an
//! event that exhausts its attempts lands in the dead-letter list. Webhook
//! failures never affect the task record itself.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use pagepilot_core::{TaskStatus, WebhookConfig, WebhookEndpoint};

/// Payload POSTed to each matching endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Event name: `task.completed`, `task.failed` or `task.cancelled`.
    pub event: String,
    /// Task the event refers to.
    pub task_id: Uuid,
    /// Terminal status of the task.
    pub status: TaskStatus,
    /// Owner the task was submitted under.
    #[serde(skip)]
    pub owner: String,
    /// Compact summary of the outcome, not the full result.
    pub result_summary: Value,
    /// Event creation time.
    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    /// Build an event for a terminal status.
    pub fn terminal(task_id: Uuid, status: TaskStatus, owner: &str, summary: Value) -> Self {
        let event = match status {
            TaskStatus::Completed => "task.completed",
            TaskStatus::Failed => "task.failed",
            TaskStatus::Cancelled => "task.cancelled",
            other => {
                debug_assert!(false, "non-terminal webhook status {:?}", other);
                "task.unknown"
            }
        };
        Self {
            event: event.to_string(),
            task_id,
            status,
            owner: owner.to_string(),
            result_summary: summary,
            timestamp: Utc::now(),
        }
    }
}

/// An event that exhausted its delivery attempts for one endpoint.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub url: String,
    pub event: WebhookEvent,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

/// A successfully acknowledged delivery.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub url: String,
    pub event: String,
    pub task_id: Uuid,
    pub attempts: u32,
    pub delivered_at: DateTime<Utc>,
}

/// Delivers terminal-task events to configured endpoints.
pub struct WebhookDispatcher {
    config: WebhookConfig,
    client: reqwest::Client,
    deliveries: Mutex<Vec<DeliveryRecord>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            deliveries: Mutex::new(Vec::new()),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    /// Deliver `event` to every endpoint subscribed to its owner.
    ///
    /// Endpoints are independent: one endpoint exhausting its retries does
    /// not affect delivery to the others.
    pub async fn dispatch(&self, event: WebhookEvent) {
        let endpoints: Vec<WebhookEndpoint> = self
            .config
            .endpoints
            .iter()
            .filter(|e| match &e.owner {
                Some(owner) => *owner == event.owner,
                None => true,
            })
            .cloned()
            .collect();

        for endpoint in endpoints {
            self.deliver(&endpoint, &event).await;
        }
    }

    async fn deliver(&self, endpoint: &WebhookEndpoint, event: &WebhookEvent) {
        let policy = &self.config.retry;
        let mut last_error = String::new();

        for attempt in 1..=policy.max_attempts.max(1) {
            match self.client.post(&endpoint.url).json(event).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        "Delivered {} for {} to {} (attempt {})",
                        event.event, event.task_id, endpoint.url, attempt
                    );
                    self.deliveries.lock().push(DeliveryRecord {
                        url: endpoint.url.clone(),
                        event: event.event.clone(),
                        task_id: event.task_id,
                        attempts: attempt,
                        delivered_at: Utc::now(),
                    });
                    return;
                }
                Ok(response) => {
                    last_error = format!("http status {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            match policy.delay_for(attempt) {
                Some(delay) => {
                    warn!(
                        "Webhook {} attempt {} failed ({}), retrying in {:?}",
                        endpoint.url, attempt, last_error, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => break,
            }
        }

        warn!(
            "Webhook {} exhausted {} attempts for {}; dead-lettering",
            endpoint.url, policy.max_attempts, event.task_id
        );
        self.dead_letters.lock().push(DeadLetter {
            url: endpoint.url.clone(),
            event: event.clone(),
            attempts: policy.max_attempts.max(1),
            last_error,
            failed_at: Utc::now(),
        });
    }

    /// Acknowledged deliveries, oldest first.
    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.deliveries.lock().clone()
    }

    /// Events that could not be delivered.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }
}
