//! Task record persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use pagepilot_core::{AutomationError, Task, TaskStatus};

/// Storage interface for task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or overwrite a task record.
    async fn save(&self, task: &Task) -> Result<(), AutomationError>;

    /// Load a task by ID.
    async fn load(&self, id: &Uuid) -> Result<Option<Task>, AutomationError>;

    /// Load all tasks currently in the `Queued` state.
    async fn load_queued(&self) -> Result<Vec<Task>, AutomationError>;

    /// Delete a task record.
    async fn delete(&self, id: &Uuid) -> Result<(), AutomationError>;
}

/// In-memory task store.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, task: &Task) -> Result<(), AutomationError> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Task>, AutomationError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(id).cloned())
    }

    async fn load_queued(&self) -> Result<Vec<Task>, AutomationError> {
        let tasks = self.tasks.read().await;
        let mut queued: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .cloned()
            .collect();
        queued.sort_by_key(|t| t.created_at);
        Ok(queued)
    }

    async fn delete(&self, id: &Uuid) -> Result<(), AutomationError> {
        let mut tasks = self.tasks.write().await;
        tasks.remove(id);
        Ok(())
    }
}
