//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use pagepilot_engine::TaskCoordinator;

/// Shared handler state.
pub struct AppState {
    pub coordinator: Arc<TaskCoordinator>,
    start_time: Instant,
}

impl AppState {
    pub fn new(coordinator: Arc<TaskCoordinator>) -> Self {
        Self {
            coordinator,
            start_time: Instant::now(),
        }
    }

    /// Time since the server came up.
    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}
