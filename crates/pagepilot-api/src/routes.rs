//! HTTP route definitions.
//!
//! ```text
//! POST   /tasks              - Submit a parse or execute task
//! GET    /tasks/{id}         - Query task status
//! GET    /tasks/{id}/result  - Fetch the stored result
//! POST   /tasks/{id}/cancel  - Request cooperative cancellation
//! GET    /health             - Liveness and pool counters
//! ```

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{cancel_task, get_task, get_task_result, health, submit_task};
use crate::state::AppState;

/// Build the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tasks", post(submit_task))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/result", get(get_task_result))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
