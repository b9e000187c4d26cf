//! # PagePilot API
//!
//! HTTP interface over the task coordinator: submit tasks, poll status,
//! fetch results, request cancellation.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use server::ApiServer;
pub use state::AppState;
