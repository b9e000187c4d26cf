//! # PagePilot Engine
//!
//! Ties the pool, parser and executor together behind a task coordinator:
//! submissions enter a FIFO queue, a fixed set of workers drains it, and
//! terminal transitions fan out to webhook endpoints.

pub mod coordinator;
pub mod queue;
pub mod store;
pub mod webhook;

pub use coordinator::TaskCoordinator;
pub use queue::TaskQueue;
pub use store::{MemoryTaskStore, TaskStore};
pub use webhook::{DeadLetter, DeliveryRecord, WebhookDispatcher, WebhookEvent};
