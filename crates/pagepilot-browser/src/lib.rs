//! # PagePilot Browser
//!
//! Browser execution contexts for the PagePilot engine:
//!
//! - A condensed Chrome DevTools Protocol client (WebSocket transport,
//!   isolated browser contexts per pooled slot)
//! - The [`PageDriver`] trait, the seam between the engine and the browser
//! - Fingerprint profile rotation
//! - The bounded [`BrowserContextPool`] with FIFO acquisition and RAII
//!   release

pub mod cdp;
pub mod chrome;
pub mod driver;
pub mod pool;
pub mod profile;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cdp::{CdpConnection, CdpError, CdpSession};
pub use chrome::{CdpContextFactory, ChromeLauncher};
pub use driver::{CdpDriver, ElementState, PageDriver};
pub use pool::{BrowserContext, BrowserContextPool, ContextFactory, PoolStats, PooledContext};
pub use profile::ProfileRotation;
