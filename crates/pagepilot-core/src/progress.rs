//! Progress reporting seam.
//!
//! The parser and executor report checkpoints through this trait; the
//! coordinator maps reports onto the task record.

/// Receives progress checkpoints from a running phase or step.
pub trait ProgressReporter: Send + Sync {
    /// Report completion percentage and a description of the current step.
    fn report(&self, percent: u8, step: &str);
}

/// Reporter that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _percent: u8, _step: &str) {}
}

impl<F> ProgressReporter for F
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn report(&self, percent: u8, step: &str) {
        self(percent, step)
    }
}
