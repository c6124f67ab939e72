//! Injected diagnostics sink for the scheduler and snapshot paths.

use crate::error::SchedulerError;

/// Receives execution-thread faults and operational notices.
///
/// Passed explicitly into the scheduler rather than reached through a
/// global, so embedders and tests decide where faults go. `fault` is called
/// at most once per execution thread.
pub trait Reporter: Send + Sync {
    fn fault(&self, error: &SchedulerError);

    fn warn(&self, _message: &str) {}

    fn info(&self, _message: &str) {}
}

/// Forwards everything to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn fault(&self, error: &SchedulerError) {
        log::error!("{error}");
    }

    fn warn(&self, message: &str) {
        log::warn!("{message}");
    }

    fn info(&self, message: &str) {
        log::info!("{message}");
    }
}

/// A bare closure works as a fault callback; notices go to `log`.
impl<F> Reporter for F
where
    F: Fn(&SchedulerError) + Send + Sync,
{
    fn fault(&self, error: &SchedulerError) {
        self(error);
    }

    fn warn(&self, message: &str) {
        log::warn!("{message}");
    }

    fn info(&self, message: &str) {
        log::info!("{message}");
    }
}
