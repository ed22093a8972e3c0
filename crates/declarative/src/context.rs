//! Apply context and progress callbacks
//!
//! Everything a reconciliation needs besides the desired state: the client,
//! the dry-run flag and per-call options. Built once at the boundary and
//! passed by reference into every component.

use hmckit::ResourceClient;
use std::time::Duration;

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Upper bound for each wait on an operational status (default 3600s)
    pub status_timeout: Duration,
    /// Delay between status reads while waiting (default 1s)
    pub poll_interval: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            status_timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl ReconcileOptions {
    /// Options with a custom status timeout.
    pub fn with_timeout(status_timeout: Duration) -> Self {
        Self {
            status_timeout,
            ..Default::default()
        }
    }
}

/// Progress callback for long-running steps
///
/// Implement this trait to show what the engine is doing, e.g. a spinner
/// while waiting for a partition to stop.
pub trait ProgressCallback: Send + Sync {
    /// Called before an operation is invoked on a resource
    fn on_operation(&self, resource: &str, operation: &str);

    /// Called when starting to wait for one of `statuses`
    fn on_wait_start(&self, resource: &str, statuses: &[&str]);

    /// Called when the wait ended with `status`
    fn on_wait_complete(&self, resource: &str, status: &str);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_operation(&self, _resource: &str, _operation: &str) {}
    fn on_wait_start(&self, _resource: &str, _statuses: &[&str]) {}
    fn on_wait_complete(&self, _resource: &str, _status: &str) {}
}

/// Context passed to every reconciliation step
pub struct ApplyContext<'a> {
    /// Console client
    pub client: &'a dyn ResourceClient,
    /// Predict the outcome without mutating anything
    pub dry_run: bool,
    /// Per-call options
    pub options: ReconcileOptions,
    progress: &'a dyn ProgressCallback,
}

impl<'a> ApplyContext<'a> {
    /// Create a new apply context
    pub fn new(client: &'a dyn ResourceClient, dry_run: bool) -> Self {
        Self {
            client,
            dry_run,
            options: ReconcileOptions::default(),
            progress: &NoProgress,
        }
    }

    /// Replace the options
    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a progress callback
    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Progress callback in use
    pub fn progress(&self) -> &dyn ProgressCallback {
        self.progress
    }

    /// Same context with the status timeout capped at `limit`.
    pub fn limit_timeout(&self, limit: Duration) -> ApplyContext<'a> {
        ApplyContext {
            client: self.client,
            dry_run: self.dry_run,
            options: ReconcileOptions {
                status_timeout: self.options.status_timeout.min(limit),
                ..self.options.clone()
            },
            progress: self.progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmckit::MemoryConsole;

    #[test]
    fn test_defaults() {
        let options = ReconcileOptions::default();
        assert_eq!(options.status_timeout, Duration::from_secs(3600));
        assert_eq!(options.poll_interval, Duration::from_secs(1));
        assert_eq!(
            ReconcileOptions::with_timeout(Duration::from_secs(5)).status_timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_builder() {
        let console = MemoryConsole::new();
        let ctx = ApplyContext::new(&console, true)
            .with_options(ReconcileOptions::with_timeout(Duration::from_secs(10)));
        assert!(ctx.dry_run);
        assert_eq!(ctx.options.status_timeout, Duration::from_secs(10));
        ctx.progress().on_operation("partition 'lp01'", "start");
    }

    #[test]
    fn test_limit_timeout() {
        let console = MemoryConsole::new();
        let ctx = ApplyContext::new(&console, true);
        let limited = ctx.limit_timeout(Duration::from_secs(60));
        assert!(limited.dry_run);
        assert_eq!(limited.options.status_timeout, Duration::from_secs(60));
        assert_eq!(limited.options.poll_interval, Duration::from_secs(1));

        let short = ApplyContext::new(&console, false)
            .with_options(ReconcileOptions::with_timeout(Duration::from_secs(5)));
        assert_eq!(
            short.limit_timeout(Duration::from_secs(60)).options.status_timeout,
            Duration::from_secs(5)
        );
    }
}
