//! Spinner shown while a reconciliation runs.

use declarative::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner reporting engine progress
pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    /// Create a spinner; hidden when `quiet`
    pub fn new(message: &str, quiet: bool) -> Self {
        let pb = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ProgressCallback for Spinner {
    fn on_operation(&self, resource: &str, operation: &str) {
        log::info!("{resource}: {operation}");
        self.pb.set_message(format!("{resource}: {operation}"));
    }

    fn on_wait_start(&self, resource: &str, statuses: &[&str]) {
        self.pb
            .set_message(format!("{resource}: waiting for {}", statuses.join(" or ")));
    }

    fn on_wait_complete(&self, resource: &str, status: &str) {
        log::info!("{resource} reached {status}");
        self.pb.set_message(format!("{resource}: {status}"));
    }
}
