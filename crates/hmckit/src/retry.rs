//! Retry logic with exponential backoff for transient errors.
//!
//! Only read-only calls are retried by [`Retrying`]; a mutating call that
//! failed on the wire may still have landed on the console.

use crate::backend::ResourceClient;
use crate::error::{Error, Result};
use crate::types::{Kind, Operation, Properties, Resource, RetryConfig, Selector};
use serde_json::Value;
use std::thread;

/// Callback trait for retry progress notifications.
pub trait RetryCallback: Send + Sync {
    /// Called when an operation is being retried.
    ///
    /// # Arguments
    /// * `attempt` - Current attempt number (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay_ms` - Milliseconds until next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_ms: u64);
}

/// Callback that logs retries at warn level.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_ms: u64) {
        log::warn!("attempt {attempt}/{max_attempts} failed: {error}. Retrying in {delay_ms}ms");
    }
}

/// Client wrapper that retries read-only calls on transient errors.
pub struct Retrying<C> {
    inner: C,
    config: RetryConfig,
    callback: Option<Box<dyn RetryCallback>>,
}

impl<C: ResourceClient> Retrying<C> {
    /// Wrap a client.
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            callback: None,
        }
    }

    /// Set a retry callback.
    pub fn with_callback(mut self, callback: impl RetryCallback + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Access the wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Call `call` until it succeeds, fails for good, or runs out of
    /// attempts. Backoff grows per `RetryConfig::delay_for_attempt`.
    fn retry<T>(&self, mut call: impl FnMut() -> Result<T>) -> Result<T> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let error = match call() {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= attempts => return Err(e),
                Err(e) => e,
            };
            let delay = self.config.delay_for_attempt(attempt - 1);
            if let Some(callback) = &self.callback {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                callback.on_retry(attempt, attempts, &error, delay_ms);
            }
            thread::sleep(delay);
            attempt += 1;
        }
    }
}

impl<C: ResourceClient> ResourceClient for Retrying<C> {
    fn find(&self, selector: &Selector) -> Result<Resource> {
        self.retry(|| self.inner.find(selector))
    }

    fn list(&self, selector: &Selector) -> Result<Vec<Resource>> {
        self.retry(|| self.inner.list(selector))
    }

    fn create(&self, kind: Kind, parent: Option<&str>, props: &Properties) -> Result<Resource> {
        self.inner.create(kind, parent, props)
    }

    fn update(&self, resource: &Resource, props: &Properties) -> Result<()> {
        self.inner.update(resource, props)
    }

    fn delete(&self, resource: &Resource) -> Result<()> {
        self.inner.delete(resource)
    }

    fn pull_full_properties(&self, resource: &mut Resource) -> Result<()> {
        let fresh = self.retry(|| {
            let mut copy = resource.clone();
            self.inner.pull_full_properties(&mut copy)?;
            Ok(copy)
        })?;
        *resource = fresh;
        Ok(())
    }

    fn invoke(&self, resource: &Resource, operation: &Operation) -> Result<()> {
        self.inner.invoke(resource, operation)
    }

    fn get_property(&self, resource: &Resource, name: &str) -> Result<Option<Value>> {
        self.retry(|| self.inner.get_property(resource, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryConsole;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::from_millis(1), 1.0)
    }

    fn client(max_attempts: u32) -> Retrying<MemoryConsole> {
        Retrying::new(MemoryConsole::new(), fast(max_attempts))
    }

    fn reset() -> Error {
        Error::Network {
            message: "reset".to_string(),
        }
    }

    #[test]
    fn test_retry_success_first_try() {
        let client = Retrying::new(MemoryConsole::new(), RetryConfig::no_retry());
        assert_eq!(client.retry(|| Ok::<_, Error>(42)).unwrap(), 42);
    }

    #[test]
    fn test_retry_gives_up_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = client(5).retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::api(400, 1, "bad request"))
        });
        assert!(matches!(result, Err(Error::Api { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_recovers_from_network_error() {
        let calls = AtomicU32::new(0);
        let result = client(3).retry(|| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(reset())
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_exhausted_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = client(2).retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(reset())
        });
        assert!(matches!(result, Err(Error::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_attempts_still_calls_once() {
        let calls = AtomicU32::new(0);
        let result = Retrying::new(MemoryConsole::new(), fast(0)).retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(u32, u32)>>>);

    impl RetryCallback for Recorder {
        fn on_retry(&self, attempt: u32, max_attempts: u32, _error: &Error, _delay_ms: u64) {
            self.0.lock().unwrap().push((attempt, max_attempts));
        }
    }

    #[test]
    fn test_retrying_client_retries_reads_only() {
        let console = MemoryConsole::new();
        let cpc = console.add_cpc("CPC1");
        console.inject_network_failures(1);
        let client = Retrying::new(console, fast(3));

        let found = client.find(&Selector::named(Kind::Cpc, "CPC1")).unwrap();
        assert_eq!(found.uri, cpc.uri);

        client.inner().inject_network_failures(1);
        let result = client.update(&found, &Properties::new());
        assert!(matches!(result, Err(Error::Network { .. })));
    }

    #[test]
    fn test_retrying_client_reports_retries() {
        let console = MemoryConsole::new();
        console.add_cpc("CPC1");
        console.inject_network_failures(2);
        let recorder = Recorder::default();
        let client = Retrying::new(console, fast(3)).with_callback(recorder.clone());

        assert!(client.find(&Selector::named(Kind::Cpc, "CPC1")).is_ok());
        assert_eq!(*recorder.0.lock().unwrap(), vec![(1, 3), (2, 3)]);
    }
}
