//! Lifecycle state machine
//!
//! Drives a stateful resource into a quiescent or running status. The
//! status is read fresh on every call. In-flight transitions are waited
//! out, error statuses fail immediately, and at most one corrective start or
//! stop is issued per call; a resource that still disagrees afterwards is a
//! [`Error::Status`], not something to retry.

use crate::context::ApplyContext;
use crate::error::{Error, Result};
use hmckit::{Operation, Resource};
use serde_json::Value;
use std::thread;
use std::time::Instant;

/// Status sets of one resource kind.
#[derive(Debug)]
pub struct StatusModel {
    /// Stable, not running
    pub quiescent: &'static [&'static str],
    /// Stable, running
    pub running: &'static [&'static str],
    /// Stable, resources held but not running; must be stopped before a start
    pub halted: &'static [&'static str],
    /// Transitioning towards running
    pub starting: &'static [&'static str],
    /// Transitioning towards quiescent
    pub stopping: &'static [&'static str],
    /// The owning container has a problem this machine cannot fix
    pub error: &'static [&'static str],
    /// Statuses that end a start (error statuses always end a wait)
    pub start_end: &'static [&'static str],
    /// Statuses that end a stop (error statuses always end a wait)
    pub stop_end: &'static [&'static str],
}

/// Class of an operational status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Stable, not running
    Quiescent,
    /// Stable, running
    Running,
    /// Stable, neither quiescent nor running
    Halted,
    /// Moving towards running
    TransitioningToRunning,
    /// Moving towards quiescent
    TransitioningToQuiescent,
    /// Unacceptable condition
    Error,
    /// Not described by the model
    Unknown,
}

fn has(set: &[&str], status: &str) -> bool {
    set.iter().any(|s| *s == status)
}

impl StatusModel {
    /// Classify a status.
    pub fn classify(&self, status: &str) -> StatusClass {
        if has(self.error, status) {
            StatusClass::Error
        } else if has(self.running, status) {
            StatusClass::Running
        } else if has(self.quiescent, status) {
            StatusClass::Quiescent
        } else if has(self.halted, status) {
            StatusClass::Halted
        } else if has(self.starting, status) {
            StatusClass::TransitioningToRunning
        } else if has(self.stopping, status) {
            StatusClass::TransitioningToQuiescent
        } else {
            StatusClass::Unknown
        }
    }

    fn satisfies(&self, status: &str, target: Target) -> bool {
        match target {
            Target::Quiescent => has(self.quiescent, status),
            Target::Running => has(self.running, status),
        }
    }
}

/// Stable class a caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Stopped
    Quiescent,
    /// Running
    Running,
}

impl Target {
    fn operation(self) -> Operation {
        match self {
            Self::Quiescent => Operation::Stop,
            Self::Running => Operation::Start,
        }
    }
}

/// State machine bound to one status model and one apply context.
pub struct Lifecycle<'c, 'a> {
    ctx: &'c ApplyContext<'a>,
    model: &'static StatusModel,
}

impl<'c, 'a> Lifecycle<'c, 'a> {
    /// Create a state machine.
    pub fn new(ctx: &'c ApplyContext<'a>, model: &'static StatusModel) -> Self {
        Self { ctx, model }
    }

    /// Status model in use.
    pub fn model(&self) -> &'static StatusModel {
        self.model
    }

    /// Make sure the resource is quiescent. Returns whether anything changed.
    pub fn ensure_quiescent(&self, resource: &mut Resource) -> Result<bool> {
        self.ensure(resource, Target::Quiescent)
    }

    /// Make sure the resource is running. Returns whether anything changed.
    pub fn ensure_running(&self, resource: &mut Resource) -> Result<bool> {
        self.ensure(resource, Target::Running)
    }

    /// Class of the resource's current status (read fresh).
    pub fn current_class(&self, resource: &mut Resource) -> Result<StatusClass> {
        let status = self.read_status(resource)?;
        Ok(self.model.classify(&status))
    }

    /// Wait out an in-flight transition without changing direction.
    ///
    /// Used before updates that do not need a quiescent resource.
    pub fn wait_for_transition_completion(&self, resource: &mut Resource) -> Result<()> {
        let mut status = self.read_status(resource)?;
        match self.model.classify(&status) {
            StatusClass::TransitioningToRunning => {
                status = self.wait_for(resource, self.model.start_end, self.model.running[0])?;
            }
            StatusClass::TransitioningToQuiescent => {
                status = self.wait_for(resource, self.model.stop_end, self.model.quiescent[0])?;
            }
            _ => {}
        }
        self.check_error(resource, &status, None)
    }

    fn ensure(&self, resource: &mut Resource, target: Target) -> Result<bool> {
        let mut status = self.read_status(resource)?;
        let mut changed = false;

        match self.model.classify(&status) {
            StatusClass::TransitioningToRunning => {
                log::info!("{resource} is {status}, waiting for the start to finish");
                status = self.wait_for(resource, self.model.start_end, self.model.running[0])?;
                changed = true;
            }
            StatusClass::TransitioningToQuiescent => {
                log::info!("{resource} is {status}, waiting for the stop to finish");
                status = self.wait_for(resource, self.model.stop_end, self.model.quiescent[0])?;
                changed = true;
            }
            _ => {}
        }

        self.check_error(resource, &status, None)?;
        if self.model.satisfies(&status, target) {
            return Ok(changed);
        }
        if self.model.classify(&status) == StatusClass::Unknown {
            return Err(self.status_error(resource, &status, None, "status is not recognized"));
        }

        if target == Target::Running && self.model.classify(&status) == StatusClass::Halted {
            status = self.run(resource, &Operation::Stop)?;
            self.check_error(resource, &status, Some("stop"))?;
        }

        let operation = target.operation();
        status = self.run(resource, &operation)?;
        self.check_error(resource, &status, Some(operation.name()))?;
        if !self.model.satisfies(&status, target) {
            let expected = match target {
                Target::Quiescent => self.model.quiescent,
                Target::Running => self.model.running,
            };
            return Err(self.status_error(
                resource,
                &status,
                Some(operation.name()),
                &format!("expected one of {expected:?}"),
            ));
        }
        Ok(true)
    }

    /// Issue start or stop and wait for one of its end statuses.
    fn run(&self, resource: &mut Resource, operation: &Operation) -> Result<String> {
        let (end, predicted) = match operation {
            Operation::Start => (self.model.start_end, self.model.running[0]),
            _ => (self.model.stop_end, self.model.quiescent[0]),
        };
        let label = resource.to_string();
        self.ctx.progress().on_operation(&label, operation.name());

        if self.ctx.dry_run {
            log::info!("would {operation} {resource}");
            resource.set("status", Value::from(predicted));
            return Ok(predicted.to_string());
        }

        log::info!("{operation} {resource}");
        self.ctx.client.invoke(resource, operation)?;
        self.wait_for(resource, end, predicted)
    }

    /// Poll until the status is one of `end` or an error status.
    fn wait_for(&self, resource: &mut Resource, end: &[&str], predicted: &str) -> Result<String> {
        if self.ctx.dry_run {
            resource.set("status", Value::from(predicted));
            return Ok(predicted.to_string());
        }

        let label = resource.to_string();
        let started = Instant::now();
        self.ctx.progress().on_wait_start(&label, end);

        loop {
            let status = self.read_status(resource)?;
            if has(end, &status) || has(self.model.error, &status) {
                self.ctx.progress().on_wait_complete(&label, &status);
                log::debug!("{label} reached {status} after {:?}", started.elapsed());
                return Ok(status);
            }
            if started.elapsed() >= self.ctx.options.status_timeout {
                self.ctx.progress().on_wait_complete(&label, &status);
                return Err(Error::Timeout {
                    resource: label,
                    expected: end.iter().map(ToString::to_string).collect(),
                    last_status: status,
                    waited: self.ctx.options.status_timeout,
                });
            }
            thread::sleep(self.ctx.options.poll_interval);
        }
    }

    /// Status read fresh from the console; in dry-run mode the local copy
    /// (which carries predicted statuses) is used.
    fn read_status(&self, resource: &mut Resource) -> Result<String> {
        let status = if resource.is_local() {
            // Predicted resources come into existence quiescent.
            Some(
                resource
                    .status()
                    .unwrap_or(self.model.quiescent[0])
                    .to_string(),
            )
        } else if self.ctx.dry_run {
            resource.status().map(ToString::to_string)
        } else {
            let value = self.ctx.client.get_property(resource, "status")?;
            let status = value.as_ref().and_then(Value::as_str).map(ToString::to_string);
            if let Some(value) = value {
                resource.set("status", value);
            }
            status
        };
        status.ok_or_else(|| self.status_error(resource, "", None, "resource reports no status"))
    }

    fn check_error(&self, resource: &Resource, status: &str, operation: Option<&'static str>) -> Result<()> {
        if self.model.classify(status) == StatusClass::Error {
            return Err(self.status_error(
                resource,
                status,
                operation,
                "the CPC has an unacceptable status",
            ));
        }
        Ok(())
    }

    fn status_error(
        &self,
        resource: &Resource,
        status: &str,
        operation: Option<&'static str>,
        message: &str,
    ) -> Error {
        Error::Status {
            resource: resource.to_string(),
            status: status.to_string(),
            operation,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReconcileOptions;
    use crate::error::ErrorKind;
    use hmckit::MemoryConsole;
    use std::time::Duration;

    static MODEL: StatusModel = StatusModel {
        quiescent: &["stopped", "reservation-error"],
        running: &["active", "degraded"],
        halted: &["terminated", "paused"],
        starting: &["starting"],
        stopping: &["stopping"],
        error: &["communications-not-active", "status-check"],
        start_end: &["active", "degraded", "reservation-error", "terminated"],
        stop_end: &["stopped", "terminated"],
    };

    fn setup(status: &str) -> (MemoryConsole, Resource) {
        let console = MemoryConsole::new();
        let cpc = console.add_cpc("CPC1");
        let part = console.add_partition(&cpc.uri, "lp01", status);
        (console, part)
    }

    fn options() -> ReconcileOptions {
        ReconcileOptions {
            status_timeout: Duration::from_secs(5),
            poll_interval: Duration::ZERO,
        }
    }

    fn ops(console: &MemoryConsole) -> Vec<String> {
        console
            .mutating_calls()
            .into_iter()
            .map(|c| c.method)
            .collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(MODEL.classify("degraded"), StatusClass::Running);
        assert_eq!(MODEL.classify("paused"), StatusClass::Halted);
        assert_eq!(MODEL.classify("stopping"), StatusClass::TransitioningToQuiescent);
        assert_eq!(MODEL.classify("status-check"), StatusClass::Error);
        assert_eq!(MODEL.classify("bogus"), StatusClass::Unknown);
    }

    #[test]
    fn test_already_running_is_noop() {
        let (console, mut part) = setup("active");
        let ctx = ApplyContext::new(&console, false).with_options(options());
        assert!(!Lifecycle::new(&ctx, &MODEL).ensure_running(&mut part).unwrap());
        assert!(console.mutating_calls().is_empty());
    }

    #[test]
    fn test_start_from_stopped() {
        let (console, mut part) = setup("stopped");
        let ctx = ApplyContext::new(&console, false).with_options(options());
        assert!(Lifecycle::new(&ctx, &MODEL).ensure_running(&mut part).unwrap());
        assert_eq!(ops(&console), vec!["invoke:start"]);
        assert_eq!(part.status(), Some("active"));
    }

    #[test]
    fn test_stop_from_active() {
        let (console, mut part) = setup("degraded");
        let ctx = ApplyContext::new(&console, false).with_options(options());
        assert!(Lifecycle::new(&ctx, &MODEL).ensure_quiescent(&mut part).unwrap());
        assert_eq!(ops(&console), vec!["invoke:stop"]);
        assert_eq!(console.get(&part.uri).unwrap().status(), Some("stopped"));
    }

    #[test]
    fn test_error_status_fails_without_calls() {
        let (console, mut part) = setup("status-check");
        let ctx = ApplyContext::new(&console, false).with_options(options());
        let err = Lifecycle::new(&ctx, &MODEL).ensure_running(&mut part).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Status);
        assert!(err.to_string().contains("status-check"));
        assert!(console.mutating_calls().is_empty());
    }

    #[test]
    fn test_opposite_transition_waits_then_nudges_once() {
        let (console, mut part) = setup("starting");
        console.settle_status_after(&part.uri, "active", 2);
        let ctx = ApplyContext::new(&console, false).with_options(options());

        assert!(Lifecycle::new(&ctx, &MODEL).ensure_quiescent(&mut part).unwrap());
        assert_eq!(ops(&console), vec!["invoke:stop"]);
        assert_eq!(part.status(), Some("stopped"));
    }

    #[test]
    fn test_same_direction_transition_only_waits() {
        let (console, mut part) = setup("stopping");
        console.settle_status_after(&part.uri, "stopped", 1);
        let ctx = ApplyContext::new(&console, false).with_options(options());

        assert!(Lifecycle::new(&ctx, &MODEL).ensure_quiescent(&mut part).unwrap());
        assert!(console.mutating_calls().is_empty());
    }

    #[test]
    fn test_start_landing_in_wrong_status_fails() {
        let (console, mut part) = setup("stopped");
        console.set_start_result(&part.uri, "terminated");
        let ctx = ApplyContext::new(&console, false).with_options(options());

        let err = Lifecycle::new(&ctx, &MODEL).ensure_running(&mut part).unwrap_err();
        match err {
            Error::Status {
                status, operation, ..
            } => {
                assert_eq!(status, "terminated");
                assert_eq!(operation, Some("start"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ops(&console), vec!["invoke:start"]);
    }

    #[test]
    fn test_halted_is_stopped_before_start() {
        let (console, mut part) = setup("paused");
        let ctx = ApplyContext::new(&console, false).with_options(options());
        assert!(Lifecycle::new(&ctx, &MODEL).ensure_running(&mut part).unwrap());
        assert_eq!(ops(&console), vec!["invoke:stop", "invoke:start"]);
    }

    #[test]
    fn test_dry_run_predicts_without_calls() {
        let (console, mut part) = setup("active");
        let ctx = ApplyContext::new(&console, true).with_options(options());
        let machine = Lifecycle::new(&ctx, &MODEL);

        assert!(machine.ensure_quiescent(&mut part).unwrap());
        assert_eq!(part.status(), Some("stopped"));
        assert!(machine.ensure_running(&mut part).unwrap());
        assert_eq!(part.status(), Some("active"));
        assert!(console.mutating_calls().is_empty());
        assert_eq!(console.get(&part.uri).unwrap().status(), Some("active"));
    }

    #[test]
    fn test_local_resource_starts_quiescent() {
        let console = MemoryConsole::new();
        let ctx = ApplyContext::new(&console, true).with_options(options());
        let mut part = Resource::local(hmckit::Kind::Partition, None, hmckit::Properties::new());
        assert!(Lifecycle::new(&ctx, &MODEL).ensure_running(&mut part).unwrap());
        assert_eq!(part.status(), Some("active"));
    }

    #[test]
    fn test_timeout_leaves_resource_alone() {
        let (console, mut part) = setup("stopping");
        console.settle_status_after(&part.uri, "stopped", 1_000_000);
        let ctx = ApplyContext::new(&console, false).with_options(ReconcileOptions {
            status_timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
        });

        let err = Lifecycle::new(&ctx, &MODEL).ensure_running(&mut part).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(console.mutating_calls().is_empty());
        assert_eq!(console.get(&part.uri).unwrap().status(), Some("stopping"));
    }

    #[test]
    fn test_wait_for_transition_completion() {
        let (console, mut part) = setup("starting");
        console.settle_status_after(&part.uri, "active", 0);
        let ctx = ApplyContext::new(&console, false).with_options(options());
        Lifecycle::new(&ctx, &MODEL)
            .wait_for_transition_completion(&mut part)
            .unwrap();
        assert_eq!(part.status(), Some("active"));
        assert!(console.mutating_calls().is_empty());
    }
}
