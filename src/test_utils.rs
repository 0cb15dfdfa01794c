//! Common test utilities for this crate.
//!
//! This module provides reusable probe actions shared across the unit
//! tests of several modules.

#[cfg(test)]
pub mod common {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::{
        action::{Completable, TestAction},
        context::TestContext,
        error::{ActionError, Result},
    };

    /// Shared run counter handed out by the probe actions below.
    #[derive(Clone, Debug, Default)]
    pub struct CountProbe(Arc<AtomicUsize>);

    impl CountProbe {
        /// Number of executions observed so far.
        pub fn runs(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }

        fn bump(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Action that counts its executions and always succeeds.
    #[derive(Debug)]
    pub struct CountingAction {
        name: String,
        runs: CountProbe,
        disabled: bool,
    }

    impl CountingAction {
        pub fn new() -> Self {
            Self::named("counting")
        }

        pub fn named(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                runs: CountProbe::default(),
                disabled: false,
            }
        }

        /// Marks this action as disabled, so containers must skip it.
        pub fn disabled(mut self) -> Self {
            self.disabled = true;
            self
        }

        pub fn probe(&self) -> CountProbe {
            self.runs.clone()
        }
    }

    #[async_trait]
    impl TestAction for CountingAction {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _: &TestContext) -> Result<()> {
            self.runs.bump();
            Ok(())
        }

        fn is_disabled(&self, _: &TestContext) -> bool {
            self.disabled
        }
    }

    /// Action that always fails with a fixed error.
    #[derive(Debug)]
    pub struct FailingAction {
        name: String,
        error: ActionError,
    }

    impl FailingAction {
        pub fn runtime(message: impl Into<String>) -> Self {
            Self::with(ActionError::runtime(message))
        }

        pub fn validation(message: impl Into<String>) -> Self {
            Self::with(ActionError::validation(message))
        }

        pub fn with(error: ActionError) -> Self {
            Self {
                name: "failing".into(),
                error,
            }
        }
    }

    #[async_trait]
    impl TestAction for FailingAction {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _: &TestContext) -> Result<()> {
            Err(self.error.clone())
        }
    }

    /// Action failing a fixed number of times before it starts to
    /// succeed.
    #[derive(Debug)]
    pub struct FlakyAction {
        name: String,
        failures_left: AtomicUsize,
        runs: CountProbe,
    }

    impl FlakyAction {
        pub fn failing_times(failures: usize) -> Self {
            Self {
                name: "flaky".into(),
                failures_left: AtomicUsize::new(failures),
                runs: CountProbe::default(),
            }
        }

        pub fn probe(&self) -> CountProbe {
            self.runs.clone()
        }
    }

    #[async_trait]
    impl TestAction for FlakyAction {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _: &TestContext) -> Result<()> {
            self.runs.bump();
            let was_failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok();
            if was_failing {
                Err(ActionError::runtime("still failing"))
            } else {
                Ok(())
            }
        }
    }

    /// Handle flipping a [`GatedAction`] to done.
    #[derive(Clone, Debug, Default)]
    pub struct Gate(Arc<AtomicBool>);

    impl Gate {
        pub fn open(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Action that executes instantly but only reports completion once
    /// its [`Gate`] was opened.
    #[derive(Debug)]
    pub struct GatedAction {
        name: String,
        runs: CountProbe,
        gate: Gate,
    }

    impl GatedAction {
        pub fn named(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                runs: CountProbe::default(),
                gate: Gate::default(),
            }
        }

        pub fn gate(&self) -> Gate {
            self.gate.clone()
        }

        pub fn probe(&self) -> CountProbe {
            self.runs.clone()
        }
    }

    #[async_trait]
    impl TestAction for GatedAction {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _: &TestContext) -> Result<()> {
            self.runs.bump();
            Ok(())
        }

        fn completion(&self) -> Option<&dyn Completable> {
            Some(self)
        }
    }

    impl Completable for GatedAction {
        fn is_done(&self, _: &TestContext) -> bool {
            self.gate.0.load(Ordering::SeqCst)
        }
    }

    /// Order log shared between [`RecordingAction`]s.
    #[derive(Clone, Debug, Default)]
    pub struct ExecutionLog(Arc<Mutex<Vec<String>>>);

    impl ExecutionLog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn record(&self, entry: impl Into<String>) {
            self.0.lock().push(entry.into());
        }

        pub fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    /// Action appending its name to a shared [`ExecutionLog`].
    #[derive(Debug)]
    pub struct RecordingAction {
        name: String,
        log: ExecutionLog,
    }

    impl RecordingAction {
        pub fn new(name: impl Into<String>, log: &ExecutionLog) -> Self {
            Self {
                name: name.into(),
                log: log.clone(),
            }
        }
    }

    #[async_trait]
    impl TestAction for RecordingAction {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _: &TestContext) -> Result<()> {
            self.log.record(self.name.clone());
            Ok(())
        }
    }
}
