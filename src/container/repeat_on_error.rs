//! Retry loop re-running its children until they pass or a condition
//! says to give up.

use std::{
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use either::Either;
use smart_default::SmartDefault;
use tracing::{debug, info};

use crate::{
    action::{ActionProducer, Completable, TestAction},
    container::{
        iterating::{run_pass, with_timeout, LoopControl},
        producer_of, ActionContainer, NestedState,
    },
    context::TestContext,
    Result,
};

/// Container retrying its children until they succeed or the stop
/// condition becomes true.
///
/// Before every attempt the stop condition is checked against the
/// retry index; while it stays false, the children run and a failure
/// schedules another attempt after the configured auto sleep. A
/// successful attempt ends the loop. A true condition ends the loop
/// too, and if the last attempt had failed, that captured failure is
/// rethrown: the condition turning true means "stop retrying", not
/// "succeed".
#[derive(SmartDefault)]
pub struct RepeatOnError {
    #[default("repeat-on-error".into())]
    name: String,
    control: LoopControl,
    #[default(Duration::from_secs(1))]
    auto_sleep: Duration,
    timeout: Option<Duration>,
    #[default(Arc::new(AtomicI64::new(1)))]
    index: Arc<AtomicI64>,
    children: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
}

impl RepeatOnError {
    /// Creates a retry container. An [`until`] condition must be
    /// configured before execution.
    ///
    /// [`until`]: RepeatOnError::until
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the container name used in logs and failure reports.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the give-up condition string, checked before every attempt.
    #[must_use]
    pub fn until(mut self, expression: impl Into<String>) -> Self {
        self.control.condition = Either::Left(expression.into());
        self
    }

    /// Sets a programmatic give-up condition receiving the retry index.
    #[must_use]
    pub fn until_fn(
        mut self,
        predicate: impl Fn(i64, &TestContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.control.condition = Either::Right(Arc::new(predicate));
        self
    }

    /// Sets the variable name the retry index is published under.
    #[must_use]
    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.control.index_name = name.into();
        self
    }

    /// Sets the pause between a failed attempt and the next one.
    /// Defaults to one second.
    #[must_use]
    pub fn auto_sleep(mut self, pause: Duration) -> Self {
        self.auto_sleep = pause;
        self
    }

    /// Bounds the whole retry loop with a time budget.
    #[must_use]
    pub fn timeout(mut self, budget: Duration) -> Self {
        self.timeout = Some(budget);
        self
    }

    /// Appends a ready action as the next child.
    #[must_use]
    pub fn action(self, action: impl TestAction + 'static) -> Self {
        self.producer(producer_of(Arc::new(action)))
    }

    /// Appends a deferred builder as the next child.
    #[must_use]
    pub fn producer(mut self, producer: impl ActionProducer + 'static) -> Self {
        self.children.push(Arc::new(producer));
        self
    }
}

#[async_trait]
impl TestAction for RepeatOnError {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        self.index.store(self.control.start, Ordering::SeqCst);
        debug!(
            container = %self.name,
            auto_sleep = ?self.auto_sleep,
            "Starting retry loop",
        );

        let name = self.name.clone();
        let control = self.control.clone();
        let nested = self.nested.clone();
        let children = self.children.clone();
        let context = context.clone();
        let index = Arc::clone(&self.index);
        let auto_sleep = self.auto_sleep;
        let body = async move {
            let mut captured = None;
            while !control.check(index.load(Ordering::SeqCst), &context)? {
                captured = None;
                let i = index.load(Ordering::SeqCst);
                match run_pass(&control, i, &nested, &children, &context).await {
                    Ok(()) => break,
                    Err(e) => {
                        info!(
                            container = %name,
                            attempt = i,
                            error = %e,
                            "Attempt failed, retrying",
                        );
                        captured = Some(e);
                        if !auto_sleep.is_zero() {
                            debug!(
                                container = %name,
                                pause = ?auto_sleep,
                                "Sleeping before next attempt",
                            );
                            tokio::time::sleep(auto_sleep).await;
                        }
                        index.store(i + 1, Ordering::SeqCst);
                    }
                }
            }
            if let Some(e) = captured {
                info!(container = %name, "Giving up retrying");
                return Err(e);
            }
            Ok(())
        };
        with_timeout(self.timeout, &self.name, body).await
    }

    fn completion(&self) -> Option<&dyn Completable> {
        Some(self)
    }
}

impl Completable for RepeatOnError {
    fn is_done(&self, context: &TestContext) -> bool {
        self.nested
            .is_done(context, self.children.len(), self.is_disabled(context))
    }
}

impl ActionContainer for RepeatOnError {
    fn children(&self) -> &[Arc<dyn ActionProducer>] {
        &self.children
    }

    fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl fmt::Debug for RepeatOnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepeatOnError")
            .field("name", &self.name)
            .field("control", &self.control)
            .field("auto_sleep", &self.auto_sleep)
            .field("timeout", &self.timeout)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::common::{CountingAction, FailingAction, FlakyAction};

    #[tokio::test]
    async fn test_successful_attempt_ends_the_loop() {
        let context = TestContext::new();
        let action = CountingAction::new();
        let probe = action.probe();
        let repeat = RepeatOnError::new().until("i gt 5").action(action);

        repeat.execute(&context).await.unwrap();

        assert_eq!(probe.runs(), 1);
    }

    #[tokio::test]
    async fn test_retries_until_attempt_succeeds() {
        let context = TestContext::new();
        let action = FlakyAction::failing_times(2);
        let probe = action.probe();
        let repeat = RepeatOnError::new()
            .until("i gt 9")
            .auto_sleep(Duration::ZERO)
            .action(action);

        repeat.execute(&context).await.unwrap();

        // Two failed attempts, then the third one passes.
        assert_eq!(probe.runs(), 3);
        assert_eq!(context.variable("i").unwrap(), "3");
    }

    #[tokio::test]
    async fn test_gives_up_with_the_captured_failure() {
        let context = TestContext::new();
        let repeat = RepeatOnError::new()
            .until("i gt 3")
            .auto_sleep(Duration::ZERO)
            .action(FailingAction::runtime("still broken"));

        let error = repeat.execute(&context).await.unwrap_err();

        // Attempts at index 1, 2 and 3, then the condition stops the
        // loop and the last failure surfaces.
        assert_eq!(error.message(), "still broken");
        assert_eq!(repeat.nested().executed_count(), 3);
    }

    #[tokio::test]
    async fn test_true_condition_without_failure_is_success() {
        let context = TestContext::new();
        let action = CountingAction::new();
        let probe = action.probe();
        // Gives up before the first attempt: no failure to report.
        let repeat = RepeatOnError::new().until("i gt 0").action(action);

        repeat.execute(&context).await.unwrap();

        assert_eq!(probe.runs(), 0);
    }

    #[tokio::test]
    async fn test_sleeps_between_attempts() {
        let context = TestContext::new();
        let repeat = RepeatOnError::new()
            .until("i gt 2")
            .auto_sleep(Duration::from_millis(30))
            .action(FailingAction::runtime("boom"));

        let before = std::time::Instant::now();
        repeat.execute(&context).await.unwrap_err();

        // Two sleeps: after the failed attempts at index 1 and 2.
        assert!(before.elapsed() >= Duration::from_millis(60));
    }
}
