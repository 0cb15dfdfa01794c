//! Post-checked loop running its children until a condition turns true.

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
use tracing::debug;

use crate::{
    action::{ActionProducer, Completable, TestAction},
    container::{
        iterating::{run_pass, with_timeout, LoopControl},
        producer_of, ActionContainer, NestedState,
    },
    context::TestContext,
    Result,
};

/// Container re-running its children until a condition becomes true.
///
/// The loop is post-checked: every pass runs all children, increments
/// the index, then evaluates the condition, so the children always
/// run at least once. Compare [`Iterate`], which checks first.
///
/// [`Iterate`]: crate::container::Iterate
#[derive(SmartDefault)]
pub struct Repeat {
    #[default("repeat".into())]
    name: String,
    control: LoopControl,
    timeout: Option<Duration>,
    #[default(Arc::new(AtomicI64::new(1)))]
    index: Arc<AtomicI64>,
    children: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
}

impl Repeat {
    /// Creates a repeat container. An [`until`] condition must be
    /// configured before execution.
    ///
    /// [`until`]: Repeat::until
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

    /// Sets the stop condition string, evaluated after every pass.
    #[must_use]
    pub fn until(mut self, expression: impl Into<String>) -> Self {
        self.control.condition = Either::Left(expression.into());
        self
    }

    /// Sets a programmatic stop condition receiving the current index.
    #[must_use]
    pub fn until_fn(
        mut self,
        predicate: impl Fn(i64, &TestContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.control.condition = Either::Right(Arc::new(predicate));
        self
    }

    /// Sets the variable name the current index is published under.
    #[must_use]
    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.control.index_name = name.into();
        self
    }

    /// Sets the index value the loop starts from.
    #[must_use]
    pub fn start(mut self, start: i64) -> Self {
        self.control.start = start;
        self.index.store(start, Ordering::SeqCst);
        self
    }

    /// Bounds the whole loop with a time budget.
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
impl TestAction for Repeat {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        self.index.store(self.control.start, Ordering::SeqCst);
        debug!(
            container = %self.name,
            index_name = %self.control.index_name,
            "Starting repeat loop",
        );

        let control = self.control.clone();
        let nested = self.nested.clone();
        let children = self.children.clone();
        let context = context.clone();
        let index = Arc::clone(&self.index);
        let body = async move {
            loop {
                let i = index.load(Ordering::SeqCst);
                run_pass(&control, i, &nested, &children, &context).await?;
                index.store(i + 1, Ordering::SeqCst);
                if control.check(i + 1, &context)? {
                    break;
                }
            }
            Ok(())
        };
        with_timeout(self.timeout, &self.name, body).await
    }

    fn completion(&self) -> Option<&dyn Completable> {
        Some(self)
    }
}

impl Completable for Repeat {
    fn is_done(&self, context: &TestContext) -> bool {
        self.nested
            .is_done(context, self.children.len(), self.is_disabled(context))
    }
}

impl ActionContainer for Repeat {
    fn children(&self) -> &[Arc<dyn ActionProducer>] {
        &self.children
    }

    fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl fmt::Debug for Repeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repeat")
            .field("name", &self.name)
            .field("control", &self.control)
            .field("timeout", &self.timeout)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::common::{CountingAction, FailingAction};

    #[tokio::test]
    async fn test_runs_at_least_once() {
        let context = TestContext::new();
        let action = CountingAction::new();
        let probe = action.probe();
        // Condition is true right after the first pass.
        let repeat = Repeat::new().until("i gt 0").action(action);

        repeat.execute(&context).await.unwrap();

        assert_eq!(probe.runs(), 1);
        assert_eq!(context.variable("i").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_repeats_until_condition_true() {
        let context = TestContext::new();
        let action = CountingAction::new();
        let probe = action.probe();
        let repeat = Repeat::new().until("i gt 4").action(action);

        repeat.execute(&context).await.unwrap();

        // Passes at index 1 through 4, condition true at 5.
        assert_eq!(probe.runs(), 4);
        assert_eq!(context.variable("i").unwrap(), "4");
        assert!(repeat.is_done(&context));
    }

    #[tokio::test]
    async fn test_child_failure_stops_the_loop() {
        let context = TestContext::new();
        let repeat = Repeat::new()
            .until("i gt 10")
            .action(FailingAction::validation("not equal"));

        let error = repeat.execute(&context).await.unwrap_err();

        assert_eq!(error.message(), "not equal");
        assert_eq!(repeat.nested().executed_count(), 1);
    }

    #[tokio::test]
    async fn test_programmatic_stop_condition() {
        let context = TestContext::new();
        let action = CountingAction::new();
        let probe = action.probe();
        let repeat = Repeat::new()
            .until_fn(|i, _: &TestContext| i >= 3)
            .action(action);

        repeat.execute(&context).await.unwrap();

        assert_eq!(probe.runs(), 2);
    }
}
