//! Pre-checked loop over nested actions with a configurable step.

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
    error::ActionError,
    Result,
};

/// Container re-running its children while a condition holds.
///
/// The loop is pre-checked: the condition is evaluated against the
/// current index before every pass, each pass publishes the index as
/// a variable and re-produces the entire child list from scratch,
/// then the index advances by the configured step. The step may be
/// negative; avoiding a non-terminating condition is the caller's
/// responsibility, though an optional timeout can bound the loop.
#[derive(SmartDefault)]
pub struct Iterate {
    #[default("iterate".into())]
    name: String,
    control: LoopControl,
    #[default(1)]
    step: i64,
    timeout: Option<Duration>,
    #[default(Arc::new(AtomicI64::new(1)))]
    index: Arc<AtomicI64>,
    children: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
}

impl Iterate {
    /// Creates an iterate container. A [`condition`] must be
    /// configured before execution.
    ///
    /// [`condition`]: Iterate::condition
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

    /// Sets the loop condition string, re-evaluated before every pass.
    #[must_use]
    pub fn condition(mut self, expression: impl Into<String>) -> Self {
        self.control.condition = Either::Left(expression.into());
        self
    }

    /// Sets a programmatic loop condition receiving the current index.
    #[must_use]
    pub fn condition_fn(
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

    /// Sets the per-pass index increment. Must not be zero.
    #[must_use]
    pub fn step(mut self, step: i64) -> Self {
        self.step = step;
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
impl TestAction for Iterate {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        if self.step == 0 {
            return Err(ActionError::runtime("iterate step must not be zero"));
        }
        self.index.store(self.control.start, Ordering::SeqCst);
        debug!(
            container = %self.name,
            index_name = %self.control.index_name,
            start = self.control.start,
            step = self.step,
            "Starting iteration",
        );

        let control = self.control.clone();
        let nested = self.nested.clone();
        let children = self.children.clone();
        let context = context.clone();
        let index = Arc::clone(&self.index);
        let step = self.step;
        let body = async move {
            loop {
                let i = index.load(Ordering::SeqCst);
                if !control.check(i, &context)? {
                    break;
                }
                run_pass(&control, i, &nested, &children, &context).await?;
                index.store(i + step, Ordering::SeqCst);
            }
            Ok(())
        };
        with_timeout(self.timeout, &self.name, body).await
    }

    fn completion(&self) -> Option<&dyn Completable> {
        Some(self)
    }
}

impl Completable for Iterate {
    /// Done per the base invariant, or as soon as the condition no
    /// longer holds for the current index. Evaluation errors fall back
    /// to the base invariant.
    fn is_done(&self, context: &TestContext) -> bool {
        self.nested
            .is_done(context, self.children.len(), self.is_disabled(context))
            || !self
                .control
                .check(self.index.load(Ordering::SeqCst), context)
                .unwrap_or(true)
    }
}

impl ActionContainer for Iterate {
    fn children(&self) -> &[Arc<dyn ActionProducer>] {
        &self.children
    }

    fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl fmt::Debug for Iterate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iterate")
            .field("name", &self.name)
            .field("control", &self.control)
            .field("step", &self.step)
            .field("timeout", &self.timeout)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}
