//! Detached execution of nested actions with outcome callbacks.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use futures::FutureExt as _;
use smart_default::SmartDefault;
use tracing::{debug, warn};

use crate::{
    action::{ActionProducer, Completable, TestAction},
    container::{producer_of, ActionContainer, NestedState},
    context::TestContext,
    error::ActionError,
    Result,
};

/// Container running its children on a detached task.
///
/// Execution wraps the child list into a single completable unit and
/// dispatches that unit like any other child: the caller returns
/// immediately while the unit's task runs the children in order. On
/// success the success group runs; on failure the children's error
/// lands on the context's error channel and the error group runs.
/// The unit reports done once the task, callbacks included, has
/// finished, so the base completion invariant makes the container
/// await its background work.
#[derive(SmartDefault)]
pub struct Fork {
    #[default("fork".into())]
    name: String,
    children: Vec<Arc<dyn ActionProducer>>,
    on_success: Vec<Arc<dyn ActionProducer>>,
    on_error: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
}

impl Fork {
    /// Creates an empty fork container.
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

    /// Appends an action run after all children completed without
    /// failure.
    #[must_use]
    pub fn on_success(mut self, action: impl TestAction + 'static) -> Self {
        self.on_success
            .push(Arc::new(producer_of(Arc::new(action))));
        self
    }

    /// Appends an action run after a child failed.
    #[must_use]
    pub fn on_error(mut self, action: impl TestAction + 'static) -> Self {
        self.on_error.push(Arc::new(producer_of(Arc::new(action))));
        self
    }
}

#[async_trait]
impl TestAction for Fork {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        debug!(container = %self.name, "Forking execution of nested actions");
        let unit = Arc::new(AsyncUnit {
            name: format!("{}-unit", self.name),
            children: self.children.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            nested: self.nested.clone(),
            finished: Arc::new(AtomicBool::new(false)),
        });
        self.nested.run_child(unit, context).await
    }

    fn completion(&self) -> Option<&dyn Completable> {
        Some(self)
    }
}

impl Completable for Fork {
    fn is_done(&self, context: &TestContext) -> bool {
        self.nested
            .is_done(context, self.children.len(), self.is_disabled(context))
    }
}

impl ActionContainer for Fork {
    fn children(&self) -> &[Arc<dyn ActionProducer>] {
        &self.children
    }

    fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl fmt::Debug for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fork")
            .field("name", &self.name)
            .field("children", &self.children.len())
            .field("on_success", &self.on_success.len())
            .field("on_error", &self.on_error.len())
            .finish_non_exhaustive()
    }
}

/// Background half of a [`Fork`]: runs the main children and exactly
/// one of the callback groups, then flips its completion flag.
struct AsyncUnit {
    name: String,
    children: Vec<Arc<dyn ActionProducer>>,
    on_success: Vec<Arc<dyn ActionProducer>>,
    on_error: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl TestAction for AsyncUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        let name = self.name.clone();
        let children = self.children.clone();
        let on_success = self.on_success.clone();
        let on_error = self.on_error.clone();
        let nested = self.nested.clone();
        let context = context.clone();
        let finished = Arc::clone(&self.finished);
        tokio::spawn(async move {
            let mut outcome = Ok(());
            for producer in &children {
                if let Err(e) = nested.run_child(producer.produce(), &context).await {
                    outcome = Err(e);
                    break;
                }
            }
            match outcome {
                Ok(()) => {
                    debug!(unit = %name, "Forked actions finished, running success group");
                    for producer in &on_success {
                        run_callback(producer.produce(), &context).await;
                    }
                }
                Err(e) => {
                    warn!(unit = %name, error = %e, "Forked actions failed, running error group");
                    context.add_error(e);
                    for producer in &on_error {
                        run_callback(producer.produce(), &context).await;
                    }
                }
            }
            finished.store(true, Ordering::SeqCst);
        });
        Ok(())
    }

    fn completion(&self) -> Option<&dyn Completable> {
        Some(self)
    }
}

impl Completable for AsyncUnit {
    fn is_done(&self, _: &TestContext) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Runs one callback group action, trapping panics and reporting
/// failures on the context's error channel.
async fn run_callback(action: Arc<dyn TestAction>, context: &TestContext) {
    let outcome = std::panic::AssertUnwindSafe(action.execute(context))
        .catch_unwind()
        .await
        .map_err(ActionError::from_panic)
        .and_then(|outcome| outcome);
    if let Err(e) = outcome {
        warn!(action = action.name(), error = %e, "Fork callback failed");
        context.add_error(e);
    }
}
