//! Fan-out/fan-in execution of nested actions.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::future;
use smart_default::SmartDefault;
use tracing::{debug, warn};

use crate::{
    action::{ActionProducer, Completable, TestAction},
    container::{producer_of, ActionContainer, NestedState},
    context::TestContext,
    error::ActionError,
    Result,
};

/// Container running every child on its own task and joining them all.
///
/// All children run to completion regardless of earlier failures;
/// there is no cross-task cancellation, only aggregation after the
/// join barrier. A single failure is rethrown as-is, several are
/// bundled into one aggregate failure preserving declaration order.
#[derive(SmartDefault)]
pub struct Parallel {
    #[default("parallel".into())]
    name: String,
    children: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
}

impl Parallel {
    /// Creates an empty parallel container.
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
}

#[async_trait]
impl TestAction for Parallel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        debug!(
            container = %self.name,
            children = self.children.len(),
            "Spawning nested actions in parallel",
        );
        let workers: Vec<_> = self
            .children
            .iter()
            .map(|producer| {
                let action = producer.produce();
                let nested = self.nested.clone();
                let context = context.clone();
                tokio::spawn(async move { nested.run_child(action, &context).await })
            })
            .collect();

        let mut failures = Vec::new();
        for (child, joined) in future::join_all(workers).await.into_iter().enumerate() {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e),
                // A lost worker cannot abort the join of its siblings.
                Err(e) => warn!(
                    container = %self.name,
                    child,
                    error = %e,
                    "Joining a parallel worker failed",
                ),
            }
        }

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(ActionError::aggregate(failures)),
        }
    }

    fn completion(&self) -> Option<&dyn Completable> {
        Some(self)
    }
}

impl Completable for Parallel {
    fn is_done(&self, context: &TestContext) -> bool {
        self.nested
            .is_done(context, self.children.len(), self.is_disabled(context))
    }
}

impl ActionContainer for Parallel {
    fn children(&self) -> &[Arc<dyn ActionProducer>] {
        &self.children
    }

    fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl fmt::Debug for Parallel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parallel")
            .field("name", &self.name)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        action::from_fn,
        error::ErrorKind,
        test_utils::common::{CountingAction, FailingAction},
    };

    #[tokio::test]
    async fn test_runs_all_children() {
        let context = TestContext::new();
        let first = CountingAction::new();
        let second = CountingAction::new();
        let (a, b) = (first.probe(), second.probe());
        let parallel = Parallel::new().action(first).action(second);

        parallel.execute(&context).await.unwrap();

        assert_eq!(a.runs(), 1);
        assert_eq!(b.runs(), 1);
        assert_eq!(parallel.nested().executed_count(), 2);
        assert!(parallel.is_done(&context));
    }

    #[tokio::test]
    async fn test_children_overlap_in_time() {
        let context = TestContext::new();
        let parallel = Parallel::new()
            .action(from_fn("sleeper-a", |_| async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok(())
            }))
            .action(from_fn("sleeper-b", |_| async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok(())
            }));

        let before = std::time::Instant::now();
        parallel.execute(&context).await.unwrap();

        // Sequential execution would need at least 80ms.
        assert!(before.elapsed() < Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_single_failure_is_rethrown_directly() {
        let context = TestContext::new();
        let survivor = CountingAction::new();
        let probe = survivor.probe();
        let parallel = Parallel::new()
            .action(FailingAction::validation("not equal"))
            .action(survivor);

        let error = parallel.execute(&context).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.message(), "not equal");
        // The sibling still ran to completion.
        assert_eq!(probe.runs(), 1);
    }

    #[tokio::test]
    async fn test_multiple_failures_aggregate_in_child_order() {
        let context = TestContext::new();
        let parallel = Parallel::new()
            .action(FailingAction::runtime("first broken"))
            .action(CountingAction::new())
            .action(FailingAction::runtime("second broken"));

        let error = parallel.execute(&context).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Aggregate);
        let message = error.message();
        let first = message.find("first broken").unwrap();
        let second = message.find("second broken").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_child_panic_counts_as_failure() {
        let context = TestContext::new();
        let parallel = Parallel::new().action(from_fn("exploding", |_| async {
            panic!("blew up")
        }));

        let error = parallel.execute(&context).await.unwrap_err();
        assert!(error.message().contains("blew up"));
    }
}
