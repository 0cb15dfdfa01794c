//! Recovery from failures of an exactly matching kind.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use smart_default::SmartDefault;
use tracing::info;

use crate::{
    action::{ActionProducer, Completable, TestAction},
    container::{producer_of, ActionContainer, NestedState},
    context::TestContext,
    error::ErrorKind,
    Result,
};

/// Container running its children in sequence while suppressing
/// failures of one exact error kind.
///
/// A failure of the caught kind aborts only the failing child; the
/// loop moves on to the next one. Any other failure propagates
/// untouched. Matching is by kind equality, deliberately stricter
/// than the hierarchy matching [`Assert`] applies.
///
/// [`Assert`]: crate::container::Assert
#[derive(SmartDefault)]
pub struct Catch {
    #[default("catch".into())]
    name: String,
    #[default(ErrorKind::Runtime)]
    caught: ErrorKind,
    children: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
}

impl Catch {
    /// Creates a catch container suppressing [`ErrorKind::Runtime`]
    /// failures.
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

    /// Sets the error kind to suppress. Only failures of exactly this
    /// kind are caught, descendant kinds are not.
    #[must_use]
    pub fn caught(mut self, kind: ErrorKind) -> Self {
        self.caught = kind;
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
impl TestAction for Catch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        for producer in &self.children {
            if let Err(e) = self.nested.run_child(producer.produce(), context).await {
                if e.kind() != self.caught {
                    return Err(e);
                }
                info!(
                    container = %self.name,
                    kind = %e.kind(),
                    error = %e,
                    "Caught failure, continuing with next action",
                );
            }
        }
        Ok(())
    }

    fn completion(&self) -> Option<&dyn Completable> {
        Some(self)
    }
}

impl Completable for Catch {
    fn is_done(&self, context: &TestContext) -> bool {
        self.nested
            .is_done(context, self.children.len(), self.is_disabled(context))
    }
}

impl ActionContainer for Catch {
    fn children(&self) -> &[Arc<dyn ActionProducer>] {
        &self.children
    }

    fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl fmt::Debug for Catch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catch")
            .field("name", &self.name)
            .field("caught", &self.caught)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::common::{ExecutionLog, FailingAction, RecordingAction};

    #[tokio::test]
    async fn test_suppresses_matching_failures_and_continues() {
        let context = TestContext::new();
        let log = ExecutionLog::new();
        let catch = Catch::new()
            .caught(ErrorKind::Validation)
            .action(RecordingAction::new("first", &log))
            .action(FailingAction::validation("not equal"))
            .action(RecordingAction::new("last", &log));

        catch.execute(&context).await.unwrap();

        assert_eq!(log.entries(), ["first", "last"]);
        assert_eq!(catch.nested().executed_count(), 3);
        assert!(catch.is_done(&context));
    }

    #[tokio::test]
    async fn test_propagates_other_kinds_untouched() {
        let context = TestContext::new();
        let log = ExecutionLog::new();
        let catch = Catch::new()
            .caught(ErrorKind::Validation)
            .action(FailingAction::runtime("boom"))
            .action(RecordingAction::new("never", &log));

        let error = catch.execute(&context).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Runtime);
        assert_eq!(error.message(), "boom");
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_matching_is_exact_not_hierarchical() {
        let context = TestContext::new();
        // Validation is a descendant of Runtime, but catching Runtime
        // must not swallow it.
        let catch = Catch::new()
            .caught(ErrorKind::Runtime)
            .action(FailingAction::validation("not equal"));

        let error = catch.execute(&context).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
    }
}
