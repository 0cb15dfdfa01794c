//! Ordered, fail-fast execution of nested actions.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use smart_default::SmartDefault;
use tracing::debug;

use crate::{
    action::{ActionProducer, Completable, TestAction},
    container::{producer_of, ActionContainer, NestedState},
    context::TestContext,
    Result,
};

/// Container executing its children one after another in declaration
/// order, stopping at the first failure.
#[derive(SmartDefault)]
pub struct Sequence {
    #[default("sequential".into())]
    name: String,
    children: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
}

impl Sequence {
    /// Creates an empty sequence.
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

    /// Appends a deferred builder as the next child. The producer is
    /// invoked freshly on every execution of this container.
    #[must_use]
    pub fn producer(mut self, producer: impl ActionProducer + 'static) -> Self {
        self.children.push(Arc::new(producer));
        self
    }
}

#[async_trait]
impl TestAction for Sequence {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        debug!(
            container = %self.name,
            children = self.children.len(),
            "Executing actions in sequence",
        );
        for producer in &self.children {
            self.nested.run_child(producer.produce(), context).await?;
        }
        Ok(())
    }

    fn completion(&self) -> Option<&dyn Completable> {
        Some(self)
    }
}

impl Completable for Sequence {
    fn is_done(&self, context: &TestContext) -> bool {
        self.nested
            .is_done(context, self.children.len(), self.is_disabled(context))
    }
}

impl ActionContainer for Sequence {
    fn children(&self) -> &[Arc<dyn ActionProducer>] {
        &self.children
    }

    fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("name", &self.name)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

/// Variant of [`Sequence`] that defers its children to test teardown.
///
/// Instead of running inline, every child is handed over to the
/// context's finally chain and executes once
/// [`TestContext::run_finally`] is invoked. This is the only container
/// changing *when* execution happens rather than *whether*.
#[derive(SmartDefault)]
pub struct FinallySequence {
    #[default("finally".into())]
    name: String,
    children: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
}

impl FinallySequence {
    /// Creates an empty finally sequence.
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

    /// Appends a ready action to be deferred to teardown.
    #[must_use]
    pub fn action(self, action: impl TestAction + 'static) -> Self {
        self.producer(producer_of(Arc::new(action)))
    }

    /// Appends a deferred builder to be deferred to teardown.
    #[must_use]
    pub fn producer(mut self, producer: impl ActionProducer + 'static) -> Self {
        self.children.push(Arc::new(producer));
        self
    }
}

#[async_trait]
impl TestAction for FinallySequence {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        debug!(
            container = %self.name,
            children = self.children.len(),
            "Deferring actions to test teardown",
        );
        for producer in &self.children {
            let producer = Arc::clone(producer);
            context.do_finally(move || producer.produce());
        }
        Ok(())
    }

    fn completion(&self) -> Option<&dyn Completable> {
        Some(self)
    }
}

impl Completable for FinallySequence {
    // The deferred children never pass through this container's own
    // executed log, so the base invariant reports done right away.
    fn is_done(&self, context: &TestContext) -> bool {
        self.nested
            .is_done(context, self.children.len(), self.is_disabled(context))
    }
}

impl ActionContainer for FinallySequence {
    fn children(&self) -> &[Arc<dyn ActionProducer>] {
        &self.children
    }

    fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl fmt::Debug for FinallySequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinallySequence")
            .field("name", &self.name)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::common::{
        CountingAction, ExecutionLog, FailingAction, GatedAction, RecordingAction,
    };

    #[tokio::test]
    async fn test_executes_children_in_declaration_order() {
        let context = TestContext::new();
        let log = ExecutionLog::new();
        let sequence = Sequence::new()
            .action(RecordingAction::new("first", &log))
            .action(RecordingAction::new("second", &log))
            .action(RecordingAction::new("third", &log));

        sequence.execute(&context).await.unwrap();

        assert_eq!(log.entries(), ["first", "second", "third"]);
        assert_eq!(sequence.nested().executed_count(), 3);
        assert!(sequence.is_done(&context));
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let context = TestContext::new();
        let log = ExecutionLog::new();
        let sequence = Sequence::new()
            .action(RecordingAction::new("first", &log))
            .action(FailingAction::runtime("boom"))
            .action(RecordingAction::new("last", &log));

        let error = sequence.execute(&context).await.unwrap_err();

        assert_eq!(error.message(), "boom");
        assert_eq!(log.entries(), ["first"]);
        // The failing child still lands in the executed log.
        assert_eq!(sequence.nested().executed_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_sequence_is_trivially_done() {
        let context = TestContext::new();
        let sequence = Sequence::new();

        assert!(sequence.is_done(&context));
        sequence.execute(&context).await.unwrap();
        assert!(sequence.is_done(&context));
    }

    #[tokio::test]
    async fn test_skips_disabled_children() {
        let context = TestContext::new();
        let disabled = CountingAction::named("off").disabled();
        let skipped = disabled.probe();
        let enabled = CountingAction::new();
        let ran = enabled.probe();

        let sequence = Sequence::new().action(disabled).action(enabled);
        sequence.execute(&context).await.unwrap();

        assert_eq!(skipped.runs(), 0);
        assert_eq!(ran.runs(), 1);
        assert_eq!(sequence.nested().executed_count(), 1);
    }

    #[tokio::test]
    async fn test_completion_follows_nested_state() {
        let context = TestContext::new();
        let action = GatedAction::named("slow");
        let gate = action.gate();
        let sequence = Sequence::new().action(action);

        sequence.execute(&context).await.unwrap();
        assert!(!sequence.is_done(&context));

        gate.open();
        assert!(sequence.is_done(&context));
    }

    #[tokio::test]
    async fn test_action_lookup_prefers_the_executed_child() {
        let context = TestContext::new();
        let sequence = Sequence::new()
            .action(CountingAction::named("ran"))
            .action(FailingAction::runtime("boom"))
            .action(CountingAction::named("declared-only"));

        sequence.execute(&context).await.unwrap_err();

        // Indices 0 and 1 were reached; index 2 falls back to a fresh
        // instance of the declared child.
        let executed = sequence.test_action(0).unwrap();
        assert!(Arc::ptr_eq(&executed, &sequence.nested().executed()[0]));
        let declared = sequence.test_action(2).unwrap();
        assert_eq!(declared.name(), "declared-only");
        assert!(sequence.test_action(3).is_none());
    }

    #[tokio::test]
    async fn test_finally_defers_children_to_teardown() {
        let context = TestContext::new();
        let log = ExecutionLog::new();
        let finally = FinallySequence::new()
            .action(RecordingAction::new("cleanup-a", &log))
            .action(RecordingAction::new("cleanup-b", &log));

        finally.execute(&context).await.unwrap();

        assert!(log.entries().is_empty());
        assert_eq!(finally.nested().executed_count(), 0);
        assert!(finally.is_done(&context));

        context.run_finally().await.unwrap();
        assert_eq!(log.entries(), ["cleanup-a", "cleanup-b"]);
    }
}
