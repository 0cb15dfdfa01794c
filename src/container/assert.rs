//! Supervision of an action that is expected to fail.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use smart_default::SmartDefault;
use tracing::debug;

use crate::{
    action::{ActionProducer, Completable, TestAction},
    container::{producer_of, ActionContainer, NestedState},
    context::TestContext,
    error::{ActionError, ErrorKind},
    Result,
};

/// Container wrapping exactly one action whose failure is the expected
/// outcome.
///
/// Execution succeeds only if the wrapped action fails with an error
/// whose kind is the expected kind or a descendant of it. A configured
/// message is additionally checked, either as a validation matcher
/// expression against the caught message or as an exact comparison
/// after variable substitution. An action completing without any
/// failure is itself a failure.
#[derive(SmartDefault)]
pub struct Assert {
    #[default("assert".into())]
    name: String,
    child: Vec<Arc<dyn ActionProducer>>,
    #[default(ErrorKind::Runtime)]
    expected: ErrorKind,
    message: Option<String>,
    nested: NestedState,
}

impl Assert {
    /// Creates an assert container expecting any [`ErrorKind::Runtime`]
    /// failure.
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

    /// Sets the action expected to fail, replacing any previous one.
    #[must_use]
    pub fn action(self, action: impl TestAction + 'static) -> Self {
        self.producer(producer_of(Arc::new(action)))
    }

    /// Sets a deferred builder of the action expected to fail,
    /// replacing any previous one.
    #[must_use]
    pub fn producer(mut self, producer: impl ActionProducer + 'static) -> Self {
        self.child = vec![Arc::new(producer)];
        self
    }

    /// Sets the error kind the failure must be assignable to.
    ///
    /// Matching follows the kind hierarchy: a caught
    /// [`ErrorKind::Validation`] satisfies an expected
    /// [`ErrorKind::Runtime`], but not the other way around.
    #[must_use]
    pub fn expect_kind(mut self, kind: ErrorKind) -> Self {
        self.expected = kind;
        self
    }

    /// Additionally requires the failure message to match.
    #[must_use]
    pub fn expect_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn check_message(&self, context: &TestContext, caught: &ActionError) -> Result<()> {
        let Some(message) = &self.message else {
            return Ok(());
        };
        if context.is_matcher_expression(message) {
            return context.resolve_matcher("message", &caught.message(), message);
        }
        let expected = context.replace_dynamic_content(message)?;
        let actual = caught.message();
        if expected != actual {
            return Err(ActionError::validation(format!(
                "failure message mismatch: expected '{expected}', got '{actual}'",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TestAction for Assert {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        let Some(producer) = self.child.first() else {
            return Err(ActionError::runtime(
                "assert container has no action to supervise",
            ));
        };
        let action = producer.produce();
        debug!(
            container = %self.name,
            action = action.name(),
            expected = %self.expected,
            "Asserting failure of nested action",
        );

        let Err(caught) = self
            .nested
            .run_child(Arc::clone(&action), context)
            .await
        else {
            return Err(ActionError::validation(format!(
                "missing asserted failure, action '{}' finished without error",
                action.name(),
            )));
        };
        if !caught.kind().is_a(self.expected) {
            return Err(ActionError::validation(format!(
                "failure kind mismatch: expected '{}', caught '{}' ({caught})",
                self.expected,
                caught.kind(),
            )));
        }
        self.check_message(context, &caught)?;

        debug!(container = %self.name, error = %caught, "Caught the asserted failure");
        Ok(())
    }

    fn completion(&self) -> Option<&dyn Completable> {
        Some(self)
    }
}

impl Completable for Assert {
    fn is_done(&self, context: &TestContext) -> bool {
        self.nested
            .is_done(context, self.child.len(), self.is_disabled(context))
    }
}

impl ActionContainer for Assert {
    fn children(&self) -> &[Arc<dyn ActionProducer>] {
        &self.child
    }

    fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl fmt::Debug for Assert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assert")
            .field("name", &self.name)
            .field("expected", &self.expected)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::common::{CountingAction, FailingAction};

    #[tokio::test]
    async fn test_passes_when_expected_failure_is_caught() {
        let context = TestContext::new();
        let assert = Assert::new().action(FailingAction::runtime("boom"));

        assert.execute(&context).await.unwrap();
        assert!(assert.is_done(&context));
    }

    #[tokio::test]
    async fn test_kind_matching_follows_hierarchy() {
        let context = TestContext::new();
        // Validation failures are runtime failures, so expecting the
        // broader kind succeeds.
        let assert = Assert::new()
            .expect_kind(ErrorKind::Runtime)
            .action(FailingAction::validation("not equal"));

        assert.execute(&context).await.unwrap();
    }

    #[tokio::test]
    async fn test_fails_on_kind_mismatch() {
        let context = TestContext::new();
        let assert = Assert::new()
            .expect_kind(ErrorKind::Validation)
            .action(FailingAction::runtime("boom"));

        let error = assert.execute(&context).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(error.message().contains("failure kind mismatch"));
    }

    #[tokio::test]
    async fn test_fails_when_action_succeeds() {
        let context = TestContext::new();
        let assert = Assert::new().action(CountingAction::named("fine"));

        let error = assert.execute(&context).await.unwrap_err();
        assert!(error.message().contains("missing asserted failure"));
        // The successful child still counts as executed.
        assert_eq!(assert.nested().executed_count(), 1);
    }

    #[tokio::test]
    async fn test_exact_message_comparison_after_substitution() {
        let context = TestContext::new();
        context.set_variable("detail", "boom");
        let assert = Assert::new()
            .expect_message("${detail}")
            .action(FailingAction::runtime("boom"));

        assert.execute(&context).await.unwrap();

        let mismatch = Assert::new()
            .expect_message("bang")
            .action(FailingAction::runtime("boom"));
        let error = mismatch.execute(&context).await.unwrap_err();
        assert!(error.message().contains("failure message mismatch"));
    }

    #[tokio::test]
    async fn test_matcher_message_comparison() {
        let context = TestContext::new();
        let assert = Assert::new()
            .expect_message("@contains('oo')@")
            .action(FailingAction::runtime("boom"));

        assert.execute(&context).await.unwrap();

        let mismatch = Assert::new()
            .expect_message("@contains('xyz')@")
            .action(FailingAction::runtime("boom"));
        let error = mismatch.execute(&context).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_missing_child_is_a_failure() {
        let context = TestContext::new();
        let assert = Assert::new();

        let error = assert.execute(&context).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Runtime);
    }
}
