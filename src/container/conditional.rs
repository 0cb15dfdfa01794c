//! Predicate-gated execution of nested actions.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use either::Either;
use smart_default::SmartDefault;
use tracing::debug;

use crate::{
    action::{ActionProducer, Completable, TestAction},
    container::{producer_of, ActionContainer, NestedState},
    context::TestContext,
    error::ErrorKind,
    Result,
};

/// Programmatic gate for a [`Conditional`] container.
pub type Predicate = Arc<dyn Fn(&TestContext) -> bool + Send + Sync>;

/// Container running its children only when a condition holds.
///
/// The condition is either a programmatic [`Predicate`] or a string
/// that is resolved at execution time: variables are substituted
/// first, then the string is treated as a validation matcher
/// expression if it looks like one, or as a boolean expression
/// otherwise. A false condition skips the children entirely and the
/// container reports done immediately.
#[derive(SmartDefault)]
pub struct Conditional {
    #[default("conditional".into())]
    name: String,
    #[default(Either::Left("true".into()))]
    condition: Either<String, Predicate>,
    children: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
}

impl Conditional {
    /// Creates a conditional container that would run its children
    /// unconditionally until a condition is configured.
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

    /// Gates the children on a condition string, evaluated freshly on
    /// every execution after variable substitution.
    #[must_use]
    pub fn when(mut self, expression: impl Into<String>) -> Self {
        self.condition = Either::Left(expression.into());
        self
    }

    /// Gates the children on a programmatic predicate.
    #[must_use]
    pub fn when_fn(
        mut self,
        predicate: impl Fn(&TestContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition = Either::Right(Arc::new(predicate));
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

    fn check_condition(&self, context: &TestContext) -> Result<bool> {
        match &self.condition {
            Either::Right(predicate) => Ok(predicate(context)),
            Either::Left(expression) => {
                let condition = context.replace_dynamic_content(expression)?;
                if context.is_matcher_expression(&condition) {
                    return match context.resolve_matcher(&self.name, "", &condition) {
                        Ok(()) => Ok(true),
                        Err(e) if e.kind() == ErrorKind::Validation => Ok(false),
                        Err(e) => Err(e),
                    };
                }
                context.evaluate_boolean(&condition)
            }
        }
    }
}

#[async_trait]
impl TestAction for Conditional {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        if !self.check_condition(context)? {
            debug!(container = %self.name, "Condition not met, skipping nested actions");
            return Ok(());
        }
        debug!(
            container = %self.name,
            children = self.children.len(),
            "Condition met, executing nested actions",
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

impl Completable for Conditional {
    /// Done as soon as the condition no longer holds, even mid-run.
    ///
    /// The condition is re-evaluated live against the current context,
    /// so concurrent variable writes can flip the answer between the
    /// execution-time check and this one. Evaluation errors fall back
    /// to the base invariant.
    fn is_done(&self, context: &TestContext) -> bool {
        self.nested
            .is_done(context, self.children.len(), self.is_disabled(context))
            || !self.check_condition(context).unwrap_or(true)
    }
}

impl ActionContainer for Conditional {
    fn children(&self) -> &[Arc<dyn ActionProducer>] {
        &self.children
    }

    fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl fmt::Debug for Conditional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let condition: &dyn fmt::Debug = match &self.condition {
            Either::Left(expression) => expression,
            Either::Right(_) => &"<predicate>",
        };
        f.debug_struct("Conditional")
            .field("name", &self.name)
            .field("condition", condition)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}
