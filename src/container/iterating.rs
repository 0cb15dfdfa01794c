//! Machinery shared by the index-driven loop containers.

use std::{sync::Arc, time::Duration};

use either::Either;
use futures::Future;
use smart_default::SmartDefault;

use crate::{
    action::ActionProducer,
    container::NestedState,
    context::TestContext,
    error::{ActionError, ErrorKind},
    Result,
};

/// Programmatic loop condition, called with the current index.
pub(super) type IterationPredicate =
    Arc<dyn Fn(i64, &TestContext) -> bool + Send + Sync>;

/// Condition and index bookkeeping of a loop container.
///
/// The runtime index itself lives on the owning container; this only
/// decides, for a given index, whether the loop keeps going.
#[derive(Clone, SmartDefault)]
pub(super) struct LoopControl {
    /// Textual condition or programmatic predicate. The default empty
    /// string fails evaluation, so every loop container has to
    /// configure one.
    #[default(Either::Left(String::new()))]
    pub(super) condition: Either<String, IterationPredicate>,
    /// Variable name the current index is published under.
    #[default("i".into())]
    pub(super) index_name: String,
    /// First index value of every execution.
    #[default(1)]
    pub(super) start: i64,
}

impl LoopControl {
    /// Evaluates the loop condition against the given `index`.
    ///
    /// String conditions are resolved against a context snapshot with
    /// the index published as a variable, so the substitution never
    /// leaks into the shared context. A validation matcher expression
    /// receives the index as the value under test and maps validation
    /// failure to `false`. Anything else has literal occurrences of
    /// the index name replaced and is evaluated as a boolean
    /// expression.
    ///
    /// # Errors
    ///
    /// Malformed expressions and matcher resolution failures other
    /// than validation mismatches are fatal to the container.
    pub(super) fn check(&self, index: i64, context: &TestContext) -> Result<bool> {
        match &self.condition {
            Either::Right(predicate) => Ok(predicate(index, context)),
            Either::Left(expression) => {
                let scope = context.snapshot();
                scope.set_variable(self.index_name.clone(), index.to_string());
                let condition = scope.replace_dynamic_content(expression)?;
                if scope.is_matcher_expression(&condition) {
                    return match scope.resolve_matcher(
                        &self.index_name,
                        &index.to_string(),
                        &condition,
                    ) {
                        Ok(()) => Ok(true),
                        Err(e) if e.kind() == ErrorKind::Validation => Ok(false),
                        Err(e) => Err(e),
                    };
                }
                let condition =
                    condition.replace(&self.index_name, &index.to_string());
                scope.evaluate_boolean(&condition)
            }
        }
    }
}

impl std::fmt::Debug for LoopControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let condition: &dyn std::fmt::Debug = match &self.condition {
            Either::Left(expression) => expression,
            Either::Right(_) => &"<predicate>",
        };
        f.debug_struct("LoopControl")
            .field("condition", condition)
            .field("index_name", &self.index_name)
            .field("start", &self.start)
            .finish()
    }
}

/// Runs one loop pass: publishes the `index` under the configured
/// variable name, then produces and runs every child in order.
pub(super) async fn run_pass(
    control: &LoopControl,
    index: i64,
    nested: &NestedState,
    children: &[Arc<dyn ActionProducer>],
    context: &TestContext,
) -> Result<()> {
    context.set_variable(control.index_name.clone(), index.to_string());
    for producer in children {
        nested.run_child(producer.produce(), context).await?;
    }
    Ok(())
}

/// Bounds the loop `body` with an optional time `budget`.
///
/// Without a budget the body runs inline. With one, the body moves to
/// its own task and only the caller's wait is bounded: an elapsed
/// budget abandons the task, which may keep looping in the background.
/// Both an elapsed budget and a failure inside the worker surface as
/// timeout failures, the latter with the worker's failure as cause.
pub(super) async fn with_timeout<F>(
    budget: Option<Duration>,
    container: &str,
    body: F,
) -> Result<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let Some(budget) = budget else { return body.await };
    let worker = tokio::spawn(body);
    match tokio::time::timeout(budget, worker).await {
        Ok(Ok(outcome)) => outcome.map_err(|e| {
            ActionError::timeout_with_cause(
                budget,
                format!("iteration loop of '{container}' failed"),
                e,
            )
        }),
        Ok(Err(join)) => Err(if join.is_panic() {
            ActionError::from_panic(join.into_panic())
        } else {
            ActionError::runtime(format!(
                "iteration loop of '{container}' was cancelled",
            ))
        }),
        Err(_) => Err(ActionError::timeout(
            budget,
            format!("iteration loop of '{container}' did not finish in time"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expression_control(condition: &str) -> LoopControl {
        LoopControl {
            condition: Either::Left(condition.into()),
            ..LoopControl::default()
        }
    }

    #[test]
    fn test_check_replaces_index_name_literally() {
        let context = TestContext::new();
        let control = expression_control("i lt= 3");

        assert!(control.check(1, &context).unwrap());
        assert!(control.check(3, &context).unwrap());
        assert!(!control.check(4, &context).unwrap());
    }

    #[test]
    fn test_check_substitutes_index_variable() {
        let context = TestContext::new();
        let control = expression_control("${i} < 3");

        assert!(control.check(2, &context).unwrap());
        assert!(!control.check(3, &context).unwrap());
        // The snapshot keeps the index out of the real context.
        assert!(!context.has_variable("i"));
    }

    #[test]
    fn test_check_resolves_matcher_expressions() {
        let context = TestContext::new();
        let control = expression_control("@lowerThan(5)@");

        assert!(control.check(4, &context).unwrap());
        assert!(!control.check(5, &context).unwrap());
    }

    #[test]
    fn test_check_rejects_unknown_matcher() {
        let context = TestContext::new();
        let control = expression_control("@noSuchMatcher(5)@");

        let error = control.check(1, &context).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Runtime);
    }

    #[test]
    fn test_check_delegates_to_predicate() {
        let context = TestContext::new();
        let control = LoopControl {
            condition: Either::Right(Arc::new(|index, _: &TestContext| index < 2)),
            ..LoopControl::default()
        };

        assert!(control.check(1, &context).unwrap());
        assert!(!control.check(2, &context).unwrap());
    }

    #[test]
    fn test_check_fails_without_condition() {
        let context = TestContext::new();
        let control = LoopControl::default();

        assert!(control.check(1, &context).is_err());
    }

    #[tokio::test]
    async fn test_with_timeout_runs_inline_without_budget() {
        let outcome = with_timeout(None, "loop", async { Ok(()) }).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_with_timeout_reports_elapsed_budget() {
        let budget = Duration::from_millis(20);
        let error = with_timeout(Some(budget), "loop", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert!(error.message().contains("did not finish in time"));
    }

    #[tokio::test]
    async fn test_with_timeout_wraps_worker_failures() {
        let budget = Duration::from_secs(30);
        let error = with_timeout(Some(budget), "loop", async {
            Err(ActionError::validation("not equal"))
        })
        .await
        .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert_eq!(
            error.cause().map(ActionError::message),
            Some("not equal".into()),
        );
    }
}
