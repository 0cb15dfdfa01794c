//! Probeable conditions awaited by [`Wait`].
//!
//! A [`Condition`] is an async probe with human-readable outcome messages.
//! [`Wait`] polls [`Condition::is_satisfied`] until it reports `true` or
//! the time budget runs out, then logs the success message or fails with
//! the error message.
//!
//! [`Wait`]: crate::container::Wait

use std::sync::Arc;

use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt as _};
use parking_lot::Mutex;

use crate::{
    action::TestAction,
    context::TestContext,
    error::ActionError,
};

/// An awaitable state of the system under test.
#[async_trait]
pub trait Condition: Send + Sync {
    /// Name of this condition, used in log output.
    fn name(&self) -> &str;

    /// Probes whether the awaited state is reached.
    ///
    /// Called repeatedly; must not assume any call count or ordering.
    async fn is_satisfied(&self, context: &TestContext) -> bool;

    /// Message logged once the condition is reached.
    fn success_message(&self, context: &TestContext) -> String;

    /// Message of the failure raised when the time budget runs out.
    fn error_message(&self, context: &TestContext) -> String;
}

/// [`Condition`] adapter around an async closure.
///
/// Created via [`from_probe()`].
pub struct FnCondition {
    name: String,
    probe: Box<dyn Fn(TestContext) -> BoxFuture<'static, bool> + Send + Sync>,
}

/// Wraps an async closure into a named [`Condition`].
#[must_use]
pub fn from_probe<F, Fut>(name: impl Into<String>, probe: F) -> FnCondition
where
    F: Fn(TestContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = bool> + Send + 'static,
{
    FnCondition {
        name: name.into(),
        probe: Box::new(move |ctx| probe(ctx).boxed()),
    }
}

#[async_trait]
impl Condition for FnCondition {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_satisfied(&self, context: &TestContext) -> bool {
        (self.probe)(context.clone()).await
    }

    fn success_message(&self, _: &TestContext) -> String {
        format!("condition '{}' satisfied", self.name)
    }

    fn error_message(&self, _: &TestContext) -> String {
        format!("failed waiting for condition '{}'", self.name)
    }
}

/// [`Condition`] that is satisfied once a nested action executes without
/// failure.
///
/// The last failure is kept and woven into the error message, so a timeout
/// explains what kept going wrong.
pub struct ActionCondition {
    action: Arc<dyn TestAction>,
    caught: Mutex<Option<ActionError>>,
}

impl ActionCondition {
    /// Creates a condition probing the given `action`.
    #[must_use]
    pub fn new(action: Arc<dyn TestAction>) -> Self {
        Self {
            action,
            caught: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Condition for ActionCondition {
    fn name(&self) -> &str {
        "action-condition"
    }

    async fn is_satisfied(&self, context: &TestContext) -> bool {
        match self.action.execute(context).await {
            Ok(()) => {
                *self.caught.lock() = None;
                true
            }
            Err(e) => {
                *self.caught.lock() = Some(e);
                false
            }
        }
    }

    fn success_message(&self, _: &TestContext) -> String {
        format!("action '{}' executed without failure", self.action.name())
    }

    fn error_message(&self, _: &TestContext) -> String {
        let action = self.action.name();
        (*self.caught.lock()).as_ref().map_or_else(
            || format!("action '{action}' was never attempted"),
            |e| format!("action '{action}' kept failing: {e}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::action;

    use super::*;

    #[tokio::test]
    async fn test_fn_condition_probes_closure() {
        let polls = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&polls);
        let condition = from_probe("third-time-lucky", move |_| {
            let probe = Arc::clone(&probe);
            async move { probe.fetch_add(1, Ordering::SeqCst) >= 2 }
        });
        let ctx = TestContext::new();

        assert!(!condition.is_satisfied(&ctx).await);
        assert!(!condition.is_satisfied(&ctx).await);
        assert!(condition.is_satisfied(&ctx).await);
        assert_eq!(
            condition.error_message(&ctx),
            "failed waiting for condition 'third-time-lucky'",
        );
    }

    #[tokio::test]
    async fn test_action_condition_reflects_action_outcome() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&attempts);
        let condition = ActionCondition::new(Arc::new(action::from_fn(
            "flaky",
            move |_| {
                let probe = Arc::clone(&probe);
                async move {
                    if probe.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ActionError::runtime("not yet"))
                    } else {
                        Ok(())
                    }
                }
            },
        )));
        let ctx = TestContext::new();

        assert!(!condition.is_satisfied(&ctx).await);
        assert_eq!(
            condition.error_message(&ctx),
            "action 'flaky' kept failing: not yet",
        );
        assert!(condition.is_satisfied(&ctx).await);
        assert_eq!(
            condition.success_message(&ctx),
            "action 'flaky' executed without failure",
        );
    }
}
