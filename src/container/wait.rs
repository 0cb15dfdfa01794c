//! Polling for a condition within a bounded time budget.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures::FutureExt as _;
use smart_default::SmartDefault;
use tracing::{debug, info, warn};

use crate::{
    action::TestAction, condition::Condition, context::TestContext,
    error::ActionError, Result,
};

/// Action polling a [`Condition`] until satisfied or a total time
/// budget runs out.
///
/// The budget and poll interval are strings resolved at execution
/// time: variables are substituted, then the value is read as plain
/// milliseconds or as a [`humantime`] expression like `1s 500ms`.
/// Each poll bounds the condition check with the interval, treats a
/// timed-out or panicking check as "not yet satisfied", and sleeps
/// out the rest of the interval before the next attempt. The interval
/// never exceeds the remaining budget. Exhausting the budget fails
/// with the condition's own error message.
#[derive(SmartDefault)]
pub struct Wait {
    #[default("wait".into())]
    name: String,
    condition: Option<Arc<dyn Condition>>,
    #[default("5000".into())]
    time: String,
    #[default("1000".into())]
    interval: String,
}

impl Wait {
    /// Creates a wait action with a five second budget polled every
    /// second. A [`condition`] must be configured before execution.
    ///
    /// [`condition`]: Wait::condition
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the action name used in logs and failure reports.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the condition to poll.
    #[must_use]
    pub fn condition(mut self, condition: impl Condition + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Sets the total wait budget, in milliseconds or `humantime`
    /// notation. Variables are substituted at execution time.
    #[must_use]
    pub fn time(mut self, time: impl Into<String>) -> Self {
        self.time = time.into();
        self
    }

    /// Sets the poll interval, in milliseconds or `humantime`
    /// notation. Variables are substituted at execution time.
    #[must_use]
    pub fn interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = interval.into();
        self
    }

    fn duration_of(&self, context: &TestContext, raw: &str, what: &str) -> Result<Duration> {
        let resolved = context.replace_dynamic_content(raw)?;
        let trimmed = resolved.trim();
        if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
            return trimmed
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| {
                    ActionError::runtime(format!("invalid {what} '{trimmed}': {e}"))
                });
        }
        humantime::parse_duration(trimmed).map_err(|e| {
            ActionError::runtime(format!("invalid {what} '{trimmed}': {e}"))
        })
    }
}

#[async_trait]
impl TestAction for Wait {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        let Some(condition) = &self.condition else {
            return Err(ActionError::runtime(
                "wait action has no condition to poll",
            ));
        };
        let total = self.duration_of(context, &self.time, "wait time")?;
        let interval = self.duration_of(context, &self.interval, "poll interval")?;
        if interval.is_zero() {
            return Err(ActionError::runtime("poll interval must be positive"));
        }
        debug!(
            container = %self.name,
            condition = condition.name(),
            total = ?total,
            interval = ?interval,
            "Waiting for condition",
        );

        let mut time_left = total;
        while !time_left.is_zero() {
            let slice = interval.min(time_left);
            time_left = time_left.saturating_sub(interval);
            let started = Instant::now();

            let probe = std::panic::AssertUnwindSafe(condition.is_satisfied(context))
                .catch_unwind();
            let satisfied = match tokio::time::timeout(slice, probe).await {
                Ok(Ok(satisfied)) => satisfied,
                Ok(Err(payload)) => {
                    let e = ActionError::from_panic(payload);
                    warn!(container = %self.name, error = %e, "Condition check panicked");
                    false
                }
                // A check outlasting its slice counts as not yet
                // satisfied, not as an error.
                Err(_) => {
                    warn!(container = %self.name, "Condition check timed out");
                    false
                }
            };
            if satisfied {
                info!(container = %self.name, "{}", condition.success_message(context));
                return Ok(());
            }
            if let Some(remainder) = slice.checked_sub(started.elapsed()) {
                tokio::time::sleep(remainder).await;
            }
        }
        Err(ActionError::timeout(total, condition.error_message(context)))
    }
}

impl fmt::Debug for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait")
            .field("name", &self.name)
            .field(
                "condition",
                &self.condition.as_ref().map(|c| c.name().to_owned()),
            )
            .field("time", &self.time)
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{condition::from_probe, error::ErrorKind};

    #[tokio::test]
    async fn test_returns_once_condition_is_satisfied() {
        let context = TestContext::new();
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let wait = Wait::new()
            .time("500")
            .interval("20")
            .condition(from_probe("third-time-lucky", move |_| {
                let polls = Arc::clone(&counter);
                async move { polls.fetch_add(1, Ordering::SeqCst) + 1 >= 3 }
            }));

        let before = Instant::now();
        wait.execute(&context).await.unwrap();

        assert_eq!(polls.load(Ordering::SeqCst), 3);
        // Satisfied on the third poll, well before the full budget.
        assert!(before.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_fails_with_the_conditions_error_message() {
        let context = TestContext::new();
        let wait = Wait::new()
            .time("60")
            .interval("20")
            .condition(from_probe("never", |_| async { false }));

        let error = wait.execute(&context).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert_eq!(error.message(), "failed waiting for condition 'never'");
    }

    #[tokio::test]
    async fn test_durations_support_humantime_and_variables() {
        let context = TestContext::new();
        context.set_variable("budget", "100ms");
        let wait = Wait::new()
            .time("${budget}")
            .interval("10ms")
            .condition(from_probe("instant", |_| async { true }));

        wait.execute(&context).await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_check_counts_as_unsatisfied() {
        let context = TestContext::new();
        let wait = Wait::new()
            .time("60")
            .interval("20")
            .condition(from_probe("sluggish", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                true
            }));

        let error = wait.execute(&context).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_missing_condition_is_rejected() {
        let context = TestContext::new();
        let wait = Wait::new();

        let error = wait.execute(&context).await.unwrap_err();
        assert!(error.message().contains("no condition"));
    }

    #[tokio::test]
    async fn test_invalid_duration_is_rejected() {
        let context = TestContext::new();
        let wait = Wait::new()
            .time("soon")
            .condition(from_probe("any", |_| async { true }));

        let error = wait.execute(&context).await.unwrap_err();
        assert!(error.message().contains("invalid wait time"));
    }
}
