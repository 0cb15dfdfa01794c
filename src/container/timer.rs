//! Scheduled, repeated execution of nested actions.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use smart_default::SmartDefault;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    action::{ActionProducer, Completable, TestAction},
    container::{producer_of, ActionContainer, NestedState},
    context::{StopTimer, TestContext},
    error::ActionError,
    Result,
};

static TIMER_SERIAL: AtomicUsize = AtomicUsize::new(1);

fn next_timer_id() -> String {
    format!("timer-{}", TIMER_SERIAL.fetch_add(1, Ordering::Relaxed))
}

/// Container firing its children on a fixed-rate schedule.
///
/// Each firing bumps a fire count, publishes it under the
/// `<timer id>-index` variable and runs all children in order. The
/// timer stops itself once the fire count reaches the configured
/// repeat count, when a firing fails, or when [`stop_timer`] is
/// invoked, directly or through the context registry the timer signs
/// up with on execution. Firings are serialized: a firing that
/// outlasts the interval delays the next one, which then follows
/// immediately.
///
/// Non-forked timers block the caller until the schedule ends and
/// rethrow a captured failure. Forked timers return right away and
/// report failures on the context's error channel instead.
///
/// [`stop_timer`]: StopTimer::stop_timer
#[derive(SmartDefault)]
pub struct Timer {
    #[default("timer".into())]
    name: String,
    #[default(next_timer_id())]
    timer_id: String,
    delay: Duration,
    #[default(Duration::from_secs(1))]
    interval: Duration,
    repeat_count: Option<u32>,
    fork: bool,
    children: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
    state: Arc<TimerState>,
}

impl Timer {
    /// Creates a timer firing every second until stopped.
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

    /// Overrides the generated timer id.
    #[must_use]
    pub fn id(mut self, timer_id: impl Into<String>) -> Self {
        self.timer_id = timer_id.into();
        self
    }

    /// Sets the delay before the first firing.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the fixed-rate interval between firings.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stops the timer automatically after the given number of firings.
    #[must_use]
    pub fn repeat(mut self, count: u32) -> Self {
        self.repeat_count = Some(count);
        self
    }

    /// Detaches the schedule from the caller: execution returns
    /// immediately and failures surface on the context's error channel.
    #[must_use]
    pub fn forked(mut self) -> Self {
        self.fork = true;
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

    /// The id this timer registers itself under.
    #[must_use]
    pub fn timer_id(&self) -> &str {
        &self.timer_id
    }

    /// Number of firings so far.
    #[must_use]
    pub fn fires(&self) -> u32 {
        self.state.fires.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestAction for Timer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        if self.interval.is_zero() {
            return Err(ActionError::runtime("timer interval must be positive"));
        }
        context.register_timer(
            self.timer_id.clone(),
            Arc::clone(&self.state) as Arc<dyn StopTimer>,
        );
        debug!(
            container = %self.name,
            timer_id = %self.timer_id,
            interval = ?self.interval,
            fork = self.fork,
            "Starting timer",
        );

        let schedule = Schedule {
            timer_id: self.timer_id.clone(),
            delay: self.delay,
            interval: self.interval,
            repeat_count: self.repeat_count,
            children: self.children.clone(),
            nested: self.nested.clone(),
            state: Arc::clone(&self.state),
        };
        if self.fork {
            let context = context.clone();
            tokio::spawn(async move {
                if let Err(e) = schedule.run(&context).await {
                    context.add_error(e);
                }
            });
            return Ok(());
        }
        schedule.run(context).await
    }

    fn completion(&self) -> Option<&dyn Completable> {
        Some(self)
    }
}

impl Completable for Timer {
    fn is_done(&self, context: &TestContext) -> bool {
        if self.fork {
            // Detached timers never hold test completion back. A
            // repeat-bounded one additionally winds down when queried.
            if self.repeat_count.is_some() {
                self.state.stop_timer();
            }
            return true;
        }
        self.nested
            .is_done(context, self.children.len(), self.is_disabled(context))
    }
}

impl StopTimer for Timer {
    fn stop_timer(&self) -> bool {
        self.state.stop_timer()
    }
}

impl ActionContainer for Timer {
    fn children(&self) -> &[Arc<dyn ActionProducer>] {
        &self.children
    }

    fn nested(&self) -> &NestedState {
        &self.nested
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.name)
            .field("timer_id", &self.timer_id)
            .field("delay", &self.delay)
            .field("interval", &self.interval)
            .field("repeat_count", &self.repeat_count)
            .field("fork", &self.fork)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

/// Shared runtime state of one timer, registered with the context.
#[derive(Default)]
struct TimerState {
    fires: AtomicU32,
    stopped: AtomicBool,
    cancel: CancellationToken,
    failure: Mutex<Option<ActionError>>,
}

impl StopTimer for TimerState {
    /// First-wins: exactly one call observes `true` and cancels the
    /// schedule, no matter how many callers race, including reentrant
    /// calls from within a firing.
    fn stop_timer(&self) -> bool {
        let stopped_now = self
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if stopped_now {
            self.cancel.cancel();
        }
        stopped_now
    }
}

/// One execution's schedule loop, shared between the forked and the
/// blocking path.
struct Schedule {
    timer_id: String,
    delay: Duration,
    interval: Duration,
    repeat_count: Option<u32>,
    children: Vec<Arc<dyn ActionProducer>>,
    nested: NestedState,
    state: Arc<TimerState>,
}

impl Schedule {
    async fn run(&self, context: &TestContext) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::select! {
                () = self.state.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.delay) => {}
            }
        }
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        while !self.state.stopped.load(Ordering::SeqCst) {
            tokio::select! {
                () = self.state.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.state.stopped.load(Ordering::SeqCst) {
                break;
            }
            let fire = self.state.fires.fetch_add(1, Ordering::SeqCst) + 1;
            context.set_variable(
                format!("{}-index", self.timer_id),
                fire.to_string(),
            );
            debug!(timer = %self.timer_id, fire, "Timer fired");
            for producer in &self.children {
                if let Err(e) =
                    self.nested.run_child(producer.produce(), context).await
                {
                    warn!(
                        timer = %self.timer_id,
                        error = %e,
                        "Timer action failed, stopping timer",
                    );
                    *self.state.failure.lock() = Some(e);
                    self.state.stop_timer();
                    break;
                }
            }
            if self.repeat_count.is_some_and(|count| fire >= count) {
                debug!(
                    timer = %self.timer_id,
                    fires = fire,
                    "Timer reached its repeat count",
                );
                self.state.stop_timer();
            }
        }
        self.state.failure.lock().clone().map_or(Ok(()), Err)
    }
}
