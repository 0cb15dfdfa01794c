// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Containers composing [`TestAction`]s into control flow.
//!
//! A container is itself a [`TestAction`] owning an ordered list of child
//! [`ActionProducer`]s. Execution semantics differ per container:
//! [`Sequence`] fails fast, [`Parallel`] fans out onto tasks, [`Iterate`],
//! [`Repeat`] and [`RepeatOnError`] loop over their children, [`Fork`] and
//! [`Timer`] keep working after their `execute()` returned and report
//! readiness through [`Completable`], [`Wait`] blocks on a [`Condition`],
//! [`Assert`] and [`Catch`] react to child failures, and the suite
//! containers ([`BeforeSuite`], [`AfterSuite`], [`BeforeTest`],
//! [`AfterTest`]) gate their children on the current [`TestMeta`].
//!
//! All containers share the [`NestedState`] bookkeeping: which child is
//! active, which children executed, and the completion rule derived from
//! both.
//!
//! [`Condition`]: crate::condition::Condition
//! [`TestMeta`]: crate::context::TestMeta

mod iterating;

pub mod assert;
pub mod catch;
pub mod conditional;
pub mod fork;
pub mod iterate;
pub mod parallel;
pub mod repeat;
pub mod repeat_on_error;
pub mod sequence;
pub mod suite;
pub mod timer;
pub mod wait;

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt as _;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    action::{ActionProducer, Completable, TestAction},
    context::TestContext,
    error::{ActionError, Result},
};

pub use self::{
    assert::Assert,
    catch::Catch,
    conditional::Conditional,
    fork::Fork,
    iterate::Iterate,
    parallel::Parallel,
    repeat::Repeat,
    repeat_on_error::RepeatOnError,
    sequence::{FinallySequence, Sequence},
    suite::{AfterSuite, AfterTest, BeforeSuite, BeforeTest},
    timer::Timer,
    wait::Wait,
};

/// Shared child-execution bookkeeping of a container.
///
/// Tracks the currently active child and the log of executed children.
/// State lives behind [`Arc`]s, so a clone handed to a spawned task keeps
/// feeding the very same log the owning container evaluates its
/// completion against.
#[derive(Clone, Default)]
pub struct NestedState {
    active: Arc<Mutex<Option<Arc<dyn TestAction>>>>,
    executed: Arc<Mutex<Vec<Arc<dyn TestAction>>>>,
}

impl NestedState {
    /// Creates empty bookkeeping state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes one child `action` against `context`.
    ///
    /// Disabled children are skipped silently. Everything else becomes the
    /// active child and is appended to the executed log once finished,
    /// also when it failed: the log records attempts, not successes.
    /// Panics are trapped and surface as [`Runtime`]-kind errors.
    ///
    /// [`Runtime`]: crate::error::ErrorKind::Runtime
    pub async fn run_child(
        &self,
        action: Arc<dyn TestAction>,
        context: &TestContext,
    ) -> Result<()> {
        if action.is_disabled(context) {
            debug!(action = action.name(), "Skipping disabled action");
            return Ok(());
        }
        *self.active.lock() = Some(Arc::clone(&action));
        debug!(action = action.name(), "Executing nested action");
        let outcome = AssertUnwindSafe(action.execute(context))
            .catch_unwind()
            .await
            .map_err(ActionError::from_panic)
            .and_then(|r| r);
        self.executed.lock().push(action);
        outcome
    }

    /// Returns a snapshot of the executed-children log.
    #[must_use]
    pub fn executed(&self) -> Vec<Arc<dyn TestAction>> {
        self.executed.lock().clone()
    }

    /// Number of children executed so far.
    #[must_use]
    pub fn executed_count(&self) -> usize {
        self.executed.lock().len()
    }

    /// Executed child at `index`, if execution got that far.
    #[must_use]
    pub fn executed_at(&self, index: usize) -> Option<Arc<dyn TestAction>> {
        self.executed.lock().get(index).cloned()
    }

    /// The child currently (or last) dispatched, if any.
    #[must_use]
    pub fn active(&self) -> Option<Arc<dyn TestAction>> {
        self.active.lock().clone()
    }

    /// The shared completion rule of containers.
    ///
    /// Done iff the container has no children, is disabled, never started,
    /// or the active child reached the executed log and every executed
    /// child exposing a [`Completable`] reports done. Children are
    /// compared by identity, so the same action appearing twice doesn't
    /// confuse the rule.
    pub(crate) fn is_done(
        &self,
        context: &TestContext,
        child_count: usize,
        disabled: bool,
    ) -> bool {
        if child_count == 0 || disabled {
            return true;
        }
        let Some(active) = self.active.lock().clone() else {
            // Never dispatched a child.
            return true;
        };
        let executed = self.executed.lock().clone();
        if !executed.iter().any(|a| Arc::ptr_eq(a, &active)) {
            return false;
        }
        executed
            .iter()
            .all(|a| a.completion().map_or(true, |c| c.is_done(context)))
    }
}

impl std::fmt::Debug for NestedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedState")
            .field("active", &self.active.lock().as_ref().map(|a| a.name().to_owned()))
            .field("executed", &self.executed.lock().len())
            .finish()
    }
}

/// Common surface of all action containers.
pub trait ActionContainer: TestAction + Completable {
    /// Declared child producers, in execution order.
    fn children(&self) -> &[Arc<dyn ActionProducer>];

    /// Runtime bookkeeping of this container.
    fn nested(&self) -> &NestedState;

    /// Number of declared children.
    fn action_count(&self) -> usize {
        self.children().len()
    }

    /// Child at `index`: the executed one where execution got that far,
    /// otherwise a freshly produced declared one. Diagnostic lookup.
    fn test_action(&self, index: usize) -> Option<Arc<dyn TestAction>> {
        self.nested()
            .executed_at(index)
            .or_else(|| self.children().get(index).map(|p| p.produce()))
    }
}

/// Wraps a ready action into a producer handing out the same instance on
/// every call.
pub(crate) fn producer_of(action: Arc<dyn TestAction>) -> impl ActionProducer {
    move || Arc::clone(&action)
}
