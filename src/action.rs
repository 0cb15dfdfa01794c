// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core abstractions every executable test building block implements.
//!
//! A [`TestAction`] is the unit of execution: it has a name, runs against a
//! [`TestContext`] and reports a [`Result`]. Actions whose work outlives
//! their `execute()` call additionally expose a [`Completable`] through
//! [`TestAction::completion`], which observers poll to learn whether the
//! background work has finished. Containers don't hold actions directly,
//! but [`ActionProducer`]s building them lazily at execution time, so a
//! container declared once can run its children against fresh state on
//! every repetition.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt as _};

use crate::{context::TestContext, error::Result};

/// A named, executable unit of test behavior.
#[async_trait]
pub trait TestAction: Send + Sync {
    /// Name of this action, used in log output and failure messages.
    fn name(&self) -> &str;

    /// Executes this action against the given `context`.
    async fn execute(&self, context: &TestContext) -> Result<()>;

    /// Indicates whether this action should be skipped entirely.
    ///
    /// Disabled actions are never dispatched and never appear in a
    /// container's executed log.
    fn is_disabled(&self, _context: &TestContext) -> bool {
        false
    }

    /// Returns the completion capability of this action, if it has one.
    ///
    /// Actions without the capability are considered done once their
    /// `execute()` returned. Actions spawning background work return
    /// `Some` and keep reporting their real state through it.
    fn completion(&self) -> Option<&dyn Completable> {
        None
    }
}

/// Optional capability of a [`TestAction`] to report whether all its work,
/// including backgrounded parts, has finished.
pub trait Completable: Send + Sync {
    /// Indicates whether this action has fully finished its work.
    ///
    /// Side-effect free and callable at any time, also before the action
    /// ever executed.
    fn is_done(&self, context: &TestContext) -> bool;
}

/// Deferred builder of a [`TestAction`].
///
/// Implemented for any `Fn() -> Arc<dyn TestAction>` closure. Containers
/// invoke producers once per execution of the owning container, so
/// iterating containers resolve them multiple times.
pub trait ActionProducer: Send + Sync {
    /// Builds the action to execute.
    fn produce(&self) -> Arc<dyn TestAction>;
}

impl<F> ActionProducer for F
where
    F: Fn() -> Arc<dyn TestAction> + Send + Sync,
{
    fn produce(&self) -> Arc<dyn TestAction> {
        self()
    }
}

/// [`TestAction`] adapter around an async closure.
///
/// Created via [`from_fn()`].
pub struct FnAction {
    name: String,
    run: Box<
        dyn Fn(TestContext) -> BoxFuture<'static, Result<()>> + Send + Sync,
    >,
}

/// Wraps an async closure into a named [`TestAction`].
///
/// The closure receives an owned handle onto the shared [`TestContext`].
#[must_use]
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> FnAction
where
    F: Fn(TestContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    FnAction {
        name: name.into(),
        run: Box::new(move |ctx| f(ctx).boxed()),
    }
}

#[async_trait]
impl TestAction for FnAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> Result<()> {
        (self.run)(context.clone()).await
    }
}

impl std::fmt::Debug for FnAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction").field("name", &self.name).finish()
    }
}
