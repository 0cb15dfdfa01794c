// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared state all actions of a test run against.
//!
//! A [`TestContext`] is a cheap-to-[`Clone`] handle onto internally
//! synchronized state: test variables with `${name}` substitution, the
//! deferred teardown chain, the asynchronous-error channel concurrent
//! containers report into, the registry of running timers and the
//! [`TestMeta`] suite/test gating information. Every clone observes the
//! same state, so actions running on spawned tasks hold their own handle
//! instead of borrowing one.

use std::{collections::HashMap, mem, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt as _;
use lazy_regex::regex;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, error, warn};

use crate::{
    action::ActionProducer,
    error::{ActionError, Result},
    expression::{BooleanEvaluator, InfixEvaluator},
    matcher::{self, MatcherRegistry},
};

/// Identity of the currently executing test, consulted by suite and test
/// boundary containers to decide whether they apply.
#[derive(Clone, Debug, Default)]
pub struct TestMeta {
    /// Name of the suite the test belongs to.
    pub suite_name: String,

    /// Name of the test itself.
    pub test_name: String,

    /// Package (namespace) the test lives in.
    pub package_name: String,

    /// Groups the test is tagged with.
    pub groups: Vec<String>,
}

/// Capability of a running timer to be stopped by name through the
/// [`TestContext`] it registered itself on.
pub trait StopTimer: Send + Sync {
    /// Requests the timer to stop scheduling further work.
    ///
    /// Returns whether this call performed the stop. Idempotent: at most
    /// one call ever observes `true`.
    fn stop_timer(&self) -> bool;
}

struct Inner {
    variables: Mutex<HashMap<String, String>>,
    finally_chain: Mutex<Vec<Arc<dyn ActionProducer>>>,
    errors: Mutex<Vec<ActionError>>,
    timers: Mutex<HashMap<String, Arc<dyn StopTimer>>>,
    meta: Mutex<TestMeta>,
    evaluator: Arc<dyn BooleanEvaluator>,
    matchers: Arc<MatcherRegistry>,
}

/// Handle onto the shared state of a single test execution.
///
/// Cloning is cheap and every clone addresses the same underlying state.
/// [`TestContext::snapshot`] produces a detached copy instead.
#[derive(Clone)]
pub struct TestContext {
    inner: Arc<Inner>,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder of a [`TestContext`], swapping in custom expression support.
#[derive(Default)]
pub struct TestContextBuilder {
    evaluator: Option<Arc<dyn BooleanEvaluator>>,
    matchers: Option<Arc<MatcherRegistry>>,
}

impl TestContextBuilder {
    /// Sets the [`BooleanEvaluator`] deciding textual conditions.
    #[must_use]
    pub fn evaluator(mut self, evaluator: impl BooleanEvaluator + 'static) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    /// Sets the [`MatcherRegistry`] resolving `@name(...)@` expressions.
    #[must_use]
    pub fn matchers(mut self, matchers: MatcherRegistry) -> Self {
        self.matchers = Some(Arc::new(matchers));
        self
    }

    /// Finishes building the [`TestContext`].
    #[must_use]
    pub fn build(self) -> TestContext {
        TestContext {
            inner: Arc::new(Inner {
                variables: Mutex::new(HashMap::new()),
                finally_chain: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
                timers: Mutex::new(HashMap::new()),
                meta: Mutex::new(TestMeta::default()),
                evaluator: self
                    .evaluator
                    .unwrap_or_else(|| Arc::new(InfixEvaluator)),
                matchers: self
                    .matchers
                    .unwrap_or_else(|| Arc::clone(&matcher::BUILTIN)),
            }),
        }
    }
}

impl TestContext {
    /// Creates a [`TestContext`] with default expression support.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts building a [`TestContext`] with custom expression support.
    #[must_use]
    pub fn builder() -> TestContextBuilder {
        TestContextBuilder::default()
    }

    /// Sets the test variable `name` to `value`, replacing any previous
    /// one.
    pub fn set_variable(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        let (name, value) = (name.into(), value.into());
        debug!(variable = %name, value = %value, "Setting test variable");
        self.inner.variables.lock().insert(name, value);
    }

    /// Returns the value of the test variable `name`.
    ///
    /// # Errors
    ///
    /// [`MissingVariable`](ActionError::MissingVariable) if no such
    /// variable was ever set.
    pub fn variable(&self, name: &str) -> Result<String> {
        self.inner
            .variables
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ActionError::missing_variable(name))
    }

    /// Indicates whether the test variable `name` is set.
    #[must_use]
    pub fn has_variable(&self, name: &str) -> bool {
        self.inner.variables.lock().contains_key(name)
    }

    /// Returns a snapshot of all current test variables.
    #[must_use]
    pub fn variables(&self) -> HashMap<String, String> {
        self.inner.variables.lock().clone()
    }

    /// Replaces every `${name}` placeholder in `input` with the value of
    /// the referenced test variable.
    ///
    /// # Errors
    ///
    /// [`MissingVariable`](ActionError::MissingVariable) if a placeholder
    /// references an unset variable.
    pub fn replace_dynamic_content(&self, input: &str) -> Result<String> {
        /// [`Regex`] matching `${name}` placeholders.
        static PLACEHOLDER_REGEX: &Lazy<Regex> = regex!(r"\$\{([^}]+)\}");

        let variables = self.inner.variables.lock();
        let mut missing = None;
        let replaced = PLACEHOLDER_REGEX.replace_all(input, |cap: &regex::Captures<'_>| {
            // PANIC: Unwrapping is OK here as `PLACEHOLDER_REGEX` contains
            //        this capture group.
            #[allow(clippy::unwrap_used)]
            let name = cap.get(1).unwrap().as_str();

            variables.get(name).cloned().unwrap_or_else(|| {
                if missing.is_none() {
                    missing = Some(name.to_owned());
                }
                String::new()
            })
        });
        if let Some(name) = missing {
            return Err(ActionError::missing_variable(name));
        }
        Ok(replaced.into_owned())
    }

    /// Defers the produced action to the teardown chain executed by
    /// [`run_finally()`](TestContext::run_finally).
    pub fn do_finally(&self, producer: impl ActionProducer + 'static) {
        self.inner.finally_chain.lock().push(Arc::new(producer));
    }

    /// Drains the registered teardown chain in registration order.
    #[must_use]
    pub fn take_finally_actions(&self) -> Vec<Arc<dyn ActionProducer>> {
        mem::take(&mut *self.inner.finally_chain.lock())
    }

    /// Executes the registered teardown chain in registration order.
    ///
    /// Every action runs, also after earlier ones failed.
    ///
    /// # Errors
    ///
    /// The first failure of the chain, after the whole chain ran.
    pub async fn run_finally(&self) -> Result<()> {
        let mut first_err = None;
        for producer in self.take_finally_actions() {
            let action = producer.produce();
            if action.is_disabled(self) {
                debug!(action = action.name(), "Skipping disabled finally action");
                continue;
            }
            let outcome = AssertUnwindSafe(action.execute(self))
                .catch_unwind()
                .await
                .map_err(ActionError::from_panic)
                .and_then(|r| r);
            if let Err(e) = outcome {
                warn!(action = action.name(), error = %e, "Finally action failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Reports a failure that cannot propagate to any caller, like one
    /// raised on a detached task.
    pub fn add_error(&self, err: ActionError) {
        error!(error = %err, "Collecting asynchronous failure");
        self.inner.errors.lock().push(err);
    }

    /// Returns a snapshot of all collected asynchronous failures.
    #[must_use]
    pub fn errors(&self) -> Vec<ActionError> {
        self.inner.errors.lock().clone()
    }

    /// Indicates whether any asynchronous failure was collected.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.inner.errors.lock().is_empty()
    }

    /// Registers a running timer under its identifier, making it
    /// stoppable by name.
    pub fn register_timer(
        &self,
        id: impl Into<String>,
        timer: Arc<dyn StopTimer>,
    ) {
        self.inner.timers.lock().insert(id.into(), timer);
    }

    /// Stops the registered timer with the given `id`.
    ///
    /// Returns whether this call stopped it, `false` for unknown or
    /// already stopped timers.
    pub fn stop_timer(&self, id: &str) -> bool {
        let timer = self.inner.timers.lock().get(id).cloned();
        timer.is_some_and(|t| t.stop_timer())
    }

    /// Stops all registered timers.
    pub fn stop_timers(&self) {
        let timers: Vec<_> =
            self.inner.timers.lock().values().cloned().collect();
        for timer in timers {
            timer.stop_timer();
        }
    }

    /// Sets the [`TestMeta`] of the currently executing test.
    pub fn set_test_meta(&self, meta: TestMeta) {
        *self.inner.meta.lock() = meta;
    }

    /// Returns the [`TestMeta`] of the currently executing test.
    #[must_use]
    pub fn test_meta(&self) -> TestMeta {
        self.inner.meta.lock().clone()
    }

    /// Evaluates a textual boolean condition via the configured
    /// [`BooleanEvaluator`].
    ///
    /// # Errors
    ///
    /// If the expression is malformed. Such failures are fatal to the
    /// surrounding container.
    pub fn evaluate_boolean(&self, expression: &str) -> Result<bool> {
        self.inner.evaluator.evaluate(expression)
    }

    /// Indicates whether the given string is a `@name(...)@` validation
    /// matcher expression.
    #[must_use]
    pub fn is_matcher_expression(&self, expression: &str) -> bool {
        matcher::is_matcher_expression(expression)
    }

    /// Resolves a matcher `expression` against the `value` of `field` via
    /// the configured [`MatcherRegistry`].
    ///
    /// # Errors
    ///
    /// See [`MatcherRegistry::resolve`].
    pub fn resolve_matcher(
        &self,
        field: &str,
        value: &str,
        expression: &str,
    ) -> Result<()> {
        self.inner.matchers.resolve(field, value, expression)
    }

    /// Produces a detached copy of this context: same variables and
    /// [`TestMeta`], same expression support, but fresh teardown, error
    /// and timer state.
    ///
    /// Mutations of the copy never write back. Iterating containers
    /// evaluate their condition strings against such a copy, so the index
    /// substitution doesn't leak into the shared variables.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                variables: Mutex::new(self.variables()),
                finally_chain: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
                timers: Mutex::new(HashMap::new()),
                meta: Mutex::new(self.test_meta()),
                evaluator: Arc::clone(&self.inner.evaluator),
                matchers: Arc::clone(&self.inner.matchers),
            }),
        }
    }
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("variables", &*self.inner.variables.lock())
            .field("errors", &self.inner.errors.lock().len())
            .field("meta", &*self.inner.meta.lock())
            .finish_non_exhaustive()
    }
}
