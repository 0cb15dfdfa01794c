// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Composable test actions for driving integration tests.
//!
//! A test is assembled from [`TestAction`]s, which are `async` units of
//! behavior executed against a shared [`TestContext`]. The [`container`]
//! module combines actions into sequences, conditionals, loops, timers,
//! parallel branches and background forks, all of which track their
//! progress so that a test run can wait for outstanding work through the
//! [`Completable`] protocol.
//!
//! The [`TestContext`] carries test variables (referenced as `${name}`
//! in action parameters), a deferred cleanup chain, an error channel for
//! background failures and the seams for boolean expression evaluation
//! and value matching used by the conditional containers.
//!
//! Failures are reported as [`ActionError`]s whose [`ErrorKind`]s form a
//! small ancestry tree, letting guard containers like
//! [`container::Assert`] and [`container::Catch`] react to exactly the
//! class of failure they are configured for.

pub mod action;
pub mod condition;
pub mod container;
pub mod context;
pub mod error;
pub mod expression;
pub mod matcher;

#[cfg(test)]
mod test_utils;

pub use self::{
    action::{ActionProducer, Completable, FnAction, TestAction},
    condition::{ActionCondition, Condition, FnCondition},
    context::{TestContext, TestContextBuilder, TestMeta},
    error::{ActionError, ErrorKind, Result},
};
