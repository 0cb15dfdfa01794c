// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Failure taxonomy for action execution.
//!
//! Every fallible operation in this crate reports an [`ActionError`]. Each
//! error carries an [`ErrorKind`] tag, and kinds form a small ancestry tree
//! rooted at [`ErrorKind::Runtime`], so containers reacting to failures
//! ([`Assert`], [`Catch`]) compare kinds with plain data instead of
//! inspecting concrete types.
//!
//! [`Assert`]: crate::container::Assert
//! [`Catch`]: crate::container::Catch

use std::{any::Any, error::Error as StdError, fmt, time::Duration};

use derive_more::with_trait::Display;
use itertools::Itertools as _;

/// Classification tag of an [`ActionError`].
///
/// All kinds except [`Runtime`] have [`Runtime`] as their parent, mirroring
/// a single-rooted exception hierarchy: an [`Assert`] expecting a
/// [`Runtime`] failure accepts any kind, while one expecting
/// [`Validation`] accepts only that.
///
/// [`Assert`]: crate::container::Assert
/// [`Runtime`]: ErrorKind::Runtime
/// [`Validation`]: ErrorKind::Validation
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// Unspecific execution failure, the root of the hierarchy.
    #[display("runtime failure")]
    Runtime,

    /// An expectation about observed behavior was not met.
    #[display("validation failure")]
    Validation,

    /// A time budget was exhausted.
    #[display("timeout")]
    Timeout,

    /// A test variable was referenced but never set.
    #[display("missing variable")]
    MissingVariable,

    /// Several independent failures collected from concurrent actions.
    #[display("aggregated failures")]
    Aggregate,
}

impl ErrorKind {
    /// Returns the parent kind in the ancestry tree, if any.
    #[must_use]
    pub const fn parent(self) -> Option<Self> {
        match self {
            Self::Runtime => None,
            Self::Validation
            | Self::Timeout
            | Self::MissingVariable
            | Self::Aggregate => Some(Self::Runtime),
        }
    }

    /// Indicates whether this kind is the given `ancestor` or one of its
    /// descendants.
    #[must_use]
    pub fn is_a(self, ancestor: Self) -> bool {
        let mut kind = Some(self);
        while let Some(k) = kind {
            if k == ancestor {
                return true;
            }
            kind = k.parent();
        }
        false
    }
}

/// Failure raised by a [`TestAction`] or one of the containers driving it.
///
/// Errors are cheap to [`Clone`], because concurrent containers fan them
/// out: a captured failure may simultaneously sit in a [`Timer`]'s rethrow
/// slot and on the [`TestContext`] error channel.
///
/// [`TestAction`]: crate::action::TestAction
/// [`TestContext`]: crate::context::TestContext
/// [`Timer`]: crate::container::Timer
#[derive(Clone, Debug)]
pub enum ActionError {
    /// Unspecific execution failure, optionally chaining its cause.
    Runtime {
        /// Human-readable description.
        message: String,

        /// Underlying failure, if this one merely classifies it.
        cause: Option<Box<ActionError>>,
    },

    /// An expectation about observed behavior was not met.
    Validation {
        /// Human-readable description.
        message: String,
    },

    /// A time budget was exhausted before the awaited outcome arrived.
    Timeout {
        /// The exhausted budget.
        after: Duration,

        /// Human-readable description.
        message: String,

        /// Failure that surfaced while waiting, if any.
        cause: Option<Box<ActionError>>,
    },

    /// A test variable was referenced but never set.
    MissingVariable {
        /// Name of the unresolvable variable.
        name: String,
    },

    /// Several independent failures from concurrently executed actions.
    Aggregate {
        /// The individual failures, in child declaration order.
        failures: Vec<ActionError>,
    },
}

/// Result type alias using [`ActionError`].
pub type Result<T> = std::result::Result<T, ActionError>;

impl ActionError {
    /// Creates an unspecific runtime failure.
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a runtime failure chaining the given `cause`.
    #[must_use]
    pub fn runtime_with_cause(message: impl Into<String>, cause: Self) -> Self {
        Self::Runtime {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Creates a validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a timeout failure for the exhausted `after` budget.
    #[must_use]
    pub fn timeout(after: Duration, message: impl Into<String>) -> Self {
        Self::Timeout {
            after,
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a timeout failure chaining the failure observed while
    /// waiting.
    #[must_use]
    pub fn timeout_with_cause(
        after: Duration,
        message: impl Into<String>,
        cause: Self,
    ) -> Self {
        Self::Timeout {
            after,
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Creates a missing-variable failure for the given variable `name`.
    #[must_use]
    pub fn missing_variable(name: impl Into<String>) -> Self {
        Self::MissingVariable { name: name.into() }
    }

    /// Collects several `failures` into one error, preserving each of them.
    #[must_use]
    pub fn aggregate(failures: Vec<Self>) -> Self {
        Self::Aggregate { failures }
    }

    /// Coerces a trapped panic payload into a runtime failure.
    ///
    /// Extracts the conventional [`String`]/[`str`] payload where present.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| (*s).to_owned()))
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::runtime(format!("action panicked: {message}"))
    }

    /// Returns the [`ErrorKind`] tag of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Runtime { .. } => ErrorKind::Runtime,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::MissingVariable { .. } => ErrorKind::MissingVariable,
            Self::Aggregate { .. } => ErrorKind::Aggregate,
        }
    }

    /// Returns the bare failure message, without kind or cause decoration.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Runtime { message, .. }
            | Self::Validation { message }
            | Self::Timeout { message, .. } => message.clone(),
            Self::MissingVariable { name } => {
                format!("unknown variable '{name}'")
            }
            Self::Aggregate { failures } => {
                failures.iter().map(Self::message).join("; ")
            }
        }
    }

    /// Returns the chained cause, if this error carries one.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        match self {
            Self::Runtime { cause, .. } | Self::Timeout { cause, .. } => {
                cause.as_deref()
            }
            Self::Validation { .. }
            | Self::MissingVariable { .. }
            | Self::Aggregate { .. } => None,
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runtime { message, cause } => {
                write!(f, "{message}")?;
                if let Some(cause) = cause {
                    write!(f, ": {cause}")?;
                }
                Ok(())
            }
            Self::Validation { message } => write!(f, "{message}"),
            Self::Timeout {
                after,
                message,
                cause,
            } => {
                write!(
                    f,
                    "{message} (no outcome after {})",
                    humantime::format_duration(*after),
                )?;
                if let Some(cause) = cause {
                    write!(f, ": {cause}")?;
                }
                Ok(())
            }
            Self::MissingVariable { name } => {
                write!(f, "unknown variable '{name}'")
            }
            Self::Aggregate { failures } => {
                write!(
                    f,
                    "{} action(s) failed: {}",
                    failures.len(),
                    failures.iter().join("; "),
                )
            }
        }
    }
}

impl StdError for ActionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause().map(|c| c as _)
    }
}
