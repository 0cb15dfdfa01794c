//! Validation matcher expressions of the form `@name(arg, ...)@`.
//!
//! Condition strings and [`Assert`] message expectations may delegate their
//! check to a named matcher instead of a literal comparison:
//! `@greaterThan(5)@`, `@matches(feed_[0-9]+)@`, `@notEmpty()@`. Matchers
//! live in a [`MatcherRegistry`]; a failed match reports a
//! [`Validation`]-kind error, which callers evaluating conditions interpret
//! as "condition is false".
//!
//! [`Assert`]: crate::container::Assert
//! [`Validation`]: crate::error::ErrorKind::Validation

use std::{collections::HashMap, sync::Arc};

use lazy_regex::regex_captures;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ActionError, Result};

/// A named check applied to a field value.
///
/// Implemented for any
/// `Fn(&str, &str, &[String]) -> Result<()> + Send + Sync` closure, where
/// the arguments are the field name, the observed value and the control
/// parameters of the expression.
pub trait ValidationMatcher: Send + Sync {
    /// Validates `value` of the given `field` against the control
    /// `params`.
    ///
    /// # Errors
    ///
    /// A [`Validation`]-kind [`ActionError`] if the value doesn't satisfy
    /// this matcher. Any other kind signals misuse (malformed parameters)
    /// and is fatal to the caller.
    ///
    /// [`Validation`]: crate::error::ErrorKind::Validation
    fn validate(&self, field: &str, value: &str, params: &[String])
        -> Result<()>;
}

impl<F> ValidationMatcher for F
where
    F: Fn(&str, &str, &[String]) -> Result<()> + Send + Sync,
{
    fn validate(
        &self,
        field: &str,
        value: &str,
        params: &[String],
    ) -> Result<()> {
        self(field, value, params)
    }
}

/// Indicates whether the given string is a matcher expression rather than a
/// literal value.
#[must_use]
pub fn is_matcher_expression(expression: &str) -> bool {
    expression.len() > 1
        && expression.starts_with('@')
        && expression.ends_with('@')
}

/// Splits a matcher expression into its name and control parameters.
///
/// Parameters are comma-separated and may be wrapped in single quotes to
/// preserve leading or trailing whitespace.
fn parse_expression(expression: &str) -> Result<(&str, Vec<String>)> {
    let Some((_, name, raw)) =
        regex_captures!(r"^@(\w+)\((.*)\)@$", expression)
    else {
        return Err(ActionError::runtime(format!(
            "malformed validation matcher expression '{expression}'",
        )));
    };
    let params = if raw.is_empty() {
        Vec::new()
    } else {
        raw.split(',')
            .map(|p| {
                let p = p.trim();
                p.strip_prefix('\'')
                    .and_then(|p| p.strip_suffix('\''))
                    .unwrap_or(p)
                    .to_owned()
            })
            .collect()
    };
    Ok((name, params))
}

/// Named [`ValidationMatcher`]s resolvable from `@name(...)@` expressions.
///
/// [`MatcherRegistry::default`] carries the built-in matchers; additional
/// ones can be [`register`]ed under their expression name.
///
/// [`register`]: MatcherRegistry::register
pub struct MatcherRegistry {
    matchers: HashMap<String, Arc<dyn ValidationMatcher>>,
}

/// Built-in matchers, shared by every default [`TestContext`].
///
/// [`TestContext`]: crate::context::TestContext
pub(crate) static BUILTIN: Lazy<Arc<MatcherRegistry>> =
    Lazy::new(|| Arc::new(MatcherRegistry::default()));

impl Default for MatcherRegistry {
    fn default() -> Self {
        let mut registry = Self {
            matchers: HashMap::new(),
        };
        registry.register("equals", equals);
        registry.register("equalsIgnoreCase", equals_ignore_case);
        registry.register("contains", contains);
        registry.register("startsWith", starts_with);
        registry.register("endsWith", ends_with);
        registry.register("greaterThan", greater_than);
        registry.register("lowerThan", lower_than);
        registry.register("isNumber", is_number);
        registry.register("matches", matches_pattern);
        registry.register("notEmpty", not_empty);
        registry.register("empty", empty);
        registry
    }
}

impl MatcherRegistry {
    /// Registers the `matcher` under the given expression `name`,
    /// replacing any previous one.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        matcher: impl ValidationMatcher + 'static,
    ) {
        self.matchers.insert(name.into(), Arc::new(matcher));
    }

    /// Resolves the matcher `expression` against the `value` of `field`.
    ///
    /// # Errors
    ///
    /// - [`Validation`]-kind error if the matcher rejects the value.
    /// - [`Runtime`]-kind error if the expression is malformed or names an
    ///   unknown matcher.
    ///
    /// [`Runtime`]: crate::error::ErrorKind::Runtime
    /// [`Validation`]: crate::error::ErrorKind::Validation
    pub fn resolve(
        &self,
        field: &str,
        value: &str,
        expression: &str,
    ) -> Result<()> {
        let (name, params) = parse_expression(expression)?;
        let matcher = self.matchers.get(name).ok_or_else(|| {
            ActionError::runtime(format!("unknown validation matcher '{name}'"))
        })?;
        matcher.validate(field, value, &params)
    }
}

fn failed(
    name: &str,
    field: &str,
    value: &str,
    expected: impl AsRef<str>,
) -> ActionError {
    ActionError::validation(format!(
        "matcher '{name}' failed for field '{field}': received '{value}', \
         expected {}",
        expected.as_ref(),
    ))
}

fn single_param<'p>(name: &str, params: &'p [String]) -> Result<&'p str> {
    match params {
        [control] => Ok(control),
        _ => Err(ActionError::runtime(format!(
            "matcher '{name}' requires exactly one control parameter, got {}",
            params.len(),
        ))),
    }
}

fn numeric(name: &str, field: &str, value: &str) -> Result<f64> {
    value.parse().map_err(|_| {
        failed(name, field, value, "a numeric value".to_owned())
    })
}

fn equals(field: &str, value: &str, params: &[String]) -> Result<()> {
    let control = single_param("equals", params)?;
    (value == control)
        .then_some(())
        .ok_or_else(|| failed("equals", field, value, format!("'{control}'")))
}

fn equals_ignore_case(
    field: &str,
    value: &str,
    params: &[String],
) -> Result<()> {
    let control = single_param("equalsIgnoreCase", params)?;
    value.eq_ignore_ascii_case(control).then_some(()).ok_or_else(|| {
        failed(
            "equalsIgnoreCase",
            field,
            value,
            format!("'{control}' (any case)"),
        )
    })
}

fn contains(field: &str, value: &str, params: &[String]) -> Result<()> {
    let control = single_param("contains", params)?;
    value.contains(control).then_some(()).ok_or_else(|| {
        failed("contains", field, value, format!("to contain '{control}'"))
    })
}

fn starts_with(field: &str, value: &str, params: &[String]) -> Result<()> {
    let control = single_param("startsWith", params)?;
    value.starts_with(control).then_some(()).ok_or_else(|| {
        failed(
            "startsWith",
            field,
            value,
            format!("to start with '{control}'"),
        )
    })
}

fn ends_with(field: &str, value: &str, params: &[String]) -> Result<()> {
    let control = single_param("endsWith", params)?;
    value.ends_with(control).then_some(()).ok_or_else(|| {
        failed("endsWith", field, value, format!("to end with '{control}'"))
    })
}

fn greater_than(field: &str, value: &str, params: &[String]) -> Result<()> {
    let control = single_param("greaterThan", params)?;
    let (value_num, control_num) = (
        numeric("greaterThan", field, value)?,
        numeric("greaterThan", field, control)?,
    );
    (value_num > control_num).then_some(()).ok_or_else(|| {
        failed(
            "greaterThan",
            field,
            value,
            format!("a value greater than {control}"),
        )
    })
}

fn lower_than(field: &str, value: &str, params: &[String]) -> Result<()> {
    let control = single_param("lowerThan", params)?;
    let (value_num, control_num) = (
        numeric("lowerThan", field, value)?,
        numeric("lowerThan", field, control)?,
    );
    (value_num < control_num).then_some(()).ok_or_else(|| {
        failed(
            "lowerThan",
            field,
            value,
            format!("a value lower than {control}"),
        )
    })
}

fn is_number(field: &str, value: &str, _: &[String]) -> Result<()> {
    value.parse::<f64>().map(drop).map_err(|_| {
        failed("isNumber", field, value, "a numeric value".to_owned())
    })
}

fn matches_pattern(field: &str, value: &str, params: &[String]) -> Result<()> {
    let pattern = single_param("matches", params)?;
    let regex = Regex::new(pattern).map_err(|e| {
        ActionError::runtime(format!(
            "matcher 'matches' received an invalid pattern '{pattern}': {e}",
        ))
    })?;
    regex.is_match(value).then_some(()).ok_or_else(|| {
        failed("matches", field, value, format!("to match '{pattern}'"))
    })
}

fn not_empty(field: &str, value: &str, _: &[String]) -> Result<()> {
    (!value.is_empty()).then_some(()).ok_or_else(|| {
        failed("notEmpty", field, value, "a non-empty value".to_owned())
    })
}

fn empty(field: &str, value: &str, _: &[String]) -> Result<()> {
    value.is_empty().then_some(()).ok_or_else(|| {
        failed("empty", field, value, "an empty value".to_owned())
    })
}
