//! Suite and test boundary containers gated on name patterns, groups
//! and environment.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use regex::Regex;
use smart_default::SmartDefault;
use tracing::{debug, info};

use crate::{
    action::{ActionProducer, Completable, TestAction},
    container::{producer_of, ActionContainer, NestedState},
    context::{TestContext, TestMeta},
    Result,
};

/// Matches `value` against a pattern where `*` spans any substring.
/// A pattern without `*` requires an exact match.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }
    let regex = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{regex}$")).map_or(false, |re| re.is_match(value))
}

/// Conjunction of the gate predicates of a boundary container. Every
/// configured predicate has to hold, unconfigured ones always do.
#[derive(Clone, Debug, Default)]
struct BoundaryGate {
    suites: Vec<String>,
    test_pattern: Option<String>,
    package_pattern: Option<String>,
    groups: Vec<String>,
    env: HashMap<String, String>,
}

impl BoundaryGate {
    fn allows(&self, meta: &TestMeta) -> bool {
        (self.suites.is_empty()
            || self
                .suites
                .iter()
                .any(|pattern| wildcard_match(pattern, &meta.suite_name)))
            && [
                (&self.test_pattern, &meta.test_name),
                (&self.package_pattern, &meta.package_name),
            ]
            .into_iter()
            .all(|(pattern, value)| {
                pattern
                    .as_deref()
                    .map_or(true, |pattern| wildcard_match(pattern, value))
            })
            && (self.groups.is_empty()
                || self.groups.iter().any(|group| meta.groups.contains(group)))
            && self.env.iter().all(|(key, expected)| {
                // An empty expected value only requires presence.
                std::env::var(key).map_or(false, |actual| {
                    expected.is_empty() || &actual == expected
                })
            })
    }
}

macro_rules! boundary_container {
    ($(#[$docs:meta])* $container:ident, $default_name:literal, $phase:literal) => {
        $(#[$docs])*
        #[derive(SmartDefault)]
        pub struct $container {
            #[default($default_name.into())]
            name: String,
            gate: BoundaryGate,
            children: Vec<Arc<dyn ActionProducer>>,
            nested: NestedState,
        }

        impl $container {
            /// Creates an empty container running unconditionally until
            /// gate predicates are configured.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Overrides the container name used in logs and failure
            /// reports.
            #[must_use]
            pub fn named(mut self, name: impl Into<String>) -> Self {
                self.name = name.into();
                self
            }

            /// Requires the suite name to match one of the accepted
            /// patterns, where `*` spans any substring. May be called
            /// repeatedly to accept several suites.
            #[must_use]
            pub fn on_suite(mut self, pattern: impl Into<String>) -> Self {
                self.gate.suites.push(pattern.into());
                self
            }

            /// Requires the test name to match the given pattern,
            /// where `*` spans any substring.
            #[must_use]
            pub fn on_test(mut self, pattern: impl Into<String>) -> Self {
                self.gate.test_pattern = Some(pattern.into());
                self
            }

            /// Requires the package name to match the given pattern,
            /// where `*` spans any substring.
            #[must_use]
            pub fn in_package(mut self, pattern: impl Into<String>) -> Self {
                self.gate.package_pattern = Some(pattern.into());
                self
            }

            /// Requires membership in at least one of the given test
            /// groups.
            #[must_use]
            pub fn in_groups<G>(mut self, groups: G) -> Self
            where
                G: IntoIterator,
                G::Item: Into<String>,
            {
                self.gate.groups =
                    groups.into_iter().map(Into::into).collect();
                self
            }

            /// Requires the environment variable `key` to hold exactly
            /// `value`, or merely to be present when `value` is empty.
            /// Absence counts as a mismatch.
            #[must_use]
            pub fn with_env(
                mut self,
                key: impl Into<String>,
                value: impl Into<String>,
            ) -> Self {
                self.gate.env.insert(key.into(), value.into());
                self
            }

            /// Indicates whether this container applies to the test
            /// described by `meta`, without executing anything.
            #[must_use]
            pub fn should_execute(&self, meta: &TestMeta) -> bool {
                self.gate.allows(meta)
            }

            /// Appends a ready action as the next child.
            #[must_use]
            pub fn action(self, action: impl TestAction + 'static) -> Self {
                self.producer(producer_of(Arc::new(action)))
            }

            /// Appends a deferred builder as the next child.
            #[must_use]
            pub fn producer(
                mut self,
                producer: impl ActionProducer + 'static,
            ) -> Self {
                self.children.push(Arc::new(producer));
                self
            }
        }

        #[async_trait]
        impl TestAction for $container {
            fn name(&self) -> &str {
                &self.name
            }

            async fn execute(&self, context: &TestContext) -> Result<()> {
                let meta = context.test_meta();
                if !self.should_execute(&meta) {
                    info!(
                        container = %self.name,
                        phase = $phase,
                        suite = %meta.suite_name,
                        test = %meta.test_name,
                        "Skipping boundary actions, gate conditions not met",
                    );
                    return Ok(());
                }
                debug!(
                    container = %self.name,
                    phase = $phase,
                    children = self.children.len(),
                    "Executing boundary actions",
                );
                for producer in &self.children {
                    self.nested.run_child(producer.produce(), context).await?;
                }
                Ok(())
            }

            fn completion(&self) -> Option<&dyn Completable> {
                Some(self)
            }
        }

        impl Completable for $container {
            fn is_done(&self, context: &TestContext) -> bool {
                self.nested.is_done(
                    context,
                    self.children.len(),
                    self.is_disabled(context),
                )
            }
        }

        impl ActionContainer for $container {
            fn children(&self) -> &[Arc<dyn ActionProducer>] {
                &self.children
            }

            fn nested(&self) -> &NestedState {
                &self.nested
            }
        }

        impl fmt::Debug for $container {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($container))
                    .field("name", &self.name)
                    .field("gate", &self.gate)
                    .field("children", &self.children.len())
                    .finish_non_exhaustive()
            }
        }
    };
}

boundary_container! {
    /// Container running once before a whole test suite, gated on
    /// suite name, test groups and environment variables.
    BeforeSuite, "before-suite", "before-suite"
}

boundary_container! {
    /// Container running once after a whole test suite, gated like
    /// [`BeforeSuite`]. Teardown typically registers cleanup here.
    AfterSuite, "after-suite", "after-suite"
}

boundary_container! {
    /// Container running before every test, additionally gated on the
    /// test and package name of the upcoming test.
    BeforeTest, "before-test", "before-test"
}

boundary_container! {
    /// Container running after every test, gated like [`BeforeTest`].
    AfterTest, "after-test", "after-test"
}
