//! Nested container flows driven through the public API.

use std::sync::{Arc, Mutex};

use testact::{
    action::{from_fn, FnAction},
    container::{
        ActionContainer as _, Conditional, FinallySequence, Iterate, Sequence,
    },
    ActionError, ErrorKind, TestAction as _, TestContext,
};

type Log = Arc<Mutex<Vec<String>>>;

fn record(name: &'static str, log: &Log) -> FnAction {
    let log = Arc::clone(log);
    from_fn(name, move |_| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(name.to_owned());
            Ok(())
        }
    })
}

#[tokio::test]
async fn nested_containers_share_one_context() {
    let context = TestContext::new();
    let log = Log::default();
    let passes = Arc::clone(&log);

    let flow = Sequence::new()
        .named("checkout-flow")
        .action(from_fn("enable-feature", |ctx| async move {
            ctx.set_variable("ready", "true");
            Ok(())
        }))
        .action(
            Conditional::new().when("${ready} = true").action(
                Iterate::new().condition("i lt= 3").action(from_fn(
                    "collect-pass",
                    move |ctx| {
                        let passes = Arc::clone(&passes);
                        async move {
                            let index = ctx.variable("i")?;
                            passes.lock().unwrap().push(format!("pass-{index}"));
                            Ok(())
                        }
                    },
                )),
            ),
        )
        .action(record("report", &log));

    flow.execute(&context).await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        ["pass-1", "pass-2", "pass-3", "report"],
    );
}

#[tokio::test]
async fn skipped_branch_leaves_no_trace() {
    let context = TestContext::new();
    context.set_variable("ready", "false");
    let log = Log::default();

    let branch = Conditional::new()
        .when("${ready} = true")
        .action(record("never", &log));

    branch.execute(&context).await.unwrap();

    assert!(log.lock().unwrap().is_empty());
    assert_eq!(branch.nested().executed_count(), 0);
}

#[tokio::test]
async fn finally_chain_runs_after_failure() {
    let context = TestContext::new();
    let log = Log::default();

    let flow = Sequence::new()
        .action(
            FinallySequence::new()
                .action(record("drop-table", &log))
                .action(record("close-session", &log)),
        )
        .action(record("provision", &log))
        .action(from_fn("reject", |_| async {
            Err(ActionError::validation("provisioned state rejected"))
        }));

    let err = flow.execute(&context).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    // Teardown only runs once the surrounding test asks for it.
    assert_eq!(*log.lock().unwrap(), ["provision"]);

    context.run_finally().await.unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        ["provision", "drop-table", "close-session"],
    );
}

#[tokio::test]
async fn placeholders_resolve_across_nesting_levels() {
    let context = TestContext::new();
    context.set_variable("user", "alice");
    let seen = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&seen);

    let flow = Sequence::new().action(
        Sequence::new().named("inner").action(from_fn(
            "greet",
            move |ctx| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().unwrap() =
                        ctx.replace_dynamic_content("hello ${user}")?;
                    Ok(())
                }
            },
        )),
    );

    flow.execute(&context).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), "hello alice");
}

#[tokio::test]
async fn failure_short_circuits_outer_sequence() {
    let context = TestContext::new();
    let log = Log::default();

    let flow = Sequence::new()
        .action(record("first", &log))
        .action(
            Sequence::new()
                .named("inner")
                .action(record("second", &log))
                .action(from_fn("explode", |_| async {
                    Err(ActionError::runtime("inner step failed"))
                })),
        )
        .action(record("unreached", &log));

    let err = flow.execute(&context).await.unwrap_err();

    assert_eq!(err.message(), "inner step failed");
    assert_eq!(*log.lock().unwrap(), ["first", "second"]);
}
