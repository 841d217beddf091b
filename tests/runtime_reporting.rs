//! Integration tests for failure reporting.
//!
//! Fibers report defects and foreign interruptions through the runtime's
//! failure reporter. Typed failures and shutdowns requested by a fiber's own
//! ancestors are expected, and stay quiet.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_test::traced_test;
use undertow::runtime::log_failure;
use undertow::{
    assert_died, assert_failure, AnyError, Cause, Defect, Effect, FiberId, Runtime, RuntimeConfig,
};

type Io<A> = Effect<(), String, A>;

/// A runtime whose reporter records which fibers it was called for.
fn capturing_runtime() -> (Runtime, Arc<Mutex<Vec<FiberId>>>) {
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let config = RuntimeConfig::default().with_failure_reporter(Arc::new(
        move |fiber: FiberId, _cause: &Cause<AnyError>| sink.lock().unwrap().push(fiber),
    ));
    (Runtime::current().configured(config), reported)
}

#[test]
#[traced_test]
fn default_reporter_logs_at_error_level() {
    let cause: Cause<AnyError> = Cause::die(Defect::from_message("kaboom"));
    log_failure(FiberId::from_parts(7, 0), &cause);

    assert!(logs_contain("ERROR"));
    assert!(logs_contain("fiber failed"));
    assert!(logs_contain("fiber=#7"));
}

#[tokio::test]
async fn child_defect_is_reported_for_the_child() {
    let (rt, reported) = capturing_runtime();
    let program = Io::<()>::die_message("bug")
        .fork()
        .flat_map(|child| child.await_exit().map(move |exit| (child.id(), exit)));

    let (child, exit) = rt.run(program).await.into_result().unwrap();
    assert_died!(exit);
    assert_eq!(*reported.lock().unwrap(), vec![child]);
}

#[tokio::test]
async fn root_defect_is_reported() {
    let (rt, reported) = capturing_runtime();
    let root = rt.spawn(Io::<()>::die_message("bug"));
    let id = root.id();

    assert_died!(root.await_exit().await);
    assert_eq!(*reported.lock().unwrap(), vec![id]);
}

#[tokio::test]
async fn typed_failure_is_not_reported() {
    let (rt, reported) = capturing_runtime();
    let exit = rt.run(Io::<()>::fail("expected".to_string())).await;

    assert_failure!(exit, "expected".to_string());
    assert!(reported.lock().unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_by_the_parent_is_not_reported() {
    let (rt, reported) = capturing_runtime();
    let program = Io::<()>::never()
        .fork()
        .zip_right(Io::<()>::sleep(Duration::from_millis(5)));

    rt.run(program).await.into_result().unwrap();
    assert!(reported.lock().unwrap().is_empty());
}

#[tokio::test]
async fn interruption_by_a_sibling_is_reported() {
    let (rt, reported) = capturing_runtime();
    let program = Io::<()>::never().fork().flat_map(|victim| {
        let id = victim.id();
        victim
            .interrupt()
            .as_unit()
            .fork()
            .flat_map(|sibling| sibling.join())
            .as_(id)
    });

    let victim = rt.run(program).await.into_result().unwrap();
    assert_eq!(*reported.lock().unwrap(), vec![victim]);
}

#[tokio::test]
async fn fork_with_reporter_overrides_the_runtime_reporter() {
    let (rt, reported) = capturing_runtime();
    let own = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&own);

    let program = Io::<()>::die_message("bug")
        .fork_with_reporter(Arc::new(move |fiber, _cause| sink.lock().unwrap().push(fiber)))
        .flat_map(|child| child.await_exit().as_(child.id()));

    let child = rt.run(program).await.into_result().unwrap();
    assert!(reported.lock().unwrap().is_empty());
    assert_eq!(*own.lock().unwrap(), vec![child]);
}
