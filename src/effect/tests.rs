//! Tests for the interpreter and the effect combinators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cause::{Cause, Defect};
use crate::effect::Effect;
use crate::either::Either;
use crate::exit::Exit;
use crate::fiber::RuntimeFiber;
use crate::refs::Ref;
use crate::runtime::{Runtime, RuntimeConfig};

type Io<A> = Effect<(), String, A>;

async fn run<A: Send + 'static>(effect: Io<A>) -> Exit<String, A> {
    Runtime::current().run(effect).await
}

fn cause_of<A>(exit: Exit<String, A>) -> Cause<String> {
    match exit {
        Exit::Failure(cause) => cause,
        Exit::Success(_) => panic!("expected a failure"),
    }
}

fn sorted_defects(cause: &Cause<String>) -> Vec<String> {
    let mut messages: Vec<String> = cause
        .defects()
        .iter()
        .map(|defect| defect.message().to_string())
        .collect();
    messages.sort();
    messages
}

fn countdown(n: u64) -> Io<u64> {
    if n == 0 {
        Effect::succeed(0)
    } else {
        Io::succeed(n - 1).flat_map(countdown)
    }
}

// Sequencing

#[tokio::test]
async fn test_map_transforms_value() {
    let exit = run(Io::succeed(21).map(|x| x * 2)).await;
    assert_eq!(exit.into_result().unwrap(), 42);
}

#[tokio::test]
async fn test_map_on_failure_doesnt_execute() {
    let exit = run(Io::<i32>::fail("boom".to_string()).map(|x| x + 1)).await;
    assert_eq!(cause_of(exit).failure_option(), Some(&"boom".to_string()));
}

#[tokio::test]
async fn test_left_nested_flat_map_is_stack_safe() {
    let mut effect = Io::succeed(0_u64);
    for _ in 0..100_000 {
        effect = effect.flat_map(|n| Effect::succeed(n + 1));
    }
    assert_eq!(run(effect).await.into_result().unwrap(), 100_000);
}

#[tokio::test]
async fn test_recursive_flat_map_is_stack_safe() {
    assert_eq!(run(countdown(100_000)).await.into_result().unwrap(), 0);
}

#[tokio::test]
async fn test_zip_and_tap() {
    let seen = Ref::new(0);
    let record = seen.clone();
    let effect = Io::succeed(1)
        .zip(Io::succeed("one"))
        .tap(move |(n, _)| record.set(*n));
    assert_eq!(run(effect).await.into_result().unwrap(), (1, "one"));
    assert_eq!(seen.get_now(), 1);
}

// Errors

#[tokio::test]
async fn test_catch_all_recovers_typed_failure() {
    let effect = Io::<usize>::fail("abc".to_string()).catch_all(|e| Effect::succeed(e.len()));
    assert_eq!(run(effect).await.into_result().unwrap(), 3);
}

#[tokio::test]
async fn test_catch_all_does_not_see_defects() {
    let effect = Io::<i32>::die_message("bug").catch_all(|_| Effect::succeed(0));
    assert!(cause_of(run(effect).await).is_die());
}

#[tokio::test]
async fn test_fold_and_either() {
    let folded = Io::<usize>::fail("four".to_string()).fold(|e| e.len(), |n| n);
    assert_eq!(run(folded).await.into_result().unwrap(), 4);

    let either = Io::<i32>::fail("left".to_string()).either();
    assert_eq!(
        run(either).await.into_result().unwrap(),
        Either::Left("left".to_string())
    );
}

#[tokio::test]
async fn test_sandbox_exposes_defects() {
    let effect = Io::<bool>::die_message("bug")
        .sandbox()
        .catch_all(|cause: Cause<String>| Effect::succeed(cause.is_die()));
    assert!(run(effect).await.into_result().unwrap());
}

#[tokio::test]
async fn test_unsandbox_restores_the_cause() {
    let effect = Io::<i32>::fail("typed".to_string()).sandbox().unsandbox();
    assert_eq!(
        cause_of(run(effect).await).failure_option(),
        Some(&"typed".to_string())
    );
}

#[derive(Clone, Debug, PartialEq)]
enum AppError {
    Bug(String),
}

impl From<Defect> for AppError {
    fn from(defect: Defect) -> Self {
        AppError::Bug(defect.message().to_string())
    }
}

#[tokio::test]
async fn test_resurrect_turns_defects_into_failures() {
    let effect = Effect::<(), AppError, i32>::die_message("kaput").resurrect();
    let exit = Runtime::current().run(effect).await;
    let cause = exit.cause().cloned().unwrap_or_else(Cause::empty);
    assert_eq!(cause.failure_option(), Some(&AppError::Bug("kaput".to_string())));
}

#[tokio::test]
async fn test_or_die_turns_failures_into_defects() {
    let effect = Io::<i32>::fail("typed".to_string()).or_die::<String>();
    let cause = cause_of(run(effect).await);
    assert!(cause.is_die());
    assert!(!cause.is_failure());
}

#[tokio::test]
async fn test_map_err_and_or_else() {
    let mapped = Io::<i32>::fail("e".to_string()).map_err(|e| format!("wrapped {}", e));
    assert_eq!(
        cause_of(run(mapped).await).failure_option(),
        Some(&"wrapped e".to_string())
    );

    let recovered = Io::<i32>::fail("e".to_string()).or_else(Effect::succeed(9));
    assert_eq!(run(recovered).await.into_result().unwrap(), 9);
}

// Panics and partial effects

#[tokio::test]
async fn test_panic_in_total_is_a_defect() {
    let effect = Io::<i32>::total(|| panic!("exploded"));
    let cause = cause_of(run(effect).await);
    assert_eq!(sorted_defects(&cause), vec!["exploded".to_string()]);
}

#[tokio::test]
async fn test_panic_in_continuation_still_runs_finalizers() {
    let released = Ref::new(false);
    let effect = Io::succeed(1)
        .map(|_: i32| -> i32 { panic!("in map") })
        .ensuring(released.set(true));
    assert!(cause_of(run(effect).await).is_die());
    assert!(released.get_now());
}

#[tokio::test]
async fn test_partial_maps_result() {
    let ok = Io::partial(|| "12".parse::<i32>().map_err(|e| e.to_string()));
    assert_eq!(run(ok).await.into_result().unwrap(), 12);

    let bad = Io::partial(|| "x".parse::<i32>().map_err(|e| e.to_string()));
    assert!(cause_of(run(bad).await).is_failure());
}

#[tokio::test]
async fn test_catch_unwind_turns_panic_into_failure() {
    let effect = Io::<i32>::catch_unwind(
        || panic!("nope"),
        |defect| format!("caught: {}", defect.message()),
    );
    assert_eq!(
        cause_of(run(effect).await).failure_option(),
        Some(&"caught: nope".to_string())
    );
}

// Environment

#[tokio::test]
async fn test_access_and_provide() {
    let effect = Effect::<u32, String, u32>::access(|n| n * 2).provide::<()>(21);
    assert_eq!(run(effect).await.into_result().unwrap(), 42);
}

#[tokio::test]
async fn test_provide_some_derives_environment() {
    let effect = Effect::<u32, String, u32>::environment()
        .provide_some(|s: &String| s.len() as u32)
        .provide::<()>("abc".to_string());
    assert_eq!(run(effect).await.into_result().unwrap(), 3);
}

// Interruption

#[tokio::test]
async fn test_interrupt_self() {
    assert!(run(Io::<i32>::interrupt()).await.is_interrupted());
}

#[tokio::test]
async fn test_interrupting_a_forked_never_runs_on_interrupt() {
    let flag = Ref::new(false);
    let effect = Io::<()>::never()
        .on_interrupt(flag.set(true))
        .fork()
        .flat_map(|fiber| Io::<()>::sleep(Duration::from_millis(10)).zip_right(fiber.interrupt()));

    let exit = run(effect).await.into_result().unwrap();
    assert!(exit.is_interrupted());
    assert!(flag.get_now());
}

#[tokio::test]
async fn test_uninterruptible_region_runs_to_completion() {
    let log = Ref::new(Vec::new());
    let body = Io::<()>::sleep(Duration::from_millis(30)).zip_right(log.update(|mut v| {
        v.push("finished");
        v
    }));
    let effect = body
        .uninterruptible()
        .fork()
        .flat_map(|fiber| Io::<()>::sleep(Duration::from_millis(5)).zip_right(fiber.interrupt()));

    run(effect).await.into_result().unwrap();
    assert_eq!(log.get_now(), vec!["finished"]);
}

#[tokio::test]
async fn test_bracket_release_runs_once_when_interrupted() {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);
    let effect = Io::<()>::bracket(
        Io::succeed(()),
        |_| Io::never(),
        move |_| Effect::total(move || counter.fetch_add(1, Ordering::SeqCst)),
    )
    .fork()
    .flat_map(|fiber| Io::<()>::sleep(Duration::from_millis(10)).zip_right(fiber.interrupt()));

    assert!(run(effect).await.into_result().unwrap().is_interrupted());
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bracket_release_sees_who_interrupted_the_use() {
    let forked = Ref::new(None);
    let stash = forked.clone();
    let releases = Ref::new(Vec::new());
    let record = releases.clone();

    let bracketed = Io::<()>::bracket_exit(
        Io::succeed(()),
        move |_: &()| {
            Io::<()>::never()
                .fork()
                .flat_map(move |child| stash.set(Some(child)))
                .zip_right(Io::never())
        },
        move |_: (), exit: &Exit<String, ()>| {
            let interruptors = exit.cause().map(Cause::interruptors).unwrap_or_default();
            record.update(move |mut seen| {
                seen.push(interruptors);
                seen
            })
        },
    );
    let effect = bracketed
        .fork()
        .zip(Effect::fiber_id())
        .flat_map(|(fiber, me)| {
            Io::<()>::sleep(Duration::from_millis(10))
                .zip_right(fiber.interrupt())
                .map(move |exit| (exit, me))
        });

    let (exit, me) = run(effect).await.into_result().unwrap();
    assert!(cause_of(exit).interruptors().contains(&me));

    let child = forked.get_now().expect("use should have forked a child");
    assert!(child.poll().map_or(false, |exit| exit.is_interrupted()));

    let releases = releases.get_now();
    assert_eq!(releases.len(), 1);
    assert!(releases[0].contains(&me));
}

#[tokio::test]
async fn test_async_canceler_runs_on_interrupt() {
    let cancelled = Ref::new(false);
    let cancel = cancelled.clone();
    let effect = Io::<i32>::effect_async_interrupt(move |_callback| Either::Left(cancel.set(true)))
        .fork()
        .flat_map(|fiber| Io::<()>::sleep(Duration::from_millis(10)).zip_right(fiber.interrupt()));

    assert!(run(effect).await.into_result().unwrap().is_interrupted());
    assert!(cancelled.get_now());
}

#[tokio::test]
async fn test_dropped_callback_suspends_until_interrupted() {
    let effect = Io::<i32>::effect_async(drop)
        .fork()
        .flat_map(|fiber| Io::<()>::sleep(Duration::from_millis(10)).zip_right(fiber.interrupt()));
    assert!(run(effect).await.into_result().unwrap().is_interrupted());
}

// Fibers

#[tokio::test]
async fn test_join_returns_child_value() {
    let effect = Io::succeed(7).fork().flat_map(|fiber| fiber.join());
    assert_eq!(run(effect).await.into_result().unwrap(), 7);
}

#[tokio::test]
async fn test_join_rethrows_child_failure() {
    let effect = Io::<i32>::fail("child".to_string())
        .fork()
        .flat_map(|fiber| fiber.join());
    assert_eq!(
        cause_of(run(effect).await).failure_option(),
        Some(&"child".to_string())
    );
}

#[tokio::test]
async fn test_children_are_interrupted_when_parent_ends() {
    let flag = Ref::new(false);
    let effect = Io::<()>::never()
        .on_interrupt(flag.set(true))
        .fork()
        .flat_map(|child| Io::<()>::sleep(Duration::from_millis(10)).as_(child));

    let child = run(effect).await.into_result().unwrap();
    assert!(flag.get_now());
    assert!(child.poll().is_some_and(|exit| exit.is_interrupted()));
}

#[tokio::test]
async fn test_fork_daemon_outlives_parent() {
    let flag = Ref::new(false);
    let effect = Io::<()>::sleep(Duration::from_millis(20))
        .zip_right(flag.set(true))
        .fork_daemon();

    let fiber = run(effect).await.into_result().unwrap();
    assert!(!flag.get_now());

    let exit = run(fiber.join()).await;
    assert!(exit.is_success());
    assert!(flag.get_now());
}

#[tokio::test]
async fn test_children_lists_live_forks() {
    let effect = Io::<()>::never()
        .fork()
        .zip_right(Effect::<(), String, Vec<RuntimeFiber>>::children());
    assert_eq!(run(effect).await.into_result().unwrap().len(), 1);
}

// Races and parallelism

#[tokio::test]
async fn test_race_returns_first_success_and_interrupts_loser() {
    let loser_interrupted = Ref::new(false);
    let slow = Io::<()>::sleep(Duration::from_secs(5))
        .as_("slow")
        .on_interrupt(loser_interrupted.set(true));
    let fast = Io::<()>::sleep(Duration::from_millis(10)).as_("fast");

    assert_eq!(run(fast.race(slow)).await.into_result().unwrap(), "fast");
    assert!(loser_interrupted.get_now());
}

#[tokio::test]
async fn test_race_fails_only_when_both_fail() {
    let effect = Io::<i32>::fail("a".to_string()).race(Io::fail("b".to_string()));
    let cause = cause_of(run(effect).await);
    let mut failures: Vec<&String> = cause.failures();
    failures.sort();
    assert_eq!(failures, vec!["a", "b"]);
}

#[tokio::test]
async fn test_race_first_returns_first_completion() {
    let effect = Io::<i32>::fail("quick".to_string())
        .race_first(Io::<()>::sleep(Duration::from_secs(5)).as_(1));
    assert_eq!(
        cause_of(run(effect).await).failure_option(),
        Some(&"quick".to_string())
    );
}

#[tokio::test]
async fn test_race_either_tags_the_winner() {
    let effect = Io::succeed(1).race_either(Io::<&'static str>::never());
    assert_eq!(run(effect).await.into_result().unwrap(), Either::Left(1));
}

#[tokio::test]
async fn test_timeout() {
    let late = Io::<()>::never().timeout(Duration::from_millis(10));
    assert_eq!(run(late).await.into_result().unwrap(), None);

    let prompt = Io::succeed(5).timeout(Duration::from_secs(5));
    assert_eq!(run(prompt).await.into_result().unwrap(), Some(5));

    let failed = Io::<i32>::never().timeout_fail("late".to_string(), Duration::from_millis(10));
    assert_eq!(
        cause_of(run(failed).await).failure_option(),
        Some(&"late".to_string())
    );
}

#[tokio::test]
async fn test_zip_par_keeps_both_defects() {
    let left = Io::<()>::sleep(Duration::from_millis(20))
        .zip_right(Io::<i32>::die_message("left"))
        .uninterruptible();
    let right = Io::<()>::sleep(Duration::from_millis(5)).zip_right(Io::<i32>::die_message("right"));

    let cause = cause_of(run(left.zip_par(right)).await);
    assert_eq!(sorted_defects(&cause), vec!["left".to_string(), "right".to_string()]);
    for message in ["left", "right"] {
        let found = cause.find(|c| match c {
            Cause::Die(defect) if defect.message() == message => Some(()),
            _ => None,
        });
        assert!(found.is_some(), "missing defect {}", message);
    }
}

#[tokio::test]
async fn test_collect_all_par_preserves_order() {
    let effects = (0..5_u64).map(|i| {
        Io::<()>::sleep(Duration::from_millis(5 * (5 - i))).as_(i)
    });
    let effect = Effect::<(), String, u64>::collect_all_par(effects);
    assert_eq!(run(effect).await.into_result().unwrap(), vec![0, 1, 2, 3, 4]);
}

// Futures

#[tokio::test]
async fn test_from_future() {
    let ok = Io::from_future(async { Ok::<_, String>(7) });
    assert_eq!(run(ok).await.into_result().unwrap(), 7);

    let bad = Io::<i32>::from_future(async { Err("nope".to_string()) });
    assert!(cause_of(run(bad).await).is_failure());
}

#[tokio::test]
async fn test_from_future_is_interruptible() {
    let effect = Io::<()>::from_future(std::future::pending())
        .fork()
        .flat_map(|fiber| Io::<()>::sleep(Duration::from_millis(10)).zip_right(fiber.interrupt()));
    assert!(run(effect).await.into_result().unwrap().is_interrupted());
}

// Scheduling

#[tokio::test]
async fn test_small_yield_budget_still_completes() {
    let runtime = Runtime::current().configured(RuntimeConfig::default().with_yield_op_count(1));
    let exit = runtime.run(countdown(1_000)).await;
    assert_eq!(exit.into_result().unwrap(), 0);
}

#[tokio::test]
async fn test_yield_lets_other_fibers_progress() {
    let log = Ref::new(Vec::new());
    let push = |label: &'static str| {
        log.update(move |mut v| {
            v.push(label);
            v
        })
    };
    let busy = push("busy").zip_right(Io::<()>::yield_now()).zip_right(push("busy"));
    let other = push("other");

    let effect = busy.fork().zip(other.fork()).flat_map(|(a, b)| a.join().zip(b.join()));
    run(effect).await.into_result().unwrap();
    assert_eq!(log.get_now(), vec!["busy", "other", "busy"]);
}
