//! Forking, racing and parallel composition.
//!
//! Every combinator here is built on two instructions: `Fork`, which starts a
//! child fiber, and `Race`, which forks two children and continues with
//! whichever completes first. `Race` itself never interrupts the loser;
//! [`race`](Effect::race) and [`race_first`](Effect::race_first) interrupt
//! it and wait for it to stop, [`race_disconnect`](Effect::race_disconnect)
//! interrupts it without waiting, and [`race_with`](Effect::race_with) leaves
//! the decision to the caller.

use std::sync::Arc;
use std::time::Duration;

use super::combinators::with_value;
use super::instr::{
    flat_map_node, succeed_node, unerase_exit, AnyValue, Instr, Node, RaceInstr, SharedExit,
};
use super::Effect;
use crate::either::Either;
use crate::error::TimeoutError;
use crate::exit::Exit;
use crate::fiber::{Fiber, RuntimeFiber};
use crate::runtime::FailureReporter;
use crate::scope::Scope;
use crate::supervisor::Supervisor;

impl<R, E, A> Effect<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Run with `supervisor` observing every fiber forked inside.
    pub fn supervised(self, supervisor: Supervisor) -> Self {
        Self::from_node(Box::new(Instr::Supervise(self.node, supervisor)))
    }

    /// Attach fibers forked inside to `scope` instead of the forking fiber.
    pub fn override_fork_scope(self, scope: Scope) -> Self {
        Self::from_node(Box::new(Instr::OverrideForkScope(self.node, Some(scope))))
    }

    /// Attach fibers forked inside to the forking fiber again.
    pub fn reset_fork_scope(self) -> Self {
        Self::from_node(Box::new(Instr::OverrideForkScope(self.node, None)))
    }
}

impl<R, E> Effect<R, E, Scope>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// The scope fibers forked here would be attached to.
    pub fn fork_scope() -> Self {
        Self::from_node(Box::new(Instr::GetForkScope(Box::new(|scope: Scope| {
            succeed_node(scope)
        }))))
    }
}

impl<R, E, A> Effect<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// The tree of a child fiber: its value is shared with every observer.
    fn into_child(self) -> Node {
        flat_map_node(self.node, |value| {
            with_value(value, |a: A| succeed_node(Arc::new(a) as AnyValue))
        })
    }

    fn fork_node(
        self,
        scope: Option<Scope>,
        reporter: Option<FailureReporter>,
    ) -> Effect<R, E, Fiber<E, A>> {
        let fork = Box::new(Instr::Fork(self.into_child(), scope, reporter));
        Effect::from_node(flat_map_node(fork, |value| {
            with_value(value, |fiber: RuntimeFiber| {
                succeed_node(Fiber::<E, A>::new(fiber))
            })
        }))
    }

    /// Start `self` on a child fiber of the current one and continue
    /// immediately.
    ///
    /// The child is interrupted if it is still running when the current
    /// fiber finishes.
    pub fn fork(self) -> Effect<R, E, Fiber<E, A>> {
        self.fork_node(None, None)
    }

    /// Start `self` on a fiber that nobody owns.
    pub fn fork_daemon(self) -> Effect<R, E, Fiber<E, A>> {
        self.fork_node(Some(Scope::global()), None)
    }

    /// Start `self` on a fiber attached to `scope`.
    pub fn fork_in(self, scope: Scope) -> Effect<R, E, Fiber<E, A>> {
        self.fork_node(Some(scope), None)
    }

    /// Start `self` on a child fiber whose failures go to `reporter`.
    pub fn fork_with_reporter(self, reporter: FailureReporter) -> Effect<R, E, Fiber<E, A>> {
        self.fork_node(None, Some(reporter))
    }

    /// Run `self` and `that` concurrently; the first to complete decides
    /// how to continue. The loser keeps running unless the continuation
    /// stops it.
    pub fn race_with<E1, B, E2, C, L, Rt>(
        self,
        that: Effect<R, E1, B>,
        left_done: L,
        right_done: Rt,
    ) -> Effect<R, E2, C>
    where
        E1: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
        E2: Clone + Send + Sync + 'static,
        C: Send + 'static,
        L: FnOnce(Exit<E, A>, Fiber<E1, B>) -> Effect<R, E2, C> + Send + 'static,
        Rt: FnOnce(Exit<E1, B>, Fiber<E, A>) -> Effect<R, E2, C> + Send + 'static,
    {
        Effect::from_node(Box::new(Instr::Race(RaceInstr {
            left: self.into_child(),
            right: that.into_child(),
            left_wins: Box::new(move |exit: SharedExit, loser: RuntimeFiber| {
                left_done(unerase_exit(exit), Fiber::new(loser)).node
            }),
            right_wins: Box::new(move |exit: SharedExit, loser: RuntimeFiber| {
                right_done(unerase_exit(exit), Fiber::new(loser)).node
            }),
            scope: None,
        })))
    }

    /// Return the first success; the loser is interrupted and awaited.
    /// Fails only if both sides fail, with both causes.
    pub fn race(self, that: Self) -> Self {
        fn first_success<R, E, A>(exit: Exit<E, A>, loser: Fiber<E, A>) -> Effect<R, E, A>
        where
            R: Send + Sync + 'static,
            E: Clone + Send + Sync + 'static,
            A: Clone + Send + Sync + 'static,
        {
            match exit {
                Exit::Success(a) => loser.interrupt().as_(a),
                Exit::Failure(cause) => loser
                    .join()
                    .catch_all_cause(move |other| Effect::halt(cause.both(other))),
            }
        }
        self.race_with(that, first_success, first_success)
    }

    /// Return the first completion, success or failure; the loser is
    /// interrupted and awaited.
    pub fn race_first(self, that: Self) -> Self {
        self.result::<E>()
            .race(that.result::<E>())
            .flat_map(Effect::done)
    }

    /// Like [`race_first`](Effect::race_first), interrupting the loser in the
    /// background instead of waiting for it.
    pub fn race_disconnect(self, that: Self) -> Self {
        fn first_done<R, E, A>(exit: Exit<E, A>, loser: Fiber<E, A>) -> Effect<R, E, A>
        where
            R: Send + Sync + 'static,
            E: Clone + Send + Sync + 'static,
            A: Clone + Send + Sync + 'static,
        {
            loser.interrupt_fork().zip_right(Effect::done(exit))
        }
        self.race_with(that, first_done, first_done)
    }

    /// Race with an effect of another type, keeping track of the winner.
    pub fn race_either<B>(self, that: Effect<R, E, B>) -> Effect<R, E, Either<A, B>>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.map(Either::Left).race(that.map(Either::Right))
    }

    /// Run `self` and `that` concurrently and combine their values.
    ///
    /// If either side fails, the other is interrupted and the failure holds
    /// both causes.
    pub fn zip_with_par<B, C, F>(self, that: Effect<R, E, B>, f: F) -> Effect<R, E, C>
    where
        B: Clone + Send + Sync + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        self.zip_par(that).map(move |(a, b)| f(a, b))
    }

    /// Run `self` and `that` concurrently and pair their values.
    pub fn zip_par<B>(self, that: Effect<R, E, B>) -> Effect<R, E, (A, B)>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.race_with(
            that,
            |exit, right| match exit {
                Exit::Success(a) => right.join().map(move |b| (a, b)),
                Exit::Failure(cause) => right.interrupt().flat_map(move |other| {
                    Effect::halt(match other {
                        Exit::Success(_) => cause,
                        Exit::Failure(other) => cause.both(other),
                    })
                }),
            },
            |exit, left| match exit {
                Exit::Success(b) => left.join().map(move |a| (a, b)),
                Exit::Failure(cause) => left.interrupt().flat_map(move |other| {
                    Effect::halt(match other {
                        Exit::Success(_) => cause,
                        Exit::Failure(other) => other.both(cause),
                    })
                }),
            },
        )
    }

    /// Run all effects concurrently, collecting their values in order.
    pub fn collect_all_par<I>(effects: I) -> Effect<R, E, Vec<A>>
    where
        I: IntoIterator<Item = Self>,
    {
        effects
            .into_iter()
            .fold(Effect::succeed(Vec::new()), |all, effect| {
                all.zip_with_par(effect, |mut values, value| {
                    values.push(value);
                    values
                })
            })
    }

    /// `Some` value if `self` completes within `duration`, `None` otherwise.
    /// `self` is interrupted and awaited on timeout.
    pub fn timeout(self, duration: Duration) -> Effect<R, E, Option<A>> {
        self.map(Some)
            .race_first(Effect::<R, E, ()>::sleep(duration).as_(None))
    }

    /// Like [`timeout`](Effect::timeout), without waiting for `self` to stop.
    pub fn timeout_disconnect(self, duration: Duration) -> Effect<R, E, Option<A>> {
        self.map(Some)
            .race_disconnect(Effect::<R, E, ()>::sleep(duration).as_(None))
    }

    /// Fail with `error` if `self` does not complete within `duration`.
    pub fn timeout_fail(self, error: E, duration: Duration) -> Self {
        self.timeout(duration).flat_map(move |value| match value {
            Some(a) => Effect::succeed(a),
            None => Effect::fail(error),
        })
    }

    /// Fail with [`TimeoutError::Timeout`] if `self` does not complete within
    /// `duration`; typed failures of `self` become [`TimeoutError::Inner`].
    pub fn timeout_error(self, duration: Duration) -> Effect<R, TimeoutError<E>, A> {
        self.map_err(TimeoutError::Inner)
            .timeout_fail(TimeoutError::Timeout { duration }, duration)
    }
}
