//! Sequencing, error handling and environment combinators.
//!
//! Everything that observes a failure reduces to
//! [`fold_cause_m`](Effect::fold_cause_m), the only combinator that sees the
//! whole [`Cause`].

use std::convert::Infallible;
use std::sync::Arc;

use super::instr::{
    erase_cause, fail_node, flat_map_node, fold_node, mismatch, succeed_node, unerase_cause,
    unerase_value, AnyEnv, ErasedCause, Instr, Node, Value,
};
use super::Effect;
use crate::cause::{Cause, Defect};
use crate::either::Either;
use crate::exit::Exit;

/// Continue with `k` applied to the typed value, or fail if the value is not
/// an `A`.
pub(super) fn with_value<A, F>(value: Value, k: F) -> Node
where
    A: 'static,
    F: FnOnce(A) -> Node,
{
    match unerase_value::<A>(value) {
        Ok(a) => k(a),
        Err(cause) => fail_node(cause),
    }
}

impl<R, E, A> Effect<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Transform the success value.
    pub fn map<B, F>(self, f: F) -> Effect<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        Effect::from_node(flat_map_node(self.node, move |value| {
            with_value(value, |a| succeed_node(f(a)))
        }))
    }

    /// Continue with the effect `f` builds from the success value.
    pub fn flat_map<B, F>(self, f: F) -> Effect<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Effect<R, E, B> + Send + 'static,
    {
        Effect::from_node(flat_map_node(self.node, move |value| {
            with_value(value, |a| f(a).node)
        }))
    }

    /// Alias of [`flat_map`](Effect::flat_map).
    pub fn and_then<B, F>(self, f: F) -> Effect<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Effect<R, E, B> + Send + 'static,
    {
        self.flat_map(f)
    }

    /// Run `that` after `self` and combine both values.
    pub fn zip_with<B, C, F>(self, that: Effect<R, E, B>, f: F) -> Effect<R, E, C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        self.flat_map(move |a| that.map(move |b| f(a, b)))
    }

    /// Run `that` after `self` and pair their values.
    pub fn zip<B>(self, that: Effect<R, E, B>) -> Effect<R, E, (A, B)>
    where
        B: Send + 'static,
    {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Run `that` after `self`, keeping the value of `that`.
    pub fn zip_right<B>(self, that: Effect<R, E, B>) -> Effect<R, E, B>
    where
        B: Send + 'static,
    {
        self.flat_map(move |_| that)
    }

    /// Run `that` after `self`, keeping the value of `self`.
    pub fn zip_left<B>(self, that: Effect<R, E, B>) -> Self
    where
        B: Send + 'static,
    {
        self.zip_with(that, |a, _| a)
    }

    /// Replace the success value.
    pub fn as_<B>(self, value: B) -> Effect<R, E, B>
    where
        B: Send + 'static,
    {
        self.map(move |_| value)
    }

    /// Discard the success value.
    pub fn as_unit(self) -> Effect<R, E, ()> {
        self.map(|_| ())
    }

    /// Run an effect built from the success value, keeping the original
    /// value.
    pub fn tap<B, F>(self, f: F) -> Self
    where
        B: Send + 'static,
        F: FnOnce(&A) -> Effect<R, E, B> + Send + 'static,
    {
        self.flat_map(move |a| {
            let side = f(&a);
            side.as_(a)
        })
    }

    /// Handle both outcomes, seeing the full cause of a failure.
    ///
    /// A fiber being interrupted skips `on_failure` while it is
    /// interruptible; only an uninterruptible handler gets to see the
    /// interruption.
    pub fn fold_cause_m<E2, B, F, G>(self, on_failure: F, on_success: G) -> Effect<R, E2, B>
    where
        E2: Clone + Send + Sync + 'static,
        B: Send + 'static,
        F: FnOnce(Cause<E>) -> Effect<R, E2, B> + Send + 'static,
        G: FnOnce(A) -> Effect<R, E2, B> + Send + 'static,
    {
        Effect::from_node(fold_node(
            self.node,
            move |cause| on_failure(unerase_cause(cause)).node,
            move |value| with_value(value, |a| on_success(a).node),
        ))
    }

    /// Handle both outcomes; only typed failures reach `on_failure`, defects
    /// and interruption pass through.
    pub fn fold_m<E2, B, F, G>(self, on_failure: F, on_success: G) -> Effect<R, E2, B>
    where
        E2: Clone + Send + Sync + 'static,
        B: Send + 'static,
        F: FnOnce(E) -> Effect<R, E2, B> + Send + 'static,
        G: FnOnce(A) -> Effect<R, E2, B> + Send + 'static,
    {
        self.fold_cause_m(
            move |cause| match cause.failure_or_cause() {
                Either::Left(error) => on_failure(error),
                Either::Right(cause) => Effect::halt(cause.strip_failures()),
            },
            on_success,
        )
    }

    /// Fold both outcomes into a value.
    pub fn fold<E2, B, F, G>(self, on_failure: F, on_success: G) -> Effect<R, E2, B>
    where
        E2: Clone + Send + Sync + 'static,
        B: Send + 'static,
        F: FnOnce(E) -> B + Send + 'static,
        G: FnOnce(A) -> B + Send + 'static,
    {
        self.fold_m(
            move |e| Effect::succeed(on_failure(e)),
            move |a| Effect::succeed(on_success(a)),
        )
    }

    /// Recover from a typed failure.
    pub fn catch_all<E2, F>(self, f: F) -> Effect<R, E2, A>
    where
        E2: Clone + Send + Sync + 'static,
        F: FnOnce(E) -> Effect<R, E2, A> + Send + 'static,
    {
        self.fold_m(f, Effect::succeed)
    }

    /// Recover from any failure, including defects and interruption.
    pub fn catch_all_cause<E2, F>(self, f: F) -> Effect<R, E2, A>
    where
        E2: Clone + Send + Sync + 'static,
        F: FnOnce(Cause<E>) -> Effect<R, E2, A> + Send + 'static,
    {
        self.fold_cause_m(f, Effect::succeed)
    }

    /// Transform every typed failure in the cause.
    pub fn map_err<E2, F>(self, f: F) -> Effect<R, E2, A>
    where
        E2: Clone + Send + Sync + 'static,
        F: FnMut(E) -> E2 + Send + 'static,
    {
        self.map_cause(move |cause| cause.map(f))
    }

    /// Run `that` if `self` fails with a typed failure.
    pub fn or_else<E2>(self, that: Effect<R, E2, A>) -> Effect<R, E2, A>
    where
        E2: Clone + Send + Sync + 'static,
    {
        self.catch_all(move |_| that)
    }

    /// Expose the typed failure as a value.
    pub fn either<E2>(self) -> Effect<R, E2, Either<E, A>>
    where
        E2: Clone + Send + Sync + 'static,
    {
        self.fold(Either::Left, Either::Right)
    }

    /// Expose the outcome, failures included, as an [`Exit`].
    pub fn run_exit(self) -> Effect<R, Infallible, Exit<E, A>> {
        self.result()
    }

    pub(crate) fn result<E2>(self) -> Effect<R, E2, Exit<E, A>>
    where
        E2: Clone + Send + Sync + 'static,
    {
        self.fold_cause_m(
            |cause| Effect::succeed(Exit::Failure(cause)),
            |a| Effect::succeed(Exit::Success(a)),
        )
    }

    /// Turn typed failures into defects.
    pub fn or_die<E2>(self) -> Effect<R, E2, A>
    where
        E: std::fmt::Debug,
        E2: Clone + Send + Sync + 'static,
    {
        self.or_die_with(Defect::new)
    }

    /// Turn typed failures into defects with `f`.
    pub fn or_die_with<E2, F>(self, mut f: F) -> Effect<R, E2, A>
    where
        E2: Clone + Send + Sync + 'static,
        F: FnMut(E) -> Defect + Send + 'static,
    {
        self.map_cause(move |cause| cause.flat_map(|e| Cause::die(f(e))))
    }

    /// Turn defects back into typed failures.
    pub fn resurrect(self) -> Self
    where
        E: From<Defect>,
    {
        self.map_cause(resurrect_cause)
    }

    /// Expose the whole cause as the typed failure.
    pub fn sandbox(self) -> Effect<R, Cause<E>, A> {
        self.catch_all_cause(Effect::fail)
    }

    /// Apply `f` to the cause of a failure.
    pub(crate) fn map_cause<E2, F>(self, f: F) -> Effect<R, E2, A>
    where
        E2: Clone + Send + Sync + 'static,
        F: FnOnce(Cause<E>) -> Cause<E2> + Send + 'static,
    {
        self.catch_all_cause(move |cause| Effect::halt(f(cause)))
    }

    /// Satisfy the environment, leaving an effect that accepts any.
    pub fn provide<R0>(self, env: R) -> Effect<R0, E, A>
    where
        R0: Send + Sync + 'static,
    {
        let env: AnyEnv = Arc::new(env);
        Effect::from_node(Box::new(Instr::Give(self.node, env)))
    }

    /// Derive the environment from an outer one.
    pub fn provide_some<R0, F>(self, f: F) -> Effect<R0, E, A>
    where
        R0: Send + Sync + 'static,
        F: FnOnce(&R0) -> R + Send + 'static,
    {
        let node = self.node;
        Effect::from_node(Box::new(Instr::Read(Box::new(move |outer: AnyEnv| {
            match outer.downcast_ref::<R0>() {
                Some(outer) => {
                    let env: AnyEnv = Arc::new(f(outer));
                    Box::new(Instr::Give(node, env))
                }
                None => fail_node(Cause::die(mismatch::<R0>("another environment"))),
            }
        }))))
    }
}

impl<R, E, A> Effect<R, Cause<E>, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Undo [`sandbox`](Effect::sandbox).
    pub fn unsandbox(self) -> Effect<R, E, A> {
        Effect::from_node(fold_node(
            self.node,
            |cause: ErasedCause| {
                fail_node(erase_cause(
                    unerase_cause::<Cause<E>>(cause).flat_map(|inner| inner),
                ))
            },
            |value: Value| Box::new(Instr::Succeed(value)),
        ))
    }
}

fn resurrect_cause<E: From<Defect>>(cause: Cause<E>) -> Cause<E> {
    match cause {
        Cause::Die(defect) => Cause::Fail(E::from(defect)),
        Cause::Then(left, right) => resurrect_cause(*left).then(resurrect_cause(*right)),
        Cause::Both(left, right) => resurrect_cause(*left).both(resurrect_cause(*right)),
        other => other,
    }
}
