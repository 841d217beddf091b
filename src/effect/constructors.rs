//! Constructors for effects.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use futures::FutureExt;

use super::instr::{
    self, erase_cause, fail_node, mismatch, succeed_node, AnyEnv, AnyError, AsyncStart, Instr,
    Resumer, Value,
};
use super::Effect;
use crate::cause::{Cause, Defect};
use crate::either::Either;
use crate::exit::Exit;
use crate::fiber::{FiberDescriptor, FiberId, RuntimeFiber};

/// Resumes a fiber suspended in [`Effect::effect_async`].
///
/// Consumed on use, so a fiber is resumed at most once. Dropping it without
/// resuming leaves the fiber suspended until it is interrupted.
pub struct Callback<R, E, A> {
    resumer: Resumer,
    _marker: PhantomData<fn(R) -> (E, A)>,
}

impl<R, E, A> Callback<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    fn new(resumer: Resumer) -> Self {
        Self {
            resumer,
            _marker: PhantomData,
        }
    }

    /// Continue the suspended fiber with `effect`.
    pub fn resume(self, effect: Effect<R, E, A>) {
        self.resumer.resume(effect.node);
    }

    /// Continue with a value.
    pub fn succeed(self, value: A) {
        self.resume(Effect::succeed(value));
    }

    /// Continue with a typed failure.
    pub fn fail(self, error: E) {
        self.resume(Effect::fail(error));
    }

    /// Continue with an exit.
    pub fn done(self, exit: Exit<E, A>) {
        self.resume(Effect::done(exit));
    }
}

impl<R, E, A> fmt::Debug for Callback<R, E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

impl<R, E, A> Effect<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// An effect that succeeds with `value`.
    pub fn succeed(value: A) -> Self {
        Self::from_node(succeed_node(value))
    }

    /// An effect that fails with `error`.
    pub fn fail(error: E) -> Self {
        Self::halt(Cause::fail(error))
    }

    /// An effect that dies with a defect.
    pub fn die(defect: impl Into<Defect>) -> Self {
        Self::halt(Cause::die(defect))
    }

    /// An effect that dies with a defect carrying `message`.
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::die(Defect::from_message(message))
    }

    /// An effect that fails with `cause`.
    pub fn halt(cause: Cause<E>) -> Self {
        Self::from_node(fail_node(erase_cause(cause)))
    }

    /// An effect that interrupts the fiber running it.
    pub fn interrupt() -> Self {
        Self::from_node(instr::descriptor_node(|me| {
            fail_node(Cause::interrupt(me.id))
        }))
    }

    /// An effect that ends the way `exit` says.
    pub fn done(exit: Exit<E, A>) -> Self {
        match exit {
            Exit::Success(value) => Self::succeed(value),
            Exit::Failure(cause) => Self::halt(cause),
        }
    }

    /// Run a side effect that does not fail.
    ///
    /// A panic inside `f` is a bug: the fiber dies with it as a defect.
    pub fn total<F>(f: F) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
    {
        Self::from_node(instr::total_node(move || Box::new(f()) as Value))
    }

    /// Run a side effect that may fail with `E`.
    pub fn partial<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<A, E> + Send + 'static,
    {
        Self::from_node(Box::new(Instr::Partial(Box::new(move || {
            f().map(|a| Box::new(a) as Value).map_err(AnyError::new)
        }))))
    }

    /// Like [`partial`](Effect::partial), additionally turning a panic in `f`
    /// into a typed failure.
    pub fn catch_unwind<F, P>(f: F, on_panic: P) -> Self
    where
        F: FnOnce() -> Result<A, E> + Send + 'static,
        P: FnOnce(Defect) -> E + Send + 'static,
    {
        Self::partial(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => Err(on_panic(Defect::from_panic(payload))),
        })
    }

    /// Build the effect lazily, when it runs.
    pub fn suspend<F>(f: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        Self::from_node(instr::suspend_node(move || f().node))
    }

    /// Suspend the fiber until `register`'s callback is invoked.
    ///
    /// ```rust
    /// use undertow::{Effect, Runtime};
    ///
    /// let rt = Runtime::new().unwrap();
    /// let program = Effect::<(), String, u8>::effect_async(|callback| {
    ///     std::thread::spawn(move || callback.succeed(7));
    /// });
    /// assert_eq!(rt.block_on(program).unwrap(), 7);
    /// ```
    pub fn effect_async<F>(register: F) -> Self
    where
        F: FnOnce(Callback<R, E, A>) + Send + 'static,
    {
        Self::from_node(Box::new(Instr::Async(
            Box::new(move |resumer: Resumer| {
                register(Callback::new(resumer));
                AsyncStart::Pending
            }),
            Vec::new(),
        )))
    }

    /// Like [`effect_async`](Effect::effect_async), where `register` either
    /// completes synchronously (`Right`) or returns a canceler (`Left`) run
    /// if the fiber is interrupted while suspended.
    pub fn effect_async_interrupt<F>(register: F) -> Self
    where
        F: FnOnce(Callback<R, E, A>) -> Either<Effect<R, std::convert::Infallible, ()>, Self>
            + Send
            + 'static,
    {
        Self::from_node(Box::new(Instr::Async(
            Box::new(move |resumer: Resumer| match register(Callback::new(resumer)) {
                Either::Left(canceler) => AsyncStart::PendingWithCanceler(canceler.node),
                Either::Right(now) => AsyncStart::Now(now.node),
            }),
            Vec::new(),
        )))
    }

    /// An effect that never completes. It can still be interrupted.
    pub fn never() -> Self {
        Self::from_node(Box::new(Instr::Async(
            Box::new(|resumer: Resumer| {
                drop(resumer);
                AsyncStart::Pending
            }),
            Vec::new(),
        )))
    }

    /// Await a future on the runtime.
    ///
    /// The future runs as its own tokio task and is aborted if the fiber is
    /// interrupted while waiting. A panic in the future is a defect.
    pub fn from_future<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        Self::effect_async_interrupt(move |callback| {
            let task = tokio::spawn(async move {
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(Ok(value)) => callback.succeed(value),
                    Ok(Err(error)) => callback.fail(error),
                    Err(payload) => callback.resume(Effect::die(Defect::from_panic(payload))),
                }
            });
            Either::Left(Effect::total(move || task.abort()))
        })
    }

    /// Read a value from the environment.
    pub fn access<F>(f: F) -> Self
    where
        F: FnOnce(&R) -> A + Send + 'static,
    {
        Self::access_m(move |env| Effect::succeed(f(env)))
    }

    /// Build an effect from the environment.
    pub fn access_m<F>(f: F) -> Self
    where
        F: FnOnce(&R) -> Self + Send + 'static,
    {
        Self::from_node(Box::new(Instr::Read(Box::new(move |env: AnyEnv| {
            match env.downcast_ref::<R>() {
                Some(env) => f(env).node,
                None => fail_node(Cause::die(mismatch::<R>("another environment"))),
            }
        }))))
    }
}

impl<R, E> Effect<R, E, ()>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// An effect that succeeds with `()`.
    pub fn unit() -> Self {
        Self::succeed(())
    }

    /// Let other fibers run before continuing.
    pub fn yield_now() -> Self {
        Self::from_node(Box::new(Instr::Yield))
    }

    /// Suspend the fiber for `duration`.
    pub fn sleep(duration: Duration) -> Self {
        Self::effect_async_interrupt(move |callback| {
            let timer = tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                callback.succeed(());
            });
            Either::Left(Effect::total(move || timer.abort()))
        })
    }
}

impl<R, E> Effect<R, E, R>
where
    R: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// The whole environment.
    pub fn environment() -> Self {
        Self::access(R::clone)
    }
}

impl<R, E> Effect<R, E, FiberDescriptor>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// A snapshot of the fiber running this effect.
    pub fn descriptor() -> Self {
        Self::from_node(instr::descriptor_node(succeed_node))
    }
}

impl<R, E> Effect<R, E, FiberId>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// The id of the fiber running this effect.
    pub fn fiber_id() -> Self {
        Self::from_node(instr::descriptor_node(|me| succeed_node(me.id)))
    }
}

impl<R, E> Effect<R, E, Vec<RuntimeFiber>>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// The live children of the fiber running this effect.
    pub fn children() -> Self {
        Self::from_node(instr::descriptor_node(|me| succeed_node(me.children)))
    }
}
