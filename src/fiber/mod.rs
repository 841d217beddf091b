//! Fibers: lightweight threads of execution that interpret effects.
//!
//! Forking an [`Effect`] yields a [`Fiber`] handle. The handle can be awaited,
//! joined (rethrowing the child's failure in the joining fiber), or
//! interrupted. [`RuntimeFiber`] is the untyped handle seen by supervisors
//! and descriptors.

pub(crate) mod context;
pub(crate) mod driver;
pub(crate) mod fiber_ref;
mod id;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

pub use fiber_ref::FiberRef;
pub use id::FiberId;

use self::context::FiberContext;
use crate::effect::instr::{
    self, fail_node, flat_map_node, succeed_node, unerase_cause, unerase_shared, unerase_value,
    AnyValue, AsyncStart, ErasedCause, FiberExit, Instr, Node, Resumer, SharedExit,
};
use crate::effect::Effect;
use crate::exit::Exit;
use crate::scope::Scope;

/// What a fiber is currently doing.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FiberStatus {
    /// Interpreting instructions.
    Running,
    /// Waiting for an asynchronous callback.
    Suspended {
        /// Whether the wait can be interrupted.
        interruptible: bool,
        /// The fibers being waited on, if the wait is on other fibers.
        blocking_on: Vec<FiberId>,
    },
    /// Finished; the exit is available.
    Done,
}

impl FiberStatus {
    /// Whether the fiber has finished.
    pub fn is_done(&self) -> bool {
        matches!(self, FiberStatus::Done)
    }
}

/// Whether a region of an effect accepts interruption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InterruptStatus {
    /// Interruption is delivered at the next safe point.
    Interruptible,
    /// Interruption is deferred until the region ends.
    Uninterruptible,
}

impl InterruptStatus {
    /// `Interruptible` for `true`.
    pub fn from_bool(interruptible: bool) -> Self {
        if interruptible {
            InterruptStatus::Interruptible
        } else {
            InterruptStatus::Uninterruptible
        }
    }

    /// Whether this is `Interruptible`.
    pub fn is_interruptible(self) -> bool {
        self == InterruptStatus::Interruptible
    }
}

/// A snapshot of the running fiber, see [`Effect::descriptor`].
#[derive(Clone, Debug)]
pub struct FiberDescriptor {
    /// The fiber's identity.
    pub id: FiberId,
    /// Its status when the snapshot was taken.
    pub status: FiberStatus,
    /// Whether the current region is interruptible.
    pub interrupt_status: InterruptStatus,
    /// Every fiber that requested this fiber's interruption so far.
    pub interruptors: BTreeSet<FiberId>,
    /// The scope new forks are attached to.
    pub scope: Scope,
    /// Live children of this fiber.
    pub children: Vec<RuntimeFiber>,
}

/// An untyped handle to a fiber.
#[derive(Clone)]
pub struct RuntimeFiber {
    ctx: Arc<FiberContext>,
}

impl RuntimeFiber {
    pub(crate) fn new(ctx: Arc<FiberContext>) -> Self {
        Self { ctx }
    }

    pub(crate) fn ctx(&self) -> &Arc<FiberContext> {
        &self.ctx
    }

    /// The fiber's identity.
    pub fn id(&self) -> FiberId {
        self.ctx.id
    }

    /// The fiber's current status.
    pub fn status(&self) -> FiberStatus {
        self.ctx.status()
    }

    /// The exit, if the fiber has finished.
    pub fn poll(&self) -> Option<FiberExit> {
        self.ctx.poll()
    }

    /// Wait for the fiber to finish.
    pub fn await_exit<R, E>(&self) -> Effect<R, E, FiberExit>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        Effect::from_node(await_node(&self.ctx))
    }

    /// Interrupt the fiber on behalf of the calling fiber and wait for it to
    /// finish.
    pub fn interrupt<R, E>(&self) -> Effect<R, E, FiberExit>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        Effect::from_node(instr::descriptor_node(move |me| {
            interrupt_as_node(ctx, me.id)
        }))
    }

    /// Interrupt the fiber on behalf of `by` and wait for it to finish.
    pub fn interrupt_as<R, E>(&self, by: FiberId) -> Effect<R, E, FiberExit>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        Effect::from_node(instr::suspend_node(move || interrupt_as_node(ctx, by)))
    }

    /// Request interruption without waiting for the fiber to finish.
    pub fn interrupt_fork<R, E>(&self) -> Effect<R, E, ()>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        Effect::from_node(instr::descriptor_node(move |me| {
            ctx.request_interrupt(me.id);
            instr::unit_node()
        }))
    }
}

impl fmt::Debug for RuntimeFiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeFiber({})", self.ctx.id)
    }
}

/// A suspended wait for `ctx` to finish, producing its [`SharedExit`].
pub(crate) fn await_node(ctx: &Arc<FiberContext>) -> Node {
    let ctx = Arc::clone(ctx);
    let blocking_on = vec![ctx.id];
    Box::new(Instr::Async(
        Box::new(move |resumer: Resumer| {
            if let Some(exit) = ctx.poll() {
                return AsyncStart::Now(succeed_node(exit));
            }
            ctx.observe(Box::new(move |exit: SharedExit| resumer.resume(succeed_node(exit))));
            AsyncStart::Pending
        }),
        blocking_on,
    ))
}

pub(crate) fn interrupt_as_node(ctx: Arc<FiberContext>, by: FiberId) -> Node {
    ctx.request_interrupt(by);
    await_node(&ctx)
}

type Extract<A> = Arc<dyn Fn(&AnyValue) -> Result<A, ErasedCause> + Send + Sync>;

/// A typed handle to a fiber that fails with `E` or succeeds with `A`.
pub struct Fiber<E, A> {
    inner: RuntimeFiber,
    extract: Extract<A>,
    _marker: std::marker::PhantomData<fn() -> E>,
}

impl<E, A> Clone for Fiber<E, A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            extract: Arc::clone(&self.extract),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<E, A> fmt::Debug for Fiber<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fiber({})", self.inner.id())
    }
}

impl<E, A> Fiber<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    pub(crate) fn new(inner: RuntimeFiber) -> Self
    where
        A: Clone + Sync,
    {
        Self {
            inner,
            extract: Arc::new(unerase_shared::<A>),
            _marker: std::marker::PhantomData,
        }
    }

    /// The fiber's identity.
    pub fn id(&self) -> FiberId {
        self.inner.id()
    }

    /// The fiber's current status.
    pub fn status(&self) -> FiberStatus {
        self.inner.status()
    }

    /// The untyped handle.
    pub fn runtime_fiber(&self) -> &RuntimeFiber {
        &self.inner
    }

    /// The exit, if the fiber has finished.
    pub fn poll(&self) -> Option<Exit<E, A>> {
        self.inner.poll().map(|exit| self.typed(exit))
    }

    /// Wait for the fiber and return its exit. Never fails.
    pub fn await_exit<R, E2>(&self) -> Effect<R, E2, Exit<E, A>>
    where
        R: Send + Sync + 'static,
        E2: Clone + Send + Sync + 'static,
    {
        self.with_exit(await_node(self.inner.ctx()))
    }

    /// Wait for the fiber and continue with its outcome: its value on
    /// success, its cause on failure. On success the child's fiber refs are
    /// merged into the joining fiber.
    pub fn join<R>(&self) -> Effect<R, E, A>
    where
        R: Send + Sync + 'static,
    {
        let ctx = Arc::clone(self.inner.ctx());
        let extract = Arc::clone(&self.extract);
        Effect::from_node(flat_map_node(await_node(&ctx), move |value| {
            match unerase_value::<SharedExit>(value) {
                Ok(Exit::Success(value)) => match extract(&value) {
                    Ok(a) => flat_map_node(fiber_ref::inherit_refs_node(ctx), move |_| {
                        succeed_node(a)
                    }),
                    Err(cause) => fail_node(cause),
                },
                Ok(Exit::Failure(cause)) | Err(cause) => fail_node(cause),
            }
        }))
    }

    /// Interrupt the fiber on behalf of the calling fiber and wait for its
    /// exit.
    pub fn interrupt<R, E2>(&self) -> Effect<R, E2, Exit<E, A>>
    where
        R: Send + Sync + 'static,
        E2: Clone + Send + Sync + 'static,
    {
        let ctx = Arc::clone(self.inner.ctx());
        self.with_exit(instr::descriptor_node(move |me| {
            interrupt_as_node(ctx, me.id)
        }))
    }

    /// Interrupt the fiber on behalf of `by` and wait for its exit.
    pub fn interrupt_as<R, E2>(&self, by: FiberId) -> Effect<R, E2, Exit<E, A>>
    where
        R: Send + Sync + 'static,
        E2: Clone + Send + Sync + 'static,
    {
        let ctx = Arc::clone(self.inner.ctx());
        self.with_exit(instr::suspend_node(move || interrupt_as_node(ctx, by)))
    }

    /// Request interruption without waiting.
    pub fn interrupt_fork<R, E2>(&self) -> Effect<R, E2, ()>
    where
        R: Send + Sync + 'static,
        E2: Clone + Send + Sync + 'static,
    {
        self.inner.interrupt_fork()
    }

    /// Merge the fiber's final fiber-ref values into the calling fiber.
    /// Does nothing if the fiber has not finished.
    pub fn inherit_refs<R, E2>(&self) -> Effect<R, E2, ()>
    where
        R: Send + Sync + 'static,
        E2: Clone + Send + Sync + 'static,
    {
        Effect::from_node(fiber_ref::inherit_refs_node(Arc::clone(self.inner.ctx())))
    }

    /// A handle whose value is transformed by `f`.
    pub fn map<B, F>(self, f: F) -> Fiber<E, B>
    where
        B: Send + 'static,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        let extract = self.extract;
        Fiber {
            inner: self.inner,
            extract: Arc::new(move |value: &AnyValue| extract(value).map(&f)),
            _marker: std::marker::PhantomData,
        }
    }

    fn typed(&self, exit: SharedExit) -> Exit<E, A> {
        match exit {
            Exit::Success(value) => match (self.extract)(&value) {
                Ok(a) => Exit::Success(a),
                Err(cause) => Exit::Failure(unerase_cause(cause)),
            },
            Exit::Failure(cause) => Exit::Failure(unerase_cause::<E>(cause)),
        }
    }

    fn with_exit<R, E2>(&self, node: Node) -> Effect<R, E2, Exit<E, A>>
    where
        R: Send + Sync + 'static,
        E2: Clone + Send + Sync + 'static,
    {
        let this = self.clone();
        Effect::from_node(flat_map_node(node, move |value| {
            match unerase_value::<SharedExit>(value) {
                Ok(exit) => succeed_node(this.typed(exit)),
                Err(cause) => fail_node(cause),
            }
        }))
    }
}
