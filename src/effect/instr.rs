//! The type-erased instruction tree interpreted by fibers.
//!
//! [`Effect`](super::Effect) is a typed facade over [`Node`]. Values travel
//! through the tree as `Box<dyn Any + Send>`; typed failures are wrapped in
//! [`AnyError`]. The facade is the only place that erases or recovers types,
//! so a failed downcast can only come from a bug in this crate and is turned
//! into a defect rather than a panic.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::cause::{Cause, Defect};
use crate::exit::Exit;
use crate::fiber::fiber_ref::{FiberRefMeta, RefValue};
use crate::fiber::{FiberDescriptor, FiberId, RuntimeFiber};
use crate::runtime::FailureReporter;
use crate::scope::Scope;
use crate::supervisor::Supervisor;

pub(crate) type Value = Box<dyn Any + Send>;
pub(crate) type AnyEnv = Arc<dyn Any + Send + Sync>;
pub(crate) type Node = Box<Instr>;
pub(crate) type ErasedCause = Cause<AnyError>;

/// A shareable, type-erased success value.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// The exit handed to finalizers and supervisors: the outcome of the
/// guarded computation with its value erased.
pub type AnyExit = Exit<AnyError, ()>;

/// The exit of a fiber as seen by every observer, with its value erased.
pub type FiberExit = Exit<AnyError, AnyValue>;

pub(crate) type SharedExit = FiberExit;

pub(crate) type Cont = Box<dyn FnOnce(Value) -> Node + Send>;
pub(crate) type FailCont = Box<dyn FnOnce(ErasedCause) -> Node + Send>;
type WinCont = Box<dyn FnOnce(SharedExit, RuntimeFiber) -> Node + Send>;

/// A typed failure with its type erased.
///
/// Failure reporters and finalizers see causes over `AnyError`; use
/// [`AnyError::downcast_ref`] to recover the original error.
#[derive(Clone)]
pub struct AnyError {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl AnyError {
    pub(crate) fn new<E: Send + Sync + 'static>(error: E) -> Self {
        Self {
            value: Arc::new(error),
            type_name: type_name::<E>(),
        }
    }

    /// Borrow the error as `E`, if that is its type.
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.value.downcast_ref::<E>()
    }

    /// The name of the original error type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.type_name)
    }
}

/// How an `Async` registration started.
pub(crate) enum AsyncStart {
    /// The result was available synchronously.
    Now(Node),
    /// The resumer will be invoked later.
    Pending,
    /// Like `Pending`; the node runs if the fiber is interrupted while waiting.
    PendingWithCanceler(Node),
}

/// The callback half of an `Async` instruction.
pub(crate) struct Resumer {
    tx: oneshot::Sender<Node>,
}

impl Resumer {
    pub(crate) fn new(tx: oneshot::Sender<Node>) -> Self {
        Self { tx }
    }

    /// Continue the suspended fiber with `node`. Ignored if the fiber moved
    /// on (it was interrupted).
    pub(crate) fn resume(self, node: Node) {
        let _ = self.tx.send(node);
    }
}

pub(crate) struct RaceInstr {
    pub(crate) left: Node,
    pub(crate) right: Node,
    pub(crate) left_wins: WinCont,
    pub(crate) right_wins: WinCont,
    pub(crate) scope: Option<Scope>,
}

pub(crate) enum Instr {
    Succeed(Value),
    Total(Box<dyn FnOnce() -> Value + Send>),
    Partial(Box<dyn FnOnce() -> Result<Value, AnyError> + Send>),
    Fail(ErasedCause),
    FlatMap(Node, Cont),
    Fold(Node, FailCont, Cont),
    Async(Box<dyn FnOnce(Resumer) -> AsyncStart + Send>, Vec<FiberId>),
    Fork(Node, Option<Scope>, Option<FailureReporter>),
    Race(RaceInstr),
    Read(Box<dyn FnOnce(AnyEnv) -> Node + Send>),
    Give(Node, AnyEnv),
    Suspend(Box<dyn FnOnce() -> Node + Send>),
    SetInterrupt(Node, bool),
    GetInterrupt(Box<dyn FnOnce(bool) -> Node + Send>),
    CheckDescriptor(Box<dyn FnOnce(FiberDescriptor) -> Node + Send>),
    Supervise(Node, Supervisor),
    GetForkScope(Box<dyn FnOnce(Scope) -> Node + Send>),
    OverrideForkScope(Node, Option<Scope>),
    NewFiberRef(Arc<FiberRefMeta>),
    ModifyFiberRef(
        Arc<FiberRefMeta>,
        Box<dyn FnOnce(RefValue) -> Result<(Value, RefValue), Defect> + Send>,
    ),
    Yield,
}

pub(crate) fn succeed_node<A: Send + 'static>(value: A) -> Node {
    Box::new(Instr::Succeed(Box::new(value)))
}

pub(crate) fn unit_node() -> Node {
    succeed_node(())
}

pub(crate) fn fail_node(cause: ErasedCause) -> Node {
    Box::new(Instr::Fail(cause))
}

pub(crate) fn total_node<F>(f: F) -> Node
where
    F: FnOnce() -> Value + Send + 'static,
{
    Box::new(Instr::Total(Box::new(f)))
}

pub(crate) fn flat_map_node<F>(node: Node, k: F) -> Node
where
    F: FnOnce(Value) -> Node + Send + 'static,
{
    Box::new(Instr::FlatMap(node, Box::new(k)))
}

pub(crate) fn fold_node<F, G>(node: Node, on_failure: F, on_success: G) -> Node
where
    F: FnOnce(ErasedCause) -> Node + Send + 'static,
    G: FnOnce(Value) -> Node + Send + 'static,
{
    Box::new(Instr::Fold(node, Box::new(on_failure), Box::new(on_success)))
}

pub(crate) fn suspend_node<F>(f: F) -> Node
where
    F: FnOnce() -> Node + Send + 'static,
{
    Box::new(Instr::Suspend(Box::new(f)))
}

pub(crate) fn uninterruptible_node(node: Node) -> Node {
    Box::new(Instr::SetInterrupt(node, false))
}

pub(crate) fn descriptor_node<F>(f: F) -> Node
where
    F: FnOnce(FiberDescriptor) -> Node + Send + 'static,
{
    Box::new(Instr::CheckDescriptor(Box::new(f)))
}

pub(crate) fn erase_cause<E: Send + Sync + 'static>(cause: Cause<E>) -> ErasedCause {
    cause.map(AnyError::new)
}

pub(crate) fn unerase_cause<E: Clone + 'static>(cause: ErasedCause) -> Cause<E> {
    cause.flat_map(|error| match error.downcast_ref::<E>() {
        Some(e) => Cause::Fail(e.clone()),
        None => Cause::Die(mismatch::<E>(error.type_name())),
    })
}

pub(crate) fn unerase_value<A: 'static>(value: Value) -> Result<A, ErasedCause> {
    value
        .downcast::<A>()
        .map(|a| *a)
        .map_err(|_| Cause::Die(mismatch::<A>("another type")))
}

pub(crate) fn unerase_shared<A: Clone + 'static>(value: &AnyValue) -> Result<A, ErasedCause> {
    value
        .downcast_ref::<A>()
        .cloned()
        .ok_or_else(|| Cause::Die(mismatch::<A>("another type")))
}

pub(crate) fn unerase_exit<E, A>(exit: SharedExit) -> Exit<E, A>
where
    E: Clone + 'static,
    A: Clone + 'static,
{
    match exit {
        Exit::Success(value) => match unerase_shared::<A>(&value) {
            Ok(a) => Exit::Success(a),
            Err(cause) => Exit::Failure(unerase_cause(cause)),
        },
        Exit::Failure(cause) => Exit::Failure(unerase_cause(cause)),
    }
}

/// The erased view of an exit handed to finalizers.
pub(crate) fn erase_exit<E, A>(exit: &Exit<E, A>) -> AnyExit
where
    E: Clone + Send + Sync + 'static,
{
    match exit {
        Exit::Success(_) => Exit::Success(()),
        Exit::Failure(cause) => Exit::Failure(erase_cause(cause.clone())),
    }
}

pub(crate) fn mismatch<T>(found: &str) -> Defect {
    Defect::from_message(format!(
        "runtime type mismatch: expected {}, found {}",
        type_name::<T>(),
        found
    ))
}
