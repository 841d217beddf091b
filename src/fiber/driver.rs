//! The fiber interpreter.
//!
//! Each fiber is one tokio task. The task alternates between a synchronous
//! trampoline ([`Runner::evaluate`]), which walks the instruction tree with
//! an explicit continuation stack, and short asynchronous waits when the tree
//! reaches an `Async` instruction or the fiber has used up its instruction
//! budget and yields to the scheduler.

use std::mem;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::Instrument;

use super::context::FiberContext;
use super::fiber_ref::{fork_refs, inherit_refs_node, FiberRefs};
use super::{await_node, FiberDescriptor, FiberId, FiberStatus, InterruptStatus, RuntimeFiber};
use crate::cause::{Cause, Defect};
use crate::effect::instr::{
    self, fail_node, flat_map_node, fold_node, unerase_value, AnyEnv, AnyValue, AsyncStart, Cont,
    ErasedCause, FailCont, Instr, Node, RaceInstr, Resumer, SharedExit, Value,
};
use crate::exit::Exit;
use crate::refs::lock;
use crate::runtime::{FailureReporter, RuntimeShared};
use crate::scope::{Resolved, Scope};
use crate::supervisor::Supervisor;

enum Step {
    Run(Node),
    Value(Value),
    Fail(ErasedCause),
}

enum Frame {
    Apply(Cont),
    Fold(FailCont, Cont),
    PopInterrupt(bool),
    PopEnv(AnyEnv),
    PopSupervisor(Supervisor),
    PopForkScope(Option<Scope>),
}

enum Control {
    Suspend {
        rx: oneshot::Receiver<Node>,
        canceler: Option<Node>,
    },
    Yield(Step),
    Done(SharedExit),
}

enum Wake {
    Resumed(Option<Node>),
    Signal,
}

pub(crate) struct Runner {
    ctx: Arc<FiberContext>,
    stack: Vec<Frame>,
    env: AnyEnv,
    interruptible: bool,
    /// The interruption delivered so far. Once set, the fiber cannot resume
    /// normal work in an interruptible region: handlers there are skipped and
    /// any interruptible step fails with it again.
    interrupted: Option<ErasedCause>,
    supervisor: Supervisor,
    fork_scope: Option<Scope>,
    refs: FiberRefs,
    /// The fiber's own exit, kept while its children are shut down.
    finishing: Option<SharedExit>,
    ops: u32,
}

/// Start a fiber that belongs to nobody. It starts uninterruptible; the
/// caller marks the part of `node` that may be interrupted.
pub(crate) fn spawn_root(runtime: Arc<RuntimeShared>, node: Node, env: AnyEnv) -> Arc<FiberContext> {
    let reporter = Arc::clone(&runtime.config.failure_reporter);
    let ctx = FiberContext::new(
        FiberId::next(),
        Vec::new(),
        None,
        runtime,
        reporter,
        Supervisor::none(),
    );
    Runner::start(
        Arc::clone(&ctx),
        node,
        env,
        false,
        Supervisor::none(),
        FiberRefs::new(),
    );
    ctx
}

impl Runner {
    fn start(
        ctx: Arc<FiberContext>,
        node: Node,
        env: AnyEnv,
        interruptible: bool,
        supervisor: Supervisor,
        refs: FiberRefs,
    ) {
        let handle = ctx.runtime.handle.clone();
        let spans = ctx.runtime.config.fiber_spans;
        let id = ctx.id;
        let runner = Runner {
            ctx,
            stack: Vec::new(),
            env,
            interruptible,
            interrupted: None,
            supervisor,
            fork_scope: None,
            refs,
            finishing: None,
            ops: 0,
        };
        if spans {
            let span = tracing::debug_span!("fiber", id = %id);
            handle.spawn(runner.run(node).instrument(span));
        } else {
            handle.spawn(runner.run(node));
        }
    }

    async fn run(mut self, node: Node) {
        tracing::trace!(fiber = %self.ctx.id, "fiber started");
        let mut step = Step::Run(node);
        loop {
            match self.evaluate(step) {
                Control::Done(exit) => {
                    let refs = mem::take(&mut self.refs);
                    self.ctx.complete(exit, refs);
                    return;
                }
                Control::Yield(next) => {
                    tokio::task::yield_now().await;
                    step = next;
                }
                Control::Suspend { rx, canceler } => {
                    step = self.suspend(rx, canceler).await;
                }
            }
        }
    }

    /// Run the trampoline until the fiber finishes, suspends or yields. A
    /// panic in user code fails the fiber with a defect; the stack is then
    /// unwound like for any other failure so finalizers still run.
    fn evaluate(&mut self, mut step: Step) -> Control {
        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| self.run_loop(step))) {
                Ok(control) => return control,
                Err(payload) => {
                    let defect = Defect::from_panic(payload);
                    tracing::debug!(fiber = %self.ctx.id, %defect, "panic converted to defect");
                    self.ctx.set_status(FiberStatus::Running);
                    step = Step::Fail(Cause::die(defect));
                }
            }
        }
    }

    fn run_loop(&mut self, mut step: Step) -> Control {
        let budget = self.ctx.runtime.config.yield_op_count;
        loop {
            if self.interruptible {
                step = self.deliver_interrupt(step);
            }

            self.ops += 1;
            if self.ops >= budget {
                self.ops = 0;
                return Control::Yield(step);
            }

            let next = match step {
                Step::Value(value) => match self.stack.pop() {
                    Some(frame) => ControlFlow::Continue(self.apply(frame, value)),
                    None => self.finish(success_exit(value)),
                },
                Step::Fail(cause) => self.unwind(cause),
                Step::Run(node) => self.step(node),
            };
            step = match next {
                ControlFlow::Continue(step) => step,
                ControlFlow::Break(control) => return control,
            };
        }
    }

    fn apply(&mut self, frame: Frame, value: Value) -> Step {
        match frame {
            Frame::Apply(k) | Frame::Fold(_, k) => Step::Run(k(value)),
            Frame::PopInterrupt(previous) => {
                self.set_interruptible(previous);
                Step::Value(value)
            }
            Frame::PopEnv(env) => {
                self.env = env;
                Step::Value(value)
            }
            Frame::PopSupervisor(supervisor) => {
                self.supervisor = supervisor;
                Step::Value(value)
            }
            Frame::PopForkScope(scope) => {
                self.fork_scope = scope;
                Step::Value(value)
            }
        }
    }

    /// Pop frames until a failure handler is found, restoring the regions
    /// (interruptibility, environment, ...) being left on the way.
    fn unwind(&mut self, cause: ErasedCause) -> ControlFlow<Control, Step> {
        loop {
            match self.stack.pop() {
                None => return self.finish(Exit::Failure(cause)),
                Some(Frame::Apply(_)) => {}
                Some(Frame::Fold(on_failure, _)) => {
                    if self.interruptible && self.interrupted.is_some() {
                        continue;
                    }
                    return ControlFlow::Continue(Step::Run(on_failure(cause)));
                }
                Some(Frame::PopInterrupt(previous)) => self.set_interruptible(previous),
                Some(Frame::PopEnv(env)) => self.env = env,
                Some(Frame::PopSupervisor(supervisor)) => self.supervisor = supervisor,
                Some(Frame::PopForkScope(scope)) => self.fork_scope = scope,
            }
        }
    }

    /// The stack is empty. Children still alive are interrupted and awaited
    /// before the fiber reports its exit.
    fn finish(&mut self, exit: SharedExit) -> ControlFlow<Control, Step> {
        if let Some(own) = self.finishing.take() {
            return ControlFlow::Break(Control::Done(own));
        }
        let children = self.ctx.close();
        if children.is_empty() {
            return ControlFlow::Break(Control::Done(exit));
        }
        tracing::trace!(
            fiber = %self.ctx.id,
            children = children.len(),
            "interrupting children before exit"
        );
        self.finishing = Some(exit);
        self.set_interruptible(false);
        ControlFlow::Continue(Step::Run(interrupt_all_node(self.ctx.id, children)))
    }

    fn step(&mut self, node: Node) -> ControlFlow<Control, Step> {
        let next = match *node {
            Instr::Succeed(value) => Step::Value(value),
            Instr::Total(f) => Step::Value(f()),
            Instr::Partial(f) => match f() {
                Ok(value) => Step::Value(value),
                Err(error) => Step::Fail(Cause::fail(error)),
            },
            Instr::Fail(cause) => Step::Fail(cause),
            Instr::FlatMap(inner, k) => match *inner {
                Instr::Succeed(value) => Step::Run(k(value)),
                Instr::Total(f) => Step::Run(k(f())),
                _ => {
                    self.stack.push(Frame::Apply(k));
                    Step::Run(inner)
                }
            },
            Instr::Fold(inner, on_failure, on_success) => {
                self.stack.push(Frame::Fold(on_failure, on_success));
                Step::Run(inner)
            }
            Instr::Async(register, blocking_on) => {
                let (tx, rx) = oneshot::channel();
                self.ctx.set_status(FiberStatus::Suspended {
                    interruptible: self.interruptible,
                    blocking_on,
                });
                match register(Resumer::new(tx)) {
                    AsyncStart::Now(next) => {
                        self.ctx.set_status(FiberStatus::Running);
                        Step::Run(next)
                    }
                    AsyncStart::Pending => {
                        return ControlFlow::Break(Control::Suspend { rx, canceler: None })
                    }
                    AsyncStart::PendingWithCanceler(canceler) => {
                        return ControlFlow::Break(Control::Suspend {
                            rx,
                            canceler: Some(canceler),
                        })
                    }
                }
            }
            Instr::Fork(child, scope, reporter) => {
                Step::Value(Box::new(self.fork(child, scope, reporter)))
            }
            Instr::Race(race) => Step::Run(race_node(race)),
            Instr::Read(f) => Step::Run(f(Arc::clone(&self.env))),
            Instr::Give(inner, env) => {
                let previous = mem::replace(&mut self.env, env);
                self.stack.push(Frame::PopEnv(previous));
                Step::Run(inner)
            }
            Instr::Suspend(f) => Step::Run(f()),
            Instr::SetInterrupt(inner, interruptible) => {
                self.stack.push(Frame::PopInterrupt(self.interruptible));
                self.set_interruptible(interruptible);
                Step::Run(inner)
            }
            Instr::GetInterrupt(f) => Step::Run(f(self.interruptible)),
            Instr::CheckDescriptor(f) => Step::Run(f(self.descriptor())),
            Instr::Supervise(inner, supervisor) => {
                let previous = mem::replace(&mut self.supervisor, supervisor);
                self.stack.push(Frame::PopSupervisor(previous));
                Step::Run(inner)
            }
            Instr::GetForkScope(f) => Step::Run(f(self.current_fork_scope())),
            Instr::OverrideForkScope(inner, scope) => {
                let previous = mem::replace(&mut self.fork_scope, scope);
                self.stack.push(Frame::PopForkScope(previous));
                Step::Run(inner)
            }
            Instr::NewFiberRef(meta) => {
                let initial = meta.initial();
                self.refs.insert(meta.key(), (meta, initial));
                Step::Value(Box::new(()))
            }
            Instr::ModifyFiberRef(meta, f) => {
                let current = match self.refs.get(&meta.key()) {
                    Some((_, value)) => Arc::clone(value),
                    None => meta.initial(),
                };
                match f(current) {
                    Ok((result, next)) => {
                        self.refs.insert(meta.key(), (meta, next));
                        Step::Value(result)
                    }
                    Err(defect) => Step::Fail(Cause::die(defect)),
                }
            }
            Instr::Yield => {
                self.ops = 0;
                return ControlFlow::Break(Control::Yield(Step::Value(Box::new(()))));
            }
        };
        ControlFlow::Continue(next)
    }

    fn fork(
        &mut self,
        node: Node,
        scope: Option<Scope>,
        reporter: Option<FailureReporter>,
    ) -> RuntimeFiber {
        let resolved = scope
            .unwrap_or_else(|| self.current_fork_scope())
            .resolve();
        let owner = match &resolved {
            Resolved::Open(parent) => Some(Arc::downgrade(parent)),
            _ => None,
        };
        let mut ancestors = self.ctx.ancestors.clone();
        ancestors.push(self.ctx.id);
        let reporter =
            reporter.unwrap_or_else(|| Arc::clone(&self.ctx.runtime.config.failure_reporter));

        let child = FiberContext::new(
            FiberId::next(),
            ancestors,
            owner,
            Arc::clone(&self.ctx.runtime),
            reporter,
            self.supervisor.clone(),
        );
        let fiber = RuntimeFiber::new(Arc::clone(&child));
        self.supervisor.start(&fiber, Some(self.ctx.id));

        match resolved {
            Resolved::Global => {}
            Resolved::Open(parent) => {
                if !parent.add_child(&child) {
                    child.request_interrupt(parent.id);
                }
            }
            Resolved::Closed(owner) => child.request_interrupt(owner),
        }
        tracing::trace!(parent = %self.ctx.id, child = %child.id, "fiber forked");

        Runner::start(
            child,
            node,
            Arc::clone(&self.env),
            self.interruptible,
            self.supervisor.clone(),
            fork_refs(&self.refs),
        );
        fiber
    }

    async fn suspend(&mut self, mut rx: oneshot::Receiver<Node>, mut canceler: Option<Node>) -> Step {
        let ctx = Arc::clone(&self.ctx);
        loop {
            if let Some(step) = self.interrupt_suspended(&mut canceler) {
                return step;
            }
            let wake = if self.interruptible {
                tokio::select! {
                    resumed = &mut rx => Wake::Resumed(resumed.ok()),
                    _ = ctx.interrupt_signal.notified() => Wake::Signal,
                }
            } else {
                Wake::Resumed((&mut rx).await.ok())
            };
            match wake {
                Wake::Resumed(Some(node)) => {
                    self.ctx.set_status(FiberStatus::Running);
                    return Step::Run(node);
                }
                // The callback was dropped without resuming: only an
                // interruption can wake this fiber now.
                Wake::Resumed(None) => return self.park(canceler).await,
                Wake::Signal => {}
            }
        }
    }

    async fn park(&mut self, mut canceler: Option<Node>) -> Step {
        let ctx = Arc::clone(&self.ctx);
        loop {
            if let Some(step) = self.interrupt_suspended(&mut canceler) {
                return step;
            }
            if self.interruptible {
                ctx.interrupt_signal.notified().await;
            } else {
                std::future::pending::<()>().await;
            }
        }
    }

    fn interrupt_suspended(&mut self, canceler: &mut Option<Node>) -> Option<Step> {
        if !self.interruptible {
            return None;
        }
        let cause = self.ctx.take_pending_interrupt()?;
        let cause = self.record_interrupt(cause);
        self.ctx.set_status(FiberStatus::Running);
        Some(match canceler.take() {
            Some(canceler) => {
                let first = cause.clone();
                // The canceler itself must not be cut short by the
                // interruption it is handling.
                self.stack.push(Frame::PopInterrupt(self.interruptible));
                self.set_interruptible(false);
                Step::Run(fold_node(
                    canceler,
                    move |later| fail_node(first.then(later)),
                    move |_| fail_node(cause),
                ))
            }
            None => Step::Fail(cause),
        })
    }

    /// Fail `step` with the fiber's interruption, if it has one. A new
    /// request joins the cause being propagated; a fiber that was already
    /// interrupted and got back to normal work fails again.
    fn deliver_interrupt(&mut self, step: Step) -> Step {
        let fresh = if self.ctx.has_pending_interrupt() {
            self.ctx.take_pending_interrupt()
        } else {
            None
        };
        match (fresh, step) {
            (Some(cause), Step::Fail(earlier)) => {
                let cause = self.record_interrupt(cause);
                Step::Fail(earlier.then(cause))
            }
            (Some(cause), _) => Step::Fail(self.record_interrupt(cause)),
            (None, Step::Fail(earlier)) => Step::Fail(earlier),
            (None, step) => match &self.interrupted {
                Some(cause) => {
                    tracing::trace!(fiber = %self.ctx.id, "interruption raised again");
                    Step::Fail(cause.clone())
                }
                None => step,
            },
        }
    }

    /// Remember a newly delivered interruption and return its cause.
    fn record_interrupt(&mut self, cause: ErasedCause) -> ErasedCause {
        self.interrupted = Some(match self.interrupted.take() {
            Some(earlier) => earlier.both(cause.clone()),
            None => cause.clone(),
        });
        cause
    }

    fn set_interruptible(&mut self, interruptible: bool) {
        self.interruptible = interruptible;
    }

    fn current_fork_scope(&self) -> Scope {
        self.fork_scope
            .clone()
            .unwrap_or_else(|| Scope::local(&self.ctx))
    }

    fn descriptor(&self) -> FiberDescriptor {
        FiberDescriptor {
            id: self.ctx.id,
            status: self.ctx.status(),
            interrupt_status: InterruptStatus::from_bool(self.interruptible),
            interruptors: self.ctx.interruptors(),
            scope: self.current_fork_scope(),
            children: self
                .ctx
                .children()
                .into_iter()
                .map(RuntimeFiber::new)
                .collect(),
        }
    }
}

fn success_exit(value: Value) -> SharedExit {
    match unerase_value::<AnyValue>(value) {
        Ok(value) => Exit::Success(value),
        Err(cause) => Exit::Failure(cause),
    }
}

fn interrupt_all_node(by: FiberId, children: Vec<Arc<FiberContext>>) -> Node {
    for child in &children {
        child.request_interrupt(by);
    }
    children
        .into_iter()
        .rev()
        .fold(instr::unit_node(), |next, child| {
            flat_map_node(await_node(&child), move |_| next)
        })
}

type Contenders = (
    Box<dyn FnOnce(SharedExit, RuntimeFiber) -> Node + Send>,
    Box<dyn FnOnce(SharedExit, RuntimeFiber) -> Node + Send>,
    Resumer,
);

/// Fork both sides, then resume with the continuation of whichever side
/// completes first, after merging the winner's fiber refs. The loser keeps
/// running.
fn race_node(race: RaceInstr) -> Node {
    let RaceInstr {
        left,
        right,
        left_wins,
        right_wins,
        scope,
    } = race;
    let right_scope = scope.clone();
    flat_map_node(Box::new(Instr::Fork(left, scope, None)), move |l| {
        flat_map_node(Box::new(Instr::Fork(right, right_scope, None)), move |r| {
            match (
                unerase_value::<RuntimeFiber>(l),
                unerase_value::<RuntimeFiber>(r),
            ) {
                (Ok(l), Ok(r)) => arbitrate(l, r, left_wins, right_wins),
                (Err(cause), _) | (_, Err(cause)) => fail_node(cause),
            }
        })
    })
}

fn arbitrate(
    left: RuntimeFiber,
    right: RuntimeFiber,
    left_wins: Box<dyn FnOnce(SharedExit, RuntimeFiber) -> Node + Send>,
    right_wins: Box<dyn FnOnce(SharedExit, RuntimeFiber) -> Node + Send>,
) -> Node {
    let blocking_on = vec![left.id(), right.id()];
    Box::new(Instr::Async(
        Box::new(move |resumer: Resumer| {
            let slot: Arc<Mutex<Option<Contenders>>> =
                Arc::new(Mutex::new(Some((left_wins, right_wins, resumer))));

            let left_slot = Arc::clone(&slot);
            let (winner, loser) = (Arc::clone(left.ctx()), right.clone());
            left.ctx().observe(Box::new(move |exit: SharedExit| {
                let taken = lock(&left_slot).take();
                if let Some((wins, _, resumer)) = taken {
                    resumer.resume(flat_map_node(inherit_refs_node(winner), move |_| {
                        wins(exit, loser)
                    }));
                }
            }));

            let (winner, loser) = (Arc::clone(right.ctx()), left.clone());
            right.ctx().observe(Box::new(move |exit: SharedExit| {
                let taken = lock(&slot).take();
                if let Some((_, wins, resumer)) = taken {
                    resumer.resume(flat_map_node(inherit_refs_node(winner), move |_| {
                        wins(exit, loser)
                    }));
                }
            }));

            AsyncStart::PendingWithCanceler(interrupt_both_node(left, right))
        }),
        blocking_on,
    ))
}

fn interrupt_both_node(left: RuntimeFiber, right: RuntimeFiber) -> Node {
    instr::descriptor_node(move |me| {
        left.ctx().request_interrupt(me.id);
        right.ctx().request_interrupt(me.id);
        flat_map_node(await_node(left.ctx()), move |_| await_node(right.ctx()))
    })
}
