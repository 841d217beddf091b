//! State shared between a running fiber and every handle to it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{oneshot, Notify};

use super::fiber_ref::FiberRefs;
use super::{FiberId, FiberStatus};
use crate::cause::{Cause, Defect};
use crate::effect::instr::{ErasedCause, SharedExit};
use crate::exit::Exit;
use crate::refs::lock;
use crate::runtime::{FailureReporter, RuntimeShared};
use crate::supervisor::Supervisor;

type Observer = Box<dyn FnOnce(SharedExit) + Send>;

struct FiberState {
    status: FiberStatus,
    pending_interrupt: Option<ErasedCause>,
    interruptors: BTreeSet<FiberId>,
    exit: Option<SharedExit>,
    observers: Vec<Observer>,
    children: BTreeMap<FiberId, Weak<FiberContext>>,
    final_refs: FiberRefs,
    closed: bool,
}

pub(crate) struct FiberContext {
    pub(crate) id: FiberId,
    /// The forking fiber, its forking fiber, and so on up to the root.
    pub(crate) ancestors: Vec<FiberId>,
    owner: Option<Weak<FiberContext>>,
    pub(crate) runtime: Arc<RuntimeShared>,
    reporter: FailureReporter,
    supervisor: Supervisor,
    pub(crate) interrupt_signal: Notify,
    /// Mirrors `pending_interrupt.is_some()` for the per-instruction check.
    interrupt_pending: AtomicBool,
    state: Mutex<FiberState>,
}

impl FiberContext {
    pub(crate) fn new(
        id: FiberId,
        ancestors: Vec<FiberId>,
        owner: Option<Weak<FiberContext>>,
        runtime: Arc<RuntimeShared>,
        reporter: FailureReporter,
        supervisor: Supervisor,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            ancestors,
            owner,
            runtime,
            reporter,
            supervisor,
            interrupt_signal: Notify::new(),
            interrupt_pending: AtomicBool::new(false),
            state: Mutex::new(FiberState {
                status: FiberStatus::Running,
                pending_interrupt: None,
                interruptors: BTreeSet::new(),
                exit: None,
                observers: Vec::new(),
                children: BTreeMap::new(),
                final_refs: FiberRefs::new(),
                closed: false,
            }),
        })
    }

    pub(crate) fn status(&self) -> FiberStatus {
        lock(&self.state).status.clone()
    }

    pub(crate) fn set_status(&self, status: FiberStatus) {
        let mut state = lock(&self.state);
        if !matches!(state.status, FiberStatus::Done) {
            state.status = status;
        }
    }

    pub(crate) fn interruptors(&self) -> BTreeSet<FiberId> {
        lock(&self.state).interruptors.clone()
    }

    pub(crate) fn poll(&self) -> Option<SharedExit> {
        lock(&self.state).exit.clone()
    }

    /// Run `observer` with the exit once the fiber is done, immediately if it
    /// already is.
    pub(crate) fn observe(&self, observer: Observer) {
        let exit = {
            let mut state = lock(&self.state);
            if let Some(exit) = state.exit.clone() {
                exit
            } else {
                state.observers.push(observer);
                return;
            }
        };
        observer(exit);
    }

    /// Wait for the fiber to finish, from outside the runtime.
    pub(crate) async fn wait_done(&self) -> SharedExit {
        let (tx, rx) = oneshot::channel();
        self.observe(Box::new(move |exit: SharedExit| {
            let _ = tx.send(exit);
        }));
        rx.await.unwrap_or_else(|_| {
            Exit::die(Defect::from_message("fiber dropped without completing"))
        })
    }

    /// Ask the fiber to stop. Requests accumulate; the fiber sees all of them
    /// at its next interruptible safe point.
    pub(crate) fn request_interrupt(&self, by: FiberId) {
        {
            let mut state = lock(&self.state);
            if state.exit.is_some() {
                return;
            }
            state.interruptors.insert(by);
            let cause = Cause::interrupt(by);
            state.pending_interrupt = Some(match state.pending_interrupt.take() {
                Some(previous) => previous.both(cause),
                None => cause,
            });
            self.interrupt_pending.store(true, Ordering::Release);
        }
        tracing::trace!(fiber = %self.id, by = %by, "interrupt requested");
        self.interrupt_signal.notify_one();
    }

    pub(crate) fn has_pending_interrupt(&self) -> bool {
        self.interrupt_pending.load(Ordering::Acquire)
    }

    pub(crate) fn take_pending_interrupt(&self) -> Option<ErasedCause> {
        let mut state = lock(&self.state);
        self.interrupt_pending.store(false, Ordering::Release);
        state.pending_interrupt.take()
    }

    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Register a child. Fails once the fiber has started shutting down.
    pub(crate) fn add_child(&self, child: &Arc<FiberContext>) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        state.children.insert(child.id, Arc::downgrade(child));
        true
    }

    fn remove_child(&self, id: FiberId) {
        lock(&self.state).children.remove(&id);
    }

    pub(crate) fn children(&self) -> Vec<Arc<FiberContext>> {
        lock(&self.state)
            .children
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Stop accepting children and return the ones still alive.
    pub(crate) fn close(&self) -> Vec<Arc<FiberContext>> {
        let mut state = lock(&self.state);
        state.closed = true;
        state.children.values().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn final_refs(&self) -> FiberRefs {
        lock(&self.state).final_refs.clone()
    }

    /// Record the exit and notify everyone waiting on it. Only the first
    /// call has any effect.
    pub(crate) fn complete(&self, exit: SharedExit, refs: FiberRefs) {
        let observers = {
            let mut state = lock(&self.state);
            if state.exit.is_some() {
                return;
            }
            state.exit = Some(exit.clone());
            state.status = FiberStatus::Done;
            state.closed = true;
            state.pending_interrupt = None;
            self.interrupt_pending.store(false, Ordering::Release);
            state.final_refs = refs;
            state.children.clear();
            std::mem::take(&mut state.observers)
        };

        if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
            owner.remove_child(self.id);
        }
        self.supervisor.end(self.id, &exit);

        match &exit {
            Exit::Success(_) => tracing::trace!(fiber = %self.id, "fiber done"),
            Exit::Failure(cause) => {
                tracing::debug!(fiber = %self.id, "fiber failed");
                if is_reportable(cause, self.id, &self.ancestors) {
                    (self.reporter)(self.id, cause);
                }
            }
        }

        for observer in observers {
            observer(exit.clone());
        }
    }
}

/// Whether a failure is worth surfacing: it holds a defect, or an
/// interruption requested by a fiber outside this fiber's lineage.
pub(crate) fn is_reportable<E>(cause: &Cause<E>, id: FiberId, ancestors: &[FiberId]) -> bool {
    cause.is_die()
        || cause
            .interruptors()
            .iter()
            .any(|by| !by.is_none() && *by != id && !ancestors.contains(by))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_by_ancestor_is_not_reported() {
        let root = FiberId::from_parts(1, 0);
        let child = FiberId::from_parts(2, 0);
        let cause: Cause<()> = Cause::interrupt(root);
        assert!(!is_reportable(&cause, child, &[root]));
    }

    #[test]
    fn test_foreign_interrupt_is_reported() {
        let sibling = FiberId::from_parts(7, 0);
        let child = FiberId::from_parts(2, 0);
        let cause: Cause<()> = Cause::interrupt(sibling);
        assert!(is_reportable(&cause, child, &[FiberId::from_parts(1, 0)]));
    }

    #[test]
    fn test_typed_failure_alone_is_not_reported() {
        let cause = Cause::fail("expected");
        assert!(!is_reportable(&cause, FiberId::from_parts(2, 0), &[]));
        let cause = cause.then(Cause::die(Defect::from_message("bad")));
        assert!(is_reportable(&cause, FiberId::from_parts(2, 0), &[]));
    }
}
