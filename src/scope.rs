//! Where forked fibers are attached.
//!
//! A [`Scope`] decides which fiber, if any, a newly forked fiber belongs to.
//! The owner keeps only a weak reference to its children: it does not keep
//! them alive, it only interrupts the ones still running when it finishes.
//! Children remove themselves from their owner when they complete.
//!
//! - [`Scope::global`] detaches the child entirely (daemon fibers).
//! - A local scope, obtained from [`Effect::fork_scope`](crate::Effect::fork_scope),
//!   attaches the child to a specific fiber. Forking into the scope of a fiber
//!   that already finished interrupts the new child straight away.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::fiber::context::FiberContext;
use crate::fiber::FiberId;

/// An owner for forked fibers.
#[derive(Clone)]
pub struct Scope {
    kind: Kind,
}

#[derive(Clone)]
enum Kind {
    Global,
    Local {
        id: FiberId,
        fiber: Weak<FiberContext>,
    },
}

pub(crate) enum Resolved {
    Global,
    Open(Arc<FiberContext>),
    Closed(FiberId),
}

impl Scope {
    /// The scope of fibers that nobody owns.
    pub fn global() -> Self {
        Self { kind: Kind::Global }
    }

    pub(crate) fn local(fiber: &Arc<FiberContext>) -> Self {
        Self {
            kind: Kind::Local {
                id: fiber.id,
                fiber: Arc::downgrade(fiber),
            },
        }
    }

    /// Whether this is the global scope.
    pub fn is_global(&self) -> bool {
        matches!(self.kind, Kind::Global)
    }

    /// The fiber owning this scope, for a local scope.
    pub fn fiber_id(&self) -> Option<FiberId> {
        match &self.kind {
            Kind::Global => None,
            Kind::Local { id, .. } => Some(*id),
        }
    }

    /// Whether the owning fiber stopped accepting children. The global scope
    /// never closes.
    pub fn is_closed(&self) -> bool {
        matches!(self.resolve(), Resolved::Closed(_))
    }

    pub(crate) fn resolve(&self) -> Resolved {
        match &self.kind {
            Kind::Global => Resolved::Global,
            Kind::Local { id, fiber } => match fiber.upgrade() {
                Some(ctx) if !ctx.is_closed() => Resolved::Open(ctx),
                _ => Resolved::Closed(*id),
            },
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Global => f.write_str("Scope(global)"),
            Kind::Local { id, .. } => write!(f, "Scope({})", id),
        }
    }
}
