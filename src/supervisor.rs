//! Observing fiber lifecycles.
//!
//! A [`Supervisor`] is installed for a region with
//! [`Effect::supervised`](crate::Effect::supervised); every fiber forked
//! inside that region (and, transitively, by those fibers) reports its start
//! and its end to it.
//!
//! ```rust
//! use undertow::{Effect, Runtime, Supervisor};
//!
//! let rt = Runtime::new().unwrap();
//! let tracker = Supervisor::track();
//!
//! let program = Effect::<(), String, ()>::never()
//!     .fork()
//!     .supervised(tracker.supervisor())
//!     .flat_map(move |_| tracker.fibers_effect());
//!
//! let live = rt.block_on(program).unwrap();
//! assert_eq!(live.len(), 1);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::effect::instr::{AnyExit, SharedExit};
use crate::effect::Effect;
use crate::fiber::{FiberId, RuntimeFiber};
use crate::refs::lock;

/// Callbacks invoked as supervised fibers start and end.
///
/// Both callbacks run synchronously on the runtime's worker threads and must
/// not block.
pub trait SupervisorHooks: Send + Sync {
    /// A fiber was forked by `parent`.
    fn on_start(&self, fiber: &RuntimeFiber, parent: Option<FiberId>) {
        let _ = (fiber, parent);
    }

    /// A fiber finished.
    fn on_end(&self, fiber: FiberId, exit: &AnyExit) {
        let _ = (fiber, exit);
    }
}

/// A lifecycle observer for fibers. Cheap to clone.
#[derive(Clone, Default)]
pub struct Supervisor {
    hooks: Option<Arc<dyn SupervisorHooks>>,
}

impl Supervisor {
    /// A supervisor that observes nothing.
    pub fn none() -> Self {
        Self { hooks: None }
    }

    /// Wrap custom hooks.
    pub fn new<H: SupervisorHooks + 'static>(hooks: H) -> Self {
        Self {
            hooks: Some(Arc::new(hooks)),
        }
    }

    /// A supervisor that records the fibers currently alive.
    pub fn track() -> TrackingSupervisor {
        TrackingSupervisor::default()
    }

    /// Notify both `self` and `other`, in that order.
    pub fn and(self, other: Supervisor) -> Supervisor {
        match (self.hooks, other.hooks) {
            (None, hooks) | (hooks, None) => Supervisor { hooks },
            (Some(first), Some(second)) => Supervisor::new(Both { first, second }),
        }
    }

    /// Whether this supervisor observes anything.
    pub fn is_none(&self) -> bool {
        self.hooks.is_none()
    }

    pub(crate) fn start(&self, fiber: &RuntimeFiber, parent: Option<FiberId>) {
        if let Some(hooks) = &self.hooks {
            hooks.on_start(fiber, parent);
        }
    }

    pub(crate) fn end(&self, fiber: FiberId, exit: &SharedExit) {
        if let Some(hooks) = &self.hooks {
            hooks.on_end(fiber, &exit.clone().as_unit());
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hooks.is_some() {
            f.write_str("Supervisor(..)")
        } else {
            f.write_str("Supervisor(none)")
        }
    }
}

struct Both {
    first: Arc<dyn SupervisorHooks>,
    second: Arc<dyn SupervisorHooks>,
}

impl SupervisorHooks for Both {
    fn on_start(&self, fiber: &RuntimeFiber, parent: Option<FiberId>) {
        self.first.on_start(fiber, parent);
        self.second.on_start(fiber, parent);
    }

    fn on_end(&self, fiber: FiberId, exit: &AnyExit) {
        self.first.on_end(fiber, exit);
        self.second.on_end(fiber, exit);
    }
}

/// Keeps a handle to every supervised fiber until it ends.
#[derive(Clone, Default)]
pub struct TrackingSupervisor {
    fibers: Arc<Mutex<BTreeMap<FiberId, RuntimeFiber>>>,
}

impl TrackingSupervisor {
    /// The supervisor to install with [`Effect::supervised`].
    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.clone())
    }

    /// The supervised fibers still running, oldest first.
    pub fn fibers(&self) -> Vec<RuntimeFiber> {
        lock(&self.fibers).values().cloned().collect()
    }

    /// [`fibers`](TrackingSupervisor::fibers) as an effect.
    pub fn fibers_effect<R, E>(&self) -> Effect<R, E, Vec<RuntimeFiber>>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let this = self.clone();
        Effect::total(move || this.fibers())
    }
}

impl SupervisorHooks for TrackingSupervisor {
    fn on_start(&self, fiber: &RuntimeFiber, _parent: Option<FiberId>) {
        lock(&self.fibers).insert(fiber.id(), fiber.clone());
    }

    fn on_end(&self, fiber: FiberId, _exit: &AnyExit) {
        lock(&self.fibers).remove(&fiber);
    }
}

impl fmt::Debug for TrackingSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingSupervisor")
            .field("live", &lock(&self.fibers).len())
            .finish()
    }
}
