//! # Undertow
//!
//! A fiber runtime for algebraic effects on top of tokio.
//!
//! An [`Effect<R, E, A>`](Effect) is a description of a program that needs an
//! environment `R`, may fail with `E`, and produces an `A`. Nothing runs until
//! a [`Runtime`] interprets it on a fiber: a lightweight thread that can be
//! forked, joined, raced and interrupted. Failures are reported as a
//! [`Cause`], which keeps every failure that happened, including defects and
//! interruptions, and in what order.
//!
//! ## Quick Example
//!
//! ```rust
//! use std::time::Duration;
//! use undertow::{Effect, Runtime};
//!
//! let rt = Runtime::new().unwrap();
//!
//! let slow = Effect::<(), String, ()>::sleep(Duration::from_secs(10)).as_("slow");
//! let fast = Effect::<(), String, ()>::sleep(Duration::from_millis(5)).as_("fast");
//!
//! // The loser is interrupted, and its finalizers run, before race returns.
//! let winner = rt.block_on(slow.race(fast)).unwrap();
//! assert_eq!(winner, "fast");
//! ```
//!
//! ## Resources
//!
//! [`Effect::bracket_exit`] and [`Managed`] guarantee that whatever is
//! acquired is released exactly once, whether the program succeeds, fails,
//! panics or is interrupted.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cause;
pub mod effect;
pub mod either;
pub mod error;
pub mod exit;
pub mod fiber;
pub mod managed;
pub mod refs;
pub mod runtime;
pub mod scope;
pub mod supervisor;
pub mod testing;

// Re-exports
pub use cause::{Cause, Defect};
pub use effect::instr::{AnyError, AnyExit, AnyValue, FiberExit};
pub use effect::{Callback, Effect, Restore, UIO};
pub use either::Either;
pub use error::{CompositeDefect, FiberFailure, InterruptedError, TimeoutError};
pub use exit::Exit;
pub use fiber::{
    Fiber, FiberDescriptor, FiberId, FiberRef, FiberStatus, InterruptStatus, RuntimeFiber,
};
pub use managed::{ExecutionStrategy, Finalizer, Managed, ReleaseMap};
pub use refs::Ref;
pub use runtime::{FailureReporter, RootFiber, Runtime, RuntimeConfig};
pub use scope::Scope;
pub use supervisor::{Supervisor, SupervisorHooks, TrackingSupervisor};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cause::{Cause, Defect};
    pub use crate::effect::{Effect, UIO};
    pub use crate::either::Either;
    pub use crate::exit::Exit;
    pub use crate::fiber::{Fiber, FiberId, FiberRef};
    pub use crate::managed::Managed;
    pub use crate::refs::Ref;
    pub use crate::runtime::Runtime;
}
