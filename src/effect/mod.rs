//! Effects: descriptions of computations run by fibers.
//!
//! An [`Effect<R, E, A>`] needs an environment `R`, may fail with `E`, and
//! succeeds with `A`. Building an effect does nothing; it only assembles an
//! instruction tree that a [`Runtime`](crate::Runtime) interprets on a fiber.
//!
//! # Failures
//!
//! Effects fail with a [`Cause`](crate::Cause), which distinguishes
//!
//! - typed failures (`E`), recoverable with [`catch_all`](Effect::catch_all),
//!   [`or_else`](Effect::or_else) and friends;
//! - defects, panics and other bugs, seen only by cause-aware combinators;
//! - interruption.
//!
//! ```rust
//! use undertow::{Effect, Runtime};
//!
//! let rt = Runtime::new().unwrap();
//!
//! let program = Effect::<(), String, i32>::fail("boom".to_string())
//!     .catch_all(|e| Effect::<_, String, _>::succeed(e.len() as i32))
//!     .map(|n| n * 2);
//!
//! assert_eq!(rt.block_on(program).unwrap(), 8);
//! ```
//!
//! # Resources
//!
//! [`bracket`](Effect::bracket) guarantees release once acquisition
//! succeeded, whether the use succeeds, fails or is interrupted:
//!
//! ```rust
//! use undertow::{Effect, Ref, Runtime};
//!
//! let rt = Runtime::new().unwrap();
//! let log = Ref::new(Vec::new());
//! let (during, after) = (log.clone(), log.clone());
//!
//! let program = Effect::<(), String, ()>::bracket(
//!     Effect::succeed("conn"),
//!     move |conn: &&'static str| {
//!         let conn = *conn;
//!         during.update(move |mut v: Vec<String>| { v.push(format!("use {}", conn)); v })
//!     },
//!     move |conn: &'static str| {
//!         after.update(move |mut v: Vec<String>| { v.push(format!("close {}", conn)); v })
//!     },
//! );
//!
//! rt.block_on(program).unwrap();
//! assert_eq!(log.get_now(), vec!["use conn", "close conn"]);
//! ```
//!
//! # Concurrency
//!
//! Forked fibers belong to the fiber that forked them and are interrupted
//! when it finishes:
//!
//! ```rust
//! use std::time::Duration;
//! use undertow::{Effect, Runtime};
//!
//! let rt = Runtime::new().unwrap();
//! let slow = Effect::<(), String, ()>::sleep(Duration::from_millis(200)).as_("slow");
//! let fast = Effect::succeed("fast");
//!
//! assert_eq!(rt.block_on(slow.race(fast)).unwrap(), "fast");
//! ```

mod bracket;
mod combinators;
mod concurrent;
mod constructors;
pub(crate) mod instr;
mod interrupt;

#[cfg(test)]
mod tests;

use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;

pub use constructors::Callback;
pub use interrupt::Restore;

use instr::Node;

/// A description of a computation that needs `R`, may fail with `E` and
/// succeeds with `A`.
///
/// Effects are single-use values: combinators consume them. Wrap
/// construction in a closure to run the same computation several times.
#[must_use = "effects do nothing unless run by a Runtime"]
pub struct Effect<R, E, A> {
    node: Node,
    _marker: PhantomData<fn(R) -> (E, A)>,
}

/// An effect that cannot fail and needs no environment.
pub type UIO<A> = Effect<(), Infallible, A>;

impl<R, E, A> Effect<R, E, A> {
    pub(crate) fn from_node(node: Node) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node {
        self.node
    }
}

impl<R, A> Effect<R, Infallible, A> {
    /// View an infallible effect as one failing with any `E`.
    pub fn widen_err<E>(self) -> Effect<R, E, A> {
        Effect::from_node(self.node)
    }
}

impl<R, E, A> fmt::Debug for Effect<R, E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect").finish_non_exhaustive()
    }
}
