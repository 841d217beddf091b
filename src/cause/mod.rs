//! The structured failure model.
//!
//! A [`Cause`] records *why* a fiber failed without losing information:
//! typed failures (`Fail`), defects (`Die`) and interruptions (`Interrupt`)
//! are leaves, and `Then`/`Both` record whether failures happened one after
//! another (an error, then a failing finalizer) or independently in
//! parallel (two forked fibers both failing).
//!
//! # Laws
//!
//! `Empty` is the identity of both [`Cause::then`] and [`Cause::both`], and
//! both are associative. `Both` is also commutative. Equality is semantic:
//! two causes are equal when they describe the same failures in the same
//! sequential order, however the tree happens to be nested.
//!
//! ```
//! use undertow::Cause;
//!
//! let a: Cause<&str> = Cause::fail("a");
//! let b = Cause::fail("b");
//! let c = Cause::fail("c");
//!
//! assert_eq!(Cause::empty().then(a.clone()), a);
//! assert_eq!(
//!     a.clone().then(b.clone()).then(c.clone()),
//!     a.clone().then(b.clone().then(c.clone()))
//! );
//! assert_eq!(a.clone().both(b.clone()), b.both(a));
//! ```

mod defect;
mod flatten;

use std::collections::BTreeSet;
use std::fmt;

use crate::either::Either;
use crate::error::{CompositeDefect, InterruptedError};
use crate::fiber::FiberId;

pub use defect::Defect;

/// A lossless description of how a computation failed.
///
/// Build causes with the smart constructors ([`Cause::then`],
/// [`Cause::both`]), which absorb `Empty`; the raw variants are public so
/// causes can be matched on.
#[derive(Clone, Debug)]
pub enum Cause<E> {
    /// No failure at all.
    Empty,
    /// An expected, typed failure.
    Fail(E),
    /// An unexpected defect.
    Die(Defect),
    /// Interruption requested by the given fiber.
    Interrupt(FiberId),
    /// The left cause happened, then the right one.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// Both causes happened independently, in parallel.
    Both(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    /// The empty cause.
    pub fn empty() -> Self {
        Cause::Empty
    }

    /// A typed failure.
    pub fn fail(error: E) -> Self {
        Cause::Fail(error)
    }

    /// A defect.
    pub fn die(defect: impl Into<Defect>) -> Self {
        Cause::Die(defect.into())
    }

    /// An interruption by `fiber`.
    pub fn interrupt(fiber: FiberId) -> Self {
        Cause::Interrupt(fiber)
    }

    /// Sequential composition: `self` happened, then `that`.
    pub fn then(self, that: Cause<E>) -> Cause<E> {
        match (self, that) {
            (Cause::Empty, right) => right,
            (left, Cause::Empty) => left,
            (left, right) => Cause::Then(Box::new(left), Box::new(right)),
        }
    }

    /// Parallel composition: `self` and `that` happened independently.
    pub fn both(self, that: Cause<E>) -> Cause<E> {
        match (self, that) {
            (Cause::Empty, right) => right,
            (left, Cause::Empty) => left,
            (left, right) => Cause::Both(Box::new(left), Box::new(right)),
        }
    }

    /// Every leaf of the tree, left to right. `Empty` leaves are skipped.
    pub fn leaves(&self) -> Vec<&Cause<E>> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(cause) = stack.pop() {
            match cause {
                Cause::Empty => {}
                Cause::Then(left, right) | Cause::Both(left, right) => {
                    stack.push(right);
                    stack.push(left);
                }
                leaf => out.push(leaf),
            }
        }
        out
    }

    fn into_leaves(self) -> Vec<Cause<E>> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(cause) = stack.pop() {
            match cause {
                Cause::Empty => {}
                Cause::Then(left, right) | Cause::Both(left, right) => {
                    stack.push(*right);
                    stack.push(*left);
                }
                leaf => out.push(leaf),
            }
        }
        out
    }

    /// True when the cause contains no failure of any kind.
    pub fn is_empty(&self) -> bool {
        self.leaves().is_empty()
    }

    /// True when the cause contains at least one typed failure.
    pub fn is_failure(&self) -> bool {
        self.leaves().iter().any(|c| matches!(c, Cause::Fail(_)))
    }

    /// True when the cause contains at least one defect.
    pub fn is_die(&self) -> bool {
        self.leaves().iter().any(|c| matches!(c, Cause::Die(_)))
    }

    /// True when the cause contains at least one interruption.
    pub fn is_interrupted(&self) -> bool {
        self.leaves().iter().any(|c| matches!(c, Cause::Interrupt(_)))
    }

    /// True when the cause is not empty and every leaf is an interruption.
    ///
    /// Such a cause describes cancellation rather than an error, and is
    /// usually not worth reporting.
    pub fn is_interrupted_only(&self) -> bool {
        let leaves = self.leaves();
        !leaves.is_empty() && leaves.iter().all(|c| matches!(c, Cause::Interrupt(_)))
    }

    /// The typed failures, in order.
    pub fn failures(&self) -> Vec<&E> {
        self.leaves()
            .into_iter()
            .filter_map(|c| match c {
                Cause::Fail(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// The defects, in order.
    pub fn defects(&self) -> Vec<&Defect> {
        self.leaves()
            .into_iter()
            .filter_map(|c| match c {
                Cause::Die(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// The set of fibers that interrupted this computation.
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        self.leaves()
            .into_iter()
            .filter_map(|c| match c {
                Cause::Interrupt(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// The first typed failure, if any.
    pub fn failure_option(&self) -> Option<&E> {
        self.failures().into_iter().next()
    }

    /// Split off the first typed failure.
    ///
    /// Returns `Left(e)` when the cause contains a typed failure (the first
    /// one wins), and hands the cause back as `Right` otherwise, so that
    /// defects and interruptions can be propagated untouched.
    ///
    /// ```
    /// use undertow::{Cause, Defect, Either};
    ///
    /// let cause = Cause::die(Defect::from_message("boom")).then(Cause::fail("first"));
    /// assert_eq!(cause.failure_or_cause().into_left(), Some("first"));
    ///
    /// let cause: Cause<&str> = Cause::die(Defect::from_message("boom"));
    /// assert!(cause.failure_or_cause().is_right());
    /// ```
    pub fn failure_or_cause(self) -> Either<E, Cause<E>> {
        if !self.is_failure() {
            return Either::Right(self);
        }
        self.into_leaves()
            .into_iter()
            .find_map(|c| match c {
                Cause::Fail(e) => Some(e),
                _ => None,
            })
            .map_or(Either::Right(Cause::Empty), Either::Left)
    }

    /// Transform every typed failure.
    pub fn map<E2, F>(self, mut f: F) -> Cause<E2>
    where
        F: FnMut(E) -> E2,
    {
        self.flat_map(|e| Cause::Fail(f(e)))
    }

    /// Replace every typed failure with a whole cause.
    pub fn flat_map<E2, F>(self, mut f: F) -> Cause<E2>
    where
        F: FnMut(E) -> Cause<E2>,
    {
        self.flat_map_inner(&mut f)
    }

    fn flat_map_inner<E2, F>(self, f: &mut F) -> Cause<E2>
    where
        F: FnMut(E) -> Cause<E2>,
    {
        match self {
            Cause::Empty => Cause::Empty,
            Cause::Fail(e) => f(e),
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt(id) => Cause::Interrupt(id),
            Cause::Then(left, right) => {
                let left = left.flat_map_inner(f);
                left.then(right.flat_map_inner(f))
            }
            Cause::Both(left, right) => {
                let left = left.flat_map_inner(f);
                left.both(right.flat_map_inner(f))
            }
        }
    }

    /// Drop every typed failure, keeping defects and interruptions.
    ///
    /// The result has no `Fail` leaves, so it can take any error type.
    pub fn strip_failures<E2>(self) -> Cause<E2> {
        self.flat_map(|_| Cause::Empty)
    }

    /// Visit every node of the tree (pre-order) and return the first value
    /// `f` extracts.
    pub fn find<Z, F>(&self, mut f: F) -> Option<Z>
    where
        F: FnMut(&Cause<E>) -> Option<Z>,
    {
        let mut stack = vec![self];
        while let Some(cause) = stack.pop() {
            if let Some(z) = f(cause) {
                return Some(z);
            }
            if let Cause::Then(left, right) | Cause::Both(left, right) = cause {
                stack.push(right);
                stack.push(left);
            }
        }
        None
    }

    /// Collapse the cause into a single defect, converting typed failures
    /// with `f`.
    ///
    /// A cause with exactly one failure or defect yields it unchanged.
    /// A pure interruption yields an [`InterruptedError`]. Anything richer
    /// becomes a [`CompositeDefect`] listing every failure in order.
    pub fn squash_with<F>(self, mut f: F) -> Defect
    where
        F: FnMut(E) -> Defect,
    {
        let interruptors = self.interruptors();
        let mut defects: Vec<Defect> = self
            .into_leaves()
            .into_iter()
            .filter_map(|c| match c {
                Cause::Fail(e) => Some(f(e)),
                Cause::Die(d) => Some(d),
                _ => None,
            })
            .collect();
        match defects.len() {
            0 if interruptors.is_empty() => Defect::from_message("empty cause"),
            0 => Defect::from_error(InterruptedError::new(interruptors)),
            1 => defects.remove(0),
            _ => Defect::from_error(CompositeDefect::new(defects)),
        }
    }

    /// [`squash_with`](Cause::squash_with), wrapping typed failures with
    /// [`Defect::new`].
    pub fn squash(self) -> Defect
    where
        E: fmt::Debug + Send + Sync + 'static,
    {
        self.squash_with(Defect::new)
    }

    /// A human-readable, indented rendering of the tree.
    pub fn pretty(&self) -> String
    where
        E: fmt::Debug,
    {
        let mut out = String::new();
        self.render(&mut out, 0);
        out
    }

    fn render(&self, out: &mut String, depth: usize)
    where
        E: fmt::Debug,
    {
        let pad = "  ".repeat(depth);
        match self {
            Cause::Empty => out.push_str(&format!("{pad}Empty\n")),
            Cause::Fail(e) => out.push_str(&format!("{pad}Fail: {e:?}\n")),
            Cause::Die(d) => out.push_str(&format!("{pad}Die: {d}\n")),
            Cause::Interrupt(id) => out.push_str(&format!("{pad}Interrupted by fiber {id}\n")),
            Cause::Then(left, right) => {
                out.push_str(&format!("{pad}Sequential:\n"));
                left.render(out, depth + 1);
                right.render(out, depth + 1);
            }
            Cause::Both(left, right) => {
                out.push_str(&format!("{pad}Parallel:\n"));
                left.render(out, depth + 1);
                right.render(out, depth + 1);
            }
        }
    }
}

impl Cause<std::convert::Infallible> {
    /// A cause that cannot hold typed failures fits any error type.
    pub fn widen<E>(self) -> Cause<E> {
        self.flat_map(|never| match never {})
    }
}

impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        flatten::equivalent(self, other)
    }
}

impl<E: fmt::Debug> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pretty().trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> FiberId {
        FiberId::from_parts(n, 0)
    }

    #[test]
    fn test_empty_is_identity() {
        let a: Cause<i32> = Cause::fail(1);
        assert!(matches!(Cause::empty().then(a.clone()), Cause::Fail(1)));
        assert!(matches!(a.clone().both(Cause::empty()), Cause::Fail(1)));
    }

    #[test]
    fn test_then_is_not_commutative() {
        let a: Cause<i32> = Cause::fail(1);
        let b = Cause::fail(2);
        assert_ne!(a.clone().then(b.clone()), b.then(a));
    }

    #[test]
    fn test_interrupted_only() {
        let c: Cause<i32> = Cause::interrupt(id(1)).both(Cause::interrupt(id(2)));
        assert!(c.is_interrupted_only());
        assert_eq!(c.interruptors().len(), 2);

        let c = c.then(Cause::die(Defect::from_message("x")));
        assert!(!c.is_interrupted_only());
        assert!(c.is_interrupted());
        assert!(c.is_die());
    }

    #[test]
    fn test_failure_or_cause_prefers_first_failure() {
        let c = Cause::fail("a").both(Cause::fail("b"));
        assert_eq!(c.failure_or_cause().into_left(), Some("a"));
    }

    #[test]
    fn test_map_and_strip() {
        let c = Cause::fail(2).then(Cause::die(Defect::from_message("d")));
        let mapped = c.clone().map(|n| n * 10);
        assert_eq!(mapped.failures(), vec![&20]);

        let stripped: Cause<String> = c.strip_failures();
        assert!(!stripped.is_failure());
        assert_eq!(stripped.defects().len(), 1);
    }

    #[test]
    fn test_find_locates_defect() {
        let d1 = Defect::from_message("d1");
        let d2 = Defect::from_message("d2");
        let c: Cause<()> = Cause::Die(d1.clone()).both(Cause::Die(d2.clone()));
        let found = c.find(|c| match c {
            Cause::Die(d) if *d == d2 => Some(d.clone()),
            _ => None,
        });
        assert_eq!(found, Some(d2));
    }

    #[test]
    fn test_squash_single_leaf_is_returned_directly() {
        let d = Defect::from_message("only");
        let c: Cause<String> = Cause::Die(d.clone()).then(Cause::interrupt(id(3)));
        assert_eq!(c.squash(), d);
    }

    #[test]
    fn test_squash_many_leaves_is_composite() {
        let c = Cause::fail("a").both(Cause::fail("b"));
        let squashed = c.squash();
        let composite = squashed.downcast_ref::<CompositeDefect>().unwrap();
        assert_eq!(composite.defects().len(), 2);
    }

    #[test]
    fn test_squash_pure_interrupt() {
        let c: Cause<()> = Cause::interrupt(id(9));
        let squashed = c.squash();
        assert!(squashed.is::<InterruptedError>());
    }

    #[test]
    fn test_pretty_mentions_every_leaf() {
        let c = Cause::fail("oops")
            .then(Cause::die(Defect::from_message("bad finalizer")))
            .both(Cause::interrupt(id(7)));
        let text = c.pretty();
        assert!(text.contains("oops"));
        assert!(text.contains("bad finalizer"));
        assert!(text.contains("#7"));
        assert!(text.contains("Parallel"));
    }
}
