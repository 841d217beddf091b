//! The terminal outcome of a fiber.

use crate::cause::{Cause, Defect};
use crate::fiber::FiberId;

/// How a computation ended: with a value, or with a [`Cause`].
///
/// # Examples
///
/// ```rust
/// use undertow::{Cause, Exit};
///
/// let ok: Exit<&str, i32> = Exit::succeed(1);
/// let bad: Exit<&str, i32> = Exit::fail("nope");
///
/// assert_eq!(ok.clone().into_result(), Ok(1));
/// assert_eq!(bad.zip_par(ok), Exit::halt(Cause::fail("nope")));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum Exit<E, A> {
    /// Completed with a value.
    Success(A),
    /// Terminated with a cause.
    Failure(Cause<E>),
}

impl<E, A> Exit<E, A> {
    /// A successful exit.
    pub fn succeed(value: A) -> Self {
        Exit::Success(value)
    }

    /// An exit with a typed failure.
    pub fn fail(error: E) -> Self {
        Exit::Failure(Cause::fail(error))
    }

    /// An exit with a defect.
    pub fn die(defect: impl Into<Defect>) -> Self {
        Exit::Failure(Cause::die(defect))
    }

    /// An exit interrupted by `fiber`.
    pub fn interrupt(fiber: FiberId) -> Self {
        Exit::Failure(Cause::interrupt(fiber))
    }

    /// An exit with an arbitrary cause.
    pub fn halt(cause: Cause<E>) -> Self {
        Exit::Failure(cause)
    }

    /// `Ok` succeeds, `Err` fails.
    pub fn from_result(result: Result<A, E>) -> Self {
        match result {
            Ok(a) => Exit::Success(a),
            Err(e) => Exit::fail(e),
        }
    }

    /// Convert into a `Result`, keeping the full cause on failure.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Exit::Success(a) => Ok(a),
            Exit::Failure(c) => Err(c),
        }
    }

    /// Whether this is a `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    /// Whether this is a `Failure`.
    pub fn is_failure(&self) -> bool {
        matches!(self, Exit::Failure(_))
    }

    /// Whether this failed and the cause contains an interruption.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Exit::Success(_) => false,
            Exit::Failure(c) => c.is_interrupted(),
        }
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&A> {
        match self {
            Exit::Success(a) => Some(a),
            Exit::Failure(_) => None,
        }
    }

    /// The failure cause, if any.
    pub fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Exit::Success(_) => None,
            Exit::Failure(c) => Some(c),
        }
    }

    /// Transform the success value.
    pub fn map<B, F>(self, f: F) -> Exit<E, B>
    where
        F: FnOnce(A) -> B,
    {
        match self {
            Exit::Success(a) => Exit::Success(f(a)),
            Exit::Failure(c) => Exit::Failure(c),
        }
    }

    /// Transform the typed failures.
    pub fn map_err<E2, F>(self, f: F) -> Exit<E2, A>
    where
        F: FnMut(E) -> E2,
    {
        match self {
            Exit::Success(a) => Exit::Success(a),
            Exit::Failure(c) => Exit::Failure(c.map(f)),
        }
    }

    /// Transform the whole cause.
    pub fn map_cause<E2, F>(self, f: F) -> Exit<E2, A>
    where
        F: FnOnce(Cause<E>) -> Cause<E2>,
    {
        match self {
            Exit::Success(a) => Exit::Success(a),
            Exit::Failure(c) => Exit::Failure(f(c)),
        }
    }

    /// Discard the success value.
    pub fn as_unit(self) -> Exit<E, ()> {
        self.map(|_| ())
    }

    /// Collapse both outcomes into one value.
    pub fn fold<Z, F, G>(self, on_failure: F, on_success: G) -> Z
    where
        F: FnOnce(Cause<E>) -> Z,
        G: FnOnce(A) -> Z,
    {
        match self {
            Exit::Success(a) => on_success(a),
            Exit::Failure(c) => on_failure(c),
        }
    }

    /// Combine two exits. Values are merged with `f`; when both failed the
    /// causes are merged with `g`.
    pub fn zip_with<B, C, F, G>(self, that: Exit<E, B>, f: F, g: G) -> Exit<E, C>
    where
        F: FnOnce(A, B) -> C,
        G: FnOnce(Cause<E>, Cause<E>) -> Cause<E>,
    {
        match (self, that) {
            (Exit::Success(a), Exit::Success(b)) => Exit::Success(f(a, b)),
            (Exit::Failure(c), Exit::Success(_)) | (Exit::Success(_), Exit::Failure(c)) => {
                Exit::Failure(c)
            }
            (Exit::Failure(l), Exit::Failure(r)) => Exit::Failure(g(l, r)),
        }
    }

    /// Sequential pairing: failures combine with [`Cause::then`].
    pub fn zip<B>(self, that: Exit<E, B>) -> Exit<E, (A, B)> {
        self.zip_with(that, |a, b| (a, b), Cause::then)
    }

    /// Sequential combination keeping the second value.
    pub fn ap_second<B>(self, that: Exit<E, B>) -> Exit<E, B> {
        self.zip_with(that, |_, b| b, Cause::then)
    }

    /// Parallel pairing: failures combine with [`Cause::both`].
    pub fn zip_par<B>(self, that: Exit<E, B>) -> Exit<E, (A, B)> {
        self.zip_with(that, |a, b| (a, b), Cause::both)
    }

    /// Combine many exits sequentially.
    ///
    /// Succeeds with every value when all succeeded; otherwise fails with
    /// the causes of every failed exit joined by [`Cause::then`], in order.
    /// Returns `None` for an empty input.
    pub fn collect_all<I>(exits: I) -> Option<Exit<E, Vec<A>>>
    where
        I: IntoIterator<Item = Exit<E, A>>,
    {
        Self::collect_with(exits, Cause::then)
    }

    /// Like [`collect_all`](Exit::collect_all), joining causes with
    /// [`Cause::both`].
    pub fn collect_all_par<I>(exits: I) -> Option<Exit<E, Vec<A>>>
    where
        I: IntoIterator<Item = Exit<E, A>>,
    {
        Self::collect_with(exits, Cause::both)
    }

    fn collect_with<I, G>(exits: I, combine: G) -> Option<Exit<E, Vec<A>>>
    where
        I: IntoIterator<Item = Exit<E, A>>,
        G: Fn(Cause<E>, Cause<E>) -> Cause<E>,
    {
        let mut exits = exits.into_iter();
        let first = exits.next()?.map(|a| vec![a]);
        Some(exits.fold(first, |acc, exit| {
            acc.zip_with(
                exit,
                |mut values, a| {
                    values.push(a);
                    values
                },
                &combine,
            )
        }))
    }
}

impl<E, A> From<Result<A, E>> for Exit<E, A> {
    fn from(result: Result<A, E>) -> Self {
        Exit::from_result(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_keeps_single_failure() {
        let a: Exit<&str, i32> = Exit::succeed(1);
        let b: Exit<&str, i32> = Exit::fail("b");
        assert_eq!(a.zip(b), Exit::fail("b"));
    }

    #[test]
    fn test_sequential_vs_parallel_combination() {
        let a: Exit<&str, ()> = Exit::fail("a");
        let b: Exit<&str, ()> = Exit::fail("b");
        assert_eq!(
            a.clone().ap_second(b.clone()),
            Exit::halt(Cause::fail("a").then(Cause::fail("b")))
        );
        assert_eq!(
            a.zip_par(b),
            Exit::halt(Cause::fail("b").both(Cause::fail("a")))
        );
    }

    #[test]
    fn test_collect_all_success() {
        let exits: Vec<Exit<(), i32>> = vec![Exit::succeed(1), Exit::succeed(2)];
        assert_eq!(Exit::collect_all(exits), Some(Exit::succeed(vec![1, 2])));
    }

    #[test]
    fn test_collect_all_failures_keep_every_cause() {
        let exits: Vec<Exit<&str, i32>> =
            vec![Exit::fail("x"), Exit::succeed(2), Exit::fail("y")];
        assert_eq!(
            Exit::collect_all(exits.clone()),
            Some(Exit::halt(Cause::fail("x").then(Cause::fail("y"))))
        );
        assert_eq!(
            Exit::collect_all_par(exits),
            Some(Exit::halt(Cause::fail("x").both(Cause::fail("y"))))
        );
    }

    #[test]
    fn test_collect_all_empty() {
        let exits: Vec<Exit<(), ()>> = Vec::new();
        assert!(Exit::collect_all(exits).is_none());
    }

    #[test]
    fn test_interrupted_exit() {
        let exit: Exit<(), ()> = Exit::interrupt(FiberId::from_parts(4, 0));
        assert!(exit.is_interrupted());
        assert!(exit.is_failure());
    }
}
