//! A neutral sum type.
//!
//! `Either<L, R>` carries no success/failure meaning of its own. The runtime
//! uses it wherever a computation legitimately produces one of two
//! outcomes: which side of a race finished first
//! ([`Effect::race_either`](crate::Effect::race_either)), whether a cause
//! held a typed failure ([`Cause::failure_or_cause`](crate::Cause::failure_or_cause)),
//! or the two channels of [`Effect::either`](crate::Effect::either).
//!
//! By convention `Either` is right-biased: [`Either::map`] works on `Right`.
//!
//! ```rust
//! use undertow::Either;
//!
//! let winner: Either<&str, u32> = Either::left("cache");
//! let label = winner.fold(|src| format!("hit: {}", src), |n| format!("fresh: {}", n));
//! assert_eq!(label, "hit: cache");
//! ```

/// A value that is either `Left(L)` or `Right(R)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Either<L, R> {
    /// The left variant
    Left(L),
    /// The right variant
    Right(R),
}

impl<L, R> Either<L, R> {
    /// Create a Left value.
    #[inline]
    pub fn left(value: L) -> Self {
        Either::Left(value)
    }

    /// Create a Right value.
    #[inline]
    pub fn right(value: R) -> Self {
        Either::Right(value)
    }

    /// Returns `true` if this is a Left value.
    #[inline]
    pub fn is_left(&self) -> bool {
        matches!(self, Either::Left(_))
    }

    /// Returns `true` if this is a Right value.
    #[inline]
    pub fn is_right(&self) -> bool {
        matches!(self, Either::Right(_))
    }

    /// Convert into an `Option` of the left value.
    ///
    /// ```rust
    /// use undertow::Either;
    ///
    /// assert_eq!(Either::<i32, &str>::left(1).into_left(), Some(1));
    /// assert_eq!(Either::<i32, &str>::right("x").into_left(), None);
    /// ```
    #[inline]
    pub fn into_left(self) -> Option<L> {
        match self {
            Either::Left(l) => Some(l),
            Either::Right(_) => None,
        }
    }

    /// Convert into an `Option` of the right value.
    #[inline]
    pub fn into_right(self) -> Option<R> {
        match self {
            Either::Left(_) => None,
            Either::Right(r) => Some(r),
        }
    }

    /// Borrow both sides.
    #[inline]
    pub fn as_ref(&self) -> Either<&L, &R> {
        match self {
            Either::Left(l) => Either::Left(l),
            Either::Right(r) => Either::Right(r),
        }
    }

    /// Transform the left value.
    #[inline]
    pub fn map_left<L2, F>(self, f: F) -> Either<L2, R>
    where
        F: FnOnce(L) -> L2,
    {
        match self {
            Either::Left(l) => Either::Left(f(l)),
            Either::Right(r) => Either::Right(r),
        }
    }

    /// Transform the right value.
    #[inline]
    pub fn map<R2, F>(self, f: F) -> Either<L, R2>
    where
        F: FnOnce(R) -> R2,
    {
        match self {
            Either::Left(l) => Either::Left(l),
            Either::Right(r) => Either::Right(f(r)),
        }
    }

    /// Exchange the two sides.
    #[inline]
    pub fn swap(self) -> Either<R, L> {
        match self {
            Either::Left(l) => Either::Right(l),
            Either::Right(r) => Either::Left(r),
        }
    }

    /// Collapse both sides into one value.
    #[inline]
    pub fn fold<T, F, G>(self, left_fn: F, right_fn: G) -> T
    where
        F: FnOnce(L) -> T,
        G: FnOnce(R) -> T,
    {
        match self {
            Either::Left(l) => left_fn(l),
            Either::Right(r) => right_fn(r),
        }
    }

    /// `Right` becomes `Ok`, `Left` becomes `Err`.
    #[inline]
    pub fn into_result(self) -> Result<R, L> {
        match self {
            Either::Left(l) => Err(l),
            Either::Right(r) => Ok(r),
        }
    }

    /// `Ok` becomes `Right`, `Err` becomes `Left`.
    #[inline]
    pub fn from_result(result: Result<R, L>) -> Self {
        match result {
            Ok(r) => Either::Right(r),
            Err(l) => Either::Left(l),
        }
    }
}

impl<A> Either<A, A> {
    /// Extract the value when both sides have the same type.
    #[inline]
    pub fn merge(self) -> A {
        match self {
            Either::Left(a) | Either::Right(a) => a,
        }
    }
}

impl<L, R> From<Result<R, L>> for Either<L, R> {
    fn from(result: Result<R, L>) -> Self {
        Either::from_result(result)
    }
}

impl<L, R> From<Either<L, R>> for Result<R, L> {
    fn from(either: Either<L, R>) -> Self {
        either.into_result()
    }
}
