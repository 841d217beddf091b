//! Error types surfaced by the runtime.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::cause::{Cause, Defect};
use crate::fiber::FiberId;

/// A fiber terminated unsuccessfully.
///
/// Returned by [`Runtime::block_on`](crate::Runtime::block_on), where the
/// full [`Cause`] has to be turned into an ordinary Rust error.
#[derive(Debug, Clone, PartialEq)]
pub struct FiberFailure<E> {
    cause: Cause<E>,
}

impl<E> FiberFailure<E> {
    /// Wrap a cause.
    pub fn new(cause: Cause<E>) -> Self {
        Self { cause }
    }

    /// The cause the fiber failed with.
    pub fn cause(&self) -> &Cause<E> {
        &self.cause
    }

    /// Extract the cause.
    pub fn into_cause(self) -> Cause<E> {
        self.cause
    }

    /// The first typed failure, if the fiber failed with one.
    pub fn failure(&self) -> Option<&E> {
        self.cause.failure_option()
    }
}

impl<E: fmt::Debug> fmt::Display for FiberFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber failed:\n{}", self.cause)
    }
}

impl<E: fmt::Debug> std::error::Error for FiberFailure<E> {}

/// Several failures squashed into one defect by [`Cause::squash`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeDefect {
    defects: Vec<Defect>,
}

impl CompositeDefect {
    /// Collect defects, in the order they occurred.
    pub fn new(defects: Vec<Defect>) -> Self {
        Self { defects }
    }

    /// The individual defects.
    pub fn defects(&self) -> &[Defect] {
        &self.defects
    }
}

impl fmt::Display for CompositeDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failures:", self.defects.len())?;
        for (i, defect) in self.defects.iter().enumerate() {
            write!(f, " [{}] {}", i + 1, defect)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositeDefect {}

/// A computation was interrupted and had no other failure to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptedError {
    interruptors: BTreeSet<FiberId>,
}

impl InterruptedError {
    /// Record the fibers that requested the interruption.
    pub fn new(interruptors: BTreeSet<FiberId>) -> Self {
        Self { interruptors }
    }

    /// The interrupting fibers.
    pub fn interruptors(&self) -> &BTreeSet<FiberId> {
        &self.interruptors
    }
}

impl fmt::Display for InterruptedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.interruptors.iter().map(|id| id.to_string()).collect();
        write!(f, "interrupted by fiber(s) {}", ids.join(", "))
    }
}

impl std::error::Error for InterruptedError {}

/// Error produced by [`Effect::timeout_error`](crate::Effect::timeout_error):
/// either the deadline passed, or the effect failed on its own first.
///
/// ```rust
/// use undertow::{Effect, Runtime, TimeoutError};
/// use std::time::Duration;
///
/// let rt = Runtime::new().unwrap();
/// let slow = Effect::<(), String, ()>::sleep(Duration::from_secs(10))
///     .timeout_error(Duration::from_millis(10));
///
/// match rt.block_on(slow) {
///     Err(failure) => assert!(failure.failure().unwrap().is_timeout()),
///     Ok(_) => panic!("expected a timeout"),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError<E> {
    /// The operation timed out.
    Timeout {
        /// The deadline that was exceeded.
        duration: Duration,
    },
    /// The operation failed before the deadline.
    Inner(E),
}

impl<E> TimeoutError<E> {
    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Wrap an inner error.
    pub fn inner(error: E) -> Self {
        Self::Inner(error)
    }

    /// Returns true if the deadline passed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Get the inner error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Timeout { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for TimeoutError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { duration } => write!(f, "operation timed out after {:?}", duration),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TimeoutError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Timeout { .. } => None,
            Self::Inner(e) => Some(e),
        }
    }
}
