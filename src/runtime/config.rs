//! Runtime configuration.

use std::fmt;
use std::sync::Arc;

use crate::cause::Cause;
use crate::effect::instr::AnyError;
use crate::fiber::FiberId;

/// Called with every fiber failure worth surfacing: defects, and
/// interruptions requested from outside the fiber's own lineage.
pub type FailureReporter = Arc<dyn Fn(FiberId, &Cause<AnyError>) + Send + Sync>;

/// The reporter used unless one is configured: logs at `error` level.
pub fn log_failure(fiber: FiberId, cause: &Cause<AnyError>) {
    tracing::error!(fiber = %fiber, "fiber failed:\n{}", cause.pretty());
}

/// Settings shared by every fiber of a [`Runtime`](super::Runtime).
///
/// Like the rest of the crate's builders, configuration is plain data
/// assembled with `with_*` methods.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use undertow::RuntimeConfig;
///
/// let config = RuntimeConfig::default()
///     .with_yield_op_count(512)
///     .with_fiber_spans(true)
///     .with_failure_reporter(Arc::new(|fiber, cause| {
///         eprintln!("{} failed: {}", fiber, cause);
///     }));
///
/// assert_eq!(config.yield_op_count(), 512);
/// assert!(config.fiber_spans());
/// ```
#[derive(Clone)]
pub struct RuntimeConfig {
    pub(crate) yield_op_count: u32,
    pub(crate) failure_reporter: FailureReporter,
    pub(crate) fiber_spans: bool,
}

impl RuntimeConfig {
    /// Instructions a fiber runs before yielding to the executor.
    pub const DEFAULT_YIELD_OP_COUNT: u32 = 2048;

    /// Set how many instructions a fiber runs before it yields. Zero is
    /// treated as one.
    pub fn with_yield_op_count(mut self, count: u32) -> Self {
        self.yield_op_count = count.max(1);
        self
    }

    /// Replace the default failure reporter.
    pub fn with_failure_reporter(mut self, reporter: FailureReporter) -> Self {
        self.failure_reporter = reporter;
        self
    }

    /// Run each fiber inside a `fiber` tracing span.
    pub fn with_fiber_spans(mut self, enabled: bool) -> Self {
        self.fiber_spans = enabled;
        self
    }

    /// Instructions a fiber runs before it yields.
    pub fn yield_op_count(&self) -> u32 {
        self.yield_op_count
    }

    /// Whether fibers run inside tracing spans.
    pub fn fiber_spans(&self) -> bool {
        self.fiber_spans
    }

    /// The configured reporter.
    pub fn failure_reporter(&self) -> &FailureReporter {
        &self.failure_reporter
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            yield_op_count: Self::DEFAULT_YIELD_OP_COUNT,
            failure_reporter: Arc::new(log_failure),
            fiber_spans: false,
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("yield_op_count", &self.yield_op_count)
            .field("fiber_spans", &self.fiber_spans)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.yield_op_count(), 2048);
        assert!(!config.fiber_spans());
    }

    #[test]
    fn test_zero_yield_count_is_clamped() {
        let config = RuntimeConfig::default().with_yield_op_count(0);
        assert_eq!(config.yield_op_count(), 1);
    }
}
