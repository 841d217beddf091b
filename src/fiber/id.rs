//! Fiber identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// The identity of a fiber: a process-wide sequence number plus the wall
/// clock time (in milliseconds) at which the fiber was created.
///
/// Ids order by sequence number, so a parent always sorts before the
/// children it forks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FiberId {
    seq: u64,
    start_time_millis: u64,
}

impl FiberId {
    /// The id used for interruptions that do not originate from a fiber,
    /// such as a runtime shutting down a root fiber from outside.
    pub const fn none() -> Self {
        Self {
            seq: 0,
            start_time_millis: 0,
        }
    }

    /// Allocate a fresh, unique id.
    pub fn next() -> Self {
        let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
        let start_time_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            seq,
            start_time_millis,
        }
    }

    /// Build an id from its raw parts.
    pub const fn from_parts(seq: u64, start_time_millis: u64) -> Self {
        Self {
            seq,
            start_time_millis,
        }
    }

    /// The sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Creation time, in milliseconds since the Unix epoch.
    pub fn start_time_millis(&self) -> u64 {
        self.start_time_millis
    }

    /// Whether this is [`FiberId::none`].
    pub fn is_none(&self) -> bool {
        self.seq == 0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.seq)
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId(#{})", self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = FiberId::next();
        let b = FiberId::next();
        assert_ne!(a, b);
        assert!(a < b);
        assert!(!a.is_none());
    }

    #[test]
    fn test_none_displays_as_zero() {
        assert!(FiberId::none().is_none());
        assert_eq!(FiberId::none().to_string(), "#0");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serializes_both_parts() {
        let id = FiberId::from_parts(12, 1_700_000_000_000);
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "seq": 12, "start_time_millis": 1_700_000_000_000_u64 })
        );
    }
}
