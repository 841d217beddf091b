//! Untyped failures carried by [`Cause::Die`](super::Cause::Die).

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// An unexpected failure: a panic, a violated invariant, or any value a
/// computation gave up with outside of its typed error channel.
///
/// A `Defect` keeps the original payload (so it can be recovered with
/// [`Defect::downcast_ref`]) together with a rendered message used for
/// diagnostics. Cloning is cheap; the payload is shared.
///
/// # Examples
///
/// ```
/// use undertow::Defect;
///
/// let defect = Defect::new(42_u32);
/// assert_eq!(defect.downcast_ref::<u32>(), Some(&42));
/// assert_eq!(defect.message(), "42");
///
/// let defect = Defect::from_message("connection pool poisoned");
/// assert_eq!(defect.to_string(), "connection pool poisoned");
/// ```
#[derive(Clone)]
pub struct Defect {
    payload: Arc<dyn Any + Send + Sync>,
    message: Arc<str>,
}

impl Defect {
    /// Wrap an arbitrary value, rendering it with its `Debug` impl.
    pub fn new<T>(value: T) -> Self
    where
        T: fmt::Debug + Send + Sync + 'static,
    {
        let message = format!("{:?}", value);
        Self {
            payload: Arc::new(value),
            message: message.into(),
        }
    }

    /// A defect that is nothing but a message. The payload is the `String`.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            message: message.as_str().into(),
            payload: Arc::new(message),
        }
    }

    /// Wrap an error, rendering it with its `Display` impl.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let message = error.to_string();
        Self {
            payload: Arc::new(error),
            message: message.into(),
        }
    }

    /// Convert a payload captured by `std::panic::catch_unwind`.
    ///
    /// Panic payloads are not `Sync`, so only their text survives.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let text = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        Self::from_message(text)
    }

    /// The rendered message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Borrow the payload as `T`, if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Whether the payload is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    fn payload_type(&self) -> TypeId {
        Any::type_id(&*self.payload)
    }
}

impl PartialEq for Defect {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
            || (self.payload_type() == other.payload_type() && self.message == other.message)
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Defect").field(&&*self.message).finish()
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&'static str> for Defect {
    fn from(message: &'static str) -> Self {
        Defect::from_message(message)
    }
}

impl From<String> for Defect {
    fn from(message: String) -> Self {
        Defect::from_message(message)
    }
}
