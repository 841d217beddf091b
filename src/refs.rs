//! Shared mutable cells.
//!
//! A [`Ref`] is the one piece of state fibers are expected to share. Every
//! update runs as a single critical section over the cell, so concurrent
//! `update`s never lose writes and `modify` can atomically compute a result
//! from the value it replaces.
//!
//! ```rust
//! use undertow::{Effect, Ref, Runtime};
//!
//! let rt = Runtime::new().unwrap();
//! let counter = Ref::new(0_u32);
//!
//! let program = counter
//!     .update::<(), String, _>(|n| n + 1)
//!     .zip_right(counter.update_and_get(|n| n * 10));
//!
//! assert_eq!(rt.block_on(program).unwrap(), 10);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::effect::Effect;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Panics inside user code are converted to defects by the fiber that ran
/// them, so the protected state is still meaningful afterwards.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mutable cell shared between fibers.
pub struct Ref<A> {
    cell: Arc<Mutex<A>>,
}

impl<A> Clone for Ref<A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for Ref<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&*lock(&self.cell)).finish()
    }
}

impl<A: Send + 'static> Ref<A> {
    /// Create a cell outside of any effect.
    pub fn new(value: A) -> Self {
        Self {
            cell: Arc::new(Mutex::new(value)),
        }
    }

    /// An effect that allocates a new cell.
    pub fn make<R, E>(value: A) -> Effect<R, E, Ref<A>>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        Effect::total(move || Ref::new(value))
    }

    pub(crate) fn modify_now<B, F>(&self, f: F) -> B
    where
        F: FnOnce(&mut A) -> B,
    {
        f(&mut lock(&self.cell))
    }

    /// Atomically update the value and return a result computed from it.
    ///
    /// `f` runs while the cell is locked and must not touch the same `Ref`
    /// (not even through [`get_now`](Ref::get_now)): the thread would
    /// deadlock. Compute anything else you need before calling `modify`.
    pub fn modify<R, E, B, F>(&self, f: F) -> Effect<R, E, B>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        B: Send + 'static,
        F: FnOnce(&mut A) -> B + Send + 'static,
    {
        let cell = self.clone();
        Effect::total(move || cell.modify_now(f))
    }

    /// Replace the value.
    pub fn set<R, E>(&self, value: A) -> Effect<R, E, ()>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.modify(move |a| *a = value)
    }
}

impl<A: Clone + Send + 'static> Ref<A> {
    /// Read the current value outside of any effect.
    pub fn get_now(&self) -> A {
        lock(&self.cell).clone()
    }

    /// Read the current value.
    pub fn get<R, E>(&self) -> Effect<R, E, A>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.modify(|a| a.clone())
    }

    /// Apply `f` to the value.
    pub fn update<R, E, F>(&self, f: F) -> Effect<R, E, ()>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce(A) -> A + Send + 'static,
    {
        self.modify(move |a| *a = f(a.clone()))
    }

    /// Apply `f` and return the new value.
    pub fn update_and_get<R, E, F>(&self, f: F) -> Effect<R, E, A>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce(A) -> A + Send + 'static,
    {
        self.modify(move |a| {
            *a = f(a.clone());
            a.clone()
        })
    }

    /// Replace the value and return the previous one.
    pub fn get_and_set<R, E>(&self, value: A) -> Effect<R, E, A>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.modify(move |a| std::mem::replace(a, value))
    }
}
