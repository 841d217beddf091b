//! Controlling where interruption may be delivered.
//!
//! Interruption is cooperative: a fiber only notices a request at a safe
//! point, between two instructions or while suspended, and only if the
//! current region is interruptible. Regions nest; leaving a region restores
//! whatever status was active when it was entered.

use super::instr::Instr;
use super::Effect;
use crate::fiber::InterruptStatus;

/// Restores the interrupt status that was active when a mask was entered.
///
/// Handed to the body of [`Effect::uninterruptible_mask`] and
/// [`Effect::interruptible_mask`].
#[derive(Clone, Copy, Debug)]
pub struct Restore {
    interruptible: bool,
}

impl Restore {
    /// Run `effect` with the interrupt status from before the mask.
    pub fn apply<R, E, A>(self, effect: Effect<R, E, A>) -> Effect<R, E, A> {
        Effect::from_node(Box::new(Instr::SetInterrupt(
            effect.node,
            self.interruptible,
        )))
    }

    /// The status this restores.
    pub fn status(self) -> InterruptStatus {
        InterruptStatus::from_bool(self.interruptible)
    }
}

impl<R, E, A> Effect<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Run in an interruptible region.
    pub fn interruptible(self) -> Self {
        self.interrupt_status(InterruptStatus::Interruptible)
    }

    /// Run in an uninterruptible region: interruption requests are held
    /// until the region ends.
    pub fn uninterruptible(self) -> Self {
        self.interrupt_status(InterruptStatus::Uninterruptible)
    }

    /// Run in a region with the given status.
    pub fn interrupt_status(self, status: InterruptStatus) -> Self {
        Self::from_node(Box::new(Instr::SetInterrupt(
            self.node,
            status.is_interruptible(),
        )))
    }

    /// Build an effect from the current interrupt status.
    pub fn check_interruptible<F>(f: F) -> Self
    where
        F: FnOnce(InterruptStatus) -> Self + Send + 'static,
    {
        Self::from_node(Box::new(Instr::GetInterrupt(Box::new(move |flag: bool| {
            f(InterruptStatus::from_bool(flag)).node
        }))))
    }

    /// Run `f`'s effect uninterruptibly; parts wrapped with the [`Restore`]
    /// get back the status from before the mask.
    ///
    /// ```rust
    /// use undertow::{Effect, InterruptStatus, Runtime};
    ///
    /// let rt = Runtime::new().unwrap();
    /// let status = || Effect::<(), String, InterruptStatus>::check_interruptible(Effect::succeed);
    ///
    /// let program = Effect::uninterruptible_mask(move |restore| status().zip(restore.apply(status())));
    /// assert_eq!(
    ///     rt.block_on(program).unwrap(),
    ///     (InterruptStatus::Uninterruptible, InterruptStatus::Interruptible),
    /// );
    /// ```
    pub fn uninterruptible_mask<F>(f: F) -> Self
    where
        F: FnOnce(Restore) -> Self + Send + 'static,
    {
        Self::mask(f, false)
    }

    /// Like [`uninterruptible_mask`](Effect::uninterruptible_mask), making
    /// the body interruptible instead.
    pub fn interruptible_mask<F>(f: F) -> Self
    where
        F: FnOnce(Restore) -> Self + Send + 'static,
    {
        Self::mask(f, true)
    }

    fn mask<F>(f: F, interruptible: bool) -> Self
    where
        F: FnOnce(Restore) -> Self + Send + 'static,
    {
        Self::from_node(Box::new(Instr::GetInterrupt(Box::new(move |flag: bool| {
            let body = f(Restore {
                interruptible: flag,
            });
            Box::new(Instr::SetInterrupt(body.node, interruptible))
        }))))
    }
}
