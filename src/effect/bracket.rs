//! Guaranteed release of acquired resources.
//!
//! [`Effect::bracket_exit`] is the primitive: acquisition and release run
//! uninterruptibly, only the use is interruptible, and release always runs
//! once acquisition succeeded. The other combinators here are shorthands.
//!
//! When both the use and the release fail, the resulting cause holds both
//! failures in sequence: `use_cause.then(release_cause)`.

use super::Effect;
use crate::cause::Cause;
use crate::exit::Exit;

impl<R, E, A> Effect<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// Acquire a resource, use it, and release it with the outcome of the
    /// use.
    ///
    /// ```rust
    /// use undertow::{Effect, Exit, Ref, Runtime};
    ///
    /// let rt = Runtime::new().unwrap();
    /// let seen = Ref::new(None);
    /// let record = seen.clone();
    ///
    /// let program = Effect::<(), String, i32>::bracket_exit(
    ///     Effect::succeed(20),
    ///     |n: &i32| Effect::fail(format!("rejected {}", n)),
    ///     move |_n: i32, exit: &Exit<String, i32>| record.set(Some(exit.is_failure())),
    /// );
    ///
    /// assert!(rt.block_on(program).is_err());
    /// assert_eq!(seen.get_now(), Some(true));
    /// ```
    pub fn bracket_exit<Res, C, U, Rel>(
        acquire: Effect<R, E, Res>,
        use_: U,
        release: Rel,
    ) -> Self
    where
        Res: Send + 'static,
        C: Send + 'static,
        U: FnOnce(&Res) -> Self + Send + 'static,
        Rel: FnOnce(Res, &Exit<E, A>) -> Effect<R, E, C> + Send + 'static,
    {
        Self::uninterruptible_mask(move |restore| {
            acquire.flat_map(move |resource| {
                let body = restore.apply(use_(&resource));
                body.result::<E>().flat_map(move |exit| {
                    let release = release(resource, &exit);
                    release.result::<E>().flat_map(move |released| {
                        match (exit, released) {
                            (exit, Exit::Success(_)) => Effect::done(exit),
                            (Exit::Success(_), Exit::Failure(cause)) => Effect::halt(cause),
                            (Exit::Failure(first), Exit::Failure(second)) => {
                                Effect::halt(first.then(second))
                            }
                        }
                    })
                })
            })
        })
    }

    /// Acquire a resource, use it, and release it however the use ends.
    pub fn bracket<Res, C, U, Rel>(acquire: Effect<R, E, Res>, use_: U, release: Rel) -> Self
    where
        Res: Send + 'static,
        C: Send + 'static,
        U: FnOnce(&Res) -> Self + Send + 'static,
        Rel: FnOnce(Res) -> Effect<R, E, C> + Send + 'static,
    {
        Self::bracket_exit(acquire, use_, move |resource, _: &Exit<E, A>| {
            release(resource)
        })
    }

    /// Run `finalizer` after `self`, however it ends.
    pub fn ensuring<C>(self, finalizer: Effect<R, E, C>) -> Self
    where
        C: Send + 'static,
    {
        self.on_exit(move |_| finalizer)
    }

    /// Run `cleanup` with the outcome of `self`, however it ends.
    pub fn on_exit<C, F>(self, cleanup: F) -> Self
    where
        C: Send + 'static,
        F: FnOnce(&Exit<E, A>) -> Effect<R, E, C> + Send + 'static,
    {
        Self::bracket_exit(
            Effect::<R, E, ()>::unit(),
            move |_: &()| self,
            move |_: (), exit: &Exit<E, A>| cleanup(exit),
        )
    }

    /// Run `cleanup` if `self` is interrupted.
    pub fn on_interrupt<C>(self, cleanup: Effect<R, E, C>) -> Self
    where
        C: Send + 'static,
    {
        self.on_exit(move |exit| {
            if exit.is_interrupted() {
                cleanup.as_unit()
            } else {
                Effect::unit()
            }
        })
    }

    /// Run `cleanup` with the cause if `self` fails in any way.
    pub fn on_error<C, F>(self, cleanup: F) -> Self
    where
        C: Send + 'static,
        F: FnOnce(&Cause<E>) -> Effect<R, E, C> + Send + 'static,
    {
        self.on_exit(move |exit| match exit {
            Exit::Failure(cause) => cleanup(cause).as_unit(),
            Exit::Success(_) => Effect::unit(),
        })
    }
}
