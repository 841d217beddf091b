//! Resources whose release is tied to a scope.
//!
//! A [`Managed`] describes how to acquire a resource and how to release it.
//! Nothing happens until it is [used](Managed::use_): acquisition runs
//! uninterruptibly and registers the release in a [`ReleaseMap`] in the same
//! step, and the map is closed when the use ends, however it ends.
//!
//! ```rust
//! use undertow::{Effect, Managed, Ref, Runtime};
//!
//! let rt = Runtime::new().unwrap();
//! let log = Ref::new(Vec::new());
//!
//! let open = |name: &'static str| {
//!     let opened = log.clone();
//!     let closed = log.clone();
//!     Managed::<(), String, &'static str>::make(
//!         opened.update(move |mut v| { v.push(format!("open {}", name)); v }).as_(name),
//!         move |name| closed.update(move |mut v| { v.push(format!("close {}", name)); v }),
//!     )
//! };
//!
//! let program = open("a").zip(open("b")).use_(|(a, b)| Effect::succeed(format!("{}{}", a, b)));
//! assert_eq!(rt.block_on(program).unwrap(), "ab");
//! assert_eq!(log.get_now(), vec!["open a", "open b", "close b", "close a"]);
//! ```

mod release_map;

use std::convert::Infallible;
use std::fmt;

pub use release_map::{ExecutionStrategy, Finalizer, ReleaseMap};

use crate::effect::instr::{erase_exit, AnyEnv, AnyExit, Instr};
use crate::effect::{Effect, UIO};
use crate::exit::Exit;
use crate::fiber::FiberId;

type Acquire<R, E, A> = Box<dyn FnOnce(ReleaseMap) -> Effect<R, E, (Finalizer, A)> + Send>;

/// A resource acquired and released within a scope.
#[must_use = "managed resources do nothing until used"]
pub struct Managed<R, E, A> {
    acquire: Acquire<R, E, A>,
}

impl<R, E, A> fmt::Debug for Managed<R, E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Managed(..)")
    }
}

impl<R, E, A> Managed<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    fn new<F>(acquire: F) -> Self
    where
        F: FnOnce(ReleaseMap) -> Effect<R, E, (Finalizer, A)> + Send + 'static,
    {
        Self {
            acquire: Box::new(acquire),
        }
    }

    /// Acquire into `map`, yielding the resource and the finalizer that
    /// releases it early.
    pub(crate) fn run_in(self, map: ReleaseMap) -> Effect<R, E, (Finalizer, A)> {
        (self.acquire)(map)
    }

    /// A resource with a release that sees how the scope ended.
    pub fn make_exit<C, Rel>(acquire: Effect<R, E, A>, release: Rel) -> Self
    where
        A: Clone,
        C: Send + 'static,
        Rel: FnOnce(A, &AnyExit) -> Effect<R, Infallible, C> + Send + 'static,
    {
        Self::new(move |map| {
            acquire
                .flat_map(move |resource| {
                    let released = resource.clone();
                    Effect::from_node(Box::new(Instr::Read(Box::new(move |env: AnyEnv| {
                        let finalizer = Finalizer::in_env(env, move |exit| {
                            release(released, &exit).as_unit().into_node()
                        });
                        map.add::<R, E>(finalizer)
                            .map(move |finalizer| (finalizer, resource))
                            .into_node()
                    }))))
                })
                .uninterruptible()
        })
    }

    /// A resource released by `release` when the scope ends.
    pub fn make<C, Rel>(acquire: Effect<R, E, A>, release: Rel) -> Self
    where
        A: Clone,
        C: Send + 'static,
        Rel: FnOnce(A) -> Effect<R, Infallible, C> + Send + 'static,
    {
        Self::make_exit(acquire, move |resource, _| release(resource))
    }

    /// An effect with nothing to release.
    pub fn from_effect(effect: Effect<R, E, A>) -> Self {
        Self::new(move |_| effect.map(|a| (Finalizer::noop(), a)))
    }

    /// A plain value.
    pub fn succeed(value: A) -> Self {
        Self::from_effect(Effect::succeed(value))
    }

    /// A resource that cannot be acquired.
    pub fn fail(error: E) -> Self {
        Self::from_effect(Effect::fail(error))
    }

    /// Transform the resource.
    pub fn map<B, F>(self, f: F) -> Managed<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        Managed::new(move |map| self.run_in(map).map(move |(finalizer, a)| (finalizer, f(a))))
    }

    /// Transform the typed failure of the acquisition.
    pub fn map_err<E2, F>(self, f: F) -> Managed<R, E2, A>
    where
        E2: Clone + Send + Sync + 'static,
        F: FnMut(E) -> E2 + Send + 'static,
    {
        Managed::new(move |map| self.run_in(map).map_err(f))
    }

    /// Acquire another resource that depends on this one.
    ///
    /// The second resource is released before the first. Each release runs
    /// even if the other fails.
    pub fn flat_map<B, F>(self, f: F) -> Managed<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Managed<R, E, B> + Send + 'static,
    {
        Managed::new(move |map| {
            let inner = map.clone();
            self.run_in(map).flat_map(move |(first, a)| {
                f(a).run_in(inner)
                    .map(move |(second, b)| (in_sequence(second, first), b))
            })
        })
    }

    /// Acquire `self`, then `that`, and combine them.
    pub fn zip_with<B, C, F>(self, that: Managed<R, E, B>, f: F) -> Managed<R, E, C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        self.flat_map(move |a| that.map(move |b| f(a, b)))
    }

    /// Acquire `self`, then `that`.
    pub fn zip<B>(self, that: Managed<R, E, B>) -> Managed<R, E, (A, B)>
    where
        B: Send + 'static,
    {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Expose an effect that releases the resource before the scope ends.
    ///
    /// The early release sees the scope as interrupted by the acquiring
    /// fiber. The resource is still released only once.
    pub fn with_early_release(self) -> Managed<R, E, (UIO<()>, A)> {
        Managed::new(move |map| {
            Effect::<R, E, FiberId>::fiber_id().flat_map(move |id| {
                self.with_early_release_exit(Exit::interrupt(id)).run_in(map)
            })
        })
    }

    /// Like [`with_early_release`](Managed::with_early_release), releasing
    /// with `exit`.
    pub fn with_early_release_exit(self, exit: AnyExit) -> Managed<R, E, (UIO<()>, A)> {
        Managed::new(move |map| {
            self.run_in(map).map(move |(finalizer, a)| {
                let early = finalizer.run(exit);
                (finalizer, (early, a))
            })
        })
    }

    /// Acquire the resource, run `f` with it, and release it.
    pub fn use_<B, F>(self, f: F) -> Effect<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Effect<R, E, B> + Send + 'static,
    {
        Effect::bracket_exit(
            ReleaseMap::make(),
            move |map: &ReleaseMap| self.run_in(map.clone()).flat_map(move |(_, a)| f(a)),
            |map: ReleaseMap, exit: &Exit<E, B>| {
                map.release_all(erase_exit(exit), ExecutionStrategy::Sequential)
            },
        )
    }

    /// Acquire and release the resource, keeping its value.
    pub fn use_now(self) -> Effect<R, E, A> {
        self.use_(Effect::succeed)
    }
}

impl<R, E, A> Managed<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Acquire `self` and `that` concurrently and combine them.
    ///
    /// Each side gets its own release map; both are released concurrently
    /// when the scope ends.
    pub fn zip_with_par<B, C, F>(self, that: Managed<R, E, B>, f: F) -> Managed<R, E, C>
    where
        B: Clone + Send + Sync + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        Managed::new(move |outer| {
            Managed::<R, E, ReleaseMap>::release_map_managed(ExecutionStrategy::Parallel)
                .run_in(outer)
                .flat_map(move |(finalizer, parallel)| {
                    let left = Managed::<R, E, ReleaseMap>::release_map_managed(
                        ExecutionStrategy::Sequential,
                    )
                    .run_in(parallel.clone());
                    let right = Managed::<R, E, ReleaseMap>::release_map_managed(
                        ExecutionStrategy::Sequential,
                    )
                    .run_in(parallel);
                    left.zip(right).flat_map(move |((_, left), (_, right))| {
                        self.run_in(left)
                            .zip_par(that.run_in(right))
                            .map(move |((_, a), (_, b))| (finalizer, f(a, b)))
                    })
                })
        })
    }

    /// Acquire `self` and `that` concurrently.
    pub fn zip_par<B>(self, that: Managed<R, E, B>) -> Managed<R, E, (A, B)>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.zip_with_par(that, |a, b| (a, b))
    }

    /// Alias of [`zip_with_par`](Managed::zip_with_par).
    pub fn map2_par<B, C, F>(self, that: Managed<R, E, B>, f: F) -> Managed<R, E, C>
    where
        B: Clone + Send + Sync + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        self.zip_with_par(that, f)
    }
}

impl<R, E> Managed<R, E, ()>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Run `finalizer` when the scope ends.
    pub fn finalizer<C>(finalizer: Effect<R, Infallible, C>) -> Self
    where
        C: Send + 'static,
    {
        Self::finalizer_exit(move |_| finalizer)
    }

    /// Run the effect `f` builds from the scope's exit when the scope ends.
    pub fn finalizer_exit<C, F>(f: F) -> Self
    where
        C: Send + 'static,
        F: FnOnce(&AnyExit) -> Effect<R, Infallible, C> + Send + 'static,
    {
        Self::make_exit(Effect::unit(), move |_, exit| f(exit))
    }
}

impl<R, E> Managed<R, E, ReleaseMap>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// A fresh release map, closed with `strategy` when the scope ends.
    pub fn release_map_managed(strategy: ExecutionStrategy) -> Self {
        Self::make_exit(ReleaseMap::make(), move |map, exit| {
            map.release_all::<R, Infallible>(exit.clone(), strategy)
        })
    }
}

/// Run `last`, then `first`, keeping both failures.
fn in_sequence(last: Finalizer, first: Finalizer) -> Finalizer {
    Finalizer::new(move |exit| {
        last.run::<(), Infallible>(exit.clone())
            .run_exit()
            .zip(first.run(exit).run_exit())
            .flat_map(|(last, first)| Effect::done(last.ap_second(first)))
    })
}
