//! A registry of finalizers closed exactly once.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::effect::instr::{suspend_node, unit_node, AnyEnv, AnyExit, Instr, Node};
use crate::effect::{Effect, UIO};
use crate::either::Either;
use crate::exit::Exit;
use crate::refs::{lock, Ref};

type FinalizerFn = Box<dyn FnOnce(AnyExit) -> Node + Send>;

/// A cleanup action invoked with the exit of the scope that owns it.
///
/// Clones share the action, which runs at most once no matter how many
/// clones are invoked.
#[derive(Clone)]
pub struct Finalizer {
    action: Arc<Mutex<Option<FinalizerFn>>>,
}

impl Finalizer {
    /// Wrap a cleanup effect.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(AnyExit) -> UIO<()> + Send + 'static,
    {
        Self::from_fn(move |exit| f(exit).into_node())
    }

    /// A finalizer that does nothing.
    pub fn noop() -> Self {
        Self::from_fn(|_| unit_node())
    }

    fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce(AnyExit) -> Node + Send + 'static,
    {
        Self {
            action: Arc::new(Mutex::new(Some(Box::new(f)))),
        }
    }

    /// A finalizer whose effect runs in `env` whichever fiber invokes it.
    pub(crate) fn in_env<F>(env: AnyEnv, f: F) -> Self
    where
        F: FnOnce(AnyExit) -> Node + Send + 'static,
    {
        Self::from_fn(move |exit| Box::new(Instr::Give(f(exit), env)))
    }

    /// Run the action with `exit`, unless some clone already ran it.
    pub fn run<R, E>(&self, exit: AnyExit) -> Effect<R, E, ()>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let action = Arc::clone(&self.action);
        Effect::from_node(suspend_node(move || match lock(&action).take() {
            Some(f) => f(exit),
            None => unit_node(),
        }))
    }

    /// Whether the action has already run.
    pub fn is_spent(&self) -> bool {
        lock(&self.action).is_none()
    }
}

impl fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finalizer")
            .field("spent", &self.is_spent())
            .finish()
    }
}

/// How [`ReleaseMap::release_all`] runs the finalizers it holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExecutionStrategy {
    /// One at a time, most recently added first.
    Sequential,
    /// All at once, each on its own fiber.
    Parallel,
}

#[derive(Debug)]
enum State {
    Running {
        next_key: u64,
        finalizers: BTreeMap<u64, Finalizer>,
    },
    Exited {
        next_key: u64,
        exit: AnyExit,
    },
}

/// The finalizers of a scope, keyed by insertion order.
///
/// Once [`release_all`](ReleaseMap::release_all) has run, the map is closed:
/// a finalizer added afterwards runs immediately with the exit the map was
/// closed with, so nothing added late can leak.
#[derive(Clone, Debug)]
pub struct ReleaseMap {
    state: Ref<State>,
}

impl Default for ReleaseMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseMap {
    /// An empty, open map.
    pub fn new() -> Self {
        Self {
            state: Ref::new(State::Running {
                next_key: 0,
                finalizers: BTreeMap::new(),
            }),
        }
    }

    /// An effect that allocates an empty, open map.
    pub fn make<R, E>() -> Effect<R, E, ReleaseMap>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        Effect::total(ReleaseMap::new)
    }

    /// The key the next finalizer will be stored under.
    pub fn next_key(&self) -> u64 {
        self.state.modify_now(|state| match state {
            State::Running { next_key, .. } | State::Exited { next_key, .. } => *next_key,
        })
    }

    /// Whether the map has been closed.
    pub fn is_exited(&self) -> bool {
        self.state
            .modify_now(|state| matches!(state, State::Exited { .. }))
    }

    /// Register `finalizer`, returning one that releases just this entry.
    ///
    /// If the map is already closed, `finalizer` runs right away and the
    /// returned finalizer does nothing.
    pub fn add<R, E>(&self, finalizer: Finalizer) -> Effect<R, E, Finalizer>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let map = self.clone();
        self.add_if_open(finalizer).map(move |key| match key {
            Some(key) => Finalizer::from_fn(move |exit| map.release::<(), Infallible>(key, exit).into_node()),
            None => Finalizer::noop(),
        })
    }

    /// Register `finalizer` and return its key, or run it with the stored
    /// exit and return `None` if the map is closed.
    pub fn add_if_open<R, E>(&self, finalizer: Finalizer) -> Effect<R, E, Option<u64>>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.state
            .modify(move |state| match state {
                State::Running {
                    next_key,
                    finalizers,
                } => {
                    let key = *next_key;
                    *next_key += 1;
                    finalizers.insert(key, finalizer);
                    Either::Right(key)
                }
                State::Exited { next_key, exit } => {
                    *next_key += 1;
                    Either::Left((finalizer, exit.clone()))
                }
            })
            .flat_map(|added| match added {
                Either::Right(key) => Effect::succeed(Some(key)),
                Either::Left((finalizer, exit)) => {
                    tracing::trace!("release map closed, running finalizer immediately");
                    finalizer.run(exit).as_(None)
                }
            })
    }

    /// Remove the finalizer stored under `key` and run it with `exit`.
    pub fn release<R, E>(&self, key: u64, exit: AnyExit) -> Effect<R, E, ()>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.remove(key)
            .flat_map(move |finalizer| match finalizer {
                Some(finalizer) => finalizer.run(exit),
                None => Effect::unit(),
            })
            .uninterruptible()
    }

    /// Close the map and run every finalizer it holds with `exit`.
    ///
    /// A failing finalizer does not stop the others; the result fails with
    /// every finalizer failure, in sequence or in parallel depending on
    /// `strategy`. Closing an already closed map does nothing.
    pub fn release_all<R, E>(&self, exit: AnyExit, strategy: ExecutionStrategy) -> Effect<R, E, ()>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.state
            .modify(move |state| match state {
                State::Exited { .. } => Vec::new(),
                State::Running {
                    next_key,
                    finalizers,
                } => {
                    let next_key = *next_key;
                    let finalizers = std::mem::take(finalizers);
                    *state = State::Exited {
                        next_key,
                        exit: exit.clone(),
                    };
                    finalizers
                        .into_iter()
                        .rev()
                        .map(|(key, finalizer)| (key, finalizer, exit.clone()))
                        .collect()
                }
            })
            .flat_map(move |pending| {
                if !pending.is_empty() {
                    tracing::debug!(count = pending.len(), ?strategy, "releasing finalizers");
                }
                match strategy {
                    ExecutionStrategy::Sequential => run_sequential(pending),
                    ExecutionStrategy::Parallel => run_parallel(pending),
                }
            })
            .uninterruptible()
    }

    /// Take the finalizer stored under `key` out of the map without running
    /// it.
    pub fn remove<R, E>(&self, key: u64) -> Effect<R, E, Option<Finalizer>>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.state.modify(move |state| match state {
            State::Running { finalizers, .. } => finalizers.remove(&key),
            State::Exited { .. } => None,
        })
    }

    /// Store `finalizer` under `key`, returning the one it displaced.
    ///
    /// If the map is closed, `finalizer` runs right away.
    pub fn replace<R, E>(&self, key: u64, finalizer: Finalizer) -> Effect<R, E, Option<Finalizer>>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.state
            .modify(move |state| match state {
                State::Running { finalizers, .. } => Either::Right(finalizers.insert(key, finalizer)),
                State::Exited { exit, .. } => Either::Left((finalizer, exit.clone())),
            })
            .flat_map(|replaced| match replaced {
                Either::Right(previous) => Effect::succeed(previous),
                Either::Left((finalizer, exit)) => finalizer.run(exit).as_(None),
            })
    }
}

type Pending = Vec<(u64, Finalizer, AnyExit)>;

fn run_sequential<R, E>(pending: Pending) -> Effect<R, E, ()>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pending
        .into_iter()
        .fold(
            Effect::<R, Infallible, _>::succeed(Vec::new()),
            |done, (key, finalizer, exit)| {
                done.flat_map(move |mut exits| {
                    finalizer.run(exit).run_exit().map(move |outcome| {
                        exits.push((key, outcome));
                        exits
                    })
                })
            },
        )
        .widen_err()
        .flat_map(|exits| settle(exits, Exit::collect_all))
}

fn run_parallel<R, E>(pending: Pending) -> Effect<R, E, ()>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    Effect::<R, Infallible, _>::collect_all_par(pending.into_iter().map(|(key, finalizer, exit)| {
        finalizer
            .run::<R, Infallible>(exit)
            .run_exit()
            .map(move |outcome| (key, outcome))
    }))
    .widen_err()
    .flat_map(|exits| settle(exits, Exit::collect_all_par))
}

fn settle<R, E, C>(exits: Vec<(u64, Exit<Infallible, ()>)>, combine: C) -> Effect<R, E, ()>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    C: FnOnce(Vec<Exit<Infallible, ()>>) -> Option<Exit<Infallible, Vec<()>>>,
{
    for (key, exit) in &exits {
        if let Exit::Failure(cause) = exit {
            tracing::warn!(key, "finalizer failed:\n{}", cause.pretty());
        }
    }
    match combine(exits.into_iter().map(|(_, exit)| exit).collect()) {
        Some(Exit::Failure(cause)) => Effect::halt(cause.widen()),
        _ => Effect::unit(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    fn recording(log: &Ref<Vec<&'static str>>, name: &'static str) -> Finalizer {
        let log = log.clone();
        Finalizer::new(move |_| log.update(move |mut seen| {
            seen.push(name);
            seen
        }))
    }

    #[tokio::test]
    async fn release_all_runs_in_reverse_insertion_order() {
        let log = Ref::new(Vec::new());
        let map = ReleaseMap::new();
        let program = map
            .add::<(), String>(recording(&log, "first"))
            .zip(map.add(recording(&log, "second")))
            .zip(map.add(recording(&log, "third")))
            .zip_right(map.release_all(Exit::Success(()), ExecutionStrategy::Sequential));

        Runtime::current().run(program).await.into_result().unwrap();
        assert_eq!(log.get_now(), vec!["third", "second", "first"]);
        assert!(map.is_exited());
    }

    #[tokio::test]
    async fn early_release_then_release_all_runs_once() {
        let log = Ref::new(Vec::new());
        let map = ReleaseMap::new();
        let release_map = map.clone();
        let program = map
            .add::<(), String>(recording(&log, "only"))
            .flat_map(move |finalizer| {
                finalizer
                    .run(Exit::Success(()))
                    .zip_right(finalizer.run(Exit::Success(())))
                    .zip_right(release_map.release_all(Exit::Success(()), ExecutionStrategy::Sequential))
                    .zip_right(release_map.release_all(Exit::Success(()), ExecutionStrategy::Parallel))
            });

        Runtime::current().run(program).await.into_result().unwrap();
        assert_eq!(log.get_now(), vec!["only"]);
    }

    #[tokio::test]
    async fn add_after_close_runs_immediately() {
        let log = Ref::new(Vec::new());
        let map = ReleaseMap::new();
        let program = map
            .release_all::<(), String>(Exit::Success(()), ExecutionStrategy::Sequential)
            .zip_right(map.add_if_open(recording(&log, "late")));

        let key = Runtime::current().run(program).await.into_result().unwrap();
        assert_eq!(key, None);
        assert_eq!(log.get_now(), vec!["late"]);
        assert_eq!(map.next_key(), 1);
    }

    #[tokio::test]
    async fn failing_finalizer_does_not_stop_the_others() {
        let log = Ref::new(Vec::new());
        let map = ReleaseMap::new();
        let program = map
            .add::<(), String>(recording(&log, "first"))
            .zip(map.add(Finalizer::new(|_| Effect::die_message("broken"))))
            .zip(map.add(recording(&log, "third")))
            .zip_right(map.release_all(Exit::Success(()), ExecutionStrategy::Sequential));

        let exit = Runtime::current().run(program).await;
        assert!(exit.cause().is_some_and(|cause| cause.is_die()));
        assert_eq!(log.get_now(), vec!["third", "first"]);
    }

    #[tokio::test]
    async fn parallel_release_keeps_every_failure() {
        let map = ReleaseMap::new();
        let program = map
            .add::<(), String>(Finalizer::new(|_| Effect::die_message("left")))
            .zip(map.add(Finalizer::new(|_| Effect::die_message("right"))))
            .zip_right(map.release_all(Exit::Success(()), ExecutionStrategy::Parallel));

        let exit = Runtime::current().run(program).await;
        let mut messages: Vec<String> = exit
            .cause()
            .map(|cause| cause.defects().iter().map(|d| d.message().to_string()).collect())
            .unwrap_or_default();
        messages.sort();
        assert_eq!(messages, vec!["left", "right"]);
    }

    #[tokio::test]
    async fn replace_and_remove() {
        let log = Ref::new(Vec::new());
        let map = ReleaseMap::new();
        let again = map.clone();
        let replacement = recording(&log, "replacement");
        let program = map
            .add_if_open::<(), String>(recording(&log, "original"))
            .flat_map(move |key| {
                let key = key.unwrap_or_default();
                again.replace(key, replacement).zip(again.remove(key))
            });

        let (previous, removed) = Runtime::current().run(program).await.into_result().unwrap();
        assert!(previous.is_some());
        assert!(removed.is_some());
        assert!(!map.is_exited());
        assert!(log.get_now().is_empty());
    }
}
