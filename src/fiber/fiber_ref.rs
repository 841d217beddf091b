//! Fiber-local state.
//!
//! A [`FiberRef`] holds one value per fiber. A forked child starts from the
//! parent's value passed through `on_fork`; when the parent joins the child,
//! the child's final value is merged back with `on_join`.
//!
//! ```rust
//! use undertow::{Effect, FiberRef, Runtime};
//!
//! let rt = Runtime::new().unwrap();
//! let program = FiberRef::make::<(), String>(1_u32).flat_map(|r| {
//!     let child = r.update(|n| n + 10).fork();
//!     child
//!         .flat_map(|fiber| fiber.join())
//!         .flat_map(move |_| r.get())
//! });
//!
//! assert_eq!(rt.block_on(program).unwrap(), 11);
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::context::FiberContext;
use crate::effect::instr::{self, mismatch, Instr, Node, Value};
use crate::effect::Effect;

pub(crate) type RefValue = Arc<dyn Any + Send + Sync>;
type ForkFn = Arc<dyn Fn(&RefValue) -> Option<RefValue> + Send + Sync>;
type JoinFn = Arc<dyn Fn(&RefValue, &RefValue) -> Option<RefValue> + Send + Sync>;

/// Current value of every fiber ref a fiber has touched, keyed by ref.
pub(crate) type FiberRefs = HashMap<u64, (Arc<FiberRefMeta>, RefValue)>;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

pub(crate) struct FiberRefMeta {
    key: u64,
    initial: RefValue,
    fork: ForkFn,
    join: JoinFn,
}

impl FiberRefMeta {
    pub(crate) fn key(&self) -> u64 {
        self.key
    }

    pub(crate) fn initial(&self) -> RefValue {
        Arc::clone(&self.initial)
    }
}

/// Copy a parent's refs into a child, applying each ref's fork function.
pub(crate) fn fork_refs(refs: &FiberRefs) -> FiberRefs {
    refs.iter()
        .map(|(key, (meta, value))| {
            let forked = (meta.fork)(value).unwrap_or_else(|| Arc::clone(value));
            (*key, (Arc::clone(meta), forked))
        })
        .collect()
}

/// Merge a finished child's refs into the joining fiber.
pub(crate) fn inherit_refs_node(child: Arc<FiberContext>) -> Node {
    instr::suspend_node(move || {
        child
            .final_refs()
            .into_values()
            .fold(instr::unit_node(), |next, (meta, child_value)| {
                let join = Arc::clone(&meta.join);
                let merge = Box::new(Instr::ModifyFiberRef(
                    meta,
                    Box::new(move |current: RefValue| {
                        let merged = join(&current, &child_value).unwrap_or(current);
                        Ok((Box::new(()) as Value, merged))
                    }),
                ));
                instr::flat_map_node(merge, move |_| next)
            })
    })
}

/// A handle to a fiber-local value of type `A`.
pub struct FiberRef<A> {
    meta: Arc<FiberRefMeta>,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            meta: Arc::clone(&self.meta),
            _marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for FiberRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRef")
            .field("key", &self.meta.key)
            .finish()
    }
}

impl<A> FiberRef<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// A ref whose children start from the parent's value, and whose
    /// joined value replaces the parent's.
    pub fn make<R, E>(initial: A) -> Effect<R, E, FiberRef<A>>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        Self::make_with(initial, A::clone, |_, child: &A| child.clone())
    }

    /// A ref with custom fork and join behaviour.
    pub fn make_with<R, E, F, J>(initial: A, on_fork: F, on_join: J) -> Effect<R, E, FiberRef<A>>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: Fn(&A) -> A + Send + Sync + 'static,
        J: Fn(&A, &A) -> A + Send + Sync + 'static,
    {
        Effect::suspend(move || {
            let meta = Arc::new(FiberRefMeta {
                key: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
                initial: Arc::new(initial),
                fork: Arc::new(move |value: &RefValue| {
                    value
                        .downcast_ref::<A>()
                        .map(|a| Arc::new(on_fork(a)) as RefValue)
                }),
                join: Arc::new(move |parent: &RefValue, child: &RefValue| {
                    match (parent.downcast_ref::<A>(), child.downcast_ref::<A>()) {
                        (Some(p), Some(c)) => Some(Arc::new(on_join(p, c)) as RefValue),
                        _ => None,
                    }
                }),
            });
            let handle: FiberRef<A> = FiberRef {
                meta: Arc::clone(&meta),
                _marker: PhantomData,
            };
            Effect::from_node(instr::flat_map_node(
                Box::new(Instr::NewFiberRef(meta)),
                move |_| instr::succeed_node(handle),
            ))
        })
    }

    /// Atomically update this fiber's value and return a result computed
    /// from it.
    pub fn modify<R, E, B, F>(&self, f: F) -> Effect<R, E, B>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        B: Send + 'static,
        F: FnOnce(A) -> (B, A) + Send + 'static,
    {
        Effect::from_node(Box::new(Instr::ModifyFiberRef(
            Arc::clone(&self.meta),
            Box::new(move |current: RefValue| {
                let a = current
                    .downcast_ref::<A>()
                    .cloned()
                    .ok_or_else(|| mismatch::<A>("another fiber ref value"))?;
                let (b, next) = f(a);
                Ok((Box::new(b) as Value, Arc::new(next) as RefValue))
            }),
        )))
    }

    /// Read this fiber's value.
    pub fn get<R, E>(&self) -> Effect<R, E, A>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.modify(|a| (a.clone(), a))
    }

    /// Replace this fiber's value.
    pub fn set<R, E>(&self, value: A) -> Effect<R, E, ()>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        self.modify(move |_| ((), value))
    }

    /// Apply `f` to this fiber's value.
    pub fn update<R, E, F>(&self, f: F) -> Effect<R, E, ()>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce(A) -> A + Send + 'static,
    {
        self.modify(move |a| ((), f(a)))
    }

    /// Run `effect` with the ref temporarily set to `value`, restoring the
    /// previous value afterwards however `effect` ends.
    pub fn locally<R, E, B>(&self, value: A, effect: Effect<R, E, B>) -> Effect<R, E, B>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        B: Send + 'static,
    {
        let restore = self.clone();
        Effect::bracket(
            self.modify(move |old| (old, value)),
            move |_: &A| effect,
            move |old: A| restore.set(old),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;

    #[tokio::test]
    async fn test_child_sees_forked_value_and_parent_keeps_its_own() {
        let rt = Runtime::current();
        let program = FiberRef::make_with::<(), (), _, _>(
            10_i32,
            |n| n + 1,
            |parent, _child| *parent,
        )
        .flat_map(|r| {
            let child_view = r.get();
            child_view
                .fork()
                .flat_map(|fiber| fiber.join())
                .zip(r.get())
        });
        let exit = rt.run(program).await;
        assert_eq!(exit.into_result().unwrap(), (11, 10));
    }

    #[tokio::test]
    async fn test_join_merges_with_custom_function() {
        let rt = Runtime::current();
        let program = FiberRef::make_with::<(), (), _, _>(
            vec!["root".to_string()],
            Clone::clone,
            |parent: &Vec<String>, child: &Vec<String>| {
                let mut merged = parent.clone();
                merged.extend(child.iter().filter(|s| !parent.contains(s)).cloned());
                merged
            },
        )
        .flat_map(|r| {
            let push = r.update(|mut v| {
                v.push("child".to_string());
                v
            });
            let read = r.get();
            push.fork().flat_map(|f| f.join()).flat_map(move |_| read)
        });
        let exit = rt.run(program).await;
        assert_eq!(
            exit.into_result().unwrap(),
            vec!["root".to_string(), "child".to_string()]
        );
    }

    #[tokio::test]
    async fn test_locally_restores_previous_value() {
        let rt = Runtime::current();
        let program = FiberRef::make::<(), ()>("outer").flat_map(|r| {
            let inside = r.locally("inner", r.get());
            inside.zip(r.get())
        });
        let exit = rt.run(program).await;
        assert_eq!(exit.into_result().unwrap(), ("inner", "outer"));
    }
}
