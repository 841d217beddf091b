//! Running effects on tokio.
//!
//! A [`Runtime`] turns an [`Effect`] into a root fiber on a tokio runtime and
//! hands back its [`Exit`].
//!
//! ```rust
//! use undertow::{Effect, Runtime};
//!
//! let rt = Runtime::new().unwrap();
//! let exit = rt.block_on(Effect::<(), String, i32>::succeed(20).map(|n| n + 22));
//! assert_eq!(exit.unwrap(), 42);
//! ```
//!
//! Inside an async context, use [`Runtime::current`] and await
//! [`Runtime::run`]:
//!
//! ```rust
//! use undertow::{Effect, Exit, Runtime};
//!
//! # tokio_test::block_on(async {
//! let rt = Runtime::current();
//! let exit = rt.run(Effect::<(), String, i32>::fail("nope".to_string())).await;
//! assert_eq!(exit, Exit::fail("nope".to_string()));
//! # });
//! ```

mod config;

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;

pub use config::{log_failure, FailureReporter, RuntimeConfig};

use crate::cause::Defect;
use crate::effect::instr::{erase_cause, unerase_cause, AnyEnv, AnyValue};
use crate::effect::Effect;
use crate::error::FiberFailure;
use crate::exit::Exit;
use crate::fiber::context::{is_reportable, FiberContext};
use crate::fiber::driver::spawn_root;
use crate::fiber::FiberId;

pub(crate) struct RuntimeShared {
    pub(crate) handle: Handle,
    pub(crate) config: RuntimeConfig,
}

/// Executes effects as fibers on a tokio runtime. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<RuntimeShared>,
    owned: Option<Arc<tokio::runtime::Runtime>>,
}

impl Runtime {
    /// A runtime owning a new multi-threaded tokio runtime.
    pub fn new() -> io::Result<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    /// Like [`Runtime::new`] with custom settings.
    pub fn with_config(config: RuntimeConfig) -> io::Result<Self> {
        let tokio = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            shared: Arc::new(RuntimeShared {
                handle: tokio.handle().clone(),
                config,
            }),
            owned: Some(Arc::new(tokio)),
        })
    }

    /// A runtime spawning its fibers through an existing tokio handle.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            shared: Arc::new(RuntimeShared {
                handle,
                config: RuntimeConfig::default(),
            }),
            owned: None,
        }
    }

    /// A runtime on the tokio runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::from_handle(Handle::current())
    }

    /// Like [`Runtime::current`], without panicking.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::from_handle)
    }

    /// The same executor with different settings.
    pub fn configured(self, config: RuntimeConfig) -> Self {
        Self {
            shared: Arc::new(RuntimeShared {
                handle: self.shared.handle.clone(),
                config,
            }),
            owned: self.owned,
        }
    }

    /// The settings in use.
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Start `effect` as a root fiber.
    pub fn spawn<E, A>(&self, effect: Effect<(), E, A>) -> RootFiber<E, A>
    where
        E: Clone + Send + Sync + 'static,
        A: Send + 'static,
    {
        self.spawn_with(effect, ())
    }

    /// Start `effect` as a root fiber with `env` as its environment.
    pub fn spawn_with<R, E, A>(&self, effect: Effect<R, E, A>, env: R) -> RootFiber<E, A>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        A: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let reporter = Arc::clone(&self.shared.config.failure_reporter);
        // Only `effect` is interruptible; the root fiber itself starts
        // uninterruptible so that its exit is always handed over.
        let program = effect
            .interruptible()
            .run_exit()
            .zip(Effect::fiber_id())
            .flat_map(move |(exit, id)| {
                Effect::total(move || {
                    if let Exit::Failure(cause) = &exit {
                        if is_reportable(cause, id, &[]) {
                            reporter(id, &erase_cause(cause.clone()));
                        }
                    }
                    let _ = tx.send(exit);
                    Arc::new(()) as AnyValue
                })
            });
        let env: AnyEnv = Arc::new(env);
        let ctx = spawn_root(Arc::clone(&self.shared), program.into_node(), env);
        RootFiber { ctx, rx }
    }

    /// Run `effect` to completion.
    pub async fn run<E, A>(&self, effect: Effect<(), E, A>) -> Exit<E, A>
    where
        E: Clone + Send + Sync + 'static,
        A: Send + 'static,
    {
        self.spawn(effect).await_exit().await
    }

    /// Run `effect` to completion with `env` as its environment.
    pub async fn run_with<R, E, A>(&self, effect: Effect<R, E, A>, env: R) -> Exit<E, A>
    where
        R: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        A: Send + 'static,
    {
        self.spawn_with(effect, env).await_exit().await
    }

    /// Run `effect` from synchronous code, blocking the calling thread.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async context.
    pub fn block_on<E, A>(&self, effect: Effect<(), E, A>) -> Result<A, FiberFailure<E>>
    where
        E: Clone + Send + Sync + 'static,
        A: Send + 'static,
    {
        let run = self.run(effect);
        let exit = match &self.owned {
            Some(tokio) => tokio.block_on(run),
            None => self.shared.handle.block_on(run),
        };
        exit.into_result().map_err(FiberFailure::new)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.shared.config)
            .field("owns_executor", &self.owned.is_some())
            .finish()
    }
}

/// A fiber started by [`Runtime::spawn`], observed from outside the runtime.
pub struct RootFiber<E, A> {
    ctx: Arc<FiberContext>,
    rx: oneshot::Receiver<Exit<E, A>>,
}

impl<E, A> RootFiber<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    /// The root fiber's identity.
    pub fn id(&self) -> FiberId {
        self.ctx.id
    }

    /// Ask the fiber to stop. The request comes from outside any fiber, so
    /// its interruptor is [`FiberId::none`].
    pub fn interrupt(&self) {
        self.ctx.request_interrupt(FiberId::none());
    }

    /// Wait for the fiber's exit.
    pub async fn await_exit(self) -> Exit<E, A> {
        let RootFiber { ctx, rx } = self;
        let exit = match rx.await {
            Ok(exit) => exit,
            // The fiber ended before handing over its exit; use the exit it
            // recorded instead.
            Err(_) => match ctx.wait_done().await {
                Exit::Failure(cause) => Exit::Failure(unerase_cause(cause)),
                Exit::Success(_) => Exit::die(Defect::from_message(
                    "root fiber finished without producing an exit",
                )),
            },
        };
        ctx.wait_done().await;
        exit
    }
}

impl<E, A> fmt::Debug for RootFiber<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootFiber({})", self.ctx.id)
    }
}
