//! Store integration: publish qualifying local mutations, apply remote ones.
//!
//! ```text
//!  store.commit ─► hook(mutation, state) ─► predicate ─► strategy.share
//!                       ▲ guard held? skip
//!                       │
//!  strategy listener ─► decode ─► guard ─► store.commit(type, payload)
//! ```
//!
//! The re-entrancy guard belongs to one sharer and is held only on the
//! thread applying a remote mutation. While that commit runs, the store's
//! own hook sees the guard and declines to publish it again, which would
//! otherwise bounce it between tabs forever. Local mutations committed on
//! other threads at the same time are unaffected.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use serde_json::Value;

use crate::error::SyncError;
use crate::host::Host;
use crate::protocol::Mutation;
use crate::strategy::{create_default_strategy, Strategy};
use crate::subscription::Subscription;

/// Called by a store after every local mutation with the resulting state.
/// Resolves to whether the mutation was published.
pub type MutationHook = Arc<dyn Fn(&Mutation, &Value) -> BoxFuture<'static, bool> + Send + Sync>;

type FilterFn = Arc<dyn Fn(&Mutation, &Value) -> bool + Send + Sync>;
type AsyncFilterFn = Arc<dyn Fn(&Mutation, &Value) -> BoxFuture<'static, bool> + Send + Sync>;

/// The application store being kept in sync.
pub trait Store: Send + Sync {
    /// Register `hook` to run after each local mutation.
    fn subscribe(&self, hook: MutationHook) -> Subscription;

    /// Apply a mutation received from another tab.
    ///
    /// Hooks must be invoked before this returns, on the calling thread.
    fn commit(&self, mutation_type: &str, payload: Value);
}

/// Decides which local mutations are shared.
#[derive(Clone)]
pub enum Predicate {
    /// Share mutations whose type is in the set.
    Types(HashSet<String>),
    /// Share when the function returns true.
    Filter(FilterFn),
    /// Share when the returned future resolves to true.
    AsyncFilter(AsyncFilterFn),
}

impl Predicate {
    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Types(types.into_iter().map(Into::into).collect())
    }

    pub fn filter<F>(f: F) -> Self
    where
        F: Fn(&Mutation, &Value) -> bool + Send + Sync + 'static,
    {
        Self::Filter(Arc::new(f))
    }

    pub fn async_filter<F, Fut>(f: F) -> Self
    where
        F: Fn(&Mutation, &Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self::AsyncFilter(Arc::new(move |mutation: &Mutation, state: &Value| {
            f(mutation, state).boxed()
        }))
    }

    fn evaluate(&self, mutation: &Mutation, state: &Value) -> BoxFuture<'static, bool> {
        match self {
            Self::Types(types) => future::ready(types.contains(&mutation.mutation_type)).boxed(),
            Self::Filter(f) => future::ready(f(mutation, state)).boxed(),
            Self::AsyncFilter(f) => f(mutation, state),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Types(types) => f.debug_tuple("Types").field(types).finish(),
            Self::Filter(_) => f.write_str("Filter(..)"),
            Self::AsyncFilter(_) => f.write_str("AsyncFilter(..)"),
        }
    }
}

static NEXT_GUARD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Guards held on this thread, innermost last.
    static HELD: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Marks the span during which a remote mutation is being applied.
///
/// Held per thread: entering on one thread is invisible to every other.
/// Clones share the same guard.
#[derive(Debug, Clone)]
pub struct ReentrancyGuard {
    id: u64,
}

impl Default for ReentrancyGuard {
    fn default() -> Self {
        Self {
            id: NEXT_GUARD_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl ReentrancyGuard {
    /// Whether the guard is held on the calling thread.
    pub fn is_active(&self) -> bool {
        HELD.with(|held| held.borrow().contains(&self.id))
    }

    /// Hold the guard on this thread until the returned scope is dropped.
    /// Scopes nest.
    pub fn enter(&self) -> GuardScope {
        HELD.with(|held| held.borrow_mut().push(self.id));
        GuardScope {
            id: self.id,
            _thread: PhantomData,
        }
    }
}

/// Releases the guard on drop, including during a panic.
#[must_use = "the guard is released as soon as the scope is dropped"]
pub struct GuardScope {
    id: u64,
    // Must be dropped on the thread that entered.
    _thread: PhantomData<*const ()>,
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        let _ = HELD.try_with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|id| *id == self.id) {
                held.remove(pos);
            }
        });
    }
}

/// Setup arguments for [`MutationSharer`].
#[derive(Clone, Default)]
pub struct SharerOptions {
    /// Required
    pub predicate: Option<Predicate>,
    /// Defaults to the best transport the host supports
    pub strategy: Option<Arc<dyn Strategy>>,
}

impl SharerOptions {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate: Some(predicate),
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Connects one store to one strategy. Cloning shares the guard.
#[derive(Clone)]
pub struct MutationSharer {
    predicate: Arc<Predicate>,
    strategy: Arc<dyn Strategy>,
    guard: ReentrancyGuard,
}

impl MutationSharer {
    /// Validate `options`, selecting a strategy for the current context when
    /// none is given.
    pub fn new(options: SharerOptions) -> Result<Self, SyncError> {
        Self::with_host(options, &Host::detect())
    }

    /// Like [`new`](Self::new), selecting from `host` instead.
    pub fn with_host(options: SharerOptions, host: &Host) -> Result<Self, SyncError> {
        let predicate = options.predicate.ok_or_else(|| {
            SyncError::Configuration(
                "Either a list of accepted mutations or a predicate function must be supplied"
                    .into(),
            )
        })?;

        let strategy = match options.strategy {
            Some(strategy) => strategy,
            None => create_default_strategy(host)?,
        };

        Ok(Self {
            predicate: Arc::new(predicate),
            strategy,
            guard: ReentrancyGuard::default(),
        })
    }

    pub fn strategy(&self) -> &Arc<dyn Strategy> {
        &self.strategy
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// True while this thread is committing a remote mutation.
    pub fn is_applying_remote(&self) -> bool {
        self.guard.is_active()
    }

    /// Hook body for a local mutation.
    ///
    /// The guard is checked before this returns, so a mutation committed on
    /// behalf of another tab resolves to `false` without consulting the
    /// predicate. Failures to publish are logged and dropped.
    pub fn on_mutation(&self, mutation: &Mutation, state: &Value) -> BoxFuture<'static, bool> {
        if self.guard.is_active() {
            return future::ready(false).boxed();
        }

        let verdict = self.predicate.evaluate(mutation, state);
        let strategy = self.strategy.clone();
        let mutation = mutation.clone();

        async move {
            if !verdict.await {
                return false;
            }
            match mutation.to_value().and_then(|value| strategy.share(&value)) {
                Ok(()) => true,
                Err(e) => {
                    log::error!("Unable to share mutation '{}': {e}", mutation.mutation_type);
                    false
                }
            }
        }
        .boxed()
    }

    /// Apply a message delivered by the strategy to `store`.
    ///
    /// Returns false when the message is not a mutation.
    pub fn apply_remote(&self, message: Value, store: &dyn Store) -> bool {
        apply_remote(&self.guard, message, store)
    }

    /// Wire the sharer into `store` in both directions.
    pub fn install(&self, store: Arc<dyn Store>) -> Result<Subscription, SyncError> {
        let sharer = self.clone();
        let local = store.subscribe(Arc::new(move |mutation: &Mutation, state: &Value| {
            sharer.on_mutation(mutation, state)
        }));

        let guard = self.guard.clone();
        let remote = self
            .strategy
            .add_event_listener(Arc::new(move |message: Value| {
                apply_remote(&guard, message, store.as_ref());
            }));

        match remote {
            Ok(remote) => {
                log::debug!("Sharing mutations over {}", self.strategy.kind());
                Ok(local.chain(remote))
            }
            Err(e) => {
                local.unsubscribe();
                Err(e)
            }
        }
    }
}

fn apply_remote(guard: &ReentrancyGuard, message: Value, store: &dyn Store) -> bool {
    let mutation = match Mutation::from_value(message) {
        Ok(mutation) => mutation,
        Err(e) => {
            log::error!("Unable to parse shared mutation data: {e}");
            return false;
        }
    };

    let _scope = guard.enter();
    store.commit(&mutation.mutation_type, mutation.payload);
    true
}
