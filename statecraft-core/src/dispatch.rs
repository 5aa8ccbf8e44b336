//! Dispatch handles, state accessors and the reentrancy guard

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::action::Dispatchable;

/// Errors surfaced synchronously by `dispatch`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// An action tried to enter a reducer that is already running on this store.
    ///
    /// Raised when a reducer dispatches directly, or when two threads dispatch
    /// to the same store at once. It is never queued or retried.
    #[error("concurrent mutation of store {store}: an action was dispatched while the reducer was running")]
    ConcurrentMutation {
        /// The store whose reducer was busy
        store: StoreId,
    },
    /// The store behind a [`Dispatcher`] has been dropped.
    #[error("store was dropped before the dispatch reached it")]
    StoreDropped,
    /// An async thunk was dispatched outside a tokio runtime.
    #[error("no tokio runtime available to run async thunk `{thunk}`")]
    NoRuntime {
        /// Name of the thunk that could not be spawned
        thunk: &'static str,
    },
}

/// Process-unique store identity.
///
/// Used to deduplicate broadcasts so that a store reachable through several
/// composite paths still sees each action once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type DispatchFnInner<A, E> =
    dyn Fn(Dispatchable<A, E>) -> Result<(), DispatchError> + Send + Sync + 'static;

/// Cloneable handle that dispatches into a store from the top of its pipeline.
///
/// Middleware and thunks receive one of these. It holds the store weakly, so
/// it never keeps a store alive; dispatching after the store is gone yields
/// [`DispatchError::StoreDropped`].
pub struct Dispatcher<A, E> {
    inner: Arc<DispatchFnInner<A, E>>,
}

impl<A, E> Clone for Dispatcher<A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, E> fmt::Debug for Dispatcher<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl<A: 'static, E: 'static> Dispatcher<A, E> {
    /// Build a dispatcher from any dispatch function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Dispatchable<A, E>) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Dispatch an action or effect through the full pipeline.
    pub fn dispatch(&self, dispatchable: Dispatchable<A, E>) -> Result<(), DispatchError> {
        (self.inner)(dispatchable)
    }

    /// Dispatch an action through the full pipeline.
    pub fn dispatch_action(&self, action: A) -> Result<(), DispatchError> {
        self.dispatch(Dispatchable::Action(action))
    }

    /// Dispatch a new effect instance.
    pub fn dispatch_effect(&self, effect: E) -> Result<(), DispatchError> {
        self.dispatch(Dispatchable::effect(effect))
    }

    /// Re-dispatch an existing effect instance, preserving its identity.
    pub fn forward_effect(&self, effect: Arc<E>) -> Result<(), DispatchError> {
        self.dispatch(Dispatchable::Effect(effect))
    }

    /// A dispatcher that drops everything it receives.
    pub fn noop() -> Self {
        Self::from_fn(|_| Ok(()))
    }
}

type StateFn<S> = dyn Fn() -> Option<Arc<S>> + Send + Sync + 'static;

/// Read-only access to a store's current state.
///
/// Like [`Dispatcher`], it holds the store weakly: `get` returns `None` once
/// the store has been dropped.
pub struct StateAccessor<S> {
    inner: Arc<StateFn<S>>,
}

impl<S> Clone for StateAccessor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for StateAccessor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateAccessor").finish_non_exhaustive()
    }
}

impl<S: 'static> StateAccessor<S> {
    /// Build an accessor from a closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Option<Arc<S>> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Current state, or `None` if the store is gone.
    pub fn get(&self) -> Option<Arc<S>> {
        (self.inner)()
    }
}

/// Scoped "reducer in progress" flag.
///
/// Acquiring fails if the flag is already set. Dropping releases it, including
/// during unwinding, so a panicking reducer never wedges its store.
pub(crate) struct ReduceGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ReduceGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool, store: StoreId) -> Result<Self, DispatchError> {
        match flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(Self { flag }),
            Err(_) => {
                tracing::warn!(store = %store, "Rejected dispatch while reducer is running");
                Err(DispatchError::ConcurrentMutation { store })
            }
        }
    }
}

impl Drop for ReduceGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
