//! Middleware chain
//!
//! A middleware wraps the "next" dispatch function and returns a new one.
//! Given `[m1, m2, m3]`, the chain is folded from the last to the first, so
//! `m1` sees an action first and `m3` hands it to the reducer:
//!
//! ```text
//! dispatch -> m1 -> m2 -> m3 -> reducer
//! ```
//!
//! A middleware may forward an action unchanged, replace it, drop it by never
//! calling `next`, or issue extra dispatches through [`MiddlewareApi::dispatcher`],
//! which re-enters the chain from the top. Effects never pass through middleware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dispatch::{DispatchError, Dispatcher, StateAccessor};

/// A composed dispatch function for actions.
pub type Next<A> = Arc<dyn Fn(A) -> Result<(), DispatchError> + Send + Sync>;

/// What a middleware gets to work with besides `next`.
pub struct MiddlewareApi<S, A, E> {
    /// Dispatches through the whole pipeline, starting at the first middleware
    pub dispatcher: Dispatcher<A, E>,
    /// Reads the store's current state
    pub state: StateAccessor<S>,
}

impl<S, A, E> Clone for MiddlewareApi<S, A, E> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            state: self.state.clone(),
        }
    }
}

/// Intercepts actions on their way to the reducer.
pub trait Middleware<S, A, E>: Send + Sync + 'static {
    /// Wrap `next`, returning the dispatch function that runs before it.
    ///
    /// Called each time a chain containing this middleware is built: once for
    /// the store's pipeline, once more for the chain that carries `Init` when
    /// the store seeds its own state, and again whenever a composite rebuilds
    /// its chain. State shared between those chains belongs behind an `Arc`.
    fn wrap(&self, api: MiddlewareApi<S, A, E>, next: Next<A>) -> Next<A>;
}

impl<S, A, E, M> Middleware<S, A, E> for Arc<M>
where
    M: Middleware<S, A, E> + ?Sized,
{
    fn wrap(&self, api: MiddlewareApi<S, A, E>, next: Next<A>) -> Next<A> {
        (**self).wrap(api, next)
    }
}

/// Handle for a middleware added at runtime, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MiddlewareId(u64);

impl MiddlewareId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Middleware built from a closure, see [`middleware_fn`].
pub struct FnMiddleware<F> {
    handle: Arc<F>,
}

/// Turn a closure into a middleware.
///
/// The closure runs for every action with the API handle, the next stage and
/// the action itself.
///
/// ```ignore
/// let log_and_forward = middleware_fn(|_api: &MiddlewareApi<AppState, AppAction, NoEffect>,
///                                      next: &Next<AppAction>,
///                                      action: AppAction| {
///     tracing::info!(action = action.name(), "seen");
///     next(action)
/// });
/// ```
pub fn middleware_fn<S, A, E, F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&MiddlewareApi<S, A, E>, &Next<A>, A) -> Result<(), DispatchError>
        + Send
        + Sync
        + 'static,
{
    FnMiddleware {
        handle: Arc::new(f),
    }
}

impl<S, A, E, F> Middleware<S, A, E> for FnMiddleware<F>
where
    S: 'static,
    A: 'static,
    E: 'static,
    F: Fn(&MiddlewareApi<S, A, E>, &Next<A>, A) -> Result<(), DispatchError>
        + Send
        + Sync
        + 'static,
{
    fn wrap(&self, api: MiddlewareApi<S, A, E>, next: Next<A>) -> Next<A> {
        let handle = Arc::clone(&self.handle);
        Arc::new(move |action| handle(&api, &next, action))
    }
}

/// Fold `middlewares` around `terminal`, first middleware outermost.
pub(crate) fn compose<S: 'static, A: 'static, E: 'static>(
    middlewares: &[Arc<dyn Middleware<S, A, E>>],
    api: &MiddlewareApi<S, A, E>,
    terminal: Next<A>,
) -> Next<A> {
    middlewares
        .iter()
        .rev()
        .fold(terminal, |next, middleware| middleware.wrap(api.clone(), next))
}
