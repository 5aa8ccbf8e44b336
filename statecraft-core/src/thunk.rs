//! Thunks: actions that run code instead of reaching the reducer
//!
//! A [`Thunk`] carries a function of a [`Dispatcher`] and a
//! [`StateAccessor`]. An action type exposes its thunk variant through
//! [`ThunkAction`], and [`ThunkMiddleware`] intercepts those actions before the
//! reducer and runs them. Work a thunk schedules for later (a spawned future,
//! a timer) dispatches back into the store as a brand-new dispatch.
//!
//! ```ignore
//! #[derive(Action, Clone, Debug)]
//! enum AppAction {
//!     Loaded(Vec<Item>),
//!     #[action(thunk)]
//!     Run(Thunk<AppState, AppAction, AppEffect>),
//! }
//!
//! let load = Thunk::future("load_items", |dispatcher, _state| async move {
//!     let items = fetch_items().await;
//!     dispatcher.dispatch_action(AppAction::Loaded(items))
//! });
//! store.dispatch_action(AppAction::Run(load))?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::action::{Action, Effect, NoEffect};
use crate::dispatch::{DispatchError, Dispatcher, StateAccessor};
use crate::middleware::{Middleware, MiddlewareApi, Next};

type ThunkFn<S, A, E> =
    dyn Fn(&Dispatcher<A, E>, &StateAccessor<S>) -> Result<(), DispatchError> + Send + Sync;

/// A named, cloneable unit of dispatch logic.
///
/// Two thunks compare equal only if they are clones of one another.
pub struct Thunk<S, A, E = NoEffect> {
    name: &'static str,
    run: Arc<ThunkFn<S, A, E>>,
}

impl<S, A, E> Thunk<S, A, E>
where
    S: Send + Sync + 'static,
    A: Send + 'static,
    E: Send + Sync + 'static,
{
    /// Wrap a synchronous thunk body.
    pub fn new<F>(name: &'static str, run: F) -> Self
    where
        F: Fn(&Dispatcher<A, E>, &StateAccessor<S>) -> Result<(), DispatchError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            run: Arc::new(run),
        }
    }

    /// Wrap an async thunk body, spawned on the current tokio runtime.
    ///
    /// Running the thunk returns as soon as the future is spawned. Errors the
    /// future returns are logged; they cannot reach the original caller.
    pub fn future<F, Fut>(name: &'static str, make: F) -> Self
    where
        F: Fn(Dispatcher<A, E>, StateAccessor<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
    {
        Self::new(name, move |dispatcher, state| {
            let handle = tokio::runtime::Handle::try_current()
                .map_err(|_| DispatchError::NoRuntime { thunk: name })?;
            let fut = make(dispatcher.clone(), state.clone());
            handle.spawn(async move {
                if let Err(err) = fut.await {
                    tracing::warn!(thunk = name, error = %err, "Async thunk failed");
                }
            });
            Ok(())
        })
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the thunk body.
    pub fn run(
        &self,
        dispatcher: &Dispatcher<A, E>,
        state: &StateAccessor<S>,
    ) -> Result<(), DispatchError> {
        (self.run)(dispatcher, state)
    }
}

impl<S, A, E> Clone for Thunk<S, A, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            run: Arc::clone(&self.run),
        }
    }
}

impl<S, A, E> PartialEq for Thunk<S, A, E> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.run, &other.run)
    }
}

impl<S, A, E> fmt::Debug for Thunk<S, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Thunk").field(&self.name).finish()
    }
}

/// Exposes a thunk type's parameters, for `#[derive(Action)]`.
pub trait ThunkParts {
    /// State the thunk reads
    type State;
    /// Action type it dispatches
    type Action;
    /// Effect type it dispatches
    type Effect;
}

impl<S, A, E> ThunkParts for Thunk<S, A, E> {
    type State = S;
    type Action = A;
    type Effect = E;
}

/// Actions with a variant carrying a [`Thunk`].
///
/// `#[derive(Action)]` implements this for the variant marked
/// `#[action(thunk)]`.
pub trait ThunkAction: Action {
    /// State of the store the thunks run against
    type State: Send + Sync + 'static;
    /// Effect type of that store
    type Effect: Effect;

    /// The thunk, or the action back if it is not the thunk variant.
    fn into_thunk(self) -> Result<Thunk<Self::State, Self, Self::Effect>, Self>;
}

/// Runs thunk actions in place of forwarding them.
///
/// Thunks receive the store's full-pipeline dispatcher, so what they dispatch
/// passes through every middleware again, this one included.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThunkMiddleware;

impl ThunkMiddleware {
    /// Create the middleware
    pub fn new() -> Self {
        Self
    }
}

impl<S, A, E> Middleware<S, A, E> for ThunkMiddleware
where
    S: Send + Sync + 'static,
    A: ThunkAction<State = S, Effect = E>,
    E: Effect,
{
    fn wrap(&self, api: MiddlewareApi<S, A, E>, next: Next<A>) -> Next<A> {
        Arc::new(move |action: A| match action.into_thunk() {
            Ok(thunk) => {
                tracing::debug!(thunk = thunk.name(), "Running thunk");
                thunk.run(&api.dispatcher, &api.state)
            }
            Err(action) => next(action),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::testing::{CallCounter, Recorder, TestHarness};
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Notice {
        Done(u32),
    }

    impl Effect for Notice {
        fn name(&self) -> &'static str {
            "Done"
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    enum TestAction {
        Add(u32),
        Run(Thunk<u32, TestAction, Notice>),
    }

    impl Action for TestAction {
        fn name(&self) -> &'static str {
            match self {
                TestAction::Add(_) => "Add",
                TestAction::Run(_) => "Run",
            }
        }
    }

    impl ThunkAction for TestAction {
        type State = u32;
        type Effect = Notice;

        fn into_thunk(self) -> Result<Thunk<u32, TestAction, Notice>, Self> {
            match self {
                TestAction::Run(thunk) => Ok(thunk),
                other => Err(other),
            }
        }
    }

    fn reducer(action: &TestAction, state: Option<&u32>) -> u32 {
        let total = state.copied().unwrap_or(0);
        match action {
            TestAction::Add(n) => total + n,
            TestAction::Run(_) => total,
        }
    }

    fn add_twice() -> Thunk<u32, TestAction, Notice> {
        Thunk::new("add_twice", |dispatcher, state| {
            dispatcher.dispatch_action(TestAction::Add(1))?;
            let seen = state.get().map(|s| *s).unwrap_or_default();
            dispatcher.dispatch_action(TestAction::Add(seen))?;
            dispatcher.dispatch_effect(Notice::Done(seen))
        })
    }

    #[test]
    fn test_thunk_identity_equality() {
        let a = add_twice();
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, add_twice());
        assert_eq!(format!("{a:?}"), "Thunk(\"add_twice\")");
    }

    #[test]
    fn test_middleware_runs_thunk_instead_of_reducer() {
        let counter = Arc::new(CallCounter::new());
        let store: Store<u32, TestAction, Notice> = Store::builder(reducer)
            .middleware(Arc::clone(&counter))
            .middleware(ThunkMiddleware)
            .build(1);
        let notices = Recorder::new();
        store.add_listener(&notices);

        store.dispatch_action(TestAction::Run(add_twice())).unwrap();
        // 1 + 1, then + 2
        assert_eq!(*store.state(), 4);
        assert_eq!(counter.names(), vec!["Run", "Add", "Add"]);
        assert_eq!(*notices.values()[0], Notice::Done(2));
    }

    #[test]
    fn test_thunk_against_harness() {
        let mut harness = TestHarness::<TestAction, Notice>::new();
        let state = StateAccessor::from_fn(|| Some(Arc::new(5u32)));

        add_twice().run(&harness.dispatcher(), &state).unwrap();
        assert_eq!(
            harness.drain_actions(),
            vec![TestAction::Add(1), TestAction::Add(5)]
        );
    }

    #[test]
    fn test_async_thunk_without_runtime() {
        let thunk: Thunk<u32, TestAction, Notice> =
            Thunk::future("later", |_dispatcher, _state| async { Ok(()) });
        let harness = TestHarness::<TestAction, Notice>::new();
        let result = thunk.run(&harness.dispatcher(), &StateAccessor::from_fn(|| None));
        assert_eq!(result, Err(DispatchError::NoRuntime { thunk: "later" }));
    }

    #[tokio::test]
    async fn test_async_thunk_dispatches_later() {
        let store: Store<u32, TestAction, Notice> = Store::builder(reducer)
            .middleware(ThunkMiddleware)
            .build(0);
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
        let thunk: Thunk<u32, TestAction, Notice> = Thunk::future("delayed_add", move |dispatcher, _state| {
            let done_tx = done_tx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let result = dispatcher.dispatch_action(TestAction::Add(3));
                let _ = done_tx.send(());
                result
            }
        });

        store.dispatch_action(TestAction::Run(thunk)).unwrap();
        assert_eq!(*store.state(), 0);

        done_rx.recv().await.unwrap();
        assert_eq!(*store.state(), 3);
    }
}
