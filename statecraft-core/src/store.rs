//! Centralized state store with reducer pattern

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};

use crate::action::{Action, Dispatchable, Effect, InitAction, NoEffect};
use crate::child::{ChildDelegate, ChildStore};
use crate::composite::{Broadcast, StoreNode};
use crate::config::StoreOptions;
use crate::dispatch::{DispatchError, Dispatcher, ReduceGuard, StateAccessor, StoreId};
use crate::middleware::{compose, Middleware, MiddlewareApi, Next};
use crate::registry::{EffectObserver, Listener, ObserverId, Subscriber, SubscriberId};
use crate::subscription::Subscription;

/// A reducer: computes the next state from an action and the current state.
///
/// The state is `None` only for the `Init` action of a store built without an
/// initial state.
pub type Reducer<S, A> = Arc<dyn Fn(&A, Option<&S>) -> S + Send + Sync>;

/// Centralized state store with Redux-like reducer pattern
///
/// The store holds the application state and provides a single point
/// for state changes through [`dispatch`](Store::dispatch). It is a cheap
/// cloneable handle; clones share one store.
///
/// # Type Parameters
/// * `S` - The application state type
/// * `A` - The action type (must implement `Action`)
/// * `E` - The effect type (defaults to [`NoEffect`])
///
/// # Example
/// ```
/// use std::sync::{Arc, Mutex};
/// use statecraft_core::{Action, Store};
///
/// #[derive(Clone, Debug)]
/// enum Counter {
///     Increment,
///     Decrement,
/// }
///
/// impl Action for Counter {
///     fn name(&self) -> &'static str {
///         match self {
///             Counter::Increment => "Increment",
///             Counter::Decrement => "Decrement",
///         }
///     }
/// }
///
/// fn reducer(action: &Counter, state: Option<&i32>) -> i32 {
///     let count = state.copied().unwrap_or(0);
///     match action {
///         Counter::Increment => count + 1,
///         Counter::Decrement => count - 1,
///     }
/// }
///
/// let store: Store<i32, Counter> = Store::new(reducer, 7);
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let subscriber = Arc::new(move |count: &i32| sink.lock().unwrap().push(*count));
///
/// store.subscribe(&subscriber);
/// store.dispatch_action(Counter::Increment).unwrap();
/// assert_eq!(*store.state(), 8);
/// assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
/// ```
pub struct Store<S, A, E = NoEffect> {
    inner: Arc<StoreInner<S, A, E>>,
}

impl<S, A, E> Clone for Store<S, A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A, E> std::fmt::Debug for Store<S, A, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

pub(crate) struct StoreInner<S, A, E> {
    id: StoreId,
    name: Option<String>,
    pub(crate) hub: crate::registry::Hub<S, E>,
    reducer: Reducer<S, A>,
    reducing: AtomicBool,
    middlewares: Vec<Arc<dyn Middleware<S, A, E>>>,
    pipeline: Next<A>,
    children: Mutex<Vec<Weak<dyn ChildDelegate<S, A, E>>>>,
}

/// Builder for [`Store`], see [`Store::builder`].
pub struct StoreBuilder<S, A, E = NoEffect> {
    reducer: Reducer<S, A>,
    middlewares: Vec<Arc<dyn Middleware<S, A, E>>>,
    options: StoreOptions,
}

impl<S, A, E> StoreBuilder<S, A, E>
where
    S: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    /// Append a middleware. The first one added sees actions first.
    pub fn middleware<M: Middleware<S, A, E>>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Replace the store options.
    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Set whether subscriptions skip structurally equal repeats (default `true`).
    pub fn skip_repeats(mut self, skip_repeats: bool) -> Self {
        self.options.skip_repeats = skip_repeats;
        self
    }

    /// Label the store in log output.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Build the store with an explicit initial state.
    pub fn build(self, state: S) -> Store<S, A, E> {
        Store::assemble(self, StoreId::next(), Arc::new(state))
    }

    /// Build the store, seeding its state by dispatching `Init`.
    ///
    /// `Init` runs through the middleware chain like any action and reaches
    /// the reducer with no state. Middleware sees no state before it and the
    /// seeded state after it. Dispatches a middleware makes while `Init` is in
    /// flight reduce onto the seeded state; effects are dropped since nothing
    /// can listen yet. If a middleware drops `Init`, the reducer runs on it
    /// directly so the store always starts with a state.
    pub fn build_init(self) -> Store<S, A, E>
    where
        A: InitAction,
    {
        let id = StoreId::next();
        let seed = Seed::new(id, Arc::clone(&self.reducer));
        let chain: Arc<OnceLock<Next<A>>> = Arc::new(OnceLock::new());

        let api = MiddlewareApi {
            dispatcher: {
                let chain = Arc::downgrade(&chain);
                Dispatcher::from_fn(move |dispatchable: Dispatchable<A, E>| match dispatchable {
                    Dispatchable::Action(action) => {
                        match chain.upgrade().and_then(|chain| chain.get().cloned()) {
                            Some(next) => next(action),
                            None => Err(DispatchError::StoreDropped),
                        }
                    }
                    Dispatchable::Effect(effect) => {
                        tracing::debug!(store = %id, effect = %effect.name(), "Effect dropped during Init");
                        Ok(())
                    }
                })
            },
            state: {
                let seed = Arc::clone(&seed);
                StateAccessor::from_fn(move || seed.get())
            },
        };
        let init = compose(&self.middlewares, &api, seed.terminal());
        let _ = chain.set(Arc::clone(&init));
        if let Err(err) = init(A::init()) {
            tracing::warn!(store = %id, error = %err, "Init dispatch failed");
        }

        let state = seed.finish();
        Store::assemble(self, id, state)
    }
}

/// Reducer stage of the chain that seeds a new store or child slice.
///
/// The first action reduces from `None`, later ones from the seeded value.
struct Seed<T, A> {
    store: StoreId,
    reducer: Reducer<T, A>,
    reducing: AtomicBool,
    state: RwLock<Option<Arc<T>>>,
}

impl<T, A> Seed<T, A>
where
    T: Send + Sync + 'static,
    A: Action,
{
    fn new(store: StoreId, reducer: Reducer<T, A>) -> Arc<Self> {
        Arc::new(Self {
            store,
            reducer,
            reducing: AtomicBool::new(false),
            state: RwLock::new(None),
        })
    }

    fn get(&self) -> Option<Arc<T>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn terminal(self: &Arc<Self>) -> Next<A> {
        let seed = Arc::clone(self);
        Arc::new(move |action: A| -> Result<(), DispatchError> {
            let _guard = ReduceGuard::acquire(&seed.reducing, seed.store)?;
            let old = seed.get();
            let new = Arc::new((seed.reducer)(&action, old.as_deref()));
            *seed.state.write().unwrap_or_else(PoisonError::into_inner) = Some(new);
            tracing::trace!(store = %seed.store, action = %action.name(), "Seeded state");
            Ok(())
        })
    }

    /// The seeded state, falling back to reducing a bare `Init`.
    fn finish(&self) -> Arc<T>
    where
        A: InitAction,
    {
        self.get().unwrap_or_else(|| {
            tracing::warn!(store = %self.store, "Init never reached the reducer, seeding directly");
            Arc::new((self.reducer)(&A::init(), None))
        })
    }
}

impl<S, A, E> Store<S, A, E>
where
    S: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    /// Create a store with an initial state and default options.
    pub fn new<R>(reducer: R, state: S) -> Self
    where
        R: Fn(&A, Option<&S>) -> S + Send + Sync + 'static,
    {
        Self::builder(reducer).build(state)
    }

    /// Create a store whose state comes from running the reducer on `Init`.
    pub fn init<R>(reducer: R) -> Self
    where
        A: InitAction,
        R: Fn(&A, Option<&S>) -> S + Send + Sync + 'static,
    {
        Self::builder(reducer).build_init()
    }

    /// Start building a store with middleware or options.
    pub fn builder<R>(reducer: R) -> StoreBuilder<S, A, E>
    where
        R: Fn(&A, Option<&S>) -> S + Send + Sync + 'static,
    {
        StoreBuilder {
            reducer: Arc::new(reducer),
            middlewares: Vec::new(),
            options: StoreOptions::default(),
        }
    }

    fn assemble(builder: StoreBuilder<S, A, E>, id: StoreId, state: Arc<S>) -> Self {
        let StoreBuilder {
            reducer,
            middlewares,
            options,
        } = builder;

        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner<S, A, E>>| {
            let api = MiddlewareApi {
                dispatcher: dispatcher_for(weak.clone()),
                state: accessor_for(weak.clone()),
            };
            let terminal: Next<A> = {
                let weak = weak.clone();
                Arc::new(move |action: A| match weak.upgrade() {
                    Some(inner) => inner.reduce(action),
                    None => Err(DispatchError::StoreDropped),
                })
            };
            StoreInner {
                id,
                name: options.name.clone(),
                hub: crate::registry::Hub::new(state, options.skip_repeats),
                reducer,
                reducing: AtomicBool::new(false),
                pipeline: compose(&middlewares, &api, terminal),
                middlewares: middlewares.clone(),
                children: Mutex::new(Vec::new()),
            }
        });

        tracing::debug!(
            store = %id,
            name = ?options.name,
            middlewares = middlewares.len(),
            "Store created"
        );
        Self { inner }
    }

    /// Process-unique identity of this store
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// Name from the store options, if any
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Get the current state
    pub fn state(&self) -> Arc<S> {
        self.inner.hub.state()
    }

    /// Dispatch an action or effect.
    ///
    /// Actions run through the middleware chain and the reducer, then every
    /// subscription is notified before this returns. Effects skip both and go
    /// straight to listeners.
    pub fn dispatch(&self, dispatchable: Dispatchable<A, E>) -> Result<(), DispatchError> {
        self.inner.dispatch(dispatchable)
    }

    /// Dispatch an action.
    pub fn dispatch_action(&self, action: A) -> Result<(), DispatchError> {
        self.inner.dispatch(Dispatchable::Action(action))
    }

    /// Dispatch a new effect instance.
    pub fn dispatch_effect(&self, effect: E) -> Result<(), DispatchError> {
        self.inner.dispatch(Dispatchable::effect(effect))
    }

    /// A handle that dispatches into this store without keeping it alive.
    pub fn dispatcher(&self) -> Dispatcher<A, E> {
        dispatcher_for(Arc::downgrade(&self.inner))
    }

    /// A handle that reads this store's state without keeping it alive.
    pub fn state_accessor(&self) -> StateAccessor<S> {
        accessor_for(Arc::downgrade(&self.inner))
    }

    /// Subscribe to the full state.
    ///
    /// Re-subscribing the same `Arc` replaces its previous subscription. The
    /// subscriber receives the current state before this returns.
    pub fn subscribe<Sub>(&self, subscriber: &Arc<Sub>)
    where
        S: PartialEq,
        Sub: Subscriber<S> + 'static,
    {
        self.subscribe_with(subscriber, |sub| sub);
    }

    /// Subscribe to a slice of the state built by `selector`.
    ///
    /// ```ignore
    /// store.subscribe_with(&router, |s| s.select(|state| state.navigation.clone()));
    /// ```
    pub fn subscribe_with<T, Sub, F>(&self, subscriber: &Arc<Sub>, selector: F)
    where
        T: PartialEq + 'static,
        Sub: Subscriber<T> + 'static,
        F: FnOnce(Subscription<S>) -> Subscription<S, T>,
    {
        tracing::trace!(store = %self.inner.id, subscriber = ?SubscriberId::of(subscriber), "Subscribe");
        self.inner.hub.subscribe(subscriber, selector);
    }

    /// Remove a subscriber. Returns `false` if it was not subscribed.
    pub fn unsubscribe<Sub: ?Sized>(&self, subscriber: &Arc<Sub>) -> bool {
        self.inner.hub.unsubscribe(SubscriberId::of(subscriber))
    }

    /// Number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.hub.subscriber_count()
    }

    /// Listen to every effect.
    pub fn add_listener<L>(&self, listener: &Arc<L>)
    where
        L: Listener<Arc<E>> + 'static,
    {
        self.inner
            .hub
            .add_listener(listener, |effect: &Arc<E>| Some(Arc::clone(effect)));
    }

    /// Listen to the effects `select` maps to `Some`.
    pub fn add_listener_with<T, L, F>(&self, listener: &Arc<L>, select: F)
    where
        T: 'static,
        L: Listener<T> + 'static,
        F: Fn(&Arc<E>) -> Option<T> + Send + Sync + 'static,
    {
        self.inner.hub.add_listener(listener, select);
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_listener<L: ?Sized>(&self, listener: &Arc<L>) -> bool {
        self.inner.hub.remove_listener(SubscriberId::of(listener))
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.hub.listener_count()
    }

    /// Spawn a child store with its own reducer and initial slice.
    ///
    /// The child shares this store's dispatch pipeline: actions dispatched to
    /// either reach both reducers in one pass.
    pub fn child_store<C, R>(&self, reducer: R, state: C) -> ChildStore<S, C, A, E>
    where
        C: Send + Sync + 'static,
        R: Fn(&A, Option<&C>) -> C + Send + Sync + 'static,
    {
        ChildStore::attach(self.clone(), StoreId::next(), Arc::new(reducer), Arc::new(state))
    }

    /// Spawn a child store whose slice is seeded by dispatching `Init`.
    ///
    /// `Init` runs once through this store's middleware and then reaches only
    /// the child reducer, with no slice. The parent state is left alone.
    pub fn child_store_init<C, R>(&self, reducer: R) -> ChildStore<S, C, A, E>
    where
        A: InitAction,
        C: Send + Sync + 'static,
        R: Fn(&A, Option<&C>) -> C + Send + Sync + 'static,
    {
        let id = StoreId::next();
        let reducer: Reducer<C, A> = Arc::new(reducer);
        let seed = Seed::new(id, Arc::clone(&reducer));
        let api = MiddlewareApi {
            dispatcher: self.dispatcher(),
            state: self.state_accessor(),
        };
        let init = compose(&self.inner.middlewares, &api, seed.terminal());
        if let Err(err) = init(A::init()) {
            tracing::warn!(store = %id, parent = %self.inner.id, error = %err, "Child Init dispatch failed");
        }
        ChildStore::attach(self.clone(), id, reducer, seed.finish())
    }

    pub(crate) fn skip_repeats(&self) -> bool {
        self.inner.hub.skip_repeats()
    }

    pub(crate) fn register_child(&self, child: Weak<dyn ChildDelegate<S, A, E>>) {
        self.inner
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(child);
    }
}

fn dispatcher_for<S, A, E>(weak: Weak<StoreInner<S, A, E>>) -> Dispatcher<A, E>
where
    S: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    Dispatcher::from_fn(move |dispatchable| match weak.upgrade() {
        Some(inner) => inner.dispatch(dispatchable),
        None => Err(DispatchError::StoreDropped),
    })
}

fn accessor_for<S, A, E>(weak: Weak<StoreInner<S, A, E>>) -> StateAccessor<S>
where
    S: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    StateAccessor::from_fn(move || weak.upgrade().map(|inner| inner.hub.state()))
}

impl<S, A, E> StoreInner<S, A, E>
where
    S: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    fn dispatch(&self, dispatchable: Dispatchable<A, E>) -> Result<(), DispatchError> {
        match dispatchable {
            Dispatchable::Action(action) => {
                tracing::trace!(store = %self.id, action = %action.name(), "Dispatching action");
                (self.pipeline)(action)
            }
            Dispatchable::Effect(effect) => {
                let mut scope = Broadcast::new();
                scope.enter(self.id);
                self.emit(&effect, &mut scope);
                Ok(())
            }
        }
    }

    /// Terminal stage: run the reducers under the guard, then notify.
    ///
    /// No state is stored until every reducer in the pass has returned, so a
    /// panicking reducer leaves the parent and all of its children as they were.
    fn reduce(&self, action: A) -> Result<(), DispatchError> {
        let (old, new, transitions) = {
            let _guard = ReduceGuard::acquire(&self.reducing, self.id)?;
            let old = self.hub.state();
            let new = Arc::new((self.reducer)(&action, Some(&old)));
            let reduced: Vec<_> = self
                .live_children()
                .into_iter()
                .map(|child| child.reduce(&action, &old, &new))
                .collect();
            self.hub.replace_state(Arc::clone(&new));
            let transitions: Vec<_> = reduced.into_iter().map(|commit| commit()).collect();
            (old, new, transitions)
        };

        tracing::trace!(store = %self.id, action = %action.name(), "Notifying subscribers");
        self.hub.notify(Some(&old), &new);
        for notify_child in transitions {
            notify_child();
        }
        Ok(())
    }

    fn emit(&self, effect: &Arc<E>, scope: &mut Broadcast) {
        tracing::trace!(store = %self.id, effect = %effect.name(), "Emitting effect");
        self.hub.emit(effect, scope);
        for child in self.live_children() {
            child.emit(effect, scope);
        }
    }

    fn live_children(&self) -> Vec<Arc<dyn ChildDelegate<S, A, E>>> {
        let mut children = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        children.retain(|child| child.strong_count() > 0);
        children.iter().filter_map(Weak::upgrade).collect()
    }
}

impl<S, A, E> StoreNode<A, E> for Store<S, A, E>
where
    S: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    fn node_id(&self) -> StoreId {
        self.inner.id
    }

    fn broadcast_action(&self, action: &A, scope: &mut Broadcast) -> Result<(), DispatchError> {
        if !scope.enter(self.inner.id) {
            return Ok(());
        }
        self.dispatch_action(action.clone())
    }

    fn broadcast_effect(&self, effect: &Arc<E>, scope: &mut Broadcast) {
        if scope.enter(self.inner.id) {
            self.inner.emit(effect, scope);
        }
    }

    fn state_any(&self) -> Arc<dyn std::any::Any + Send + Sync> {
        self.state()
    }

    fn observe_state(&self, id: ObserverId, observe: Arc<dyn Fn() + Send + Sync>) {
        self.inner
            .hub
            .observe_state(id, Arc::new(move |_old: Option<&S>, _new: &S| observe()));
    }

    fn observe_effects(&self, id: ObserverId, observe: EffectObserver<E>) {
        self.inner.hub.observe_effects(id, observe);
    }

    fn forget(&self, id: ObserverId) {
        self.inner.hub.forget(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::middleware_fn;
    use crate::testing::{CallCounter, Recorder};

    #[derive(Clone, Debug, PartialEq)]
    enum TestAction {
        Init,
        Increment,
        Decrement,
        SetValue(i32),
        NoOp,
    }

    impl Action for TestAction {
        fn name(&self) -> &'static str {
            match self {
                TestAction::Init => "Init",
                TestAction::Increment => "Increment",
                TestAction::Decrement => "Decrement",
                TestAction::SetValue(_) => "SetValue",
                TestAction::NoOp => "NoOp",
            }
        }
    }

    impl InitAction for TestAction {
        fn init() -> Self {
            TestAction::Init
        }
    }

    #[derive(Debug, PartialEq)]
    enum TestEffect {
        Toast(&'static str),
        Beep,
    }

    impl Effect for TestEffect {
        fn name(&self) -> &'static str {
            match self {
                TestEffect::Toast(_) => "Toast",
                TestEffect::Beep => "Beep",
            }
        }
    }

    fn test_reducer(action: &TestAction, state: Option<&i32>) -> i32 {
        let count = state.copied().unwrap_or(0);
        match action {
            TestAction::Increment => count + 1,
            TestAction::Decrement => count - 1,
            TestAction::SetValue(v) => *v,
            TestAction::Init | TestAction::NoOp => count,
        }
    }

    type TestStore = Store<i32, TestAction, TestEffect>;

    #[test]
    fn test_store_dispatch() {
        let store: TestStore = Store::new(test_reducer, 0);

        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(*store.state(), 1);

        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(*store.state(), 2);

        store.dispatch_action(TestAction::Decrement).unwrap();
        assert_eq!(*store.state(), 1);
    }

    #[test]
    fn test_init_runs_reducer_without_state() {
        let store: TestStore = Store::init(|action: &TestAction, state: Option<&i32>| {
            match (action, state) {
                (TestAction::Init, None) => 42,
                (_, state) => state.copied().unwrap_or(-1),
            }
        });
        assert_eq!(*store.state(), 42);
    }

    #[test]
    fn test_init_passes_through_middleware() {
        let counter = Arc::new(CallCounter::new());
        let store: TestStore = Store::builder(test_reducer)
            .middleware(Arc::clone(&counter))
            .build_init();

        assert_eq!(counter.names(), vec!["Init"]);
        assert_eq!(*store.state(), 0);

        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(counter.names(), vec!["Init", "Increment"]);
    }

    #[test]
    fn test_init_sees_no_state_in_middleware() {
        let before = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&before);
        let store: TestStore = Store::builder(test_reducer)
            .middleware(middleware_fn(
                move |api: &MiddlewareApi<i32, TestAction, TestEffect>,
                      next: &Next<TestAction>,
                      action: TestAction| {
                    sink.lock().unwrap().push(api.state.get().map(|state| *state));
                    next(action)
                },
            ))
            .build_init();

        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(*before.lock().unwrap(), vec![None, Some(0)]);
    }

    #[test]
    fn test_init_follow_up_reduces_onto_seeded_state() {
        let store: TestStore = Store::builder(test_reducer)
            .middleware(middleware_fn(
                |api: &MiddlewareApi<i32, TestAction, TestEffect>,
                 next: &Next<TestAction>,
                 action: TestAction| {
                    let init = matches!(action, TestAction::Init);
                    next(action)?;
                    if init {
                        api.dispatcher.dispatch_action(TestAction::SetValue(5))?;
                        api.dispatcher.dispatch_effect(TestEffect::Beep)?;
                    }
                    Ok(())
                },
            ))
            .build_init();
        assert_eq!(*store.state(), 5);
    }

    #[test]
    fn test_dropped_init_still_seeds_state() {
        let store: TestStore = Store::builder(|action: &TestAction, state: Option<&i32>| {
            match (action, state) {
                (TestAction::Init, None) => 42,
                (_, state) => test_reducer(action, state),
            }
        })
        .middleware(middleware_fn(
            |_api: &MiddlewareApi<i32, TestAction, TestEffect>,
             next: &Next<TestAction>,
             action: TestAction| match action {
                TestAction::Init => Ok(()),
                other => next(other),
            },
        ))
        .build_init();
        assert_eq!(*store.state(), 42);

        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(*store.state(), 43);
    }

    #[test]
    fn test_counter_scenario() {
        let store: TestStore = Store::new(test_reducer, 7);
        let recorder = Recorder::new();
        store.subscribe(&recorder);

        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(*store.state(), 8);

        store.dispatch_action(TestAction::Decrement).unwrap();
        store.dispatch_action(TestAction::Decrement).unwrap();
        assert_eq!(*store.state(), 6);
        assert_eq!(recorder.values(), vec![7, 8, 7, 6]);
    }

    #[test]
    fn test_initial_delivery_once() {
        let store: TestStore = Store::new(test_reducer, 3);
        let recorder = Recorder::new();
        store.subscribe(&recorder);
        assert_eq!(recorder.values(), vec![3]);
    }

    #[test]
    fn test_skip_repeats_default() {
        let store: TestStore = Store::new(test_reducer, 0);
        let recorder = Recorder::new();
        store.subscribe(&recorder);

        store.dispatch_action(TestAction::SetValue(3)).unwrap();
        store.dispatch_action(TestAction::SetValue(3)).unwrap();
        assert_eq!(recorder.values(), vec![0, 3]);
    }

    #[test]
    fn test_skip_repeats_disabled() {
        let store: TestStore = Store::builder(test_reducer).skip_repeats(false).build(0);
        let recorder = Recorder::new();
        store.subscribe(&recorder);

        store.dispatch_action(TestAction::SetValue(3)).unwrap();
        store.dispatch_action(TestAction::SetValue(3)).unwrap();
        assert_eq!(recorder.values(), vec![0, 3, 3]);
    }

    #[test]
    fn test_resubscribe_replaces() {
        let store: TestStore = Store::new(test_reducer, 0);
        let recorder = Recorder::new();
        store.subscribe(&recorder);
        store.subscribe_with(&recorder, |s| s.select(|n| *n));
        assert_eq!(store.subscriber_count(), 1);

        for _ in 0..3 {
            store.dispatch_action(TestAction::Increment).unwrap();
        }
        assert_eq!(recorder.values(), vec![0, 0, 1, 2, 3]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let store: TestStore = Store::new(test_reducer, 0);
        let recorder = Recorder::new();
        store.subscribe(&recorder);
        store.dispatch_action(TestAction::Increment).unwrap();

        assert!(store.unsubscribe(&recorder));
        assert!(!store.unsubscribe(&recorder));
        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(recorder.values(), vec![0, 1]);

        store.subscribe(&recorder);
        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(recorder.values(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_subscribe_with_selector_and_filter() {
        let store: TestStore = Store::new(test_reducer, 1);
        let parity = Recorder::new();
        store.subscribe_with(&parity, |s| s.select(|n| n % 2 == 0));

        store.dispatch_action(TestAction::Increment).unwrap();
        store.dispatch_action(TestAction::SetValue(4)).unwrap();
        store.dispatch_action(TestAction::SetValue(5)).unwrap();
        assert_eq!(parity.values(), vec![false, true, false]);
    }

    #[test]
    fn test_middleware_counts_and_order() {
        let counter = Arc::new(CallCounter::new());
        let store: TestStore = Store::builder(test_reducer)
            .middleware(Arc::clone(&counter))
            .build(0);

        store.dispatch_action(TestAction::Increment).unwrap();
        store.dispatch_action(TestAction::NoOp).unwrap();
        store.dispatch_effect(TestEffect::Beep).unwrap();
        assert_eq!(counter.count(), 2);
        assert_eq!(counter.names(), vec!["Increment", "NoOp"]);
    }

    #[test]
    fn test_middleware_can_rewrite_and_redispatch() {
        let store: TestStore = Store::builder(test_reducer)
            .middleware(middleware_fn(
                |api: &MiddlewareApi<i32, TestAction, TestEffect>,
                 next: &Next<TestAction>,
                 action: TestAction| {
                    match action {
                        TestAction::Decrement => next(TestAction::Increment),
                        TestAction::SetValue(v) if v < 0 => {
                            api.dispatcher.dispatch_effect(TestEffect::Toast("negative"))
                        }
                        other => next(other),
                    }
                },
            ))
            .build(0);

        let toasts = Recorder::new();
        store.add_listener(&toasts);

        store.dispatch_action(TestAction::Decrement).unwrap();
        store.dispatch_action(TestAction::SetValue(-5)).unwrap();
        assert_eq!(*store.state(), 1);
        assert_eq!(toasts.len(), 1);
    }

    #[test]
    fn test_reducer_reentry_is_rejected() {
        let slot: Arc<Mutex<Option<Dispatcher<TestAction, TestEffect>>>> =
            Arc::new(Mutex::new(None));
        let inner_result = Arc::new(Mutex::new(None));
        let (slot_for_reducer, result_sink) = (Arc::clone(&slot), Arc::clone(&inner_result));

        let store: TestStore = Store::new(
            move |action: &TestAction, state: Option<&i32>| {
                if let TestAction::Increment = action {
                    if let Some(dispatcher) = slot_for_reducer.lock().unwrap().as_ref() {
                        *result_sink.lock().unwrap() =
                            Some(dispatcher.dispatch_action(TestAction::NoOp));
                    }
                }
                test_reducer(action, state)
            },
            0,
        );
        *slot.lock().unwrap() = Some(store.dispatcher());

        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(
            *inner_result.lock().unwrap(),
            Some(Err(DispatchError::ConcurrentMutation { store: store.id() }))
        );
        // Guard released: later dispatches work
        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(*store.state(), 2);
    }

    #[test]
    fn test_panicking_reducer_does_not_wedge_store() {
        let store: TestStore = Store::new(
            |action: &TestAction, state: Option<&i32>| {
                if let TestAction::SetValue(13) = action {
                    panic!("unlucky");
                }
                test_reducer(action, state)
            },
            0,
        );
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = store.dispatch_action(TestAction::SetValue(13));
        }));
        assert!(panicked.is_err());

        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(*store.state(), 1);
    }

    #[test]
    fn test_dispatch_from_subscriber() {
        let store: TestStore = Store::new(test_reducer, 0);
        let dispatcher = store.dispatcher();
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        let bouncer = Arc::new(move |n: &i32| {
            if *n == 1 {
                sink.lock()
                    .unwrap()
                    .push(dispatcher.dispatch_action(TestAction::SetValue(10)));
            }
        });
        store.subscribe(&bouncer);
        let recorder = Recorder::new();
        store.subscribe(&recorder);

        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(*results.lock().unwrap(), vec![Ok(())]);
        assert_eq!(*store.state(), 10);
        // Nested dispatch completes before the outer pass reaches the recorder
        assert_eq!(recorder.values(), vec![0, 10, 1]);
    }

    #[test]
    fn test_subscribe_during_notification_is_not_retroactive() {
        let store: TestStore = Store::new(test_reducer, 0);
        let late = Recorder::new();
        let handle = store.clone();
        let late_for_callback = Arc::clone(&late);
        let recruiter = Arc::new(move |n: &i32| {
            if *n == 1 {
                handle.subscribe(&late_for_callback);
            }
        });
        store.subscribe(&recruiter);

        store.dispatch_action(TestAction::Increment).unwrap();
        // Only the immediate push from subscribe, not a second copy from the pass
        assert_eq!(late.values(), vec![1]);
    }

    #[test]
    fn test_unsubscribe_during_notification_skips_pending() {
        let store: TestStore = Store::new(test_reducer, 0);
        let victim = Recorder::new();
        let handle = store.clone();
        let victim_for_callback = Arc::clone(&victim);
        let remover = Arc::new(move |n: &i32| {
            if *n == 1 {
                handle.unsubscribe(&victim_for_callback);
            }
        });
        store.subscribe(&remover);
        store.subscribe(&victim);

        store.dispatch_action(TestAction::Increment).unwrap();
        assert_eq!(victim.values(), vec![0]);
    }

    #[test]
    fn test_effects_bypass_reducer_and_filter() {
        let store: TestStore = Store::new(test_reducer, 5);
        let all = Recorder::new();
        let toasts = Recorder::new();
        store.add_listener(&all);
        store.add_listener_with(&toasts, |effect: &Arc<TestEffect>| match **effect {
            TestEffect::Toast(text) => Some(text),
            _ => None,
        });

        store.dispatch_effect(TestEffect::Beep).unwrap();
        store.dispatch_effect(TestEffect::Toast("saved")).unwrap();

        assert_eq!(*store.state(), 5);
        assert_eq!(all.len(), 2);
        assert_eq!(toasts.values(), vec!["saved"]);
    }

    #[test]
    fn test_listener_replace_and_remove() {
        let store: TestStore = Store::new(test_reducer, 0);
        let listener = Recorder::new();
        store.add_listener(&listener);
        store.add_listener(&listener);
        assert_eq!(store.listener_count(), 1);

        store.dispatch_effect(TestEffect::Beep).unwrap();
        assert_eq!(listener.len(), 1);

        assert!(store.remove_listener(&listener));
        store.dispatch_effect(TestEffect::Beep).unwrap();
        assert_eq!(listener.len(), 1);
    }

    #[test]
    fn test_dispatcher_after_drop() {
        let store: TestStore = Store::new(test_reducer, 0);
        let dispatcher = store.dispatcher();
        let accessor = store.state_accessor();
        assert_eq!(accessor.get().as_deref(), Some(&0));

        drop(store);
        assert_eq!(
            dispatcher.dispatch_action(TestAction::Increment),
            Err(DispatchError::StoreDropped)
        );
        assert!(accessor.get().is_none());
    }

    #[test]
    fn test_concurrent_dispatch_never_interleaves_reducers() {
        let store: Store<i32, TestAction, TestEffect> = Store::new(
            |action: &TestAction, state: Option<&i32>| {
                std::thread::sleep(std::time::Duration::from_millis(1));
                test_reducer(action, state)
            },
            0,
        );

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| store.dispatch_action(TestAction::Increment))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ok = 0;
        for handle in handles {
            for result in handle.join().unwrap() {
                match result {
                    Ok(()) => ok += 1,
                    Err(err) => assert_eq!(err, DispatchError::ConcurrentMutation { store: store.id() }),
                }
            }
        }
        // Every accepted dispatch incremented exactly once
        assert_eq!(*store.state(), ok);
    }
}
