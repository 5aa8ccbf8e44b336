//! Composite stores: one observable aggregate over several stores
//!
//! A composite holds an ordered list of member stores and a projection from
//! their states to its own. Actions dispatched to the composite run through
//! its own middleware, then are broadcast to every member. A [`Broadcast`]
//! scope travels with the action through nested composites and records which
//! stores already received it, so every leaf store's middleware and reducer
//! run exactly once per dispatch however the composition graph overlaps.
//!
//! Whenever a member's state changes the projection is recomputed and pushed
//! to the composite's subscribers on the same call stack.
//!
//! Effects emitted by a member are relayed to the composite's listeners. The
//! relay shares the scope of the emit that produced the effect, so a composite
//! above several paths to the same store still hears the effect once.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use crate::action::{Action, Dispatchable, Effect, NoEffect};
use crate::child::{ChildStore, Pair};
use crate::config::StoreOptions;
use crate::dispatch::{DispatchError, Dispatcher, StateAccessor, StoreId};
use crate::middleware::{compose, Middleware, MiddlewareApi, MiddlewareId, Next};
use crate::registry::{EffectObserver, Hub, Listener, ObserverId, Subscriber, SubscriberId};
use crate::store::Store;
use crate::subscription::Subscription;

/// Stores already reached by one logical dispatch.
#[derive(Debug, Default)]
pub struct Broadcast {
    visited: HashSet<StoreId>,
}

impl Broadcast {
    /// A fresh scope for a new logical dispatch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `store` as reached. Returns `false` if it already was.
    pub fn enter(&mut self, store: StoreId) -> bool {
        self.visited.insert(store)
    }

    /// Whether `store` was reached in this scope
    pub fn contains(&self, store: StoreId) -> bool {
        self.visited.contains(&store)
    }
}

/// A store that can be a member of a [`CompositeStore`].
///
/// Implemented by [`Store`], [`ChildStore`] and [`CompositeStore`]. Member
/// stores of one composite share an action and effect type; their state types
/// are erased and read back through [`StateList`].
pub trait StoreNode<A, E>: Send + Sync + 'static {
    /// Identity used for broadcast deduplication
    fn node_id(&self) -> StoreId;

    /// Deliver `action` unless this node was already reached in `scope`.
    fn broadcast_action(&self, action: &A, scope: &mut Broadcast) -> Result<(), DispatchError>;

    /// Deliver `effect` unless this node was already reached in `scope`.
    fn broadcast_effect(&self, effect: &Arc<E>, scope: &mut Broadcast);

    /// Current state, type-erased
    fn state_any(&self) -> Arc<dyn Any + Send + Sync>;

    /// Call `observe` after every state push, keyed by `id`.
    fn observe_state(&self, id: ObserverId, observe: Arc<dyn Fn() + Send + Sync>);

    /// Call `observe` for every effect this node emits, keyed by `id`.
    fn observe_effects(&self, id: ObserverId, observe: EffectObserver<E>);

    /// Drop the observers registered under `id`.
    fn forget(&self, id: ObserverId);
}

/// Typed read access to a store's state, used by [`combine2`] and [`combine3`].
pub trait StateSource {
    /// The state this store exposes
    type State: Send + Sync + 'static;

    /// Current state
    fn snapshot(&self) -> Arc<Self::State>;
}

impl<S, A, E> StateSource for Store<S, A, E>
where
    S: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    type State = S;

    fn snapshot(&self) -> Arc<S> {
        self.state()
    }
}

impl<P, C, A, E> StateSource for ChildStore<P, C, A, E>
where
    P: Send + Sync + 'static,
    C: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    type State = Pair<P, C>;

    fn snapshot(&self) -> Arc<Pair<P, C>> {
        self.state()
    }
}

impl<CS, A, E> StateSource for CompositeStore<CS, A, E>
where
    CS: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    type State = CS;

    fn snapshot(&self) -> Arc<CS> {
        self.state()
    }
}

/// Member states in member order, as seen by a projection.
pub struct StateList {
    states: Vec<Arc<dyn Any + Send + Sync>>,
}

impl StateList {
    fn collect<A: 'static, E: 'static>(members: &[Arc<dyn StoreNode<A, E>>]) -> Self {
        Self {
            states: members.iter().map(|member| member.state_any()).collect(),
        }
    }

    /// State of the member at `index`, if it exists and has type `T`.
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.states.get(index)?.downcast_ref::<T>()
    }

    /// Shared handle to the state at `index`, if it exists and has type `T`.
    pub fn get_arc<T: Any + Send + Sync>(&self, index: usize) -> Option<Arc<T>> {
        Arc::clone(self.states.get(index)?).downcast::<T>().ok()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the composite has no members
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl fmt::Debug for StateList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateList")
            .field("len", &self.states.len())
            .finish()
    }
}

/// Computes a composite's state from its members' states.
pub type Projection<CS> = Arc<dyn Fn(&StateList) -> CS + Send + Sync>;

type MiddlewareEntry<CS, A, E> = (MiddlewareId, Arc<dyn Middleware<CS, A, E>>);

struct CompositeInner<CS, A: 'static, E: 'static> {
    id: StoreId,
    name: Option<String>,
    members: Vec<Arc<dyn StoreNode<A, E>>>,
    project: Projection<CS>,
    hub: Hub<CS, E>,
    middlewares: Mutex<Vec<MiddlewareEntry<CS, A, E>>>,
    pipeline: RwLock<Next<A>>,
    /// Addresses of effects this composite is currently forwarding
    forwarding: Mutex<Vec<usize>>,
    this: Weak<CompositeInner<CS, A, E>>,
}

/// Marks an effect instance as in flight until dropped.
struct InFlight<'a> {
    forwarding: &'a Mutex<Vec<usize>>,
    key: usize,
}

impl<'a> InFlight<'a> {
    fn mark<E>(forwarding: &'a Mutex<Vec<usize>>, effect: &Arc<E>) -> Self {
        let key = effect_key(effect);
        forwarding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key);
        Self { forwarding, key }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut forwarding = self
            .forwarding
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(position) = forwarding.iter().rposition(|key| *key == self.key) {
            forwarding.swap_remove(position);
        }
    }
}

fn effect_key<E>(effect: &Arc<E>) -> usize {
    Arc::as_ptr(effect) as usize
}

/// A store whose state is a projection over several member stores.
///
/// ```ignore
/// let dashboard = CompositeStore::builder(|states: &StateList| Dashboard {
///     cart: states.get_arc::<Cart>(0),
///     session: states.get_arc::<Session>(1),
/// })
/// .member(cart_store.clone())
/// .member(session_store.clone())
/// .middleware(LoggingMiddleware::new(LoggerConfig::default()))
/// .build();
///
/// dashboard.dispatch_action(AppAction::Logout)?;
/// ```
pub struct CompositeStore<CS, A: 'static, E: 'static = NoEffect> {
    inner: Arc<CompositeInner<CS, A, E>>,
}

impl<CS, A, E> Clone for CompositeStore<CS, A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<CS, A, E> fmt::Debug for CompositeStore<CS, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeStore")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("members", &self.inner.members.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`CompositeStore`], see [`CompositeStore::builder`].
pub struct CompositeBuilder<CS, A, E = NoEffect> {
    project: Projection<CS>,
    members: Vec<Arc<dyn StoreNode<A, E>>>,
    middlewares: Vec<Arc<dyn Middleware<CS, A, E>>>,
    options: StoreOptions,
}

impl<CS, A, E> CompositeBuilder<CS, A, E>
where
    CS: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    /// Append a member store. Its position is its index in [`StateList`].
    pub fn member<N: StoreNode<A, E>>(mut self, node: N) -> Self {
        self.members.push(Arc::new(node));
        self
    }

    /// Append a composite-level middleware.
    pub fn middleware<M: Middleware<CS, A, E>>(mut self, middleware: M) -> Self {
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

    /// Build the composite and start observing its members.
    pub fn build(self) -> CompositeStore<CS, A, E> {
        let CompositeBuilder {
            project,
            members,
            middlewares,
            options,
        } = self;
        let id = StoreId::next();
        let initial = project(&StateList::collect(&members));
        let entries: Vec<MiddlewareEntry<CS, A, E>> = middlewares
            .into_iter()
            .map(|middleware| (MiddlewareId::next(), middleware))
            .collect();

        let inner = Arc::new_cyclic(|weak: &Weak<CompositeInner<CS, A, E>>| {
            let chain: Vec<_> = entries.iter().map(|(_, m)| Arc::clone(m)).collect();
            CompositeInner {
                id,
                name: options.name.clone(),
                members,
                project,
                hub: Hub::new(Arc::new(initial), options.skip_repeats),
                pipeline: RwLock::new(pipeline_for(weak, &chain)),
                middlewares: Mutex::new(entries),
                forwarding: Mutex::new(Vec::new()),
                this: weak.clone(),
            }
        });
        inner.watch_members();

        tracing::debug!(
            store = %id,
            name = ?options.name,
            members = inner.members.len(),
            "Composite store created"
        );
        CompositeStore { inner }
    }
}

fn pipeline_for<CS, A, E>(
    weak: &Weak<CompositeInner<CS, A, E>>,
    chain: &[Arc<dyn Middleware<CS, A, E>>],
) -> Next<A>
where
    CS: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    let api = MiddlewareApi {
        dispatcher: dispatcher_for(weak.clone()),
        state: accessor_for(weak.clone()),
    };
    let terminal: Next<A> = {
        let weak = weak.clone();
        Arc::new(move |action: A| match weak.upgrade() {
            Some(inner) => inner.broadcast(&action),
            None => Err(DispatchError::StoreDropped),
        })
    };
    compose(chain, &api, terminal)
}

fn dispatcher_for<CS, A, E>(weak: Weak<CompositeInner<CS, A, E>>) -> Dispatcher<A, E>
where
    CS: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    Dispatcher::from_fn(move |dispatchable| match weak.upgrade() {
        Some(inner) => inner.dispatch(dispatchable),
        None => Err(DispatchError::StoreDropped),
    })
}

fn accessor_for<CS, A, E>(weak: Weak<CompositeInner<CS, A, E>>) -> StateAccessor<CS>
where
    CS: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    StateAccessor::from_fn(move || weak.upgrade().map(|inner| inner.hub.state()))
}

impl<CS, A, E> CompositeStore<CS, A, E>
where
    CS: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    /// Start building a composite around a projection of member states.
    pub fn builder<F>(project: F) -> CompositeBuilder<CS, A, E>
    where
        F: Fn(&StateList) -> CS + Send + Sync + 'static,
    {
        CompositeBuilder {
            project: Arc::new(project),
            members: Vec::new(),
            middlewares: Vec::new(),
            options: StoreOptions::default(),
        }
    }

    /// Process-unique identity of this composite
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// Name from the store options, if any
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Number of member stores
    pub fn member_count(&self) -> usize {
        self.inner.members.len()
    }

    /// Current projected state
    pub fn state(&self) -> Arc<CS> {
        self.inner.hub.state()
    }

    /// Dispatch an action or effect to every member exactly once.
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

    /// A handle that dispatches into this composite without keeping it alive.
    pub fn dispatcher(&self) -> Dispatcher<A, E> {
        dispatcher_for(Arc::downgrade(&self.inner))
    }

    /// A handle that reads the projected state without keeping it alive.
    pub fn state_accessor(&self) -> StateAccessor<CS> {
        accessor_for(Arc::downgrade(&self.inner))
    }

    /// Subscribe to the projected state.
    pub fn subscribe<Sub>(&self, subscriber: &Arc<Sub>)
    where
        CS: PartialEq,
        Sub: Subscriber<CS> + 'static,
    {
        self.subscribe_with(subscriber, |sub| sub);
    }

    /// Subscribe to a slice of the projected state.
    pub fn subscribe_with<T, Sub, F>(&self, subscriber: &Arc<Sub>, selector: F)
    where
        T: PartialEq + 'static,
        Sub: Subscriber<T> + 'static,
        F: FnOnce(Subscription<CS>) -> Subscription<CS, T>,
    {
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

    /// Listen to every effect dispatched to the composite or relayed from a member.
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

    /// Append a middleware to the composite's chain.
    ///
    /// Dispatches already running keep the chain they started with.
    pub fn add_middleware<M: Middleware<CS, A, E>>(&self, middleware: M) -> MiddlewareId {
        let id = MiddlewareId::next();
        self.inner
            .middlewares
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(middleware)));
        self.inner.rebuild_pipeline();
        id
    }

    /// Ids of the middlewares in the chain, outermost first.
    ///
    /// Includes the ones supplied to the builder, so any of them can be
    /// passed to [`remove_middleware`](Self::remove_middleware).
    pub fn middleware_ids(&self) -> Vec<MiddlewareId> {
        self.inner
            .middlewares
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    /// Remove a middleware from the chain by id.
    pub fn remove_middleware(&self, id: MiddlewareId) -> bool {
        let removed = {
            let mut middlewares = self
                .inner
                .middlewares
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let before = middlewares.len();
            middlewares.retain(|(entry, _)| *entry != id);
            middlewares.len() != before
        };
        if removed {
            self.inner.rebuild_pipeline();
        }
        removed
    }
}

impl<CS, A, E> CompositeInner<CS, A, E>
where
    CS: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    fn dispatch(&self, dispatchable: Dispatchable<A, E>) -> Result<(), DispatchError> {
        match dispatchable {
            Dispatchable::Action(action) => {
                tracing::trace!(store = %self.id, action = %action.name(), "Dispatching action to composite");
                let pipeline = Arc::clone(&self.pipeline.read().unwrap_or_else(PoisonError::into_inner));
                pipeline(action)
            }
            Dispatchable::Effect(effect) => {
                let mut scope = Broadcast::new();
                scope.enter(self.id);
                self.forward_effect(&effect, &mut scope);
                Ok(())
            }
        }
    }

    /// Terminal stage: a fresh scope rooted at this composite.
    fn broadcast(&self, action: &A) -> Result<(), DispatchError> {
        let mut scope = Broadcast::new();
        scope.enter(self.id);
        self.broadcast_to_members(action, &mut scope)
    }

    /// Every member is attempted; the first error is returned afterwards.
    fn broadcast_to_members(&self, action: &A, scope: &mut Broadcast) -> Result<(), DispatchError> {
        let mut first = None;
        for member in &self.members {
            if let Err(err) = member.broadcast_action(action, scope) {
                tracing::warn!(store = %self.id, member = %member.node_id(), error = %err, "Member rejected broadcast action");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn forward_effect(&self, effect: &Arc<E>, scope: &mut Broadcast) {
        tracing::trace!(store = %self.id, effect = %effect.name(), "Forwarding effect to members");
        {
            let _in_flight = InFlight::mark(&self.forwarding, effect);
            for member in &self.members {
                member.broadcast_effect(effect, scope);
            }
        }
        self.hub.emit(effect, scope);
    }

    fn is_forwarding(&self, effect: &Arc<E>) -> bool {
        let key = effect_key(effect);
        self.forwarding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }

    fn recompute(&self) {
        let new = Arc::new((self.project)(&StateList::collect(&self.members)));
        let old = self.hub.replace_state(Arc::clone(&new));
        tracing::trace!(store = %self.id, "Projection recomputed");
        self.hub.notify(Some(&old), &new);
    }

    fn rebuild_pipeline(&self) {
        let chain: Vec<_> = self
            .middlewares
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, middleware)| Arc::clone(middleware))
            .collect();
        let pipeline = pipeline_for(&self.this, &chain);
        *self.pipeline.write().unwrap_or_else(PoisonError::into_inner) = pipeline;
        tracing::debug!(store = %self.id, middlewares = chain.len(), "Composite middleware chain rebuilt");
    }

    fn watch_members(&self) {
        let observer = ObserverId::of(self.id);
        for member in &self.members {
            let weak = self.this.clone();
            member.observe_state(
                observer,
                Arc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.recompute();
                    }
                }),
            );

            let weak = self.this.clone();
            member.observe_effects(
                observer,
                Arc::new(move |effect: &Arc<E>, scope: &mut Broadcast| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if inner.is_forwarding(effect) || !scope.enter(inner.id) {
                        return;
                    }
                    tracing::trace!(store = %inner.id, effect = %effect.name(), "Relaying member effect");
                    inner.hub.emit(effect, scope);
                }),
            );
        }
    }
}

impl<CS, A: 'static, E: 'static> Drop for CompositeInner<CS, A, E> {
    fn drop(&mut self) {
        let observer = ObserverId::of(self.id);
        for member in &self.members {
            member.forget(observer);
        }
    }
}

impl<CS, A, E> StoreNode<A, E> for CompositeStore<CS, A, E>
where
    CS: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    fn node_id(&self) -> StoreId {
        self.inner.id
    }

    /// Nested composites pass the outer scope straight to their members.
    fn broadcast_action(&self, action: &A, scope: &mut Broadcast) -> Result<(), DispatchError> {
        if !scope.enter(self.inner.id) {
            return Ok(());
        }
        self.inner.broadcast_to_members(action, scope)
    }

    fn broadcast_effect(&self, effect: &Arc<E>, scope: &mut Broadcast) {
        if scope.enter(self.inner.id) {
            self.inner.forward_effect(effect, scope);
        }
    }

    fn state_any(&self) -> Arc<dyn Any + Send + Sync> {
        self.state()
    }

    fn observe_state(&self, id: ObserverId, observe: Arc<dyn Fn() + Send + Sync>) {
        self.inner
            .hub
            .observe_state(id, Arc::new(move |_old: Option<&CS>, _new: &CS| observe()));
    }

    fn observe_effects(&self, id: ObserverId, observe: EffectObserver<E>) {
        self.inner.hub.observe_effects(id, observe);
    }

    fn forget(&self, id: ObserverId) {
        self.inner.hub.forget(id);
    }
}

/// Combine two stores under a typed projection.
///
/// Returns the builder so middleware and options can still be added.
pub fn combine2<N1, N2, CS, A, E, F>(first: &N1, second: &N2, project: F) -> CompositeBuilder<CS, A, E>
where
    N1: StoreNode<A, E> + StateSource + Clone,
    N2: StoreNode<A, E> + StateSource + Clone,
    CS: Send + Sync + 'static,
    A: Action,
    E: Effect,
    F: Fn(&N1::State, &N2::State) -> CS + Send + Sync + 'static,
{
    let (a, b) = (first.clone(), second.clone());
    CompositeStore::builder(move |_: &StateList| project(&a.snapshot(), &b.snapshot()))
        .member(first.clone())
        .member(second.clone())
}

/// Combine three stores under a typed projection.
pub fn combine3<N1, N2, N3, CS, A, E, F>(
    first: &N1,
    second: &N2,
    third: &N3,
    project: F,
) -> CompositeBuilder<CS, A, E>
where
    N1: StoreNode<A, E> + StateSource + Clone,
    N2: StoreNode<A, E> + StateSource + Clone,
    N3: StoreNode<A, E> + StateSource + Clone,
    CS: Send + Sync + 'static,
    A: Action,
    E: Effect,
    F: Fn(&N1::State, &N2::State, &N3::State) -> CS + Send + Sync + 'static,
{
    let (a, b, c) = (first.clone(), second.clone(), third.clone());
    CompositeStore::builder(move |_: &StateList| {
        project(&a.snapshot(), &b.snapshot(), &c.snapshot())
    })
    .member(first.clone())
    .member(second.clone())
    .member(third.clone())
}
