//! Child stores sharing a parent's dispatch pipeline
//!
//! A child store owns one more slice of state and a reducer for it, but has no
//! middleware or reentrancy guard of its own: every dispatch goes through the
//! parent. When the parent's reducer runs, each live child's reducer runs in
//! the same guarded pass, so parent and children observe every action
//! dispatched to any of them. A child's observable state is
//! [`Pair`]`(parent, child)`.

use std::fmt;
use std::sync::Arc;

use crate::action::{Action, Dispatchable, Effect};
use crate::composite::{Broadcast, StoreNode};
use crate::dispatch::{DispatchError, Dispatcher, StateAccessor, StoreId};
use crate::registry::{EffectObserver, Hub, Listener, ObserverId, Subscriber, SubscriberId};
use crate::store::{Reducer, Store};
use crate::subscription::Subscription;

/// The state a child store exposes: its parent's state and its own slice.
pub struct Pair<P, C> {
    /// Parent store state
    pub parent: Arc<P>,
    /// Child store slice
    pub child: Arc<C>,
}

impl<P, C> Pair<P, C> {
    /// Pair up two states.
    pub fn new(parent: Arc<P>, child: Arc<C>) -> Self {
        Self { parent, child }
    }
}

impl<P, C> Clone for Pair<P, C> {
    fn clone(&self) -> Self {
        Self {
            parent: Arc::clone(&self.parent),
            child: Arc::clone(&self.child),
        }
    }
}

impl<P: PartialEq, C: PartialEq> PartialEq for Pair<P, C> {
    fn eq(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.parent, &other.parent) || self.parent == other.parent)
            && (Arc::ptr_eq(&self.child, &other.child) || self.child == other.child)
    }
}

impl<P: fmt::Debug, C: fmt::Debug> fmt::Debug for Pair<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pair")
            .field("parent", &self.parent)
            .field("child", &self.child)
            .finish()
    }
}

/// Deferred notification produced by a child during the parent's reduce pass.
pub(crate) type ChildTransition = Box<dyn FnOnce()>;

/// A reduced child slice waiting to be stored. Storing it yields the notification.
pub(crate) type ChildCommit = Box<dyn FnOnce() -> ChildTransition>;

/// What a parent store needs from each of its children.
pub(crate) trait ChildDelegate<P, A, E>: Send + Sync {
    /// Run the child reducer. Nothing is stored until the commit runs.
    fn reduce(self: Arc<Self>, action: &A, old_parent: &Arc<P>, new_parent: &Arc<P>)
        -> ChildCommit;

    /// Deliver an effect to the child's listeners and observers.
    fn emit(&self, effect: &Arc<E>, scope: &mut Broadcast);
}

struct ChildInner<P, C, A, E> {
    id: StoreId,
    parent: Store<P, A, E>,
    reducer: Reducer<C, A>,
    hub: Hub<Pair<P, C>, E>,
}

impl<P, C, A, E> ChildDelegate<P, A, E> for ChildInner<P, C, A, E>
where
    P: Send + Sync + 'static,
    C: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    fn reduce(
        self: Arc<Self>,
        action: &A,
        old_parent: &Arc<P>,
        new_parent: &Arc<P>,
    ) -> ChildCommit {
        let old_child = Arc::clone(&self.hub.state().child);
        let new_child = Arc::new((self.reducer)(action, Some(&old_child)));
        let old = Pair::new(Arc::clone(old_parent), old_child);
        let new = Pair::new(Arc::clone(new_parent), new_child);

        Box::new(move || {
            self.hub.replace_state(Arc::new(new.clone()));
            let notify: ChildTransition = Box::new(move || {
                tracing::trace!(store = %self.id, "Notifying child subscribers");
                self.hub.notify(Some(&old), &new);
            });
            notify
        })
    }

    fn emit(&self, effect: &Arc<E>, scope: &mut Broadcast) {
        self.hub.emit(effect, scope);
    }
}

/// A store whose state is its parent's state paired with its own slice.
///
/// Created with [`Store::child_store`] or [`Store::child_store_init`]. The
/// parent only holds its children weakly: dropping every handle to a child
/// detaches it.
pub struct ChildStore<P, C, A, E> {
    inner: Arc<ChildInner<P, C, A, E>>,
}

impl<P, C, A, E> Clone for ChildStore<P, C, A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, C, A, E> fmt::Debug for ChildStore<P, C, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildStore")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

impl<P, C, A, E> ChildStore<P, C, A, E>
where
    P: Send + Sync + 'static,
    C: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    pub(crate) fn attach(
        parent: Store<P, A, E>,
        id: StoreId,
        reducer: Reducer<C, A>,
        state: Arc<C>,
    ) -> Self {
        let pair = Pair::new(parent.state(), state);
        let skip_repeats = parent.skip_repeats();
        let inner = Arc::new(ChildInner {
            id,
            parent: parent.clone(),
            reducer,
            hub: Hub::new(Arc::new(pair), skip_repeats),
        });

        let delegate: Arc<dyn ChildDelegate<P, A, E>> = inner.clone();
        parent.register_child(Arc::downgrade(&delegate));
        tracing::debug!(store = %id, parent = %parent.id(), "Child store attached");

        Self { inner }
    }

    /// Identity of this child store
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// The parent store
    pub fn parent(&self) -> &Store<P, A, E> {
        &self.inner.parent
    }

    /// Current `(parent, child)` state
    pub fn state(&self) -> Arc<Pair<P, C>> {
        self.inner.hub.state()
    }

    /// Current child slice only
    pub fn child_state(&self) -> Arc<C> {
        Arc::clone(&self.inner.hub.state().child)
    }

    /// Dispatch through the parent's pipeline.
    pub fn dispatch(&self, dispatchable: Dispatchable<A, E>) -> Result<(), DispatchError> {
        self.inner.parent.dispatch(dispatchable)
    }

    /// Dispatch an action through the parent's pipeline.
    pub fn dispatch_action(&self, action: A) -> Result<(), DispatchError> {
        self.inner.parent.dispatch_action(action)
    }

    /// Dispatch a new effect instance through the parent.
    pub fn dispatch_effect(&self, effect: E) -> Result<(), DispatchError> {
        self.inner.parent.dispatch_effect(effect)
    }

    /// The parent's dispatcher; children have no pipeline of their own.
    pub fn dispatcher(&self) -> Dispatcher<A, E> {
        self.inner.parent.dispatcher()
    }

    /// Reads the `(parent, child)` state without keeping the child alive.
    pub fn state_accessor(&self) -> StateAccessor<Pair<P, C>> {
        let weak = Arc::downgrade(&self.inner);
        StateAccessor::from_fn(move || weak.upgrade().map(|inner| inner.hub.state()))
    }

    /// Subscribe to the full `(parent, child)` state.
    pub fn subscribe<Sub>(&self, subscriber: &Arc<Sub>)
    where
        P: PartialEq,
        C: PartialEq,
        Sub: Subscriber<Pair<P, C>> + 'static,
    {
        self.subscribe_with(subscriber, |sub| sub);
    }

    /// Subscribe to a slice of the `(parent, child)` state.
    pub fn subscribe_with<T, Sub, F>(&self, subscriber: &Arc<Sub>, selector: F)
    where
        T: PartialEq + 'static,
        Sub: Subscriber<T> + 'static,
        F: FnOnce(Subscription<Pair<P, C>>) -> Subscription<Pair<P, C>, T>,
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

    /// Listen to every effect reaching the parent.
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
}

impl<P, C, A, E> StoreNode<A, E> for ChildStore<P, C, A, E>
where
    P: Send + Sync + 'static,
    C: Send + Sync + 'static,
    A: Action,
    E: Effect,
{
    /// A child is reached through its parent, so it shares the parent's identity.
    fn node_id(&self) -> StoreId {
        self.inner.parent.id()
    }

    fn broadcast_action(&self, action: &A, scope: &mut Broadcast) -> Result<(), DispatchError> {
        self.inner.parent.broadcast_action(action, scope)
    }

    fn broadcast_effect(&self, effect: &Arc<E>, scope: &mut Broadcast) {
        self.inner.parent.broadcast_effect(effect, scope)
    }

    fn state_any(&self) -> Arc<dyn std::any::Any + Send + Sync> {
        self.state()
    }

    fn observe_state(&self, id: ObserverId, observe: Arc<dyn Fn() + Send + Sync>) {
        self.inner.hub.observe_state(
            id,
            Arc::new(move |_old: Option<&Pair<P, C>>, _new: &Pair<P, C>| observe()),
        );
    }

    fn observe_effects(&self, id: ObserverId, observe: EffectObserver<E>) {
        self.inner.hub.observe_effects(id, observe);
    }

    fn forget(&self, id: ObserverId) {
        self.inner.hub.forget(id);
    }
}
