//! Subscriber and listener registries
//!
//! Registries are copy-on-write: a notification pass iterates an immutable
//! snapshot while subscribe/unsubscribe calls (including ones made from inside
//! a callback) swap in a new list. Each entry also carries an `active` flag
//! that removal clears, so an entry removed before its turn in a pass is
//! skipped. Entries added during a pass are not part of its snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::composite::Broadcast;
use crate::dispatch::StoreId;
use crate::subscription::Subscription;

/// Receives selected state from a store.
pub trait Subscriber<T>: Send + Sync {
    /// Called with each selected state that passes the subscription pipeline
    fn new_state(&self, state: &T);
}

impl<T, F> Subscriber<T> for F
where
    F: Fn(&T) + Send + Sync,
{
    fn new_state(&self, state: &T) {
        self(state)
    }
}

/// Receives effects from a store.
pub trait Listener<T>: Send + Sync {
    /// Called with each effect that passes the listener's selector
    fn on_effect(&self, effect: T);
}

impl<T, F> Listener<T> for F
where
    F: Fn(T) + Send + Sync,
{
    fn on_effect(&self, effect: T) {
        self(effect)
    }
}

/// Reference identity of a subscriber or listener.
///
/// Two `Arc`s pointing at the same allocation have the same id, whatever
/// their contents compare as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(usize);

impl SubscriberId {
    /// Identity of the allocation behind `subscriber`.
    pub fn of<T: ?Sized>(subscriber: &Arc<T>) -> Self {
        Self(Arc::as_ptr(subscriber) as *const () as usize)
    }
}

/// Key of an internal observer: the store doing the observing.
///
/// Observers live in their own registries, so an observer key never collides
/// with a [`SubscriberId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(StoreId);

impl ObserverId {
    /// Observer key for `store`.
    pub fn of(store: StoreId) -> Self {
        Self(store)
    }

    /// The observing store
    pub fn store(&self) -> StoreId {
        self.0
    }
}

/// Internal observer of a store's effects, given the scope of the dispatch
/// that produced them.
pub type EffectObserver<E> = Arc<dyn Fn(&Arc<E>, &mut Broadcast) + Send + Sync>;

struct Entry<T: ?Sized, K> {
    id: K,
    active: Arc<AtomicBool>,
    item: Arc<T>,
}

impl<T: ?Sized, K: Copy> Clone for Entry<T, K> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            item: Arc::clone(&self.item),
        }
    }
}

/// Insertion-ordered, identity-keyed copy-on-write list.
pub(crate) struct Registry<T: ?Sized, K = SubscriberId> {
    entries: RwLock<Arc<Vec<Entry<T, K>>>>,
}

impl<T: ?Sized, K: Copy + PartialEq> Registry<T, K> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Arc<Vec<Entry<T, K>>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<Vec<Entry<T, K>>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, replacing any entry with the same id.
    ///
    /// Returns `true` if an existing entry was replaced.
    pub(crate) fn insert(&self, id: K, item: Arc<T>) -> bool {
        let mut guard = self.write();
        let mut replaced = false;
        let mut entries: Vec<Entry<T, K>> = Vec::with_capacity(guard.len() + 1);
        for entry in guard.iter() {
            if entry.id == id {
                entry.active.store(false, Ordering::Release);
                replaced = true;
            } else {
                entries.push(entry.clone());
            }
        }
        entries.push(Entry {
            id,
            active: Arc::new(AtomicBool::new(true)),
            item,
        });
        *guard = Arc::new(entries);
        replaced
    }

    /// Remove the entry with `id`. Returns `false` if there was none.
    pub(crate) fn remove(&self, id: K) -> bool {
        let mut guard = self.write();
        let Some(position) = guard.iter().position(|entry| entry.id == id) else {
            return false;
        };
        guard[position].active.store(false, Ordering::Release);
        let mut entries: Vec<Entry<T, K>> = guard.as_ref().clone();
        entries.remove(position);
        *guard = Arc::new(entries);
        true
    }

    /// Visit every entry that is still registered, in insertion order.
    pub(crate) fn for_each(&self, mut f: impl FnMut(&T)) {
        let snapshot = Arc::clone(&self.read());
        for entry in snapshot.iter() {
            if entry.active.load(Ordering::Acquire) {
                f(&entry.item);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }
}

/// Type-erased subscription bound to one subscriber.
pub(crate) trait Deliver<S>: Send + Sync {
    fn deliver(&self, old: Option<&S>, new: &S);
}

struct SubscriptionBox<S, T> {
    subscription: Subscription<S, T>,
    subscriber: Arc<dyn Subscriber<T>>,
}

impl<S: 'static, T: 'static> Deliver<S> for SubscriptionBox<S, T> {
    fn deliver(&self, old: Option<&S>, new: &S) {
        let subscriber = &self.subscriber;
        self.subscription
            .push(old, new, &mut |_old: Option<&T>, new: &T| subscriber.new_state(new));
    }
}

struct StateObserver<S> {
    observe: Arc<dyn Fn(Option<&S>, &S) + Send + Sync>,
}

impl<S> Deliver<S> for StateObserver<S> {
    fn deliver(&self, old: Option<&S>, new: &S) {
        (self.observe)(old, new)
    }
}

/// Type-erased listener with its effect selector.
pub(crate) trait EffectSink<E>: Send + Sync {
    fn deliver(&self, effect: &Arc<E>);
}

type EffectSelector<E, T> = dyn Fn(&Arc<E>) -> Option<T> + Send + Sync;

struct ListenerBox<E, T> {
    select: Box<EffectSelector<E, T>>,
    listener: Arc<dyn Listener<T>>,
}

impl<E, T> EffectSink<E> for ListenerBox<E, T> {
    fn deliver(&self, effect: &Arc<E>) {
        if let Some(selected) = (self.select)(effect) {
            self.listener.on_effect(selected);
        }
    }
}

/// State cell plus the subscriber and listener registries of one store.
///
/// User registrations and internal observers (composite stores watching their
/// members) live in separate registries; observers run after subscribers.
pub(crate) struct Hub<S, E> {
    state: RwLock<Arc<S>>,
    skip_repeats: bool,
    subscriptions: Registry<dyn Deliver<S>>,
    listeners: Registry<dyn EffectSink<E>>,
    state_observers: Registry<dyn Deliver<S>, ObserverId>,
    effect_observers: Registry<dyn Fn(&Arc<E>, &mut Broadcast) + Send + Sync, ObserverId>,
}

impl<S, E> Hub<S, E>
where
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub(crate) fn new(state: Arc<S>, skip_repeats: bool) -> Self {
        Self {
            state: RwLock::new(state),
            skip_repeats,
            subscriptions: Registry::new(),
            listeners: Registry::new(),
            state_observers: Registry::new(),
            effect_observers: Registry::new(),
        }
    }

    pub(crate) fn skip_repeats(&self) -> bool {
        self.skip_repeats
    }

    pub(crate) fn state(&self) -> Arc<S> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a new state and return the previous one.
    pub(crate) fn replace_state(&self, new: Arc<S>) -> Arc<S> {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, new)
    }

    pub(crate) fn subscribe<T, Sub, F>(&self, subscriber: &Arc<Sub>, selector: F)
    where
        T: PartialEq + 'static,
        Sub: Subscriber<T> + 'static,
        F: FnOnce(Subscription<S>) -> Subscription<S, T>,
    {
        let id = SubscriberId::of(subscriber);
        let mut subscription = selector(Subscription::new());
        if self.skip_repeats {
            subscription = subscription.skip_repeats();
        }
        let subscriber: Arc<dyn Subscriber<T>> = subscriber.clone();
        let boxed: Arc<dyn Deliver<S>> = Arc::new(SubscriptionBox {
            subscription,
            subscriber,
        });
        if self.subscriptions.insert(id, Arc::clone(&boxed)) {
            tracing::debug!(subscriber = ?id, "Replaced existing subscription");
        }
        let current = self.state();
        boxed.deliver(None, &current);
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscriptions.remove(id)
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn add_listener<T, L, F>(&self, listener: &Arc<L>, select: F)
    where
        T: 'static,
        L: Listener<T> + 'static,
        F: Fn(&Arc<E>) -> Option<T> + Send + Sync + 'static,
    {
        let id = SubscriberId::of(listener);
        let listener: Arc<dyn Listener<T>> = listener.clone();
        let boxed: Arc<dyn EffectSink<E>> = Arc::new(ListenerBox {
            select: Box::new(select),
            listener,
        });
        if self.listeners.insert(id, boxed) {
            tracing::debug!(listener = ?id, "Replaced existing listener");
        }
    }

    pub(crate) fn remove_listener(&self, id: SubscriberId) -> bool {
        self.listeners.remove(id)
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Register an internal observer that sees every state push, unfiltered.
    pub(crate) fn observe_state(
        &self,
        id: ObserverId,
        observe: Arc<dyn Fn(Option<&S>, &S) + Send + Sync>,
    ) {
        self.state_observers
            .insert(id, Arc::new(StateObserver { observe }));
    }

    /// Register an internal observer that sees every effect.
    pub(crate) fn observe_effects(&self, id: ObserverId, observe: EffectObserver<E>) {
        self.effect_observers.insert(id, observe);
    }

    pub(crate) fn forget(&self, id: ObserverId) {
        self.state_observers.remove(id);
        self.effect_observers.remove(id);
    }

    /// Push `(old, new)` to every subscription, then every observer.
    pub(crate) fn notify(&self, old: Option<&S>, new: &S) {
        self.subscriptions.for_each(|sub| sub.deliver(old, new));
        self.state_observers.for_each(|obs| obs.deliver(old, new));
    }

    /// Deliver an effect to every listener, then every observer.
    ///
    /// `scope` is the scope of the dispatch that produced the effect; observers
    /// relaying it further use it to reach each store once.
    pub(crate) fn emit(&self, effect: &Arc<E>, scope: &mut Broadcast) {
        self.listeners.for_each(|l| l.deliver(effect));
        self.effect_observers.for_each(|obs| obs(effect, &mut *scope));
    }
}
