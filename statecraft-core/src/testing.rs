//! Test utilities for statecraft applications
//!
//! - [`Recorder`]: subscriber and listener that keeps everything it receives
//! - [`CallCounter`]: middleware counting the actions that pass through it
//! - [`TestHarness`]: a capturing [`Dispatcher`] for testing thunks and
//!   middleware without a store
//! - [`ActionAssertions`] and the `assert_dispatched!` family of macros
//!
//! # Example
//!
//! ```ignore
//! use statecraft::testing::{CallCounter, Recorder};
//!
//! let counter = Arc::new(CallCounter::new());
//! let store = Store::builder(reducer).middleware(Arc::clone(&counter)).build(0);
//! let recorder = Recorder::new();
//! store.subscribe(&recorder);
//!
//! store.dispatch_action(Action::Increment)?;
//! assert_eq!(recorder.values(), vec![0, 1]);
//! assert_eq!(counter.names(), vec!["Increment"]);
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::action::{Action, Dispatchable};
use crate::dispatch::Dispatcher;
use crate::middleware::{Middleware, MiddlewareApi, Next};
use crate::registry::{Listener, Subscriber};

/// Records every state or effect delivered to it, in order.
///
/// As a subscriber it stores a clone of each state; as a listener it stores
/// each selected effect.
pub struct Recorder<T> {
    seen: Mutex<Vec<T>>,
}

impl<T> Recorder<T> {
    /// A new, empty recorder behind an `Arc`, ready to subscribe.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, value: T) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
    }

    /// Number of deliveries so far
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing was delivered yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<T: Clone> Recorder<T> {
    /// Everything recorded so far
    pub fn values(&self) -> Vec<T> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The most recent delivery
    pub fn last(&self) -> Option<T> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl<T: Clone + Send> Subscriber<T> for Recorder<T> {
    fn new_state(&self, state: &T) {
        self.push(state.clone());
    }
}

impl<T: Send> Listener<T> for Recorder<T> {
    fn on_effect(&self, effect: T) {
        self.push(effect);
    }
}

/// Middleware that counts and names every action passing through.
///
/// Share it through an `Arc` to read the counts after the store owns it.
#[derive(Debug, Default)]
pub struct CallCounter {
    names: Arc<Mutex<Vec<&'static str>>>,
}

impl CallCounter {
    /// A counter that has seen nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of actions seen
    pub fn count(&self) -> usize {
        self.names.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Names of the actions seen, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<S, A, E> Middleware<S, A, E> for CallCounter
where
    A: Action,
{
    fn wrap(&self, _api: MiddlewareApi<S, A, E>, next: Next<A>) -> Next<A> {
        let names = Arc::clone(&self.names);
        Arc::new(move |action: A| {
            names
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(action.name());
            next(action)
        })
    }
}

/// Captures everything sent through its dispatcher.
///
/// Useful for exercising a thunk or middleware on its own:
///
/// ```ignore
/// let mut harness = TestHarness::<AppAction, AppEffect>::new();
/// thunk.run(&harness.dispatcher(), &StateAccessor::from_fn(|| Some(Arc::new(state))))?;
/// assert_dispatched!(harness.drain_actions(), AppAction::Loaded(_));
/// ```
pub struct TestHarness<A, E> {
    tx: mpsc::UnboundedSender<Dispatchable<A, E>>,
    rx: mpsc::UnboundedReceiver<Dispatchable<A, E>>,
}

impl<A, E> TestHarness<A, E>
where
    A: Send + 'static,
    E: Send + Sync + 'static,
{
    /// Create a new harness with an empty capture channel.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A dispatcher that records instead of dispatching.
    pub fn dispatcher(&self) -> Dispatcher<A, E> {
        let tx = self.tx.clone();
        Dispatcher::from_fn(move |dispatchable| {
            let _ = tx.send(dispatchable);
            Ok(())
        })
    }

    /// Drain everything captured so far.
    pub fn drain(&mut self) -> Vec<Dispatchable<A, E>> {
        let mut captured = Vec::new();
        while let Ok(dispatchable) = self.rx.try_recv() {
            captured.push(dispatchable);
        }
        captured
    }

    /// Drain captured actions, discarding effects.
    pub fn drain_actions(&mut self) -> Vec<A> {
        self.drain()
            .into_iter()
            .filter_map(|dispatchable| match dispatchable {
                Dispatchable::Action(action) => Some(action),
                Dispatchable::Effect(_) => None,
            })
            .collect()
    }

    /// Drain captured effects, discarding actions.
    pub fn drain_effects(&mut self) -> Vec<Arc<E>> {
        self.drain()
            .into_iter()
            .filter_map(|dispatchable| match dispatchable {
                Dispatchable::Action(_) => None,
                Dispatchable::Effect(effect) => Some(effect),
            })
            .collect()
    }
}

impl<A, E> Default for TestHarness<A, E>
where
    A: Send + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Name-based assertions over a list of actions.
pub trait ActionAssertions {
    /// Assert the action names match `expected`, in order.
    fn assert_names(&self, expected: &[&str]);

    /// Number of actions named `name`
    fn count_named(&self, name: &str) -> usize;

    /// Whether some action is named `name`
    fn contains_named(&self, name: &str) -> bool {
        self.count_named(name) > 0
    }
}

impl<A: Action> ActionAssertions for [A] {
    fn assert_names(&self, expected: &[&str]) {
        let names: Vec<&'static str> = self.iter().map(Action::name).collect();
        assert_eq!(names, expected, "action names differ; actions: {:?}", self);
    }

    fn count_named(&self, name: &str) -> usize {
        self.iter().filter(|action| action.name() == name).count()
    }
}

impl<A: Action> ActionAssertions for Vec<A> {
    fn assert_names(&self, expected: &[&str]) {
        self.as_slice().assert_names(expected)
    }

    fn count_named(&self, name: &str) -> usize {
        self.as_slice().count_named(name)
    }
}

/// Assert that an action matching a pattern was dispatched.
///
/// ```ignore
/// let actions = harness.drain_actions();
/// assert_dispatched!(actions, Action::SetValue(42));
/// assert_dispatched!(actions, Action::SetValue(v) if *v > 10);
/// ```
#[macro_export]
macro_rules! assert_dispatched {
    ($actions:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            $actions.iter().any(|a| matches!(a, $pattern $(if $guard)?)),
            "Expected action matching `{}` to be dispatched, but got: {:?}",
            stringify!($pattern),
            $actions
        );
    };
}

/// Assert that no action matching a pattern was dispatched.
#[macro_export]
macro_rules! assert_not_dispatched {
    ($actions:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            !$actions.iter().any(|a| matches!(a, $pattern $(if $guard)?)),
            "Expected action matching `{}` NOT to be dispatched, but it was: {:?}",
            stringify!($pattern),
            $actions
        );
    };
}

/// Count how many actions match a pattern.
#[macro_export]
macro_rules! count_dispatched {
    ($actions:expr, $pattern:pat $(if $guard:expr)?) => {
        $actions.iter().filter(|a| matches!(a, $pattern $(if $guard)?)).count()
    };
}
