//! Action and effect traits, and the dispatchable sum type

use std::fmt::Debug;
use std::sync::Arc;

/// Marker trait for actions that can be dispatched to a store
///
/// Actions describe a state transition. They should be:
/// - Clone: composite stores hand the same action to every member store
/// - Debug: For debugging and logging
/// - Send + Sync + 'static: stores and dispatchers may be shared across threads
///
/// Use `#[derive(Action)]` from `statecraft-macros` to auto-implement this trait.
pub trait Action: Clone + Debug + Send + Sync + 'static {
    /// Get the action name for logging and filtering
    fn name(&self) -> &'static str;
}

/// Actions that provide the reserved `Init` action.
///
/// A store built without an initial state runs its reducer once with
/// `Self::init()` and an absent state to obtain its default state.
///
/// `#[derive(Action)]` implements this when a unit variant is marked
/// `#[action(init)]`.
pub trait InitAction: Action {
    /// The reserved initialization action
    fn init() -> Self;
}

/// Marker trait for effects: ephemeral notifications that never touch state
///
/// Effects reach listeners directly and bypass reducers and middleware.
/// Use `#[derive(Effect)]` to auto-implement this trait.
pub trait Effect: Debug + Send + Sync + 'static {
    /// Get the effect name for logging
    fn name(&self) -> &'static str;
}

/// Effect type for stores that never emit effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoEffect {}

impl Effect for NoEffect {
    fn name(&self) -> &'static str {
        match *self {}
    }
}

/// Anything that can be routed through a store's dispatch path.
///
/// Effects are carried behind an `Arc` so that one effect instance keeps its
/// identity while it is fanned out to several stores.
#[derive(Debug)]
pub enum Dispatchable<A, E> {
    /// Triggers a reducer-computed state transition
    Action(A),
    /// Notifies listeners without changing state
    Effect(Arc<E>),
}

impl<A, E> Dispatchable<A, E> {
    /// Wrap an action.
    pub fn action(action: A) -> Self {
        Self::Action(action)
    }

    /// Wrap an effect in a fresh instance.
    pub fn effect(effect: E) -> Self {
        Self::Effect(Arc::new(effect))
    }

    /// Whether this is an action.
    pub fn is_action(&self) -> bool {
        matches!(self, Self::Action(_))
    }

    /// Whether this is an effect.
    pub fn is_effect(&self) -> bool {
        matches!(self, Self::Effect(_))
    }
}

impl<A: Action, E: Effect> Dispatchable<A, E> {
    /// Name of the wrapped action or effect
    pub fn name(&self) -> &'static str {
        match self {
            Self::Action(action) => action.name(),
            Self::Effect(effect) => effect.name(),
        }
    }
}

impl<A: Clone, E> Clone for Dispatchable<A, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Action(action) => Self::Action(action.clone()),
            Self::Effect(effect) => Self::Effect(Arc::clone(effect)),
        }
    }
}
