//! Composable subscription pipelines
//!
//! A [`Subscription`] turns the raw `(old, new)` state pushes of a store into
//! the slice a subscriber actually cares about. Each transform returns a new
//! subscription wrapping the previous one, and every stage forwards to exactly
//! one downstream consumer.
//!
//! # Example
//!
//! ```
//! use statecraft_core::Subscription;
//!
//! struct AppState { count: i32, title: String }
//!
//! let sub = Subscription::<AppState>::new()
//!     .select(|s| s.count)
//!     .only(|_, new| *new >= 0)
//!     .skip_repeats();
//!
//! let mut seen = Vec::new();
//! let state = AppState { count: 3, title: "x".into() };
//! sub.push(None, &state, &mut |_, count| seen.push(*count));
//! assert_eq!(seen, vec![3]);
//! ```
//!
//! An absent `old` value always passes `skip`/`only` stages, so the first push
//! after subscribing is never filtered.

/// Downstream consumer of one stage.
pub type Emit<'a, T> = &'a mut dyn FnMut(Option<&T>, &T);

type Stage<S, T> = dyn Fn(Option<&S>, &S, &mut dyn FnMut(Option<&T>, &T)) + Send + Sync;

fn stage<S, T, F>(f: F) -> Box<Stage<S, T>>
where
    F: Fn(Option<&S>, &S, &mut dyn FnMut(Option<&T>, &T)) + Send + Sync + 'static,
{
    Box::new(f)
}

/// A transform pipeline from source state `S` to selected state `T`.
pub struct Subscription<S, T = S> {
    stage: Box<Stage<S, T>>,
}

impl<S: 'static> Subscription<S> {
    /// Identity pipeline: forwards every push unchanged.
    pub fn new() -> Self {
        Self {
            stage: stage(|old: Option<&S>, new: &S, emit: &mut dyn FnMut(Option<&S>, &S)| {
                emit(old, new)
            }),
        }
    }
}

impl<S: 'static> Default for Subscription<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, T> std::fmt::Debug for Subscription<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

impl<S: 'static, T: 'static> Subscription<S, T> {
    /// Map both the old (when present) and new value through `f`.
    pub fn select<U, F>(self, f: F) -> Subscription<S, U>
    where
        U: 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let parent = self.stage;
        Subscription {
            stage: stage(
                move |old: Option<&S>, new: &S, emit: &mut dyn FnMut(Option<&U>, &U)| {
                    parent(old, new, &mut |old: Option<&T>, new: &T| {
                        let old = old.map(|value| f(value));
                        let new = f(new);
                        emit(old.as_ref(), &new);
                    })
                },
            ),
        }
    }

    /// Drop a push when `old` is present and `predicate(old, new)` holds.
    pub fn skip<P>(self, predicate: P) -> Self
    where
        P: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let parent = self.stage;
        Subscription {
            stage: stage(
                move |old: Option<&S>, new: &S, emit: &mut dyn FnMut(Option<&T>, &T)| {
                    parent(old, new, &mut |old: Option<&T>, new: &T| {
                        if let Some(previous) = old {
                            if predicate(previous, new) {
                                return;
                            }
                        }
                        emit(old, new);
                    })
                },
            ),
        }
    }

    /// Keep a push only when `predicate(old, new)` holds (or `old` is absent).
    pub fn only<P>(self, predicate: P) -> Self
    where
        P: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.skip(move |old, new| !predicate(old, new))
    }

    /// Drop pushes whose value equals the previous one under `equals`.
    pub fn skip_repeats_by<P>(self, equals: P) -> Self
    where
        P: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.skip(equals)
    }

    /// Drop pushes whose value is structurally equal to the previous one.
    pub fn skip_repeats(self) -> Self
    where
        T: PartialEq,
    {
        self.skip(|old, new| old == new)
    }

    /// Run one `(old, new)` pair through the pipeline.
    pub fn push(&self, old: Option<&S>, new: &S, emit: Emit<'_, T>) {
        (self.stage)(old, new, emit)
    }
}
