//! Core types for statecraft
//!
//! A unidirectional state container: actions flow through a middleware chain
//! into a pure reducer, the new state is swapped in atomically, and every
//! subscription is notified synchronously before `dispatch` returns. Effects
//! are one-shot notifications that bypass reducers and reach listeners only.
//!
//! # Core Concepts
//!
//! - **Store**: one reducer, one state, a fixed middleware chain
//! - **Subscription**: a composable transform (`select`, `skip`, `only`,
//!   `skip_repeats`) between a store and a subscriber
//! - **ChildStore**: a store that shares its parent's pipeline and sees a
//!   `Pair` of parent and child state
//! - **CompositeStore**: a read-only projection over several stores that
//!   broadcasts each action to every member exactly once
//! - **Thunk**: an action carrying code, run by [`ThunkMiddleware`]
//!
//! # Basic Example
//!
//! ```
//! use std::sync::Arc;
//! use statecraft_core::{Action, Store};
//!
//! #[derive(Clone, Debug)]
//! enum Counter {
//!     Increment,
//!     Decrement,
//! }
//!
//! impl Action for Counter {
//!     fn name(&self) -> &'static str {
//!         match self {
//!             Counter::Increment => "Increment",
//!             Counter::Decrement => "Decrement",
//!         }
//!     }
//! }
//!
//! fn reducer(action: &Counter, state: Option<&i32>) -> i32 {
//!     let count = state.copied().unwrap_or(0);
//!     match action {
//!         Counter::Increment => count + 1,
//!         Counter::Decrement => count - 1,
//!     }
//! }
//!
//! let store: Store<i32, Counter> = Store::new(reducer, 0);
//! let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let subscriber = Arc::new(move |count: &i32| sink.lock().unwrap().push(*count));
//! store.subscribe(&subscriber);
//!
//! store.dispatch_action(Counter::Increment).unwrap();
//! store.dispatch_action(Counter::Increment).unwrap();
//! assert_eq!(*store.state(), 2);
//! assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
//! ```
//!
//! # Selecting a slice
//!
//! ```
//! # use std::sync::Arc;
//! # use statecraft_core::{Action, Store, StoreOptions};
//! # #[derive(Clone, Debug)] struct Tick;
//! # impl Action for Tick { fn name(&self) -> &'static str { "Tick" } }
//! let store: Store<(u32, u32), Tick> = Store::builder(|_: &Tick, s: Option<&(u32, u32)>| {
//!     let (a, b) = s.copied().unwrap_or_default();
//!     (a + 1, b)
//! })
//! .options(StoreOptions::named("pair"))
//! .build((0, 0));
//!
//! let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
//! let counter = Arc::clone(&hits);
//! let only_b = Arc::new(move |_: &u32| {
//!     counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
//! });
//! store.subscribe_with(&only_b, |s| s.select(|pair| pair.1).skip_repeats());
//!
//! store.dispatch_action(Tick).unwrap();
//! // Initial delivery only: `b` never changed
//! assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
//! ```
//!
//! # Async edge
//!
//! Dispatch is synchronous. Async work either runs inside a [`Thunk::future`]
//! or sends [`Dispatchable`]s into a channel drained by
//! [`runtime::spawn_dispatch_loop`].

pub mod action;
pub mod child;
pub mod composite;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod middleware;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod subscription;
#[cfg(feature = "tasks")]
pub mod tasks;
pub mod testing;
pub mod thunk;

// Core trait exports
pub use action::{Action, Dispatchable, Effect, InitAction, NoEffect};

// Store exports
pub use child::{ChildStore, Pair};
pub use composite::{
    combine2, combine3, Broadcast, CompositeBuilder, CompositeStore, Projection, StateList,
    StateSource, StoreNode,
};
pub use config::StoreOptions;
pub use dispatch::{DispatchError, Dispatcher, StateAccessor, StoreId};
pub use store::{Reducer, Store, StoreBuilder};

// Subscription exports
pub use registry::{EffectObserver, Listener, ObserverId, Subscriber, SubscriberId};
pub use subscription::Subscription;

// Middleware exports
pub use logging::{LoggerConfig, LoggingMiddleware};
pub use middleware::{middleware_fn, FnMiddleware, Middleware, MiddlewareApi, MiddlewareId, Next};
pub use thunk::{Thunk, ThunkAction, ThunkMiddleware, ThunkParts};

// Runtime exports
pub use runtime::{spawn_dispatch_loop, LoopStats};

// Task exports (requires "tasks" feature)
#[cfg(feature = "tasks")]
pub use tasks::{TaskKey, TaskManager};

// Testing exports
pub use testing::{ActionAssertions, CallCounter, Recorder, TestHarness};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{Action, Dispatchable, Effect, InitAction, NoEffect};
    pub use crate::child::{ChildStore, Pair};
    pub use crate::composite::{combine2, combine3, CompositeStore, StateList};
    pub use crate::config::StoreOptions;
    pub use crate::dispatch::{DispatchError, Dispatcher, StateAccessor};
    pub use crate::logging::LoggingMiddleware;
    pub use crate::middleware::{middleware_fn, Middleware, MiddlewareApi, Next};
    pub use crate::registry::{Listener, Subscriber};
    pub use crate::store::Store;
    pub use crate::subscription::Subscription;
    #[cfg(feature = "tasks")]
    pub use crate::tasks::{TaskKey, TaskManager};
    pub use crate::thunk::{Thunk, ThunkMiddleware};
}
