//! statecraft: unidirectional state management for Rust
//!
//! Actions flow through middleware into pure reducers, new state replaces the
//! old atomically, and composable subscriptions deliver exactly the slice each
//! subscriber asked for. Stores nest as parent/child pairs and combine into
//! composite projections that still see every action exactly once.
//!
//! # Example
//! ```ignore
//! use statecraft::prelude::*;
//!
//! #[derive(Action, Clone, Debug)]
//! enum TodoAction {
//!     #[action(init)]
//!     Init,
//!     Add(String),
//!     Clear,
//! }
//!
//! #[derive(Effect, Debug)]
//! enum TodoEffect {
//!     Saved,
//! }
//!
//! fn todos(action: &TodoAction, state: Option<&Vec<String>>) -> Vec<String> {
//!     let mut items = state.cloned().unwrap_or_default();
//!     match action {
//!         TodoAction::Init => {}
//!         TodoAction::Add(item) => items.push(item.clone()),
//!         TodoAction::Clear => items.clear(),
//!     }
//!     items
//! }
//!
//! let store: Store<Vec<String>, TodoAction, TodoEffect> = Store::init(todos);
//! let count = Arc::new(|n: &usize| println!("{n} items"));
//! store.subscribe_with(&count, |s| s.select(Vec::len).skip_repeats());
//! store.dispatch_action(TodoAction::Add("milk".into()))?;
//! ```

// Re-export everything from core
pub use statecraft_core::*;

// Re-export derive macros
pub use statecraft_macros::{Action, Effect};

/// Prelude for convenient imports
pub mod prelude {
    // Traits
    pub use statecraft_core::{Action, Effect, InitAction, Listener, Middleware, Subscriber};

    // Stores
    pub use statecraft_core::{
        combine2, combine3, ChildStore, CompositeStore, Pair, StateList, Store, StoreOptions,
    };

    // Dispatch
    pub use statecraft_core::{DispatchError, Dispatchable, Dispatcher, NoEffect, StateAccessor};

    // Subscriptions and middleware
    pub use statecraft_core::{
        middleware_fn, LoggingMiddleware, MiddlewareApi, Next, Subscription, Thunk,
        ThunkMiddleware,
    };

    #[cfg(feature = "tasks")]
    pub use statecraft_core::{TaskKey, TaskManager};

    // Derive macros
    pub use statecraft_macros::{Action, Effect};
}
