//! Task manager for async work that ends in a dispatch
//!
//! Provides lifecycle management for async tasks with support for:
//! - Automatic cancellation when spawning with same key
//! - Debounced execution
//! - Manual cancellation
//!
//! A finished task's action is dispatched through a [`Dispatcher`] as a new,
//! independent dispatch.
//!
//! # Example
//!
//! ```ignore
//! use statecraft::tasks::{TaskManager, TaskKey};
//! use std::time::Duration;
//!
//! let mut tasks = TaskManager::new(store.dispatcher());
//!
//! // Spawn a task - any existing task with same key is cancelled
//! tasks.spawn(TaskKey::new("fetch"), async {
//!     let data = fetch_data().await;
//!     Action::DidFetch(data)
//! });
//!
//! // Debounced task - waits before executing, resets on each call
//! tasks.debounce(TaskKey::new("search"), Duration::from_millis(200), async {
//!     let results = search(query).await;
//!     Action::DidSearch(results)
//! });
//!
//! tasks.cancel(&TaskKey::new("fetch"));
//! tasks.cancel_all();
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};

use crate::action::{Action, Effect};
use crate::dispatch::Dispatcher;

/// Identifies a task for cancellation and replacement.
///
/// Tasks with the same key are mutually exclusive - spawning a new task
/// with a key that's already running will cancel the existing task.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskKey(String);

impl TaskKey {
    /// Create a new task key.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the key name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for TaskKey {
    fn from(s: &'static str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Manages async task lifecycle with automatic cancellation.
///
/// The task manager maintains a registry of running tasks by key.
/// When a new task is spawned with a key that already exists,
/// the existing task is automatically cancelled before the new one starts.
///
/// # Type Parameters
///
/// - `A`: The action type that tasks produce
/// - `E`: The effect type of the target store
pub struct TaskManager<A, E> {
    tasks: HashMap<TaskKey, AbortHandle>,
    dispatcher: Dispatcher<A, E>,
}

impl<A, E> TaskManager<A, E>
where
    A: Action,
    E: Effect,
{
    /// Create a new task manager dispatching finished tasks into `dispatcher`.
    pub fn new(dispatcher: Dispatcher<A, E>) -> Self {
        Self {
            tasks: HashMap::new(),
            dispatcher,
        }
    }

    /// Spawn a task, cancelling any existing task with the same key.
    ///
    /// The action the future returns is dispatched when it completes. If the
    /// task is cancelled first, nothing is dispatched.
    ///
    /// # Example
    ///
    /// ```ignore
    /// tasks.spawn(TaskKey::new("weather"), async move {
    ///     match api::fetch_weather(lat, lon).await {
    ///         Ok(data) => Action::WeatherDidLoad(data),
    ///         Err(e) => Action::WeatherDidError(e.to_string()),
    ///     }
    /// });
    /// ```
    pub fn spawn<F>(&mut self, key: impl Into<TaskKey>, future: F) -> &mut Self
    where
        F: Future<Output = A> + Send + 'static,
    {
        self.spawn_after(key.into(), None, future)
    }

    /// Spawn a task with debounce - waits for duration before executing.
    ///
    /// If called again with the same key before the duration expires,
    /// the previous task is cancelled and the timer resets.
    ///
    /// # Example
    ///
    /// ```ignore
    /// // Only executes if no new input for 200ms
    /// tasks.debounce(TaskKey::new("search"), Duration::from_millis(200), async move {
    ///     let results = backend.search(&query).await;
    ///     Action::DidSearch(results)
    /// });
    /// ```
    pub fn debounce<F>(
        &mut self,
        key: impl Into<TaskKey>,
        duration: Duration,
        future: F,
    ) -> &mut Self
    where
        F: Future<Output = A> + Send + 'static,
    {
        self.spawn_after(key.into(), Some(duration), future)
    }

    fn spawn_after<F>(&mut self, key: TaskKey, delay: Option<Duration>, future: F) -> &mut Self
    where
        F: Future<Output = A> + Send + 'static,
    {
        self.cancel(&key);
        self.tasks.retain(|_, handle| !handle.is_finished());

        let dispatcher = self.dispatcher.clone();
        let name = key.name().to_string();
        let handle: JoinHandle<()> = tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let action = future.await;
            tracing::debug!(task = %name, action = %action.name(), "Task finished");
            if let Err(err) = dispatcher.dispatch_action(action) {
                tracing::warn!(task = %name, error = %err, "Dispatch from task failed");
            }
        });

        self.tasks.insert(key, handle.abort_handle());
        self
    }

    /// Cancel a task by key.
    ///
    /// If no task exists with the given key, this is a no-op.
    pub fn cancel(&mut self, key: &TaskKey) {
        if let Some(handle) = self.tasks.remove(key) {
            handle.abort();
        }
    }

    /// Cancel all running tasks.
    ///
    /// Useful for cleanup on shutdown.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }

    /// Check if a task with the given key is still running.
    pub fn is_running(&self, key: &TaskKey) -> bool {
        self.tasks
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Get the number of running tasks.
    pub fn len(&self) -> usize {
        self.tasks
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Check if there are no running tasks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the keys of all running tasks.
    pub fn running_keys(&self) -> impl Iterator<Item = &TaskKey> {
        self.tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(key, _)| key)
    }
}

impl<A, E> Drop for TaskManager<A, E> {
    fn drop(&mut self) {
        // Abort all running tasks on drop
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}
