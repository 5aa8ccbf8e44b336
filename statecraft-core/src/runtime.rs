//! Async edge: feed a store from a channel
//!
//! Stores dispatch synchronously. Code running on other tasks or threads can
//! instead send [`Dispatchable`]s into a tokio channel that a single loop
//! drains into the store, one dispatch at a time.
//!
//! ```ignore
//! let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//! let cancel = CancellationToken::new();
//! let handle = spawn_dispatch_loop(store.dispatcher(), rx, cancel.clone());
//!
//! tx.send(Dispatchable::Action(AppAction::Refresh))?;
//! // ...
//! cancel.cancel();
//! let stats = handle.await?;
//! ```

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, Dispatchable, Effect};
use crate::dispatch::Dispatcher;

/// What a dispatch loop did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Dispatches that succeeded
    pub dispatched: usize,
    /// Dispatches that returned an error
    pub failed: usize,
}

/// Drain `rx` into `dispatcher` until `cancel` fires or every sender is gone.
///
/// Dispatch errors are logged and the loop keeps going. Items still queued
/// when the token fires are dropped.
pub fn spawn_dispatch_loop<A, E>(
    dispatcher: Dispatcher<A, E>,
    mut rx: mpsc::UnboundedReceiver<Dispatchable<A, E>>,
    cancel: CancellationToken,
) -> JoinHandle<LoopStats>
where
    A: Action,
    E: Effect,
{
    tokio::spawn(async move {
        let mut stats = LoopStats::default();
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Dispatch loop cancelled");
                    break;
                }

                next = rx.recv() => {
                    let Some(dispatchable) = next else {
                        tracing::debug!("Dispatch channel closed");
                        break;
                    };
                    let name = dispatchable.name();
                    match dispatcher.dispatch(dispatchable) {
                        Ok(()) => stats.dispatched += 1,
                        Err(err) => {
                            stats.failed += 1;
                            tracing::warn!(dispatchable = %name, error = %err, "Queued dispatch failed");
                        }
                    }
                }
            }
        }
        tracing::debug!(dispatched = stats.dispatched, failed = stats.failed, "Dispatch loop stopped");
        stats
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::testing::Recorder;

    #[derive(Clone, Debug)]
    enum TestAction {
        Add(i64),
    }

    impl Action for TestAction {
        fn name(&self) -> &'static str {
            "Add"
        }
    }

    #[derive(Debug)]
    struct Beep;

    impl Effect for Beep {
        fn name(&self) -> &'static str {
            "Beep"
        }
    }

    fn store() -> Store<i64, TestAction, Beep> {
        Store::new(
            |action: &TestAction, state: Option<&i64>| match action {
                TestAction::Add(n) => state.copied().unwrap_or(0) + n,
            },
            0,
        )
    }

    #[tokio::test]
    async fn test_loop_drains_until_senders_drop() {
        let store = store();
        let beeps = Recorder::new();
        store.add_listener(&beeps);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_dispatch_loop(store.dispatcher(), rx, CancellationToken::new());

        tx.send(Dispatchable::Action(TestAction::Add(2))).unwrap();
        tx.send(Dispatchable::effect(Beep)).unwrap();
        tx.send(Dispatchable::Action(TestAction::Add(3))).unwrap();
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats, LoopStats { dispatched: 3, failed: 0 });
        assert_eq!(*store.state(), 5);
        assert_eq!(beeps.len(), 1);
    }

    #[tokio::test]
    async fn test_loop_stops_on_cancel() {
        let store = store();
        let (_tx, rx) = mpsc::unbounded_channel::<Dispatchable<TestAction, Beep>>();
        let cancel = CancellationToken::new();
        let handle = spawn_dispatch_loop(store.dispatcher(), rx, cancel.clone());

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), LoopStats::default());
    }

    #[tokio::test]
    async fn test_loop_counts_failures_and_continues() {
        let store = store();
        let dispatcher = store.dispatcher();
        drop(store);

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_dispatch_loop(dispatcher, rx, CancellationToken::new());
        tx.send(Dispatchable::Action(TestAction::Add(1))).unwrap();
        tx.send(Dispatchable::Action(TestAction::Add(1))).unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), LoopStats { dispatched: 0, failed: 2 });
    }
}
