//! Per-conversation task serialization.
//!
//! Tasks submitted under the same conversation key run strictly one after
//! another, in submission order, each starting only after the previous one has
//! settled (success, failure, panic or drop). Tasks without a key run
//! immediately.
//!
//! ```text
//! key "c1":  [chunk 1] ──settled──▶ [chunk 2] ──settled──▶ [chunk 3]
//! key "c2":  [chunk 4] ──settled──▶ [chunk 5]
//! no key:    [chunk 6]   [chunk 7]            (unordered)
//! ```
//!
//! A turn dropped before it was acquired does not release its successor; it
//! hands over the wait it was still holding, so a cancelled waiter never lets
//! the next task overtake the one still running.
//!
//! Each key maps to the tail of its chain; the entry is removed as soon as the
//! last queued task releases its turn, so memory is bounded by the number of
//! conversations with work in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::trace;

/// Sent by a turn dropped while still waiting: the wait its successor inherits
struct Handoff(Option<Settled>);

/// Resolves when the turn ahead settles, or hands its own wait over
type Settled = oneshot::Receiver<Handoff>;

#[derive(Default)]
struct Chain {
    /// Settles when the most recently queued task releases its turn
    tail: Option<Settled>,
    /// Tasks queued or running under this key
    pending: usize,
}

type Chains = Arc<Mutex<HashMap<String, Chain>>>;

/// Registry of keyed task chains
#[derive(Clone, Default)]
pub struct ConversationSerializer {
    chains: Chains,
}

impl ConversationSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with queued or running work
    pub fn active_keys(&self) -> usize {
        lock(&self.chains).len()
    }

    /// Queue `task` behind earlier tasks sharing `key`.
    ///
    /// The turn is taken when this method is called, not when the returned
    /// future is first polled, so submission order is call order.
    pub fn submit<F>(&self, key: Option<&str>, task: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let turn = key.map(|key| self.enqueue(key));

        async move {
            let Some(mut turn) = turn else {
                return task.await;
            };

            // The receiver stays inside the turn while awaited so a drop at
            // this point can still hand it on.
            while let Some(previous) = turn.previous.as_mut() {
                turn.previous = match previous.await {
                    Ok(Handoff(inherited)) => inherited,
                    // Sender dropped: the turn ahead settled.
                    Err(_) => None,
                };
            }
            trace!(key = %turn.key, "Conversation turn acquired");

            let output = task.await;
            drop(turn);
            output
        }
    }

    fn enqueue(&self, key: &str) -> Turn {
        let (release, settled) = oneshot::channel();

        let mut chains = lock(&self.chains);
        let chain = chains.entry(key.to_string()).or_default();
        let previous = chain.tail.replace(settled);
        chain.pending += 1;

        Turn {
            key: key.to_string(),
            previous,
            release: Some(release),
            chains: Arc::clone(&self.chains),
        }
    }
}

/// A place in a key's chain; releasing it (drop) lets the next task run
struct Turn {
    key: String,
    /// Wait on the turn ahead; `None` once acquired
    previous: Option<Settled>,
    release: Option<oneshot::Sender<Handoff>>,
    chains: Chains,
}

impl Drop for Turn {
    fn drop(&mut self) {
        if let (Some(previous), Some(release)) = (self.previous.take(), self.release.take()) {
            // Never acquired: the successor keeps waiting on our predecessor.
            // A failed send means nobody is queued behind us.
            trace!(key = %self.key, "Queued turn dropped, handing over its wait");
            let _ = release.send(Handoff(Some(previous)));
        }

        let mut chains = lock(&self.chains);
        if let Some(chain) = chains.get_mut(&self.key) {
            chain.pending = chain.pending.saturating_sub(1);
            if chain.pending == 0 {
                chains.remove(&self.key);
                trace!(key = %self.key, "Conversation chain drained");
            }
        }
    }
}

fn lock(chains: &Mutex<HashMap<String, Chain>>) -> MutexGuard<'_, HashMap<String, Chain>> {
    // The map is only touched in short non-panicking sections.
    chains.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn step(log: Log, name: impl Into<String>, delay_ms: u64) -> impl Future<Output = String> {
        let name = name.into();
        async move {
            log.lock().unwrap().push(format!("{}:start", name));
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            log.lock().unwrap().push(format!("{}:end", name));
            name
        }
    }

    #[tokio::test]
    async fn test_same_key_runs_in_submission_order() {
        let serializer = ConversationSerializer::new();
        let log: Log = Arc::default();

        let first = serializer.submit(Some("c1"), step(log.clone(), "a", 30));
        let second = serializer.submit(Some("c1"), step(log.clone(), "b", 0));
        let third = serializer.submit(Some("c1"), step(log.clone(), "c", 0));

        // Poll in reverse to show order comes from submission, not polling.
        let (c, b, a) = tokio::join!(third, second, first);
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("a", "b", "c"));

        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["a:start", "a:end", "b:start", "b:end", "c:start", "c:end"]);
        assert_eq!(serializer.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_interleave() {
        let serializer = ConversationSerializer::new();
        let log: Log = Arc::default();

        let slow = serializer.submit(Some("c1"), step(log.clone(), "slow", 40));
        let fast = serializer.submit(Some("c2"), step(log.clone(), "fast", 0));
        tokio::join!(slow, fast);

        let log = log.lock().unwrap().clone();
        let fast_end = log.iter().position(|e| e == "fast:end").unwrap();
        let slow_end = log.iter().position(|e| e == "slow:end").unwrap();
        assert!(fast_end < slow_end);
    }

    #[tokio::test]
    async fn test_failure_releases_the_next_task() {
        let serializer = ConversationSerializer::new();

        let failing = serializer.submit(Some("c1"), async { Err::<(), &str>("boom") });
        let next = serializer.submit(Some("c1"), async { Ok::<u32, &str>(7) });

        let (a, b) = tokio::join!(failing, next);
        assert!(a.is_err());
        assert_eq!(b, Ok(7));
        assert_eq!(serializer.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_block_successors() {
        let serializer = ConversationSerializer::new();

        let abandoned = serializer.submit(Some("c1"), async { 1 });
        let kept = serializer.submit(Some("c1"), async { 2 });
        assert_eq!(serializer.active_keys(), 1);

        drop(abandoned);
        assert_eq!(kept.await, 2);
        assert_eq!(serializer.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_dropped_middle_waiter_keeps_successor_queued() {
        let serializer = ConversationSerializer::new();
        let log: Log = Arc::default();

        let first = tokio::spawn(serializer.submit(Some("c1"), step(log.clone(), "a", 60)));
        let abandoned = serializer.submit(Some("c1"), step(log.clone(), "b", 0));
        let third = tokio::spawn(serializer.submit(Some("c1"), step(log.clone(), "c", 0)));

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(abandoned);

        first.await.unwrap();
        third.await.unwrap();

        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["a:start", "a:end", "c:start", "c:end"]);
        assert_eq!(serializer.active_keys(), 0);
    }

    #[test]
    fn test_handoff_survives_consecutive_drops() {
        use tokio_test::{assert_pending, assert_ready, task};

        let serializer = ConversationSerializer::new();
        let (tx, rx) = oneshot::channel::<()>();

        let mut head = task::spawn(serializer.submit(Some("c1"), async move { rx.await.is_ok() }));
        let second = serializer.submit(Some("c1"), async { "second" });
        let third = serializer.submit(Some("c1"), async { "third" });
        let mut last = task::spawn(serializer.submit(Some("c1"), async { "last" }));

        assert_pending!(head.poll());
        assert_pending!(last.poll());

        drop(second);
        drop(third);
        // Still queued behind the running head.
        assert_pending!(last.poll());
        assert_eq!(serializer.active_keys(), 1);

        tx.send(()).unwrap();
        assert!(assert_ready!(head.poll()));
        assert!(last.is_woken());
        assert_eq!(assert_ready!(last.poll()), "last");
        assert_eq!(serializer.active_keys(), 0);
    }

    #[test]
    fn test_second_turn_waits_for_the_first() {
        use tokio_test::{assert_pending, assert_ready, task};

        let serializer = ConversationSerializer::new();
        let (tx, rx) = oneshot::channel::<()>();

        let mut first = task::spawn(serializer.submit(Some("c1"), async move { rx.await.is_ok() }));
        let mut second = task::spawn(serializer.submit(Some("c1"), async { "second" }));

        assert_pending!(first.poll());
        assert_pending!(second.poll());

        tx.send(()).unwrap();
        assert!(assert_ready!(first.poll()));
        assert!(second.is_woken());
        assert_eq!(assert_ready!(second.poll()), "second");
    }

    #[tokio::test]
    async fn test_unkeyed_tasks_do_not_register() {
        let serializer = ConversationSerializer::new();
        let fut = serializer.submit(None, async { "free" });
        assert_eq!(serializer.active_keys(), 0);
        assert_eq!(fut.await, "free");
    }

    #[tokio::test]
    async fn test_spawned_tasks_keep_order() {
        let serializer = ConversationSerializer::new();
        let log: Log = Arc::default();

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let fut = serializer.submit(Some("c1"), step(log.clone(), format!("t{}", i), 5));
                tokio::spawn(fut)
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let starts: Vec<String> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.ends_with(":start"))
            .cloned()
            .collect();
        assert_eq!(starts, vec!["t0:start", "t1:start", "t2:start", "t3:start", "t4:start"]);
    }
}
