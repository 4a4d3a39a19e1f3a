//! Keyed mutation queue.
//!
//! At most one operation runs per key. An operation is admitted once its key
//! set is disjoint from every running operation and from every operation that
//! queued before it, so admission is FIFO per key and operations on unrelated
//! keys run concurrently. Keys are released when the operation finishes,
//! fails, panics or is dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

/// Where a queued operation is placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    #[default]
    Normal,
    /// Ahead of every waiting normal operation. Never preempts running ones.
    First,
}

struct Waiter {
    id: u64,
    priority: Priority,
    keys: Vec<String>,
    wake: oneshot::Sender<()>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    /// Key to the id of the operation holding it.
    running: HashMap<String, u64>,
    waiting: VecDeque<Waiter>,
}

impl State {
    fn is_free(&self, keys: &[String], earlier: &[&Waiter]) -> bool {
        keys.iter().all(|k| {
            !self.running.contains_key(k) && !earlier.iter().any(|w| w.keys.contains(k))
        })
    }

    fn hold(&mut self, id: u64, keys: &[String]) {
        for key in keys {
            self.running.insert(key.clone(), id);
        }
    }

    fn release(&mut self, id: u64, keys: &[String]) {
        for key in keys {
            if self.running.get(key) == Some(&id) {
                self.running.remove(key);
            }
        }
    }

    /// Admit every waiter whose keys are free of running and earlier waiters.
    fn dispatch(&mut self) {
        let mut blocked: HashSet<String> = self.running.keys().cloned().collect();
        let mut index = 0;
        while index < self.waiting.len() {
            let free = self.waiting[index]
                .keys
                .iter()
                .all(|k| !blocked.contains(k));
            if !free {
                blocked.extend(self.waiting[index].keys.iter().cloned());
                index += 1;
                continue;
            }
            let Some(waiter) = self.waiting.remove(index) else {
                break;
            };
            // A dropped receiver means the caller went away while queued.
            if waiter.wake.send(()).is_ok() {
                self.hold(waiter.id, &waiter.keys);
                blocked.extend(waiter.keys);
            }
        }
    }
}

/// Serializes mutations per resource key.
#[derive(Clone, Default)]
pub struct MutationQueue {
    state: Arc<Mutex<State>>,
}

impl MutationQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` once it holds every key in `keys`.
    ///
    /// There is no timeout. Dropping the returned future while it waits
    /// removes it from the queue.
    pub async fn run<I, K, F, Fut>(&self, keys: I, priority: Priority, operation: F) -> Fut::Output
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let (id, wait) = self.enqueue(&keys, priority);
        if let Some(wait) = wait {
            let pending = Pending {
                state: &self.state,
                id,
                keys: &keys,
                armed: true,
            };
            let _ = wait.await;
            pending.disarm();
        }

        let _held = Held {
            state: &self.state,
            id,
            keys: &keys,
        };
        trace!(keys = ?keys, "mutation admitted");
        operation().await
    }

    fn enqueue(&self, keys: &[String], priority: Priority) -> (u64, Option<oneshot::Receiver<()>>) {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;

        let position = match priority {
            Priority::Normal => state.waiting.len(),
            Priority::First => state
                .waiting
                .iter()
                .take_while(|w| w.priority == Priority::First)
                .count(),
        };
        let earlier: Vec<&Waiter> = state.waiting.iter().take(position).collect();
        if state.is_free(keys, &earlier) {
            state.hold(id, keys);
            return (id, None);
        }

        let (wake, wait) = oneshot::channel();
        state.waiting.insert(
            position,
            Waiter {
                id,
                priority,
                keys: keys.to_vec(),
                wake,
            },
        );
        (id, Some(wait))
    }

    /// Keys currently held by running operations.
    #[must_use]
    pub fn running_keys(&self) -> usize {
        self.state.lock().running.len()
    }

    /// Operations waiting for admission.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting.len()
    }
}

/// Removes a waiter that is dropped before it runs.
struct Pending<'a> {
    state: &'a Mutex<State>,
    id: u64,
    keys: &'a [String],
    armed: bool,
}

impl Pending<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock();
        let before = state.waiting.len();
        state.waiting.retain(|w| w.id != self.id);
        if state.waiting.len() == before {
            // Admitted between wake-up and drop.
            state.release(self.id, self.keys);
        }
        state.dispatch();
    }
}

/// Releases held keys on every exit path.
struct Held<'a> {
    state: &'a Mutex<State>,
    id: u64,
    keys: &'a [String],
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.release(self.id, self.keys);
        state.dispatch();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    #[tokio::test]
    async fn disjoint_keys_run_concurrently() {
        let queue = MutationQueue::new();
        let gate = Arc::new(Notify::new());

        let q = queue.clone();
        let g = gate.clone();
        let first = tokio::spawn(async move {
            q.run(["a"], Priority::Normal, || async move { g.notified().await })
                .await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ran = queue.run(["b"], Priority::Normal, || async { true }).await;
        assert!(ran);

        gate.notify_one();
        first.await.unwrap();
        assert_eq!(queue.running_keys(), 0);
    }

    #[tokio::test]
    async fn same_key_runs_in_order() {
        let queue = MutationQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..5 {
            let q = queue.clone();
            let o = order.clone();
            handles.push(tokio::spawn(async move {
                q.run(["contract", "user"], Priority::Normal, || async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    o.lock().push(i);
                })
                .await;
            }));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn first_priority_jumps_waiting_normals() {
        let queue = MutationQueue::new();
        let gate = Arc::new(Notify::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let q = queue.clone();
        let g = gate.clone();
        let running = tokio::spawn(async move {
            q.run(["c"], Priority::Normal, || async move { g.notified().await })
                .await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let q = queue.clone();
        let o = order.clone();
        let normal = tokio::spawn(async move {
            q.run(["c"], Priority::Normal, || async move { o.lock().push("normal") })
                .await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let q = queue.clone();
        let o = order.clone();
        let first = tokio::spawn(async move {
            q.run(["c"], Priority::First, || async move { o.lock().push("first") })
                .await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.waiting(), 2);

        gate.notify_one();
        running.await.unwrap();
        normal.await.unwrap();
        first.await.unwrap();
        assert_eq!(*order.lock(), vec!["first", "normal"]);
    }

    #[tokio::test]
    async fn keys_are_released_after_panic() {
        let queue = MutationQueue::new();
        let q = queue.clone();
        let result = tokio::spawn(async move {
            q.run(["k"], Priority::Normal, || async { panic!("boom") })
                .await;
        })
        .await;
        assert!(result.is_err());
        assert_eq!(queue.running_keys(), 0);

        let ran = queue.run(["k"], Priority::Normal, || async { 7 }).await;
        assert_eq!(ran, 7);
    }

    #[tokio::test]
    async fn dropped_waiter_is_skipped() {
        let queue = MutationQueue::new();
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let q = queue.clone();
        let g = gate.clone();
        let running = tokio::spawn(async move {
            q.run(["k"], Priority::Normal, || async move { g.notified().await })
                .await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let q = queue.clone();
        let c = calls.clone();
        let abandoned = tokio::spawn(async move {
            q.run(["k"], Priority::Normal, || async move {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        abandoned.abort();
        let _ = abandoned.await;
        assert_eq!(queue.waiting(), 0);

        gate.notify_one();
        running.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.running_keys(), 0);
    }

    #[tokio::test]
    async fn overlapping_key_sets_wait_for_each_other() {
        let queue = MutationQueue::new();
        let gate = Arc::new(Notify::new());

        let q = queue.clone();
        let g = gate.clone();
        let running = tokio::spawn(async move {
            q.run(["contract", "alice"], Priority::Normal, || async move {
                g.notified().await;
            })
            .await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let q = queue.clone();
        let waiting = tokio::spawn(async move {
            q.run(["contract", "bob"], Priority::Normal, || async { "bob" })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.waiting(), 1);

        // Disjoint from the running op but behind the waiter on "bob".
        let q = queue.clone();
        let behind = tokio::spawn(async move {
            q.run(["bob"], Priority::Normal, || async { "behind" }).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.waiting(), 2);

        gate.notify_one();
        running.await.unwrap();
        assert_eq!(waiting.await.unwrap(), "bob");
        assert_eq!(behind.await.unwrap(), "behind");
    }
}
