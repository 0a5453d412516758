//! In-process single-flight execution
//!
//! Concurrent callers asking for the same key share one execution: the
//! first caller (the leader) runs the work, everyone else blocks until the
//! leader publishes its result and then receives a clone of it. The map lock
//! is held only to look up or insert the in-flight call, never while the
//! work runs, so unrelated keys never wait on each other.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// The leader panicked before producing a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abandoned;

/// Result of [`SingleFlight::run`]
#[derive(Debug)]
pub struct Flight<V> {
    pub value: V,
    /// True when another caller ran the work
    pub shared: bool,
}

enum CallState<V> {
    Pending,
    Done(V),
    Abandoned,
}

struct Call<V> {
    state: Mutex<CallState<V>>,
    finished: Condvar,
}

impl<V: Clone> Call<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CallState::Pending),
            finished: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<V, Abandoned> {
        let mut state = lock(&self.state);
        loop {
            match &*state {
                CallState::Pending => {
                    state = self
                        .finished
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                CallState::Done(value) => return Ok(value.clone()),
                CallState::Abandoned => return Err(Abandoned),
            }
        }
    }

    fn finish(&self, next: CallState<V>) {
        *lock(&self.state) = next;
        self.finished.notify_all();
    }
}

pub struct SingleFlight<K, V> {
    calls: Mutex<HashMap<K, Arc<Call<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a call for it is already in flight
    pub fn run<F>(&self, key: &K, work: F) -> Result<Flight<V>, Abandoned>
    where
        F: FnOnce() -> V,
    {
        let (call, leader) = {
            let mut calls = lock(&self.calls);
            match calls.get(key) {
                Some(call) => (Arc::clone(call), false),
                None => {
                    let call = Arc::new(Call::new());
                    calls.insert(key.clone(), Arc::clone(&call));
                    (call, true)
                }
            }
        };

        if !leader {
            return call.wait().map(|value| Flight {
                value,
                shared: true,
            });
        }

        let mut completion = Completion {
            group: self,
            key,
            call: &call,
            done: false,
        };
        let value = work();
        completion.complete(value.clone());

        Ok(Flight {
            value,
            shared: false,
        })
    }

    /// Number of keys currently in flight
    pub fn in_flight(&self) -> usize {
        lock(&self.calls).len()
    }

    fn forget(&self, key: &K) {
        lock(&self.calls).remove(key);
    }
}

/// Finishes the leader's call, also when the work panics
struct Completion<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    group: &'a SingleFlight<K, V>,
    key: &'a K,
    call: &'a Call<V>,
    done: bool,
}

impl<K, V> Completion<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn complete(&mut self, value: V) {
        // Forget first: callers arriving from now on start a fresh call
        self.group.forget(self.key);
        self.call.finish(CallState::Done(value));
        self.done = true;
    }
}

impl<K, V> Drop for Completion<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.done {
            self.group.forget(self.key);
            self.call.finish(CallState::Abandoned);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_sequential_calls_each_run() {
        let group: SingleFlight<&str, u32> = SingleFlight::new();
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            let flight = group
                .run(&"k", || runs.fetch_add(1, Ordering::SeqCst) as u32)
                .unwrap();
            assert!(!flight.shared);
        }

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(group.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_callers_share_one_run() {
        let group: Arc<SingleFlight<String, u64>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let group = Arc::clone(&group);
                let runs = Arc::clone(&runs);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    group
                        .run(&"bridge".to_string(), || {
                            runs.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(200));
                            42
                        })
                        .unwrap()
                })
            })
            .collect();

        let flights: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(flights.iter().all(|f| f.value == 42));
        assert_eq!(flights.iter().filter(|f| !f.shared).count(), 1);
    }

    #[test]
    fn test_unrelated_keys_do_not_wait() {
        let group: Arc<SingleFlight<u32, u32>> = Arc::new(SingleFlight::new());
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let slow = {
            let group = Arc::clone(&group);
            thread::spawn(move || {
                group
                    .run(&1, || {
                        started_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        1
                    })
                    .unwrap()
            })
        };

        started_rx.recv().unwrap();
        // Key 1 is still in flight; key 2 must complete immediately
        let other = group.run(&2, || 2).unwrap();
        assert_eq!(other.value, 2);

        release_tx.send(()).unwrap();
        assert_eq!(slow.join().unwrap().value, 1);
    }

    #[test]
    fn test_panicking_leader_releases_waiters() {
        let group: Arc<SingleFlight<u32, u32>> = Arc::new(SingleFlight::new());
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let leader = {
            let group = Arc::clone(&group);
            thread::spawn(move || {
                let _ = group.run(&7, || {
                    started_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(200));
                    panic!("builder exploded");
                });
            })
        };

        started_rx.recv().unwrap();
        let follower = group.run(&7, || 99);
        assert!(leader.join().is_err());

        // Either joined the doomed call or started after it was forgotten
        match follower {
            Err(Abandoned) => {}
            Ok(flight) => assert_eq!(flight.value, 99),
        }

        assert_eq!(group.in_flight(), 0);
        assert_eq!(group.run(&7, || 5).unwrap().value, 5);
    }
}
