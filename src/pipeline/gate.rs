//! Single-flight access to the engine
//!
//! The gate wraps the engine in a tokio mutex. Its waiters are served in
//! arrival order, and a waiter whose future is dropped leaves the queue
//! without affecting the others.

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::engine::Engine;

/// Process-wide gate in front of the one engine instance
#[derive(Clone)]
pub struct EngineGate {
    engine: Arc<Mutex<Arc<dyn Engine>>>,
    waiting: Arc<AtomicUsize>,
}

/// Exclusive access to the engine, released on drop
pub struct EnginePermit {
    guard: OwnedMutexGuard<Arc<dyn Engine>>,
}

impl Deref for EnginePermit {
    type Target = dyn Engine;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

/// Counts a task as waiting for as long as it is alive
struct WaitSlot<'a>(&'a AtomicUsize);

impl<'a> WaitSlot<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EngineGate {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait until the caller is the sole holder of the engine
    pub async fn acquire(&self) -> EnginePermit {
        let _slot = WaitSlot::enter(&self.waiting);
        let guard = Arc::clone(&self.engine).lock_owned().await;
        EnginePermit { guard }
    }

    /// Tasks currently queued in [`EngineGate::acquire`]
    pub fn waiters(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::StubEngine;
    use std::time::Duration;

    fn gate() -> EngineGate {
        EngineGate::new(Arc::new(StubEngine::new()))
    }

    fn is_held(gate: &EngineGate) -> bool {
        gate.engine.try_lock().is_err()
    }

    #[tokio::test]
    async fn permit_is_exclusive_until_dropped() {
        let gate = gate();
        let permit = gate.acquire().await;
        assert!(is_held(&gate));
        assert_eq!(permit.name(), "stub");

        drop(permit);
        assert!(!is_held(&gate));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiters_are_served_in_arrival_order() {
        let gate = gate();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = gate.acquire().await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let task_gate = gate.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = task_gate.acquire().await;
                order.lock().unwrap().push(i);
            }));
            // Let the task reach the queue before the next one is spawned
            while gate.waiters() < i + 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn abandoned_wait_frees_its_slot() {
        let gate = gate();
        let held = gate.acquire().await;

        let waiter = tokio::time::timeout(Duration::from_millis(20), gate.acquire()).await;
        assert!(waiter.is_err());
        assert_eq!(gate.waiters(), 0);

        drop(held);
        let _again = gate.acquire().await;
        assert!(is_held(&gate));
    }
}
