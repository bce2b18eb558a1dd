//! TTL cache over backend operations with single-flight coalescing, built
//! around a plain `std::sync::Mutex` that is never held across an `.await`.
//!
//! The single-flight gate is a *separate*, per-key `tokio::sync::Mutex`
//! acquired by whichever caller arrives first for that key; later callers
//! block on the same gate rather than on the cache's own mutex, so one stuck
//! backend call can never stall an unrelated key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub struct RequestCache<T> {
    ttl: Duration,
    store: Mutex<HashMap<String, (Instant, Arc<T>)>>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<T: Clone + Send + Sync + 'static> RequestCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            store: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn fast_get(&self, key: &str) -> Option<Arc<T>> {
        let guard = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let (at, value) = guard.get(key)?;
        if at.elapsed() < self.ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    fn gate_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Return a cached value if fresh, otherwise perform `fetch` with at most
    /// one in-flight call per key, with no cache mutex held across the call.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(v) = self.fast_get(key) {
            return Ok(v);
        }

        let gate = self.gate_for(key);
        let _permit = gate.lock().await;

        // Someone else may have just finished while we waited for the gate.
        if let Some(v) = self.fast_get(key) {
            return Ok(v);
        }

        let result = fetch().await;
        match result {
            Ok(value) => {
                let arc = Arc::new(value);
                self.store
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key.to_string(), (Instant::now(), arc.clone()));
                Ok(arc)
            }
            Err(e) => Err(e),
        }
    }

    /// Invalidate one key. Write operations call this before returning
    /// success so readers arriving after the write observe a miss.
    pub fn invalidate(&self, key: &str) {
        self.store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[tokio::test]
    async fn caches_within_ttl() {
        let cache = RequestCache::<u32>::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let v1 = cache
            .get_or_fetch("k", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, ()>(1)
                }
            })
            .await
            .unwrap();
        let c = calls.clone();
        let v2 = cache
            .get_or_fetch("k", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, ()>(2)
                }
            })
            .await
            .unwrap();
        assert_eq!(*v1, 1);
        assert_eq!(*v2, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let cache = RequestCache::<u32>::new(Duration::from_secs(0));
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = calls.clone();
            cache
                .get_or_fetch("k", || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok::<u32, ()>(1)
                    }
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = RequestCache::<u32>::new(Duration::from_secs(60));
        cache.get_or_fetch("k", || async { Ok::<u32, ()>(1) }).await.unwrap();
        cache.invalidate("k");
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let v = cache
            .get_or_fetch("k", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, ()>(9)
                }
            })
            .await
            .unwrap();
        assert_eq!(*v, 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_single_flight_to_one_call() {
        let cache = Arc::new(RequestCache::<u32>::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait();
                cache
                    .get_or_fetch("k", || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<u32, ()>(7)
                        }
                    })
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            assert_eq!(*h.await.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
