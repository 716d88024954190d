// src/coalesce.rs
//! Request coalescing: identical concurrent calls share one computation, and a
//! finished value is reused for a short TTL.

use metrics::counter;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

pub const DEFAULT_COALESCE_TTL_MS: u64 = 5_000;

pub struct Coalescer<K, V> {
    ttl: Duration,
    inflight: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
    done: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K, V> Coalescer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inflight: Mutex::new(HashMap::new()),
            done: Mutex::new(HashMap::new()),
        }
    }

    fn recent(&self, key: &K) -> Option<V> {
        let done = self.done.lock().unwrap_or_else(|p| p.into_inner());
        done.get(key)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, v)| v.clone())
    }

    /// Value for `key`: a recent result, the result of a call already running,
    /// or a fresh run of `f`.
    pub async fn get_or_run<F, Fut>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(v) = self.recent(&key) {
            counter!("window_coalesced_total").increment(1);
            return v;
        }

        let cell = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let mut ran = false;
        let value = cell
            .get_or_init(|| {
                ran = true;
                f()
            })
            .await
            .clone();

        if ran {
            if !self.ttl.is_zero() {
                let mut done = self.done.lock().unwrap_or_else(|p| p.into_inner());
                let ttl = self.ttl;
                done.retain(|_, (at, _)| at.elapsed() < ttl);
                done.insert(key.clone(), (Instant::now(), value.clone()));
            }
            let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
            if inflight.get(&key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                inflight.remove(&key);
            }
        } else {
            counter!("window_coalesced_total").increment(1);
        }
        value
    }

    /// Forget finished values, e.g. after the ruleset changed.
    pub fn clear(&self) {
        self.done.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_share_one_run() {
        let co: Arc<Coalescer<u32, usize>> = Arc::new(Coalescer::new(Duration::from_millis(0)));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let co = co.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                co.get_or_run(1, || async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    runs.fetch_add(1, Ordering::SeqCst) + 1
                })
                .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), 1);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // TTL of zero: next call runs again.
        let v = co.get_or_run(1, || async { 42 }).await;
        assert_eq!(v, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_values_expire_after_ttl() {
        let co: Coalescer<&'static str, u32> = Coalescer::new(Duration::from_secs(5));
        assert_eq!(co.get_or_run("k", || async { 1 }).await, 1);
        assert_eq!(co.get_or_run("k", || async { 2 }).await, 1);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(co.get_or_run("k", || async { 3 }).await, 3);
        co.clear();
        assert_eq!(co.get_or_run("k", || async { 4 }).await, 4);
    }
}
