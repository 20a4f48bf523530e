//! # 按键去重的并发调用
//!
//! 同一个键上同时只执行一次操作，其余调用方等待并共享同一结果。
//! 发起方完成或被取消时键被移除，之后的调用会重新执行。

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

type InFlight<V> = (u64, Shared<BoxFuture<'static, V>>);

/// 发起方持有，离开作用域时移除本代的键
struct LeaderGuard<'a, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    calls: &'a DashMap<K, InFlight<V>>,
    key: K,
    generation: u64,
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn drop(&mut self) {
        self.calls
            .remove_if(&self.key, |_, (current, _)| *current == self.generation);
    }
}

/// 单飞执行器
pub struct SingleFlight<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    calls: DashMap<K, InFlight<V>>,
    generation: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self {
            calls: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }
}

impl<K, V> std::fmt::Debug for SingleFlight<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.calls.len())
            .finish()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行或加入键上的操作，返回结果以及是否为共享结果
    pub async fn run<F, Fut>(&self, key: K, operation: F) -> (V, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (generation, future, leader) = match self.calls.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                let (generation, future) = occupied.get();
                (*generation, future.clone(), false)
            }
            Entry::Vacant(vacant) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let future = operation().boxed().shared();
                vacant.insert((generation, future.clone()));
                (generation, future, true)
            }
        };

        let _guard = leader.then(|| LeaderGuard {
            calls: &self.calls,
            key,
            generation,
        });
        (future.await, !leader)
    }

    /// 正在执行的键数量
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flight: Arc<SingleFlight<i32, usize>> = Arc::new(SingleFlight::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let flight = Arc::clone(&flight);
                let executions = Arc::clone(&executions);
                tokio::spawn(async move {
                    flight
                        .run(7, move || async move {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            executions.fetch_add(1, Ordering::SeqCst) + 1
                        })
                        .await
                })
            })
            .collect();

        let mut shared = 0;
        for handle in handles {
            let (value, was_shared) = handle.await.unwrap();
            assert_eq!(value, 1);
            if was_shared {
                shared += 1;
            }
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(shared, 15);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_execute_again() {
        let flight: SingleFlight<&'static str, u32> = SingleFlight::new();
        let (first, _) = flight.run("k", || async { 1 }).await;
        let (second, shared) = flight.run("k", || async { 2 }).await;

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert!(!shared);
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_key() {
        let flight: Arc<SingleFlight<i32, i32>> = Arc::new(SingleFlight::new());
        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run(1, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        1
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(flight.in_flight(), 1);

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert_eq!(flight.in_flight(), 0);

        let (value, shared) = flight.run(1, || async { 2 }).await;
        assert_eq!(value, 2);
        assert!(!shared);
        let (value, shared) = flight.run(1, || async { 3 }).await;
        assert_eq!(value, 3);
        assert!(!shared);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flight: Arc<SingleFlight<i32, i32>> = Arc::new(SingleFlight::new());
        let a = flight.run(1, || async { 10 });
        let b = flight.run(2, || async { 20 });
        let ((va, _), (vb, _)) = tokio::join!(a, b);
        assert_eq!((va, vb), (10, 20));
    }
}
