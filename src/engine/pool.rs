use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use super::EngineConfig;
use crate::context::Context;

/// Free list of request contexts.
///
/// Acquire pops an idle context or builds a new one; release pushes it back
/// unless the pool is already holding `capacity` idle contexts. Both sides
/// are lock-free, so a coroutine never parks its worker thread here.
/// A capacity of 0 disables pooling.
pub(crate) struct ContextPool {
    free: Option<ArrayQueue<Box<Context>>>,
    created: AtomicUsize,
}

impl ContextPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            free: (capacity > 0).then(|| ArrayQueue::new(capacity)),
            created: AtomicUsize::new(0),
        }
    }

    pub(crate) fn acquire(&self, config: &Arc<EngineConfig>, max_params: usize) -> Box<Context> {
        if let Some(c) = self.free.as_ref().and_then(ArrayQueue::pop) {
            return c;
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Box::new(Context::new(Arc::clone(config), max_params))
    }

    pub(crate) fn release(&self, c: Box<Context>) {
        if let Some(free) = &self.free {
            if let Err(overflow) = free.push(c) {
                drop(overflow);
            }
        }
    }

    pub(crate) fn idle(&self) -> usize {
        self.free.as_ref().map_or(0, ArrayQueue::len)
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuses_released_contexts() {
        let pool = ContextPool::new(4);
        let config = Arc::new(EngineConfig::default());

        let c = pool.acquire(&config, 8);
        pool.release(c);
        let _again = pool.acquire(&config, 8);

        assert_eq!(pool.created(), 1);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_capacity_bounds_idle_contexts() {
        let pool = ContextPool::new(1);
        let config = Arc::new(EngineConfig::default());

        let a = pool.acquire(&config, 0);
        let b = pool.acquire(&config, 0);
        pool.release(a);
        pool.release(b);

        assert_eq!(pool.created(), 2);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_zero_capacity_never_pools() {
        let pool = ContextPool::new(0);
        let config = Arc::new(EngineConfig::default());

        let c = pool.acquire(&config, 0);
        pool.release(c);
        let _fresh = pool.acquire(&config, 0);

        assert_eq!(pool.created(), 2);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_parallel_acquire_release() {
        let pool = Arc::new(ContextPool::new(8));
        let config = Arc::new(EngineConfig::default());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let config = Arc::clone(&config);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let c = pool.acquire(&config, 4);
                        pool.release(c);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(pool.created() <= 8);
        assert_eq!(pool.idle(), pool.created());
    }
}
