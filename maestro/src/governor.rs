//! Process-wide resource governors.
//!
//! One counting semaphore caps in-flight LLM calls across every user and
//! mission in the process; a second caps concurrent web fetches. Per-mission
//! fan-out gets its own semaphore sized from `max_concurrent_requests`, so a
//! single mission cannot starve the global pool.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;

static GLOBAL_LLM: OnceCell<Arc<Semaphore>> = OnceCell::new();
static WEB_FETCH: OnceCell<Arc<Semaphore>> = OnceCell::new();

/// Default cap on concurrent LLM calls process-wide.
pub const DEFAULT_GLOBAL_LLM_MAX: usize = 200;
/// Default cap on concurrent web fetches.
pub const DEFAULT_WEB_FETCH_MAX: usize = 3;

/// The process-wide LLM semaphore. First call fixes the capacity from
/// `GLOBAL_MAX_CONCURRENT_LLM_REQUESTS` (default 200); later capacity changes
/// require a process restart.
pub fn global_llm_semaphore() -> Arc<Semaphore> {
    GLOBAL_LLM
        .get_or_init(|| {
            let cap = env_cap("GLOBAL_MAX_CONCURRENT_LLM_REQUESTS", DEFAULT_GLOBAL_LLM_MAX);
            tracing::info!(capacity = cap, "created global LLM semaphore");
            Arc::new(Semaphore::new(cap))
        })
        .clone()
}

/// The process-wide web-fetch semaphore (`WEB_FETCH_MAX_CONCURRENT`, default 3).
pub fn web_fetch_semaphore() -> Arc<Semaphore> {
    WEB_FETCH
        .get_or_init(|| {
            let cap = env_cap("WEB_FETCH_MAX_CONCURRENT", DEFAULT_WEB_FETCH_MAX);
            Arc::new(Semaphore::new(cap))
        })
        .clone()
}

/// A fresh per-mission fan-out semaphore.
pub fn mission_semaphore(max_concurrent_requests: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(max_concurrent_requests.max(1)))
}

fn env_cap(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn global_semaphore_is_one_instance() {
        // Other tests may hold permits concurrently, so assert identity
        // rather than an exact available count.
        let a = global_llm_semaphore();
        let b = global_llm_semaphore();
        assert!(Arc::ptr_eq(&a, &b));
        let permit = b.acquire().await.unwrap();
        drop(permit);
    }

    #[tokio::test]
    async fn mission_semaphore_bounds_fanout() {
        let sem = mission_semaphore(2);
        let p1 = sem.clone().try_acquire_owned().unwrap();
        let _p2 = sem.clone().try_acquire_owned().unwrap();
        assert!(sem.clone().try_acquire_owned().is_err());
        drop(p1);
        assert!(sem.try_acquire_owned().is_ok());
    }

    #[test]
    fn mission_semaphore_floor_is_one() {
        let sem = mission_semaphore(0);
        assert_eq!(sem.available_permits(), 1);
    }
}
