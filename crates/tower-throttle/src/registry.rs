//! Registry of per-endpoint limiters.
//!
//! Limiters are created on the first admission check for their composite key
//! (endpoint name plus grouping flag) and removed only by a cleanup sweep,
//! and only while the transport holds nothing for their endpoint. The
//! registry lock is held just long enough to fetch or create; limiter state
//! has its own lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::limiter::EndpointLimiter;
use crate::transport::PoolView;

pub(crate) struct LimiterRegistry {
    interval: Duration,
    limiters: Mutex<HashMap<String, EndpointLimiter>>,
}

impl LimiterRegistry {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the limiter for `(name, flag)`, creating it if absent.
    ///
    /// On creation the working limit starts at the caller target (clamped).
    /// On every subsequent fetch a changed target is re-applied: a lowered
    /// target clamps the working limit immediately, a raised one only lifts
    /// the ceiling.
    pub(crate) fn get_at(
        &self,
        now: Instant,
        name: &str,
        flag: &str,
        target: u64,
    ) -> EndpointLimiter {
        let key = composite_key(name, flag);
        let mut map = self.lock();
        if let Some(limiter) = map.get(&key).cloned() {
            // Target re-clamp happens outside the registry lock.
            drop(map);
            limiter.update_target(target);
            return limiter;
        }
        let limiter = EndpointLimiter::new(name, flag, target, self.interval, now);
        map.insert(key, limiter.clone());
        limiter
    }

    /// Removes every limiter whose interval went stale more than
    /// `CLEANUP_TIME` ago and whose endpoint has no open sockets, free
    /// sockets, or pending requests in the transport.
    pub(crate) fn cleanup_at(&self, now: Instant, pool: &dyn PoolView) {
        let mut map = self.lock();
        map.retain(|_, limiter| !limiter.expired_at(now) || pool.has_activity(limiter.name()));
    }

    /// Snapshot of every live limiter.
    pub(crate) fn limiters(&self) -> Vec<EndpointLimiter> {
        self.lock().values().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, EndpointLimiter>> {
        self.limiters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn composite_key(name: &str, flag: &str) -> String {
    let mut key = String::with_capacity(name.len() + flag.len());
    key.push_str(name);
    key.push_str(flag);
    key
}
