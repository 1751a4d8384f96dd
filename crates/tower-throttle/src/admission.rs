//! The admission controller.
//!
//! Combines the per-endpoint token bucket with two pre-emptive gates fed by
//! the transport's pool tables: a pending-queue depth cutoff and an average
//! socket-buffer cutoff. Rising write buffers mean the network path is
//! saturating before the server is, and large buffers inflate effective
//! latency, so the buffer cutoff tightens once the endpoint's smoothed
//! latency degrades.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use http::Uri;

use crate::config::ThrottleConfig;
use crate::events::AgentEvent;
use crate::limiter::{EndpointLimiter, LimiterStat, RejectReason, CLEANUP_TIME};
use crate::registry::LimiterRegistry;
use crate::transport::PoolView;

#[cfg(feature = "metrics")]
use metrics::counter;

#[cfg(feature = "tracing")]
use tracing::warn;

pub(crate) struct AdmissionController {
    config: ThrottleConfig,
    registry: LimiterRegistry,
    pool: Arc<dyn PoolView>,
    sweeper_started: AtomicBool,
}

impl AdmissionController {
    pub(crate) fn new(config: ThrottleConfig, pool: Arc<dyn PoolView>) -> Self {
        #[cfg(feature = "metrics")]
        {
            metrics::describe_counter!(
                "throttle_requests_total",
                "Admission decisions, labeled by result"
            );
            metrics::describe_counter!(
                "throttle_rejections_total",
                "Rejected requests, labeled by gate"
            );
        }

        let registry = LimiterRegistry::new(config.rate_interval);
        Self {
            config,
            registry,
            pool,
            sweeper_started: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub(crate) fn pool(&self) -> &Arc<dyn PoolView> {
        &self.pool
    }

    /// Check-and-consume admission for one request.
    ///
    /// Gate order is fixed: queue depth, buffer pressure, token bucket. The
    /// first gate that fires wins. `with_failed` makes a gate rejection
    /// count against the endpoint's feedback tally (the pre-check path sets
    /// it; the submit path does not).
    pub(crate) fn admit(
        &self,
        name: &str,
        flag: &str,
        with_failed: bool,
    ) -> Result<EndpointLimiter, RejectReason> {
        self.admit_at(Instant::now(), name, flag, with_failed)
    }

    pub(crate) fn admit_at(
        &self,
        now: Instant,
        name: &str,
        flag: &str,
        with_failed: bool,
    ) -> Result<EndpointLimiter, RejectReason> {
        let limiter = self.limiter_for_at(now, name, flag);

        let queue_full = self.pool.pending_requests(name) >= self.config.max_pending;
        let buffers = self.pool.open_socket_buffers(name);
        let avg_buffer = (!buffers.is_empty())
            .then(|| buffers.iter().sum::<usize>() as f64 / buffers.len() as f64);

        let decision = limiter.decide_at(
            now,
            queue_full,
            avg_buffer,
            self.config.max_buffer,
            with_failed,
        );

        if let Some(stat) = decision.finished_interval {
            self.emit_interval_completed(now, name, stat);
        }

        match decision.verdict {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                counter!("throttle_requests_total", "result" => "admitted").increment(1);
                Ok(limiter)
            }
            Err(reason) => {
                self.config
                    .event_listeners
                    .emit(&AgentEvent::RequestRejected {
                        endpoint: name.to_string(),
                        timestamp: now,
                        reason,
                    });

                #[cfg(feature = "metrics")]
                {
                    counter!("throttle_requests_total", "result" => "rejected").increment(1);
                    counter!("throttle_rejections_total", "reason" => reason.as_str())
                        .increment(1);
                }

                #[cfg(feature = "tracing")]
                warn!(
                    endpoint = %name,
                    reason = reason.as_str(),
                    "request rejected"
                );

                Err(reason)
            }
        }
    }

    /// Fetches (or creates) the limiter for an endpoint without running an
    /// admission decision. The submit path uses this in pre-check mode,
    /// where admission already happened in `can_accept_request`.
    pub(crate) fn limiter_for(&self, name: &str, flag: &str) -> EndpointLimiter {
        self.limiter_for_at(Instant::now(), name, flag)
    }

    fn limiter_for_at(&self, now: Instant, name: &str, flag: &str) -> EndpointLimiter {
        let target = (self.config.get_rate)(name, flag);
        self.registry.get_at(now, name, flag, target)
    }

    /// Pre-check admission by URL. Meaningful only with
    /// `check_before_request` enabled; otherwise always true.
    ///
    /// A successful pre-check consumes a token from the endpoint's interval
    /// budget, and a rejected one counts against its feedback tally.
    pub(crate) fn can_accept_request(&self, url: &str) -> bool {
        if !self.config.check_before_request {
            return true;
        }
        let Ok(uri) = url.parse::<Uri>() else {
            // Not ours to police; the transport will reject it properly.
            return true;
        };
        let name = crate::transport::endpoint_key(&uri);
        let flag = (self.config.get_flag)(url);
        self.admit(&name, &flag, true).is_ok()
    }

    /// Runs one cleanup sweep immediately.
    pub(crate) fn cleanup_now(&self) {
        self.registry.cleanup_at(Instant::now(), &*self.pool);
    }

    /// Spawns the low-frequency cleanup tick on first use. The task holds a
    /// weak reference and exits once the agent is dropped. Outside a tokio
    /// runtime this is a no-op and will be retried on a later call.
    pub(crate) fn ensure_sweeper(this: &Arc<Self>) {
        if this.sweeper_started.swap(true, Ordering::Relaxed) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            this.sweeper_started.store(false, Ordering::Relaxed);
            return;
        };
        let weak = Arc::downgrade(this);
        handle.spawn(async move {
            loop {
                tokio::time::sleep(CLEANUP_TIME).await;
                match weak.upgrade() {
                    Some(controller) => controller.cleanup_now(),
                    None => break,
                }
            }
        });
    }

    pub(crate) fn limiters(&self) -> Vec<EndpointLimiter> {
        self.registry.limiters()
    }

    pub(crate) fn emit_interval_completed(&self, now: Instant, name: &str, stat: LimiterStat) {
        self.config
            .event_listeners
            .emit(&AgentEvent::IntervalCompleted {
                endpoint: name.to_string(),
                timestamp: now,
                stat,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{NoPool, PoolStatus};
    use crate::ThrottleLayer;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Pool stub with settable tables.
    #[derive(Default)]
    struct StubPool {
        buffers: Mutex<Vec<usize>>,
        pending: Mutex<usize>,
        max_sockets: usize,
    }

    impl StubPool {
        fn with_pending(pending: usize) -> Self {
            Self {
                pending: Mutex::new(pending),
                max_sockets: 10,
                ..Default::default()
            }
        }
    }

    impl PoolView for StubPool {
        fn open_socket_buffers(&self, _endpoint: &str) -> Vec<usize> {
            self.buffers.lock().unwrap().clone()
        }

        fn free_sockets(&self, _endpoint: &str) -> usize {
            0
        }

        fn pending_requests(&self, _endpoint: &str) -> usize {
            *self.pending.lock().unwrap()
        }

        fn max_sockets(&self) -> usize {
            self.max_sockets
        }
    }

    fn controller(config_pool: Arc<dyn PoolView>, max_pending: usize) -> Arc<AdmissionController> {
        let layer = ThrottleLayer::builder()
            .rate(100)
            .max_pending(max_pending)
            .pool(config_pool)
            .build();
        // Tests poke the controller directly.
        Arc::clone(layer.controller())
    }

    #[test]
    fn queue_gate_rejects_at_capacity() {
        let pool = Arc::new(StubPool::with_pending(3));
        let controller = controller(pool, 3);

        let result = controller.admit("h:80:", "", false);
        assert_eq!(result.unwrap_err(), RejectReason::QueueFull);

        let limiters = controller.limiters();
        assert_eq!(limiters.len(), 1);
        let stat = limiters[0].stat();
        assert_eq!(stat.incoming, 1);
        assert_eq!(stat.accepted, 0);
    }

    #[test]
    fn queue_gate_admits_below_capacity() {
        let pool = Arc::new(StubPool::with_pending(2));
        let controller = controller(pool, 3);

        assert!(controller.admit("h:80:", "", false).is_ok());
    }

    #[test]
    fn buffer_gate_uses_the_average_across_sockets() {
        let pool = Arc::new(StubPool {
            buffers: Mutex::new(vec![100, 500]),
            pending: Mutex::new(0),
            max_sockets: 10,
        });
        let controller = controller(Arc::clone(&pool) as Arc<dyn PoolView>, 3000);

        // First request of the interval is exempt from the buffer gate.
        let limiter = controller.admit("h:80:", "", false).unwrap();
        limiter.add_time(Duration::from_millis(100));

        // avg = 300 <= 50 * 7 = 350 while latency is healthy
        assert!(controller.admit("h:80:", "", false).is_ok());

        // push the average over the relaxed cap
        *pool.buffers.lock().unwrap() = vec![300, 500];
        let result = controller.admit("h:80:", "", false);
        assert_eq!(result.unwrap_err(), RejectReason::BufferPressure);
    }

    #[test]
    fn pre_check_disabled_always_accepts() {
        let layer = ThrottleLayer::builder().pool(Arc::new(NoPool)).build();
        assert!(layer.can_accept_request("http://h/"));
    }

    #[test]
    fn pre_check_consumes_and_counts_failures() {
        let layer = ThrottleLayer::builder()
            .rate(1)
            .check_before_request(true)
            .build();

        assert!(layer.can_accept_request("http://h/"));
        // Budget of one is spent; the second pre-check is rejected and the
        // rejection counts toward the feedback tally.
        assert!(!layer.can_accept_request("http://h/"));
    }

    #[test]
    fn pre_check_tolerates_garbage_urls() {
        let layer = ThrottleLayer::builder().check_before_request(true).build();
        assert!(layer.can_accept_request("::not a url::"));
    }

    #[test]
    fn default_direction_sees_pool_status() {
        // Sanity-check the PoolStatus plumbing used by the feedback loop.
        let pool = StubPool {
            buffers: Mutex::new(vec![1, 2, 3]),
            pending: Mutex::new(7),
            max_sockets: 5,
        };
        let status: PoolStatus = pool.status("h:80:");
        assert_eq!(status.open_sockets, 3);
        assert_eq!(status.pending_requests, 7);
        assert_eq!(status.max_sockets, 5);
    }
}
