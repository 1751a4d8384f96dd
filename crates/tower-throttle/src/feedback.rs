//! The feedback engine.
//!
//! Every completed request is classified exactly once as a vote to raise,
//! lower, or hold the endpoint's working limit. Votes accumulate per
//! adjustment window; at window boundaries the tallies are folded into a new
//! limit by the rate-control arithmetic. Classification never raises: a
//! panicking classifier is logged and treated as a neutral vote.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::admission::AdmissionController;
use crate::events::AgentEvent;
use crate::limiter::{EndpointLimiter, LimiterStat, RateDirection};
use crate::transport::{Outcome, PoolStatus};

#[cfg(feature = "metrics")]
use metrics::gauge;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

/// Pending-queue depth above which the default classifier votes to lower.
pub const PENDING_LOWER: usize = 1000;

/// The default outcome classifier.
///
/// In order:
/// 1. The transport holds no sockets for the endpoint, or has spare socket
///    capacity: vote up (the endpoint is not the bottleneck).
/// 2. More than [`PENDING_LOWER`] requests are queued: vote down.
/// 3. The response status is in `[200, 400)`: vote up.
/// 4. Anything else (4xx/5xx, transport error, abort): vote down.
pub fn default_rate_direction(
    outcome: &Outcome,
    pool: &PoolStatus,
    _stat: &LimiterStat,
) -> RateDirection {
    if pool.open_sockets == 0 || pool.max_sockets > pool.open_sockets {
        return RateDirection::Raise;
    }
    if pool.pending_requests > PENDING_LOWER {
        return RateDirection::Lower;
    }
    match outcome {
        Outcome::Response(code) if (200..400).contains(code) => RateDirection::Raise,
        _ => RateDirection::Lower,
    }
}

#[derive(Clone)]
pub(crate) struct FeedbackEngine {
    controller: Arc<AdmissionController>,
}

impl FeedbackEngine {
    pub(crate) fn new(controller: Arc<AdmissionController>) -> Self {
        Self { controller }
    }

    /// Feeds one request outcome into the endpoint's limiter.
    pub(crate) fn on_outcome(&self, limiter: &EndpointLimiter, outcome: &Outcome) {
        self.on_outcome_at(Instant::now(), limiter, outcome);
    }

    pub(crate) fn on_outcome_at(
        &self,
        now: Instant,
        limiter: &EndpointLimiter,
        outcome: &Outcome,
    ) {
        let config = self.controller.config();
        let status = self.controller.pool().status(limiter.name());
        let stat = limiter.stat();

        let direction = match catch_unwind(AssertUnwindSafe(|| {
            (config.rate_direction)(outcome, &status, &stat)
        })) {
            Ok(direction) => direction,
            Err(_) => {
                #[cfg(feature = "tracing")]
                warn!(
                    endpoint = %limiter.name(),
                    "rate-direction function panicked; treating outcome as neutral"
                );
                RateDirection::Hold
            }
        };

        let target = (config.get_rate)(limiter.name(), limiter.flag());
        let changed = limiter.apply_feedback_at(
            now,
            direction,
            config.rate_interval,
            target,
            &config.control,
        );

        if let Some((old_limit, new_limit)) = changed {
            config.event_listeners.emit(&AgentEvent::LimitChanged {
                endpoint: limiter.name().to_string(),
                timestamp: now,
                old_limit,
                new_limit,
            });

            #[cfg(feature = "metrics")]
            gauge!("throttle_endpoint_limit", "endpoint" => limiter.label().to_string())
                .set(new_limit as f64);

            #[cfg(feature = "tracing")]
            debug!(
                endpoint = %limiter.name(),
                old_limit,
                new_limit,
                "working limit adjusted"
            );
        }
    }
}
