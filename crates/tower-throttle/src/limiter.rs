//! Per-endpoint interval limiter.
//!
//! One [`EndpointLimiter`] exists per endpoint key (plus grouping flag). It
//! combines the token-bucket state for the current accounting interval with
//! the feedback tallies for the current rate-adjustment window; both live in
//! a single record behind one mutex, so every decision about an endpoint is
//! taken under one lock.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tower_throttle_core::control::RateControl;

/// Lowest working limit a limiter will ever enforce.
pub const MIN_RATE: u64 = 1;

/// Highest working limit a limiter will ever enforce.
pub const MAX_RATE: u64 = 1_000_000;

/// Average-latency threshold above which the buffer-pressure gate tightens.
pub const AVG_TIME: Duration = Duration::from_millis(400);

/// How long a limiter's interval must be stale before cleanup may remove it.
pub const CLEANUP_TIME: Duration = Duration::from_secs(60);

/// Why admission turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The transport's pending queue for the endpoint is at capacity.
    QueueFull,
    /// Socket write buffers indicate the network path is saturated.
    BufferPressure,
    /// The interval's token budget is spent.
    RateExceeded,
}

impl RejectReason {
    /// Stable label, used for metrics and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::QueueFull => "queue_full",
            RejectReason::BufferPressure => "buffer_pressure",
            RejectReason::RateExceeded => "rate_exceeded",
        }
    }
}

/// Snapshot of a limiter's counters.
///
/// Returned by [`EndpointLimiter::stat`] and carried by the
/// interval-completed event.
#[derive(Debug, Clone, Copy)]
pub struct LimiterStat {
    /// Tokens admitted in the interval.
    pub accepted: u64,
    /// Admission attempts in the interval (accepted plus rejected).
    pub incoming: u64,
    /// Working limit.
    pub limit: u64,
    /// Smoothed request duration.
    pub average_time: Duration,
}

/// Direction the feedback loop votes for after one request outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDirection {
    /// Outcome argues for more capacity.
    Raise,
    /// Outcome argues for less capacity.
    Lower,
    /// Outcome is neutral.
    Hold,
}

#[derive(Debug)]
struct LimiterState {
    limit: u64,
    interval: Duration,
    interval_start: Instant,
    accepted: u64,
    incoming: u64,
    average_time: Duration,
    success: u64,
    failed: u64,
    last_rate: u64,
    last_rate_time: Instant,
}

impl LimiterState {
    fn new(target: u64, interval: Duration, now: Instant) -> Self {
        Self {
            limit: target.clamp(MIN_RATE, MAX_RATE),
            interval,
            interval_start: now,
            accepted: 0,
            incoming: 0,
            average_time: Duration::ZERO,
            success: 0,
            failed: 0,
            last_rate: target,
            last_rate_time: now,
        }
    }

    /// Lazy interval rollover. Returns the finished interval's counters the
    /// first time an elapsed window is observed; a missed window never rolls
    /// twice.
    fn roll_if_elapsed(&mut self, now: Instant) -> Option<LimiterStat> {
        if now.saturating_duration_since(self.interval_start) < self.interval {
            return None;
        }
        let finished = self.stat();
        self.accepted = 0;
        self.incoming = 0;
        self.interval_start = now;
        Some(finished)
    }

    fn set_limit(&mut self, limit: u64) {
        self.limit = limit.clamp(MIN_RATE, MAX_RATE);
    }

    fn add_time(&mut self, sample: Duration) {
        self.average_time = if self.average_time.is_zero() {
            sample
        } else {
            (self.average_time + sample) / 2
        };
    }

    fn stat(&self) -> LimiterStat {
        LimiterStat {
            accepted: self.accepted,
            incoming: self.incoming,
            limit: self.limit,
            average_time: self.average_time,
        }
    }
}

/// Result of one admission decision.
pub(crate) struct Decision {
    pub(crate) verdict: Result<(), RejectReason>,
    /// Counters of the interval that rolled over during this decision, if any.
    pub(crate) finished_interval: Option<LimiterStat>,
}

/// Shared handle to one endpoint's limiter state.
///
/// Cloning is cheap; all clones point at the same state.
#[derive(Clone)]
pub struct EndpointLimiter {
    inner: Arc<Shared>,
}

struct Shared {
    name: String,
    flag: String,
    state: Mutex<LimiterState>,
}

impl EndpointLimiter {
    pub(crate) fn new(
        name: &str,
        flag: &str,
        target: u64,
        interval: Duration,
        now: Instant,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                name: name.to_string(),
                flag: flag.to_string(),
                state: Mutex::new(LimiterState::new(target, interval, now)),
            }),
        }
    }

    /// Endpoint key, without the grouping flag.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Grouping flag; empty when the endpoint uses the default key.
    pub fn flag(&self) -> &str {
        &self.inner.flag
    }

    /// Statistics label: the flag when present, the endpoint key otherwise.
    pub fn label(&self) -> &str {
        if self.inner.flag.is_empty() {
            &self.inner.name
        } else {
            &self.inner.flag
        }
    }

    /// Snapshot of the current counters.
    pub fn stat(&self) -> LimiterStat {
        self.lock().stat()
    }

    /// Installs a new working limit, clamped to `[MIN_RATE, MAX_RATE]`.
    /// Takes effect for subsequent admissions in the current interval.
    pub fn set_limit(&self, limit: u64) {
        self.lock().set_limit(limit);
    }

    /// Folds one observed request duration into the smoothed average.
    pub fn add_time(&self, sample: Duration) {
        self.lock().add_time(sample);
    }

    /// Runs the full admission decision under the limiter lock.
    ///
    /// Gate order is fixed: pending-queue depth, then buffer pressure, then
    /// the token bucket. Every path counts the attempt against `incoming`;
    /// gate rejections additionally count a failure when `with_failed` is
    /// set. The buffer gate is skipped until the interval has admitted at
    /// least one token, so traffic can restart after a quiet period.
    pub(crate) fn decide_at(
        &self,
        now: Instant,
        queue_full: bool,
        avg_buffer: Option<f64>,
        max_buffer: u64,
        with_failed: bool,
    ) -> Decision {
        let mut state = self.lock();
        let finished_interval = state.roll_if_elapsed(now);

        if queue_full {
            state.incoming += 1;
            if with_failed {
                state.failed += 1;
            }
            return Decision {
                verdict: Err(RejectReason::QueueFull),
                finished_interval,
            };
        }

        if state.accepted >= 1 {
            if let Some(avg) = avg_buffer {
                let cap = if state.average_time < AVG_TIME {
                    max_buffer.saturating_mul(7)
                } else {
                    max_buffer
                };
                if avg > cap as f64 {
                    state.incoming += 1;
                    if with_failed {
                        state.failed += 1;
                    }
                    return Decision {
                        verdict: Err(RejectReason::BufferPressure),
                        finished_interval,
                    };
                }
            }
        }

        state.incoming += 1;
        if state.accepted + 1 <= state.limit {
            state.accepted += 1;
            Decision {
                verdict: Ok(()),
                finished_interval,
            }
        } else {
            Decision {
                verdict: Err(RejectReason::RateExceeded),
                finished_interval,
            }
        }
    }

    /// Re-clamps against a changed caller target. A lowered target applies
    /// to the working limit immediately; a raised target only lifts the
    /// ceiling the feedback loop may later climb into.
    pub(crate) fn update_target(&self, target: u64) {
        let mut state = self.lock();
        if state.last_rate != target {
            state.last_rate = target;
            let clamped = state.limit.min(target);
            state.set_limit(clamped);
        }
    }

    /// Records one feedback vote and, at adjustment-window boundaries,
    /// recomputes the working limit. Returns `(old, new)` when the limit
    /// actually moved.
    pub(crate) fn apply_feedback_at(
        &self,
        now: Instant,
        direction: RateDirection,
        rate_interval: Duration,
        target: u64,
        control: &RateControl,
    ) -> Option<(u64, u64)> {
        let mut state = self.lock();
        match direction {
            RateDirection::Raise => state.success += 1,
            RateDirection::Lower => state.failed += 1,
            RateDirection::Hold => {}
        }

        if now.saturating_duration_since(state.last_rate_time) < rate_interval {
            return None;
        }

        let ceiling = target.min(MAX_RATE).max(MIN_RATE);
        let next = control.next_limit(state.limit, state.success, state.failed, MIN_RATE, ceiling);
        state.success = 0;
        state.failed = 0;
        state.last_rate_time = now;

        next.map(|new_limit| {
            let old = state.limit;
            state.set_limit(new_limit);
            (old, new_limit)
        })
    }

    /// True once the limiter's current interval went stale long enough ago
    /// for cleanup to consider it.
    pub(crate) fn expired_at(&self, now: Instant) -> bool {
        let state = self.lock();
        now.saturating_duration_since(state.interval_start) > CLEANUP_TIME
    }

    #[cfg(test)]
    pub(crate) fn failed_count(&self) -> u64 {
        self.lock().failed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LimiterState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EndpointLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stat = self.stat();
        f.debug_struct("EndpointLimiter")
            .field("name", &self.inner.name)
            .field("flag", &self.inner.flag)
            .field("limit", &stat.limit)
            .field("accepted", &stat.accepted)
            .field("incoming", &stat.incoming)
            .finish()
    }
}
