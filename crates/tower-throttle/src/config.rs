//! Configuration for the throttling agent.

use std::sync::Arc;
use std::time::Duration;

use tower_throttle_core::control::RateControl;
use tower_throttle_core::events::{EventListeners, FnListener};

use crate::events::AgentEvent;
use crate::feedback::default_rate_direction;
use crate::limiter::{LimiterStat, RateDirection, RejectReason, MAX_RATE};
use crate::transport::{Outcome, PoolStatus, PoolView};

/// Per-endpoint target-rate function: `(name, flag)` to the caller's ceiling
/// for that endpoint.
pub type RateFn = Arc<dyn Fn(&str, &str) -> u64 + Send + Sync>;

/// URL to grouping-flag function. An empty flag means the endpoint uses its
/// default `host:port:` key.
pub type FlagFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Outcome classifier: votes the working limit up, down, or neither after
/// each completed request.
pub type RateDirectionFn =
    Arc<dyn Fn(&Outcome, &PoolStatus, &LimiterStat) -> RateDirection + Send + Sync>;

/// Configuration for the throttling agent.
pub struct ThrottleConfig {
    pub(crate) rate_interval: Duration,
    pub(crate) control: RateControl,
    pub(crate) max_pending: usize,
    pub(crate) max_buffer: u64,
    pub(crate) check_before_request: bool,
    pub(crate) get_rate: RateFn,
    pub(crate) get_flag: FlagFn,
    pub(crate) rate_direction: RateDirectionFn,
    pub(crate) event_listeners: EventListeners<AgentEvent>,
}

/// Builder for [`ThrottleConfig`], producing a
/// [`ThrottleLayer`](crate::ThrottleLayer).
pub struct ThrottleConfigBuilder {
    rate: u64,
    rate_interval: Duration,
    control: RateControl,
    max_pending: usize,
    max_buffer: u64,
    check_before_request: bool,
    get_rate: Option<RateFn>,
    get_flag: FlagFn,
    rate_direction: RateDirectionFn,
    event_listeners: EventListeners<AgentEvent>,
    pool: Arc<dyn PoolView>,
}

impl Default for ThrottleConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottleConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - rate: 1_000_000 per interval
    /// - rate_interval: 1 second
    /// - rate_lower_weight: 18
    /// - rate_lower_koef: 0.2
    /// - rate_raise_koef: 0.02
    /// - max_pending: 3000
    /// - max_buffer: 50 bytes
    /// - check_before_request: false
    /// - pool: [`NoPool`](crate::NoPool)
    pub fn new() -> Self {
        Self {
            rate: MAX_RATE,
            rate_interval: Duration::from_secs(1),
            control: RateControl::default(),
            max_pending: 3000,
            max_buffer: 50,
            check_before_request: false,
            get_rate: None,
            get_flag: Arc::new(|_| String::new()),
            rate_direction: Arc::new(default_rate_direction),
            event_listeners: EventListeners::new(),
            pool: Arc::new(crate::transport::NoPool),
        }
    }

    /// Sets the default target rate per interval.
    ///
    /// This is the ceiling the feedback loop climbs toward for endpoints the
    /// [`get_rate`](Self::get_rate) function does not override.
    pub fn rate(mut self, rate: u64) -> Self {
        self.rate = rate;
        self
    }

    /// Sets the accounting window size.
    pub fn rate_interval(mut self, interval: Duration) -> Self {
        self.rate_interval = interval;
        self
    }

    /// Sets the multiplier applied to the failure tally when deciding the
    /// adjustment direction.
    pub fn rate_lower_weight(mut self, weight: u64) -> Self {
        self.control.lower_weight = weight;
        self
    }

    /// Sets the fractional step for a limit decrease.
    pub fn rate_lower_koef(mut self, koef: f64) -> Self {
        self.control.lower_koef = koef;
        self
    }

    /// Sets the fractional step for a limit increase.
    pub fn rate_raise_koef(mut self, koef: f64) -> Self {
        self.control.raise_koef = koef;
        self
    }

    /// Sets the pending-queue cutoff per endpoint.
    ///
    /// Admission rejects outright once the transport reports this many
    /// queued requests for the endpoint.
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Sets the average per-socket buffer cutoff, in bytes.
    ///
    /// While the endpoint's smoothed latency is healthy the effective cutoff
    /// is seven times this value; once latency degrades the cutoff tightens
    /// to exactly this value.
    pub fn max_buffer(mut self, max_buffer: u64) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    /// Enables the pre-check path.
    ///
    /// With pre-check enabled,
    /// [`can_accept_request`](crate::ThrottleLayer::can_accept_request)
    /// performs (and consumes) the admission decision, and the submit path
    /// admits unconditionally, trusting callers to submit only after a
    /// successful pre-check.
    pub fn check_before_request(mut self, enabled: bool) -> Self {
        self.check_before_request = enabled;
        self
    }

    /// Sets the per-endpoint target-rate function.
    ///
    /// Called with `(name, flag)` on every admission; a lowered return value
    /// clamps the endpoint's working limit immediately, a raised one only
    /// lifts the ceiling.
    pub fn get_rate<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) -> u64 + Send + Sync + 'static,
    {
        self.get_rate = Some(Arc::new(f));
        self
    }

    /// Sets the URL-to-flag function.
    ///
    /// Flags split one host into multiple limiter classes or share one
    /// limiter across a set of hosts. The empty string means "no flag".
    pub fn get_flag<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.get_flag = Arc::new(f);
        self
    }

    /// Replaces the outcome classifier driving the feedback loop.
    ///
    /// A panic inside the classifier is caught, logged, and treated as a
    /// neutral vote.
    pub fn rate_direction<F>(mut self, f: F) -> Self
    where
        F: Fn(&Outcome, &PoolStatus, &LimiterStat) -> RateDirection + Send + Sync + 'static,
    {
        self.rate_direction = Arc::new(f);
        self
    }

    /// Sets the transport's pool view.
    ///
    /// Without one, admission degenerates to the pure token bucket (see
    /// [`NoPool`](crate::NoPool)).
    pub fn pool(mut self, pool: Arc<dyn PoolView>) -> Self {
        self.pool = pool;
        self
    }

    /// Registers a callback for completed limiter intervals.
    ///
    /// Called with the endpoint key and the finished interval's counters.
    pub fn on_interval_completed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, LimiterStat) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let AgentEvent::IntervalCompleted { endpoint, stat, .. } = event {
                f(endpoint, *stat);
            }
        }));
        self
    }

    /// Registers a callback for rejected requests.
    pub fn on_request_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, RejectReason) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let AgentEvent::RequestRejected {
                endpoint, reason, ..
            } = event
            {
                f(endpoint, *reason);
            }
        }));
        self
    }

    /// Registers a callback for working-limit adjustments.
    ///
    /// Called with the endpoint key, the old limit, and the new limit.
    pub fn on_limit_changed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, u64, u64) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let AgentEvent::LimitChanged {
                endpoint,
                old_limit,
                new_limit,
                ..
            } = event
            {
                f(endpoint, *old_limit, *new_limit);
            }
        }));
        self
    }

    /// Builds the throttle layer.
    pub fn build(self) -> crate::ThrottleLayer {
        let default_rate = self.rate;
        let config = ThrottleConfig {
            rate_interval: self.rate_interval,
            control: self.control,
            max_pending: self.max_pending,
            max_buffer: self.max_buffer,
            check_before_request: self.check_before_request,
            get_rate: self
                .get_rate
                .unwrap_or_else(|| Arc::new(move |_, _| default_rate)),
            get_flag: self.get_flag,
            rate_direction: self.rate_direction,
            event_listeners: self.event_listeners,
        };

        crate::ThrottleLayer::new(config, self.pool)
    }
}
