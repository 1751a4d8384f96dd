//! Events emitted by the throttling agent.

use std::time::Instant;

use tower_throttle_core::events::ThrottleEvent;

use crate::limiter::{LimiterStat, RejectReason};

/// Events emitted as limiters roll intervals, requests are turned away, and
/// working limits move.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A limiter finished an accounting interval.
    IntervalCompleted {
        /// Endpoint key the limiter serves.
        endpoint: String,
        /// When the rollover was observed.
        timestamp: Instant,
        /// Counters of the finished interval.
        stat: LimiterStat,
    },
    /// Admission rejected a request.
    RequestRejected {
        /// Endpoint key of the rejected request.
        endpoint: String,
        /// When the rejection happened.
        timestamp: Instant,
        /// Which gate fired.
        reason: RejectReason,
    },
    /// The feedback loop moved an endpoint's working limit.
    LimitChanged {
        /// Endpoint key whose limit moved.
        endpoint: String,
        /// When the adjustment happened.
        timestamp: Instant,
        /// Limit before the adjustment.
        old_limit: u64,
        /// Limit after the adjustment.
        new_limit: u64,
    },
}

impl ThrottleEvent for AgentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AgentEvent::IntervalCompleted { .. } => "interval_completed",
            AgentEvent::RequestRejected { .. } => "request_rejected",
            AgentEvent::LimitChanged { .. } => "limit_changed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            AgentEvent::IntervalCompleted { timestamp, .. }
            | AgentEvent::RequestRejected { timestamp, .. }
            | AgentEvent::LimitChanged { timestamp, .. } => *timestamp,
        }
    }

    fn endpoint(&self) -> &str {
        match self {
            AgentEvent::IntervalCompleted { endpoint, .. }
            | AgentEvent::RequestRejected { endpoint, .. }
            | AgentEvent::LimitChanged { endpoint, .. } => endpoint,
        }
    }
}
