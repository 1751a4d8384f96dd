//! Layer implementation and the agent handle.

use std::collections::HashMap;
use std::sync::Arc;

use tower_layer::Layer;

use crate::admission::AdmissionController;
use crate::config::{ThrottleConfig, ThrottleConfigBuilder};
use crate::service::ThrottleService;
use crate::stats::{self, EndpointStats};
use crate::transport::PoolView;

/// A Tower layer that applies adaptive per-endpoint admission control to an
/// HTTP transport service.
///
/// All services produced by one layer share one set of limiters, so the
/// layer doubles as the agent handle: keep a clone around to read
/// [`stats`](Self::stats) or run [`can_accept_request`](Self::can_accept_request)
/// pre-checks.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use tower_throttle::ThrottleLayer;
///
/// let layer = ThrottleLayer::builder()
///     .rate(500)
///     .rate_interval(Duration::from_secs(1))
///     .max_pending(1000)
///     .build();
/// ```
pub struct ThrottleLayer {
    controller: Arc<AdmissionController>,
}

impl ThrottleLayer {
    /// Creates a layer from a finished configuration and a pool view.
    pub(crate) fn new(config: ThrottleConfig, pool: Arc<dyn PoolView>) -> Self {
        Self {
            controller: Arc::new(AdmissionController::new(config, pool)),
        }
    }

    /// Creates a builder for configuring the layer.
    pub fn builder() -> ThrottleConfigBuilder {
        ThrottleConfigBuilder::new()
    }

    /// Pre-checks whether a request to `url` would currently be admitted.
    ///
    /// Only meaningful when `check_before_request` is enabled; otherwise
    /// always returns `true`. A successful pre-check consumes a token from
    /// the endpoint's interval budget, so callers are expected to follow it
    /// with exactly one submission.
    pub fn can_accept_request(&self, url: &str) -> bool {
        self.controller.can_accept_request(url)
    }

    /// Live statistics for every endpoint with a limiter, keyed by the
    /// endpoint's flag when present and its `host:port:` key otherwise.
    pub fn stats(&self) -> HashMap<String, EndpointStats> {
        stats::collect(self.controller.limiters(), &**self.controller.pool())
    }

    /// Runs one cleanup sweep immediately, removing limiters whose interval
    /// went stale more than `CLEANUP_TIME` ago and whose endpoint is idle in
    /// the transport.
    pub fn cleanup_now(&self) {
        self.controller.cleanup_now();
    }

    pub(crate) fn controller(&self) -> &Arc<AdmissionController> {
        &self.controller
    }
}

impl Clone for ThrottleLayer {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
        }
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService::new(inner, Arc::clone(&self.controller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_clones_share_state() {
        let layer = ThrottleLayer::builder().check_before_request(true).rate(1).build();
        let clone = layer.clone();

        assert!(layer.can_accept_request("http://h/"));
        // The budget of one token is shared with the clone.
        assert!(!clone.can_accept_request("http://h/"));
    }

    #[test]
    fn fresh_agent_reports_no_stats() {
        let layer = ThrottleLayer::builder().build();
        assert!(layer.stats().is_empty());
    }
}
