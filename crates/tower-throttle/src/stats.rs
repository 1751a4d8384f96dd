//! Per-endpoint statistics.

use std::collections::HashMap;
use std::time::Duration;

use crate::limiter::EndpointLimiter;
use crate::transport::PoolView;

/// One endpoint's live numbers, merged from its limiter and the transport's
/// pool tables.
#[derive(Debug, Clone)]
pub struct EndpointStats {
    /// Endpoint key (without the grouping flag).
    pub name: String,
    /// Tokens admitted in the current interval.
    pub accepted: u64,
    /// Admission attempts in the current interval.
    pub incoming: u64,
    /// Current working limit. This is the enforced rate, not the caller's
    /// target.
    pub rate: u64,
    /// Smoothed request duration.
    pub average_time: Duration,
    /// Open sockets to the endpoint.
    pub used: usize,
    /// Idle keep-alive sockets.
    pub free: usize,
    /// Requests queued waiting for a socket.
    pub pending: usize,
    /// Average write-buffer occupancy across open sockets, in bytes.
    pub buffer_size: usize,
}

/// Builds the label-to-stats mapping: one entry per limiter, keyed by its
/// flag when present, its endpoint key otherwise.
pub(crate) fn collect(
    limiters: Vec<EndpointLimiter>,
    pool: &dyn PoolView,
) -> HashMap<String, EndpointStats> {
    let mut stats = HashMap::with_capacity(limiters.len());
    for limiter in limiters {
        let stat = limiter.stat();
        let buffers = pool.open_socket_buffers(limiter.name());
        let buffer_size = if buffers.is_empty() {
            0
        } else {
            buffers.iter().sum::<usize>() / buffers.len()
        };
        stats.insert(
            limiter.label().to_string(),
            EndpointStats {
                name: limiter.name().to_string(),
                accepted: stat.accepted,
                incoming: stat.incoming,
                rate: stat.limit,
                average_time: stat.average_time,
                used: buffers.len(),
                free: pool.free_sockets(limiter.name()),
                pending: pool.pending_requests(limiter.name()),
                buffer_size,
            },
        );
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NoPool;
    use std::time::Instant;

    #[test]
    fn empty_registry_yields_empty_stats() {
        let stats = collect(Vec::new(), &NoPool);
        assert!(stats.is_empty());
    }

    #[test]
    fn labels_prefer_flags() {
        let now = Instant::now();
        let interval = Duration::from_secs(1);
        let limiters = vec![
            EndpointLimiter::new("a:80:", "", 100, interval, now),
            EndpointLimiter::new("b:80:", "batch", 100, interval, now),
        ];

        let stats = collect(limiters, &NoPool);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["a:80:"].name, "a:80:");
        assert_eq!(stats["batch"].name, "b:80:");
        assert_eq!(stats["a:80:"].rate, 100);
        assert_eq!(stats["a:80:"].used, 0);
    }
}
