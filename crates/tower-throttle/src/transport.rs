//! The seam to the underlying HTTP transport.
//!
//! The agent delegates connection pooling, socket reuse, and request I/O to
//! an inner service; what it needs back is read-only visibility into that
//! transport's pool tables. [`PoolView`] is that surface. Staleness is
//! harmless: admission and feedback decisions are heuristic, so snapshots
//! taken without coordination are fine.

use std::time::Duration;

use http::Uri;

/// Read-only view of the connection pool owned by the underlying transport.
///
/// All methods are keyed by the endpoint key (see [`endpoint_key`]). A
/// transport with no introspection can use [`NoPool`].
pub trait PoolView: Send + Sync {
    /// Write-queue occupancy, in bytes, of each open socket to `endpoint`.
    /// One entry per open socket; empty when no sockets are open.
    fn open_socket_buffers(&self, endpoint: &str) -> Vec<usize>;

    /// Number of idle keep-alive sockets held for `endpoint`.
    fn free_sockets(&self, endpoint: &str) -> usize;

    /// Number of requests queued for `endpoint` waiting for a socket.
    fn pending_requests(&self, endpoint: &str) -> usize;

    /// The transport's per-endpoint socket cap.
    fn max_sockets(&self) -> usize;

    /// True while the transport holds anything at all for `endpoint`.
    /// Cleanup never removes a limiter whose endpoint is active.
    fn has_activity(&self, endpoint: &str) -> bool {
        !self.open_socket_buffers(endpoint).is_empty()
            || self.free_sockets(endpoint) > 0
            || self.pending_requests(endpoint) > 0
    }

    /// One coherent-enough snapshot of the per-endpoint numbers, handed to
    /// rate-direction functions.
    fn status(&self, endpoint: &str) -> PoolStatus {
        let buffers = self.open_socket_buffers(endpoint);
        PoolStatus {
            open_sockets: buffers.len(),
            free_sockets: self.free_sockets(endpoint),
            pending_requests: self.pending_requests(endpoint),
            max_sockets: self.max_sockets(),
        }
    }
}

/// Per-endpoint pool numbers at one point in time.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Open sockets to the endpoint.
    pub open_sockets: usize,
    /// Idle keep-alive sockets.
    pub free_sockets: usize,
    /// Requests waiting for a socket.
    pub pending_requests: usize,
    /// The transport's per-endpoint socket cap.
    pub max_sockets: usize,
}

/// A [`PoolView`] for transports without pool introspection.
///
/// Reports an empty pool everywhere: the queue and buffer gates never fire,
/// admission degenerates to the pure token bucket, and the default
/// rate-direction function always votes to raise.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPool;

impl PoolView for NoPool {
    fn open_socket_buffers(&self, _endpoint: &str) -> Vec<usize> {
        Vec::new()
    }

    fn free_sockets(&self, _endpoint: &str) -> usize {
        0
    }

    fn pending_requests(&self, _endpoint: &str) -> usize {
        0
    }

    fn max_sockets(&self) -> usize {
        usize::MAX
    }
}

/// Derives the endpoint key for a request URI: `"{host}:{port}:"`, with the
/// port defaulted from the scheme (443 for https, 80 otherwise).
pub fn endpoint_key(uri: &Uri) -> String {
    let host = uri.host().unwrap_or("");
    let port = uri.port_u16().unwrap_or_else(|| {
        if uri.scheme_str() == Some("https") {
            443
        } else {
            80
        }
    });
    format!("{host}:{port}:")
}

/// Per-request timeout, attached as an [`http::Request`] extension.
///
/// When present, the agent arms a one-shot timer for the request and aborts
/// it when the timer fires. Aborting drops the in-flight transport future;
/// a transport that pools connections must treat the cancelled request's
/// connection as poisoned rather than return it to the free pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout(pub Duration);

/// How one request concluded. Exactly one outcome exists per admitted
/// request, and feedback is dispatched from it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The transport produced a response with this HTTP status.
    Response(u16),
    /// The transport failed (connection refused, reset, DNS failure, ...).
    Error,
    /// The request was aborted, e.g. by the agent-armed timeout.
    Aborted,
}
