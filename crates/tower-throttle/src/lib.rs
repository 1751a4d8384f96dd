//! Adaptive per-endpoint admission control for HTTP client transports.
//!
//! This crate wraps a connection-pooling HTTP transport in a Tower layer
//! that throttles outbound requests per destination, adjusting each
//! endpoint's permitted rate in closed loop with what the endpoint actually
//! does: status codes, transport errors, and timeouts move the working limit
//! down or up, while the transport's own pool tables (pending queue depth,
//! socket write-buffer occupancy) gate requests before they are even built.
//!
//! # How it works
//!
//! Each endpoint (a `host:port:` key, optionally split or merged by a
//! caller-supplied *flag*) gets its own interval token bucket. Admission
//! runs three checks in order and the first that fires wins:
//!
//! 1. **Queue depth**: the transport already holds too many undispatched
//!    requests for this endpoint.
//! 2. **Buffer pressure**: the average write-buffer occupancy across the
//!    endpoint's open sockets is too high. The cutoff is relaxed sevenfold
//!    while the endpoint's smoothed latency is healthy, and tightens once
//!    latency degrades.
//! 3. **Token bucket**: the interval's budget is spent.
//!
//! Every completed request is then classified as a vote to raise or lower
//! the endpoint's limit. Failures weigh 18× successes, the downward step is
//! 20% where the upward step is 2%: a congested endpoint collapses fast and
//! recovers slowly, while healthy endpoints climb toward the caller's
//! target rate and never past it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use http::{Request, Response};
//! use tower::{Service, ServiceBuilder, ServiceExt};
//! use tower_throttle::{RequestTimeout, ThrottleLayer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let layer = ThrottleLayer::builder()
//!     .rate(500)                       // per-endpoint ceiling, requests/interval
//!     .rate_interval(Duration::from_secs(1))
//!     .get_flag(|url| {
//!         // throttle the batch API as its own class
//!         if url.contains("/batch/") { "batch".into() } else { String::new() }
//!     })
//!     .on_limit_changed(|endpoint, old, new| {
//!         eprintln!("{endpoint}: limit {old} -> {new}");
//!     })
//!     .build();
//!
//! // `transport` is any Service<Request<B>, Response = Response<B2>>,
//! // e.g. a hyper client wrapped as a tower service.
//! # let transport = tower::service_fn(|_req: Request<String>| async {
//! #     Ok::<_, std::io::Error>(Response::new(String::new()))
//! # });
//! let mut client = ServiceBuilder::new().layer(layer.clone()).service(transport);
//!
//! let mut req = Request::builder()
//!     .uri("http://api.example.com/v1/items")
//!     .body(String::new())?;
//! // Arm the agent-side abort timer for this request.
//! req.extensions_mut().insert(RequestTimeout(Duration::from_secs(5)));
//!
//! match client.ready().await?.call(req).await {
//!     Ok(response) => println!("{}", response.status()),
//!     Err(err) if err.is_throttled() => println!("backpressure: {err}"),
//!     Err(err) => return Err(err.into()),
//! }
//!
//! // The layer doubles as the agent handle.
//! for (label, stats) in layer.stats() {
//!     println!("{label}: {}/{} at limit {}", stats.accepted, stats.incoming, stats.rate);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Transport visibility
//!
//! The gates and the default outcome classifier read the transport's pool
//! tables through the [`PoolView`] trait. Implement it against whatever
//! introspection your transport offers; snapshots may be stale, decisions
//! are heuristic. Without any introspection, use [`NoPool`] and the agent
//! degenerates to pure per-endpoint token buckets with feedback.

mod admission;
mod config;
mod events;
mod feedback;
mod layer;
mod limiter;
mod registry;
mod service;
mod stats;
mod transport;

pub use config::{FlagFn, RateDirectionFn, RateFn, ThrottleConfig, ThrottleConfigBuilder};
pub use events::AgentEvent;
pub use feedback::{default_rate_direction, PENDING_LOWER};
pub use layer::ThrottleLayer;
pub use limiter::{
    LimiterStat, RateDirection, RejectReason, AVG_TIME, CLEANUP_TIME, MAX_RATE, MIN_RATE,
};
pub use service::ThrottleService;
pub use stats::EndpointStats;
pub use transport::{endpoint_key, NoPool, Outcome, PoolStatus, PoolView, RequestTimeout};

pub use tower_throttle_core::control::RateControl;
pub use tower_throttle_core::ThrottleError;
