//! Shared plumbing for the `tower-throttle` family.
//!
//! This crate carries the pieces that are independent of any particular
//! transport:
//!
//! - [`events`]: a listener-based event system used for observability. Events
//!   are emitted per endpoint, and a panicking listener never prevents the
//!   remaining listeners from running.
//! - [`control`]: the closed-loop rate-adjustment arithmetic. Successes and
//!   failures observed over a window are folded into a single signed signal,
//!   and the working limit moves by a multiplicative step in that direction.
//! - [`error`]: [`ThrottleError`], a unified error type that wraps admission
//!   rejections, agent-armed timeouts, and application errors without
//!   requiring any `From` boilerplate from callers.
//!
//! # Example
//!
//! ```rust
//! use tower_throttle_core::control::RateControl;
//!
//! let control = RateControl::default();
//!
//! // Ten successes against five failures: failures are weighted heavily,
//! // so the limit collapses by 20%.
//! assert_eq!(control.next_limit(100, 10, 5, 1, 1_000_000), Some(80));
//!
//! // All quiet: the limit creeps back up by 2%.
//! assert_eq!(control.next_limit(100, 50, 0, 1, 1_000_000), Some(102));
//! ```

pub mod control;
pub mod error;
pub mod events;

pub use control::RateControl;
pub use error::ThrottleError;
