//! Closed-loop rate-control arithmetic.
//!
//! A [`RateControl`] turns the success/failure tallies collected over an
//! adjustment window into the next working limit. The shape is AIMD-like but
//! multiplicative in both directions, with strong asymmetry: failures are
//! weighted many times heavier than successes when deciding the direction,
//! and the downward step is an order of magnitude larger than the upward one.
//! A congested endpoint collapses fast and recovers slowly.
//!
//! The controller is a pure value; the limit itself lives wherever the caller
//! keeps its per-endpoint state.
//!
//! # Example
//!
//! ```rust
//! use tower_throttle_core::control::RateControl;
//!
//! let control = RateControl::new()
//!     .with_lower_weight(18)
//!     .with_lower_koef(0.2)
//!     .with_raise_koef(0.02);
//!
//! // diff = 10 - 5 * 18 = -80 < 0, step = floor(100 * 0.2) = 20
//! assert_eq!(control.next_limit(100, 10, 5, 1, 1_000_000), Some(80));
//! ```

/// Multiplier applied to the failure tally when computing the direction.
pub const DEFAULT_LOWER_WEIGHT: u64 = 18;

/// Fractional step applied when the limit moves down.
pub const DEFAULT_LOWER_KOEF: f64 = 0.2;

/// Fractional step applied when the limit moves up.
pub const DEFAULT_RAISE_KOEF: f64 = 0.02;

/// Rate-adjustment parameters.
#[derive(Debug, Clone, Copy)]
pub struct RateControl {
    /// Multiplier on the failure tally when computing `diff`.
    pub lower_weight: u64,
    /// Fractional step for a decrease.
    pub lower_koef: f64,
    /// Fractional step for an increase.
    pub raise_koef: f64,
}

impl Default for RateControl {
    fn default() -> Self {
        Self {
            lower_weight: DEFAULT_LOWER_WEIGHT,
            lower_koef: DEFAULT_LOWER_KOEF,
            raise_koef: DEFAULT_RAISE_KOEF,
        }
    }
}

impl RateControl {
    /// Creates a controller with the default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure weight.
    pub fn with_lower_weight(mut self, weight: u64) -> Self {
        self.lower_weight = weight;
        self
    }

    /// Sets the fractional decrease step.
    pub fn with_lower_koef(mut self, koef: f64) -> Self {
        self.lower_koef = koef;
        self
    }

    /// Sets the fractional increase step.
    pub fn with_raise_koef(mut self, koef: f64) -> Self {
        self.raise_koef = koef;
        self
    }

    /// Computes the next working limit from one window's tallies.
    ///
    /// `diff = success - failed * lower_weight` decides the direction. The
    /// step is `limit` times the directional coefficient, floored, and never
    /// less than one, so the limit always moves once the tallies disagree.
    /// The result is clamped to `[floor, ceiling]`.
    ///
    /// Returns `None` when the limit does not change, either because
    /// `diff == 0` or because the clamp swallowed the step.
    pub fn next_limit(
        &self,
        limit: u64,
        success: u64,
        failed: u64,
        floor: u64,
        ceiling: u64,
    ) -> Option<u64> {
        let diff = success as i128 - failed as i128 * self.lower_weight as i128;
        if diff == 0 {
            return None;
        }

        let koef = if diff < 0 {
            self.lower_koef
        } else {
            self.raise_koef
        };
        let step = ((limit as f64 * koef).floor() as u64).max(1);

        let next = if diff < 0 {
            limit.saturating_sub(step)
        } else {
            limit.saturating_add(step)
        };
        let next = next.clamp(floor, ceiling.max(floor));

        (next != limit).then_some(next)
    }
}
