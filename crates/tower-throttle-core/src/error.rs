//! Common error type for throttled services.
//!
//! [`ThrottleError<E>`] wraps everything a throttled call can fail with: an
//! admission rejection, an agent-armed timeout, or the wrapped transport's
//! own error. Callers match on the variant or use the `is_*` helpers; no
//! `From` implementations are required on the application side.

use std::fmt;

/// Error returned by a throttled service.
///
/// # Type Parameters
///
/// - `E`: the error type of the wrapped transport service
///
/// # Examples
///
/// ```
/// use tower_throttle_core::ThrottleError;
///
/// let err: ThrottleError<std::io::Error> = ThrottleError::TooManyRequests;
/// assert_eq!(err.to_string(), "429 Too Many Requests");
/// assert_eq!(err.status_code(), Some(429));
/// ```
#[derive(Debug)]
pub enum ThrottleError<E> {
    /// Admission was rejected; the request never reached the transport.
    TooManyRequests,

    /// The agent-armed per-request timer fired and the in-flight request was
    /// aborted.
    Timeout,

    /// The underlying transport returned an error.
    Application(E),
}

impl<E> fmt::Display for ThrottleError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottleError::TooManyRequests => write!(f, "429 Too Many Requests"),
            ThrottleError::Timeout => write!(f, "request aborted by timeout"),
            ThrottleError::Application(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ThrottleError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ThrottleError::Application(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> ThrottleError<E> {
    /// Returns the synthetic HTTP status code for this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ThrottleError::TooManyRequests => Some(429),
            _ => None,
        }
    }

    /// Returns `true` if admission rejected the request.
    pub fn is_throttled(&self) -> bool {
        matches!(self, ThrottleError::TooManyRequests)
    }

    /// Returns `true` if the agent-armed timer aborted the request.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ThrottleError::Timeout)
    }

    /// Returns `true` if the underlying transport failed.
    pub fn is_application(&self) -> bool {
        matches!(self, ThrottleError::Application(_))
    }

    /// Extracts the transport error, if this is an `Application` variant.
    pub fn application_error(self) -> Option<E> {
        match self {
            ThrottleError::Application(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the transport error using a function.
    pub fn map_application<F, T>(self, f: F) -> ThrottleError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            ThrottleError::TooManyRequests => ThrottleError::TooManyRequests,
            ThrottleError::Timeout => ThrottleError::Timeout,
            ThrottleError::Application(e) => ThrottleError::Application(f(e)),
        }
    }
}
