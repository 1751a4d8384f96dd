//! Service implementation: the transport adapter.
//!
//! `ThrottleService` sits between the caller and the pooling transport. On
//! each call it derives the endpoint key, runs admission, optionally arms
//! the per-request timer, and delegates. The returned future resolves to a
//! single tagged outcome (response, error, or abort) and feedback is
//! dispatched from that one point, so no request is ever counted twice.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use http::{Request, Response};
use tower_service::Service;
use tower_throttle_core::ThrottleError;

use crate::admission::AdmissionController;
use crate::feedback::FeedbackEngine;
use crate::transport::{endpoint_key, Outcome, RequestTimeout};

#[cfg(feature = "metrics")]
use metrics::{counter, histogram};

#[cfg(feature = "tracing")]
use tracing::debug;

/// A transport wrapper that applies adaptive per-endpoint admission control.
///
/// Rejected requests fail with [`ThrottleError::TooManyRequests`] without
/// reaching the transport. A request carrying a
/// [`RequestTimeout`] extension is aborted when the timer fires; aborting
/// drops the in-flight transport future, and a pooling transport must treat
/// the cancelled request's connection as poisoned rather than reuse it.
pub struct ThrottleService<S> {
    inner: S,
    controller: Arc<AdmissionController>,
    feedback: FeedbackEngine,
}

impl<S> ThrottleService<S> {
    pub(crate) fn new(inner: S, controller: Arc<AdmissionController>) -> Self {
        let feedback = FeedbackEngine::new(Arc::clone(&controller));
        Self {
            inner,
            controller,
            feedback,
        }
    }
}

impl<S> Clone for ThrottleService<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            controller: Arc::clone(&self.controller),
            feedback: self.feedback.clone(),
        }
    }
}

impl<S, ReqB, ResB> Service<Request<ReqB>> for ThrottleService<S>
where
    S: Service<Request<ReqB>, Response = Response<ResB>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqB: Send + 'static,
    ResB: Send + 'static,
{
    type Response = Response<ResB>;
    type Error = ThrottleError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(ThrottleError::Application)
    }

    fn call(&mut self, req: Request<ReqB>) -> Self::Future {
        let controller = Arc::clone(&self.controller);
        let feedback = self.feedback.clone();
        let mut inner = self.inner.clone();

        AdmissionController::ensure_sweeper(&controller);

        let name = endpoint_key(req.uri());
        let flag = (controller.config().get_flag)(&req.uri().to_string());
        let timeout = req.extensions().get::<RequestTimeout>().map(|t| t.0);

        // In pre-check mode admission already happened in
        // can_accept_request; the submit path only fetches the limiter.
        let admitted = if controller.config().check_before_request {
            Ok(controller.limiter_for(&name, &flag))
        } else {
            controller.admit(&name, &flag, false)
        };

        Box::pin(async move {
            let limiter = match admitted {
                Ok(limiter) => limiter,
                Err(_reason) => return Err(ThrottleError::TooManyRequests),
            };

            let start = Instant::now();
            let result = match timeout {
                Some(timeout) => match tokio::time::timeout(timeout, inner.call(req)).await {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        feedback.on_outcome(&limiter, &Outcome::Aborted);

                        #[cfg(feature = "metrics")]
                        counter!("throttle_aborts_total", "cause" => "timeout").increment(1);

                        #[cfg(feature = "tracing")]
                        debug!(
                            endpoint = %limiter.name(),
                            timeout_ms = timeout.as_millis(),
                            "request aborted by timer"
                        );

                        return Err(ThrottleError::Timeout);
                    }
                },
                None => inner.call(req).await,
            };

            let elapsed = start.elapsed();
            limiter.add_time(elapsed);

            #[cfg(feature = "metrics")]
            histogram!("throttle_request_duration_seconds").record(elapsed.as_secs_f64());

            match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    feedback.on_outcome(&limiter, &Outcome::Response(status));

                    #[cfg(feature = "tracing")]
                    debug!(
                        endpoint = %limiter.name(),
                        status,
                        elapsed_ms = elapsed.as_millis(),
                        "request completed"
                    );

                    Ok(response)
                }
                Err(err) => {
                    feedback.on_outcome(&limiter, &Outcome::Error);

                    #[cfg(feature = "tracing")]
                    debug!(
                        endpoint = %limiter.name(),
                        elapsed_ms = elapsed.as_millis(),
                        "request failed in transport"
                    );

                    Err(ThrottleError::Application(err))
                }
            }
        })
    }
}
