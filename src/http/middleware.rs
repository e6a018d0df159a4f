//! Admission middleware for protected route groups.
//!
//! Runs the admission decision before the handler and renders it as an HTTP
//! response: quota headers on every response, and a fixed 429 rejection when
//! the request is denied.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::ratelimit::{extract_identity, AdmissionController, ClientIdentity, Decision, FORWARDED_FOR};

const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Message returned with every rejection.
pub const REJECTION_MESSAGE: &str = "Too many requests, please try again later.";

/// Body of a rate-limit rejection.
#[derive(Debug, Serialize)]
pub struct Rejection {
    pub success: bool,
    pub message: &'static str,
}

impl Default for Rejection {
    fn default() -> Self {
        Self {
            success: false,
            message: REJECTION_MESSAGE,
        }
    }
}

/// The admission hook for one protected route group.
pub struct AdmissionGate {
    controller: AdmissionController,
    trust_proxy: bool,
}

impl AdmissionGate {
    pub fn new(controller: AdmissionController, trust_proxy: bool) -> Self {
        Self {
            controller,
            trust_proxy,
        }
    }

    pub fn controller(&self) -> &AdmissionController {
        &self.controller
    }

    /// The identity `request` is bucketed under.
    pub fn identify<B>(&self, request: &axum::http::Request<B>) -> ClientIdentity {
        let remote = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let forwarded = request
            .headers()
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok());

        let identity = extract_identity(remote, forwarded, self.trust_proxy);
        trace!(identity = %identity, "Resolved client identity");
        identity
    }

    /// Decide whether `request` may reach its handler.
    ///
    /// The identity is resolved up front so the returned future does not
    /// borrow the request.
    pub fn before_handler<B>(
        &self,
        request: &axum::http::Request<B>,
    ) -> impl Future<Output = Decision> + Send + '_ {
        let identity = self.identify(request);
        async move { self.controller.decide(&identity).await }
    }

    /// Attach the quota headers for `decision`.
    fn apply_headers(&self, headers: &mut HeaderMap, decision: &Decision) {
        let window_secs = self.controller.policy().window().as_secs().max(1);
        let reset_secs = ceil_secs(decision.reset_after);

        insert(headers, RATELIMIT_POLICY, format!("{};w={}", decision.limit, window_secs));
        insert(headers, RATELIMIT_LIMIT, decision.limit.to_string());
        insert(headers, RATELIMIT_REMAINING, decision.remaining.to_string());
        insert(headers, RATELIMIT_RESET, reset_secs.to_string());
    }

    /// The fixed rejection for a denied request.
    fn reject(&self, decision: &Decision) -> Response {
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(Rejection::default())).into_response();
        self.apply_headers(response.headers_mut(), decision);
        insert(
            response.headers_mut(),
            axum::http::header::RETRY_AFTER,
            ceil_secs(decision.reset_after).max(1).to_string(),
        );
        response
    }
}

/// Axum middleware enforcing the gate.
///
/// Mount with `axum::middleware::from_fn_with_state(gate, admission_middleware)`.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn admission_middleware(
    State(gate): State<Arc<AdmissionGate>>,
    request: Request,
    next: Next,
) -> Response {
    let decision = gate.before_handler(&request).await;

    if !decision.allowed {
        debug!(
            remaining = decision.remaining,
            degraded = decision.degraded,
            "Request rejected by admission control"
        );
        return gate.reject(&decision);
    }

    let mut response = next.run(request).await;
    gate.apply_headers(response.headers_mut(), &decision);
    response
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
