//! Rate limiting middleware for HTTP requests.

use std::{
    fmt::Display,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use axum::{body::Body, extract::ConnectInfo};
use config::RuleSetConfig;
use http::{HeaderName, HeaderValue, Request, Response, StatusCode, header::CONTENT_TYPE};
use rate_limit::{
    QuotaState, RateLimitError, RateLimitManager, RateLimitRequest, TokenRateLimitManager, TokenReservation,
};
use telemetry::{Counter, KeyValue};
use tower::Layer;

use crate::usage_body::{BodyFormat, UsageTrackingBody};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const X_TOKEN_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-tokenratelimit-reset");

/// The rule sets enforced in front of the upstream.
pub(crate) struct Limiters {
    pub requests: Option<RateLimitManager>,
    pub tokens: Option<TokenRateLimitManager>,
    pub rejected: Counter<u64>,
}

impl Limiters {
    fn record_rejection(&self, rule: &str, kind: &'static str) {
        self.rejected.add(
            1,
            &[
                KeyValue::new("keylimit.rule", rule.to_string()),
                KeyValue::new("keylimit.kind", kind),
            ],
        );
    }
}

/// What the limiters decided for one request.
enum Admission {
    Forward {
        quota: Option<QuotaState>,
        reservation: Option<(TokenRateLimitManager, TokenReservation)>,
    },
    Reject(Response<Body>),
}

#[derive(Clone)]
pub struct RateLimitLayer(Arc<Limiters>);

impl RateLimitLayer {
    pub(crate) fn new(limiters: Limiters) -> Self {
        Self(Arc::new(limiters))
    }
}

impl<Service> Layer<Service> for RateLimitLayer
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            limiters: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<Service> {
    next: Service,
    limiters: Arc<Limiters>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for RateLimitService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let limiters = self.limiters.clone();

        Box::pin(async move {
            let request = build_request(&req);

            let (quota, reservation) = match admit(&limiters, &request).await {
                Admission::Forward { quota, reservation } => (quota, reservation),
                Admission::Reject(response) => return Ok(response),
            };

            let mut response = next.call(req).await?;

            if let Some(quota) = quota {
                let headers = response.headers_mut();
                headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
                headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
            }

            if let Some((manager, reservation)) = reservation {
                let (parts, body) = response.into_parts();
                let format = BodyFormat::from_headers(&parts.headers);
                let body = UsageTrackingBody::new(body.into_data_stream(), format, manager, reservation);

                response = Response::from_parts(parts, Body::from_stream(body));
            }

            Ok(response)
        })
    }
}

fn build_request<B>(req: &Request<B>) -> RateLimitRequest {
    let mut builder = RateLimitRequest::builder().headers(req.headers().clone());

    if let Some(query) = req.uri().query() {
        builder = builder.query(query);
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        builder = builder.remote_addr(addr.ip());
    }

    builder.build()
}

async fn admit(limiters: &Limiters, request: &RateLimitRequest) -> Admission {
    let mut quota = None;

    if let Some(manager) = &limiters.requests {
        let rule_set = manager.rule_set();

        match manager.check_request(request).await {
            Ok(state) => {
                quota = state.filter(|_| rule_set.show_limit_quota_header);
            }
            Err(RateLimitError::Storage(e)) => {
                if let Some(response) = storage_failure(rule_set, &e) {
                    return Admission::Reject(response);
                }
            }
            Err(err) => {
                log::debug!("Request rejected due to rate limit: {err}");
                limiters.record_rejection(&rule_set.rule_name, "request");

                return Admission::Reject(rejection(rule_set, &err));
            }
        }
    }

    let mut reservation = None;

    if let Some(manager) = &limiters.tokens {
        let rule_set = manager.rule_set();

        match manager.check_request(request).await {
            Ok(reserved) => {
                reservation = reserved.map(|reserved| (manager.clone(), reserved));
            }
            Err(RateLimitError::Storage(e)) => {
                if let Some(response) = storage_failure(rule_set, &e) {
                    return Admission::Reject(response);
                }
            }
            Err(err) => {
                log::debug!("Request rejected due to token rate limit: {err}");
                limiters.record_rejection(&rule_set.rule_name, "token");

                return Admission::Reject(rejection(rule_set, &err));
            }
        }
    }

    Admission::Forward { quota, reservation }
}

/// `None` lets the request through.
fn storage_failure(rule_set: &RuleSetConfig, error: &impl Display) -> Option<Response<Body>> {
    if rule_set.fail_open {
        log::warn!("Counter storage failed for rule '{}', letting the request through: {error}", rule_set.rule_name);
        return None;
    }

    log::error!("Counter storage failed for rule '{}': {error}", rule_set.rule_name);

    Some(text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()))
}

fn rejection(rule_set: &RuleSetConfig, error: &RateLimitError) -> Response<Body> {
    let mut response = text_response(rule_set.rejected_code, rule_set.rejected_msg.clone());
    let headers = response.headers_mut();

    match error {
        RateLimitError::LimitExceeded { limit, reset, .. } => {
            headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_secs(*reset)));

            if rule_set.show_limit_quota_header {
                headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(*limit));
                headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
            }
        }
        RateLimitError::TokenLimitExceeded { reset, .. } => {
            headers.insert(X_TOKEN_RATELIMIT_RESET, HeaderValue::from(reset_secs(*reset)));
        }
        RateLimitError::Storage(_) => (),
    }

    response
}

fn text_response(status: StatusCode, message: String) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;

    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));

    response
}

/// Whole seconds until the window ends, rounded up.
fn reset_secs(reset: Duration) -> u64 {
    reset.as_millis().div_ceil(1000) as u64
}
