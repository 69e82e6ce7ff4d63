//! HTTP metrics middleware
//!
//! Records `http.server.request.duration` in milliseconds for every request passing through the
//! gateway, rejected ones included.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{body::Body, extract::MatchedPath};
use http::{Request, Response};
use telemetry::metrics::{self, Recorder};
use tower::Layer;

/// Route label of requests handled by the proxy fallback.
const PROXY_ROUTE: &str = "upstream";

#[derive(Clone)]
pub(crate) struct MetricsLayer {
    upstream_host: Arc<str>,
}

impl MetricsLayer {
    pub fn new(upstream_host: &str) -> Self {
        Self {
            upstream_host: Arc::from(upstream_host),
        }
    }
}

impl<Service> Layer<Service> for MetricsLayer
where
    Service: Send + Clone,
{
    type Service = MetricsService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        MetricsService {
            next,
            upstream_host: self.upstream_host.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct MetricsService<Service> {
    next: Service,
    upstream_host: Arc<str>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for MetricsService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map(|matched_path| matched_path.as_str().to_owned())
            .unwrap_or_else(|| PROXY_ROUTE.to_string());

        let mut next = self.next.clone();
        let upstream_host = self.upstream_host.clone();

        Box::pin(async move {
            let mut recorder = Recorder::new(metrics::HTTP_SERVER_REQUEST_DURATION);
            recorder.push_attribute("http.request.method", req.method().to_string());
            recorder.push_attribute("http.route", route);
            recorder.push_attribute("keylimit.upstream", upstream_host.to_string());

            let response = next.call(req).await?;
            recorder.push_attribute("http.response.status_code", response.status().as_u16() as i64);

            recorder.record();

            Ok(response)
        })
    }
}
