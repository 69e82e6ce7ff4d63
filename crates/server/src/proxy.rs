//! Forwards admitted requests to the upstream.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    response::{IntoResponse, Response},
};
use config::UpstreamConfig;
use http::{
    HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri,
    header::{CONNECTION, HOST},
};
use url::Url;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that describe one connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP client bound to the configured upstream.
pub(crate) struct Upstream {
    client: reqwest::Client,
    base: Url,
}

impl Upstream {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create the upstream HTTP client")?;

        Ok(Self {
            client,
            base: config.url.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.base
    }

    /// The upstream URL for a request URI: the request path appended to the base path, and the
    /// request query.
    fn target_url(&self, uri: &Uri) -> Url {
        let mut url = self.base.clone();

        let path = format!("{}{}", self.base.path().trim_end_matches('/'), uri.path());
        url.set_path(&path);
        url.set_query(uri.query());

        url
    }

    async fn send(&self, request: Request<Body>) -> Result<Response, reqwest::Error> {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let (parts, body) = request.into_parts();
        let url = self.target_url(&parts.uri);

        let mut headers = parts.headers;
        remove_hop_by_hop(&mut headers);
        headers.remove(HOST);

        if let Some(peer) = peer {
            append_forwarded_for(&mut headers, peer);
        }

        log::debug!("Forwarding {} {url}", parts.method);

        let upstream_response = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await?;

        let status = upstream_response.status();
        let mut headers = upstream_response.headers().clone();
        remove_hop_by_hop(&mut headers);

        let mut response = Body::from_stream(upstream_response.bytes_stream()).into_response();
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Ok(response)
    }
}

/// Fallback handler forwarding every request that passed the rate limits.
pub(crate) async fn forward(State(upstream): State<Arc<Upstream>>, request: Request<Body>) -> Response {
    match upstream.send(request).await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("Upstream request to {} failed: {e}", upstream.base);
            (StatusCode::BAD_GATEWAY, "Bad gateway").into_response()
        }
    }
}

fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }

    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: IpAddr) {
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|value| value.to_str().ok()) {
        Some(existing) => format!("{existing}, {peer}"),
        None => peer.to_string(),
    };

    if let Ok(value) = HeaderValue::try_from(value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
