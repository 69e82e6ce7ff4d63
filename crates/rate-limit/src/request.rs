//! Request information for rate limiting.

use std::net::IpAddr;

use http::HeaderMap;

/// The parts of an HTTP request the rules can look at.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRequest {
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    /// Peer address of the connection.
    pub remote_addr: Option<IpAddr>,
}

impl RateLimitRequest {
    /// Create a new builder for a rate limit request.
    pub fn builder() -> RateLimitRequestBuilder {
        RateLimitRequestBuilder::default()
    }
}

/// Builder for creating rate limit requests.
#[derive(Debug, Default)]
pub struct RateLimitRequestBuilder {
    headers: HeaderMap,
    query: Option<String>,
    remote_addr: Option<IpAddr>,
}

impl RateLimitRequestBuilder {
    /// Set all headers at once.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Append one header. Invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::try_from(name),
            http::HeaderValue::try_from(value),
        ) {
            self.headers.append(name, value);
        }

        self
    }

    /// Set the raw query string.
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the peer address.
    pub fn remote_addr(mut self, ip: IpAddr) -> Self {
        self.remote_addr = Some(ip);
        self
    }

    /// Set the peer address from a string.
    pub fn remote_addr_str(mut self, ip: &str) -> Result<Self, std::net::AddrParseError> {
        self.remote_addr = Some(ip.parse()?);
        Ok(self)
    }

    /// Build the rate limit request.
    pub fn build(self) -> RateLimitRequest {
        RateLimitRequest {
            headers: self.headers,
            query: self.query,
            remote_addr: self.remote_addr,
        }
    }
}
