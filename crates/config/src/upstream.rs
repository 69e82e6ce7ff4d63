//! Upstream (proxied service) configuration.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;
use url::Url;

/// The service admitted requests are forwarded to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL of the upstream. The request path and query are appended to it.
    pub url: Url,
    /// Total timeout for one upstream request, body included.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://127.0.0.1:8080").expect("default URL should be valid"),
            timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_override_keeps_defaults() {
        let config: UpstreamConfig = toml::from_str(r#"url = "https://api.example.com/v1""#).unwrap();

        assert_eq!(config.url.as_str(), "https://api.example.com/v1");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
