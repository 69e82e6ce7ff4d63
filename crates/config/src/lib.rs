//! Keylimit configuration structures to map the keylimit.toml configuration.

#![deny(missing_docs)]

mod health;
mod loader;
mod rate_limit;
mod server;
mod storage;
mod telemetry;
mod tls;
mod upstream;

use std::path::Path;

pub use health::HealthConfig;
pub use rate_limit::*;
use serde::Deserialize;
pub use server::ServerConfig;
pub use storage::{RedisConfig, RedisPoolConfig, RedisTlsConfig, StorageConfig};
pub use telemetry::{BatchExportConfig, ExportersConfig, OtlpExporterConfig, OtlpProtocol, TelemetryConfig};
pub use tls::TlsServerConfig;
pub use upstream::UpstreamConfig;

/// Main configuration structure for the Keylimit gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// The upstream every admitted request is forwarded to.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Counter storage shared by all rule sets.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Request counting rule set.
    pub rate_limit: Option<RuleSetConfig>,
    /// Token counting rule set for LLM upstreams.
    pub token_rate_limit: Option<RuleSetConfig>,
    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates the rule sets, returning warnings for suspicious but accepted settings.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        loader::validate(self)
    }
}
