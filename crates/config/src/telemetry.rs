//! Telemetry configuration. Only metrics are exported; logs go to stderr.

use std::{collections::BTreeMap, time::Duration};

use duration_str::deserialize_duration;
use serde::Deserialize;
use url::Url;

/// Telemetry configuration for the `[telemetry]` section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    service_name: Option<String>,
    resource_attributes: BTreeMap<String, String>,
    exporters: ExportersConfig,
    metrics: MetricsConfig,
}

impl TelemetryConfig {
    /// Service name reported with every metric, `keylimit` if unset.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Extra resource attributes attached to every metric.
    pub fn resource_attributes(&self) -> &BTreeMap<String, String> {
        &self.resource_attributes
    }

    /// Exporters used for metrics: `[telemetry.metrics.exporters]` if present, otherwise the
    /// global `[telemetry.exporters]`.
    pub fn metrics_exporters(&self) -> &ExportersConfig {
        self.metrics.exporters.as_ref().unwrap_or(&self.exporters)
    }

    /// The OTLP exporter for metrics, if enabled.
    pub fn metrics_otlp_config(&self) -> Option<&OtlpExporterConfig> {
        let otlp = &self.metrics_exporters().otlp;
        otlp.enabled.then_some(otlp)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct MetricsConfig {
    exporters: Option<ExportersConfig>,
}

/// Exporters configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ExportersConfig {
    /// OTLP exporter.
    pub otlp: OtlpExporterConfig,
}

/// OTLP exporter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OtlpExporterConfig {
    /// Whether metrics are pushed to the collector.
    pub enabled: bool,
    /// Collector endpoint.
    pub endpoint: Url,
    /// Wire protocol.
    pub protocol: OtlpProtocol,
    /// Export request timeout.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Periodic export settings.
    pub batch_export: BatchExportConfig,
}

impl Default for OtlpExporterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: Url::parse("http://127.0.0.1:4317").expect("default URL should be valid"),
            protocol: OtlpProtocol::default(),
            timeout: Duration::from_secs(60),
            batch_export: BatchExportConfig::default(),
        }
    }
}

/// OTLP protocol selection.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    /// gRPC.
    #[default]
    Grpc,
    /// HTTP with protobuf payloads.
    Http,
}

/// Periodic export settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchExportConfig {
    /// Interval between exports.
    #[serde(deserialize_with = "deserialize_duration")]
    pub scheduled_delay: Duration,
}

impl Default for BatchExportConfig {
    fn default() -> Self {
        Self {
            scheduled_delay: Duration::from_secs(5),
        }
    }
}
