//! Metric names. HTTP metrics follow the OpenTelemetry semantic conventions:
//! https://opentelemetry.io/docs/specs/semconv/http/http-metrics/

/// HTTP server request duration in milliseconds.
pub const HTTP_SERVER_REQUEST_DURATION: &str = "http.server.request.duration";

/// Requests rejected by a rule set. Attributes: `keylimit.rule`, `keylimit.kind`.
pub const RATE_LIMIT_REJECTED: &str = "keylimit.rate_limit.rejected";

/// Counter storage round trip in milliseconds. Attributes: `keylimit.storage`, `keylimit.outcome`.
pub const RATE_LIMIT_STORAGE_DURATION: &str = "keylimit.rate_limit.storage.duration";
