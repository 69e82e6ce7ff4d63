//! Liveness endpoint, outside of the rate limits.

use std::net::SocketAddr;

use anyhow::Context;
use axum::{Json, Router, routing::get};
use axum_server::tls_rustls::RustlsConfig;
use config::{HealthConfig, TlsServerConfig};
use http::StatusCode;

#[derive(Debug, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum HealthState {
    Healthy,
}

async fn health() -> (StatusCode, Json<HealthState>) {
    (StatusCode::OK, Json(HealthState::Healthy))
}

/// A router answering `GET {path}`.
pub(crate) fn router(config: &HealthConfig) -> Router {
    Router::new().route(&config.path, get(health))
}

/// Serves the health endpoint on its own listener, with the same TLS settings as the gateway.
pub(crate) async fn serve_separately(
    addr: SocketAddr,
    tls: Option<TlsServerConfig>,
    config: HealthConfig,
) -> anyhow::Result<()> {
    let app = router(&config).into_make_service();

    match tls {
        Some(tls) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls.certificate, &tls.key)
                .await
                .context("Failed to load TLS certificate and key for the health endpoint")?;

            log::info!("Health endpoint listening at https://{addr}{}", config.path);

            axum_server::bind_rustls(addr, rustls_config)
                .serve(app)
                .await
                .context("Health endpoint stopped")?;
        }
        None => {
            log::info!("Health endpoint listening at http://{addr}{}", config.path);

            axum_server::bind(addr).serve(app).await.context("Health endpoint stopped")?;
        }
    }

    Ok(())
}
