//! Keylimit server library.
//!
//! Provides a reusable server function to serve Keylimit either for the binary, or for the integration tests.

#![deny(missing_docs)]

mod health;
mod metrics;
mod proxy;
mod rate_limit;
mod usage_body;

use std::{net::SocketAddr, sync::Arc};

use ::rate_limit::{RateLimitManager, Storage, TokenRateLimitManager};
use anyhow::{Context, anyhow};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use config::Config;
use tokio::net::TcpListener;

use crate::{
    metrics::MetricsLayer,
    proxy::Upstream,
    rate_limit::{Limiters, RateLimitLayer},
};

/// Configuration for serving Keylimit.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Keylimit TOML configuration.
    pub config: Config,
}

/// Starts and runs the Keylimit server with the provided configuration.
pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> anyhow::Result<()> {
    let upstream = Arc::new(Upstream::new(&config.upstream)?);
    let upstream_host = upstream.url().host_str().unwrap_or("unknown").to_string();

    let limiters = build_limiters(&config).await?;

    let mut app = Router::new().fallback(proxy::forward).with_state(upstream.clone());

    match limiters {
        Some(limiters) => app = app.layer(RateLimitLayer::new(limiters)),
        None => log::warn!("No rate limit rule set configured, all requests are forwarded unlimited"),
    }

    app = app.layer(MetricsLayer::new(&upstream_host));

    // Health is not rate limited, so it is merged after the layers.
    let health_config = &config.server.health;

    match health_config.listen {
        _ if !health_config.enabled => log::debug!("Health endpoint disabled"),
        Some(listen) => {
            let (tls, health_config) = (config.server.tls.clone(), health_config.clone());

            tokio::spawn(async move {
                if let Err(e) = health::serve_separately(listen, tls, health_config).await {
                    log::error!("{e:#}");
                }
            });
        }
        None => app = app.merge(health::router(health_config)),
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    let service = app.into_make_service_with_connect_info::<SocketAddr>();

    match &config.server.tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            log::info!("Forwarding https://{listen_address} to {}", upstream.url());

            axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
                .serve(service)
                .await
                .map_err(|e| anyhow!("Failed to start HTTPS server: {e}"))?;
        }
        None => {
            log::info!("Forwarding http://{listen_address} to {}", upstream.url());

            axum::serve(listener, service)
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;
        }
    }

    Ok(())
}

/// Connects the counter storage once and shares it between the rule sets. Returns `None` when no
/// rule set is configured.
async fn build_limiters(config: &Config) -> anyhow::Result<Option<Limiters>> {
    if config.rate_limit.is_none() && config.token_rate_limit.is_none() {
        return Ok(None);
    }

    let storage = Storage::from_config(&config.storage)
        .await
        .context("Failed to initialize the counter storage")?;

    log::debug!("Counting in {} storage", storage.name());

    let storage = Arc::new(storage);

    let requests = config.rate_limit.clone().map(|rule_set| {
        log::info!("Request rate limiting enabled with rule '{}'", rule_set.rule_name);
        RateLimitManager::new(rule_set, storage.clone())
    });

    let tokens = config.token_rate_limit.clone().map(|rule_set| {
        log::info!("Token rate limiting enabled with rule '{}'", rule_set.rule_name);
        TokenRateLimitManager::new(rule_set, storage.clone())
    });

    Ok(Some(Limiters {
        requests,
        tokens,
        rejected: telemetry::metrics::rejected_counter(),
    }))
}
