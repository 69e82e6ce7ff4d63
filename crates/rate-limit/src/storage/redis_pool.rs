//! Redis connection pool.

use std::sync::atomic::{AtomicUsize, Ordering};

use config::{RedisConfig, RedisTlsConfig};
use deadpool::managed::{self, Metrics};
use redis::{Client, RedisError, RedisResult, aio::MultiplexedConnection};
use secrecy::ExposeSecret;
use url::Url;

pub(crate) type Pool = managed::Pool<Manager>;

#[derive(Debug)]
pub(crate) struct Manager {
    client: Client,
    ping_number: AtomicUsize,
}

impl Manager {
    fn new(config: &RedisConfig) -> RedisResult<Self> {
        let url = connection_url(config)?;

        let client = match &config.tls {
            Some(tls_config) => Client::build_with_tls(url.as_str(), build_tls_certificates(tls_config)?)?,
            None => Client::open(url.as_str())?,
        };

        Ok(Self {
            client,
            ping_number: AtomicUsize::new(0),
        })
    }
}

impl managed::Manager for Manager {
    type Type = MultiplexedConnection;
    type Error = RedisError;

    async fn create(&self) -> Result<MultiplexedConnection, Self::Error> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn recycle(&self, conn: &mut MultiplexedConnection, _: &Metrics) -> managed::RecycleResult<Self::Error> {
        let ping_number = self.ping_number.fetch_add(1, Ordering::Relaxed).to_string();

        let (n,) = redis::Pipeline::with_capacity(2)
            .cmd("UNWATCH")
            .ignore()
            .cmd("PING")
            .arg(&ping_number)
            .query_async::<(String,)>(conn)
            .await?;

        if n == ping_number {
            Ok(())
        } else {
            Err(managed::RecycleError::message("Invalid PING response"))
        }
    }
}

/// The configured URL with the explicit credentials, database and TLS mode applied.
fn connection_url(config: &RedisConfig) -> RedisResult<Url> {
    let invalid = |message: &'static str| RedisError::from((redis::ErrorKind::InvalidClientConfig, message));

    let mut url = Url::parse(&config.url).map_err(|_| invalid("Redis URL is not a valid URL"))?;

    if let Some(username) = &config.username {
        url.set_username(username)
            .map_err(|_| invalid("Redis URL does not accept a username"))?;
    }

    if let Some(password) = &config.password {
        url.set_password(Some(password.expose_secret()))
            .map_err(|_| invalid("Redis URL does not accept a password"))?;
    }

    if let Some(database) = config.database {
        url.set_path(&format!("/{database}"));
    }

    if config.tls.as_ref().and_then(|tls| tls.insecure).unwrap_or(false) {
        url.set_fragment(Some("insecure"));
    }

    Ok(url)
}

fn build_tls_certificates(config: &RedisTlsConfig) -> RedisResult<redis::TlsCertificates> {
    let read = |path: &str, what: &'static str| {
        std::fs::read(path).map_err(|e| RedisError::from((redis::ErrorKind::IoError, what, e.to_string())))
    };

    let client_tls = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert_path), Some(key_path)) => Some(redis::ClientTlsConfig {
            client_cert: read(cert_path, "Failed to read client certificate")?,
            client_key: read(key_path, "Failed to read client key")?,
        }),
        (None, None) => None,
        _ => {
            return Err(RedisError::from((
                redis::ErrorKind::InvalidClientConfig,
                "client_cert_path and client_key_path must be set together",
            )));
        }
    };

    let root_cert = match &config.ca_cert_path {
        Some(ca_path) => Some(read(ca_path, "Failed to read CA certificate")?),
        None => None,
    };

    Ok(redis::TlsCertificates { client_tls, root_cert })
}

pub(crate) fn create_pool(config: &RedisConfig) -> RedisResult<Pool> {
    let manager = Manager::new(config)?;

    let mut pool_config = managed::PoolConfig::default();

    if let Some(max_size) = config.pool.max_size {
        pool_config.max_size = max_size;
    }

    pool_config.timeouts.create = config.pool.timeout_create.or(config.connection_timeout);
    pool_config.timeouts.wait = config.pool.timeout_wait;
    pool_config.timeouts.recycle = config.pool.timeout_recycle;

    Pool::builder(manager)
        .config(pool_config)
        .runtime(deadpool::Runtime::Tokio1)
        .build()
        .map_err(|e| RedisError::from((redis::ErrorKind::IoError, "Failed to create pool", e.to_string())))
}
