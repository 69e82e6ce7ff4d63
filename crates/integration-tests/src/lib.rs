pub mod upstream;

use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use config::Config;
use reqwest::{Method, RequestBuilder};
use server::ServeConfig;
use tokio::net::{TcpListener, TcpStream};

pub use upstream::TestUpstream;

static INIT: Once = Once::new();

fn init_crypto_provider() {
    INIT.call_once(|| {
        rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .expect("Failed to install default crypto provider");
    });
}

/// Test client for making HTTP requests to the test server
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Start a request to the given path
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.request(Method::GET, path).send().await.unwrap()
    }

    /// Send a GET request with one extra header
    pub async fn get_with_header(&self, path: &str, name: &str, value: &str) -> reqwest::Response {
        self.request(Method::GET, path).header(name, value).send().await.unwrap()
    }
}

/// Keylimit in front of a mock upstream.
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    pub upstream: TestUpstream,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a new test server with the given TOML configuration. The `[upstream]` section is
    /// added, pointing to a freshly started mock upstream.
    pub async fn start(config_toml: &str) -> Self {
        let upstream = TestUpstream::start().await;
        let upstream_url = format!("http://{}", upstream.address);

        Self::start_with(config_toml, upstream, &upstream_url).await
    }

    /// Start a test server forwarding to `upstream_url` instead of the mock upstream.
    pub async fn start_with_upstream_url(config_toml: &str, upstream_url: &str) -> Self {
        let upstream = TestUpstream::start().await;

        Self::start_with(config_toml, upstream, upstream_url).await
    }

    async fn start_with(config_toml: &str, upstream: TestUpstream, upstream_url: &str) -> Self {
        init_crypto_provider();

        let config_toml = format!("{config_toml}\n[upstream]\nurl = \"{upstream_url}\"\ntimeout = \"5s\"\n");

        let config: Config = toml::from_str(&config_toml).unwrap();
        config.validate().unwrap();

        // Find an available port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let serve_config = ServeConfig {
            listen_address: address,
            config,
        };

        let (tx, mut rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            // Drop the listener so the server can bind to the address
            drop(listener);

            if let Err(e) = server::serve(serve_config).await {
                let _ = tx.send(e);
            }
        });

        // Connect without sending a request, requests would count against the limits.
        let mut retries = 20;
        while retries > 0 && TcpStream::connect(address).await.is_err() {
            if let Ok(e) = rx.try_recv() {
                eprintln!("Server failed to start: {e}");
                std::process::exit(1);
            }

            retries -= 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestServer {
            client: TestClient::new(format!("http://{address}")),
            address,
            upstream,
            _handle: handle,
        }
    }
}

/// Status and selected headers of a response, for snapshots.
pub fn summary(response: &reqwest::Response, headers: &[&str]) -> serde_json::Value {
    let mut summary = serde_json::Map::new();
    summary.insert("status".to_string(), response.status().as_u16().into());

    for name in headers {
        let value = response
            .headers()
            .get(*name)
            .map(|value| value.to_str().unwrap_or("invalid").to_string());

        summary.insert(name.to_string(), value.into());
    }

    serde_json::Value::Object(summary)
}
