use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use args::Args;
use clap::Parser;
use config::Config;
use server::ServeConfig;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Before loading, so rule validation warnings are printed.
    logger::init(&args);

    let config = args.config()?;

    if rustls::crypto::aws_lc_rs::default_provider().install_default().is_err() {
        log::debug!("A rustls crypto provider is already installed");
    }

    let telemetry = match telemetry::init(&config.telemetry).await {
        Ok(guard) => Some(guard),
        Err(e) => {
            log::error!("Failed to initialize telemetry: {e}");
            None
        }
    };

    if let Err(e) = server::serve(serve_config(&args, config)).await {
        log::error!("Server failed to start: {e}");

        drop(telemetry);
        std::process::exit(1);
    }

    Ok(())
}

fn serve_config(args: &Args, config: Config) -> ServeConfig {
    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6000)));

    ServeConfig { listen_address, config }
}
