//! # Responder Binary
//!
//! Usage: `rmux-server [config.json] [--addr HOST:PORT]`
//!
//! Logging follows `RUST_LOG` (default `info`).

use std::env;
use std::fs;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rmux_server::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(env::args().skip(1))?;
    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    info!(addr = %listener.local_addr()?, "rmux responder listening");

    rmux_server::run(listener, config)
        .await
        .context("accept loop failed")
}

fn load_config(mut args: impl Iterator<Item = String>) -> Result<ServerConfig> {
    let mut config = ServerConfig::default();
    let mut addr_override = None;

    while let Some(arg) = args.next() {
        if arg == "--addr" {
            match args.next() {
                Some(addr) => addr_override = Some(addr),
                None => bail!("--addr needs a value"),
            }
        } else {
            let text = fs::read_to_string(&arg)
                .with_context(|| format!("failed to read config file {arg}"))?;
            config = ServerConfig::from_json(&text)
                .with_context(|| format!("invalid config file {arg}"))?;
        }
    }

    if let Some(addr) = addr_override {
        config.addr = addr;
    }
    Ok(config)
}
