//! gcadapter-gw
//!
//! Gateway exposing Wii U GameCube adapter ports as virtual Linux gamepads.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gcadapter_gw::cli::Cli;
use gcadapter_gw::config::Config;
use gcadapter_gw::manager::AdapterManager;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level);

    let config = Arc::new(Config::from_cli(&args));
    info!(
        "starting gcadapter-gw (pad identity {:#06x}:{:#06x})",
        config.vendor_id, config.product_id
    );

    let mut manager = AdapterManager::new(config)?;
    manager.run().await
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
