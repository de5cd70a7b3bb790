//! oxide64 - Modular N64 emulation host
//!
//! Main entry point for the host binary.

use o64_core::version::CONTROL_API_VERSION;
use o64_core::Config;
use o64_host::{Command, Host};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting oxide64 emulation host");

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Could not load configuration, using defaults: {err}");
            Config::default()
        }
    };

    let mut host = Host::new(config);
    host.startup(CONTROL_API_VERSION)?;

    // Run the image named on the command line, if any
    if let Some(path) = std::env::args().nth(1) {
        let image = std::fs::read(&path)?;
        host.execute(Command::RomOpen { image: &image })?;
        if let Err(err) = host.apply_module_settings() {
            tracing::warn!("Module bindings incomplete: {err}");
        }
        if host.modules_ready() {
            host.execute(Command::Execute)?;
        } else {
            tracing::warn!("Not every capability slot is bound; skipping execution");
        }
        host.execute(Command::RomClose)?;
    } else {
        tracing::info!("No media image given; run `oxide64 <image>` to start a session");
    }

    host.shutdown()?;
    Ok(())
}
