mod bot;
mod config;
mod lifecycle;
mod platform;
mod source;
mod spam;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::Dispatcher;
use crate::config::{Cli, ConfigError, Settings, USAGE};
use crate::lifecycle::Lifecycle;
use crate::platform::telegram::TelegramClient;
use crate::source::UpdateSource;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = match Settings::load(Cli::parse()) {
        Ok(settings) => settings,
        Err(ConfigError::MissingToken) => {
            println!("{}", USAGE);
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Invalid configuration"),
    };

    // Initialize logging
    init_logging(settings.debug);

    info!("Configuration loaded");
    info!("  Transport: {}", settings.transport.name());
    info!("  Max name length: {}", settings.policy.max_length);
    info!("  Illegal substring: {:?}", settings.policy.illegal_substring);
    info!("  Shutdown grace: {}s", settings.shutdown_grace.as_secs());

    let settings = Arc::new(settings);

    let client = TelegramClient::new(&settings.token);
    let username = client
        .verify()
        .await
        .context("Initializing bot with the given token failed")?;
    info!("Initialized with username {}", username);

    let lifecycle = Arc::new(Lifecycle::new());
    tokio::spawn(lifecycle.clone().watch_interrupt());

    let UpdateSource { updates, handle } =
        UpdateSource::start(&settings.transport, &client, &settings.token, lifecycle.token())
            .await?;

    let dispatcher = Dispatcher::new(Arc::new(client), settings.policy.clone());
    dispatcher.run(updates, lifecycle.token()).await;

    if lifecycle.trigger() {
        info!("Update source ended on its own");
    }
    handle.shutdown().await;
    dispatcher.drain(settings.shutdown_grace).await;

    info!("Cleanup completed, exiting");
    Ok(())
}

fn init_logging(debug: bool) {
    let default_filter = if debug {
        "info,joinguard=debug,teloxide=debug"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
