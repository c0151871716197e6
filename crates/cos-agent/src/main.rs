//! # cos-agent
//!
//! Example AI personality binary: loads settings, logs in, queues for
//! matches, and plays each one with [`game::ExampleGame`] until interrupted.

#![deny(unsafe_code)]

mod chat;
mod game;
mod world;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cos_core::SessionUid;
use cos_protocol::PacketRegistry;
use cos_settings::CosSettings;
use cos_transport::{ConnectionSender, DefaultSupervisoryLoop, HandlerFactory, SessionHandler};

use crate::game::ExampleGame;

/// Example cos AI personality.
#[derive(Parser, Debug)]
#[command(name = "cos-agent", version, about = "Example cos AI personality")]
struct Cli {
    /// Settings file (defaults to `~/.cos/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter, overriding settings (e.g. `debug` or `cos_transport=trace`).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

fn load(cli: &Cli) -> Result<CosSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(cos_settings::settings_path);
    cos_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn init_logging(cli: &Cli, settings: &CosSettings) {
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(settings.logging.level.as_str());
    if cli.json_logs || settings.logging.json {
        cos_core::logging::init_json_subscriber(level);
    } else {
        cos_core::logging::init_subscriber(level);
    }
}

fn example_factory() -> Arc<dyn HandlerFactory> {
    Arc::new(
        |uid: &SessionUid, sender: ConnectionSender| -> Box<dyn SessionHandler> {
            Box::new(ExampleGame::new(uid.clone(), sender))
        },
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    init_logging(&cli, &settings);

    if !settings.account.is_complete() {
        tracing::warn!("account credentials are incomplete; login will fail until they are set");
    }
    tracing::info!(
        version = cos_core::constants::VERSION,
        ai = %settings.ai.name,
        role = %settings.ai.role,
        api = %settings.api.base_url,
        "starting"
    );

    let parser = Arc::new(PacketRegistry::with_defaults());
    let supervisor = DefaultSupervisoryLoop::from_settings(&settings, example_factory(), parser)
        .context("Failed to build API client")?;

    let handle = supervisor.handle();
    let _ = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("interrupt received, shutting down");
        handle.stop();
    });

    supervisor.run().await;
    Ok(())
}
