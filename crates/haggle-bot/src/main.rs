//! # haggle
//!
//! Marketplace auto-reply agent binary — wires together all crates and
//! runs the gateway session.

#![deny(unsafe_code)]

mod items;
mod pipeline;
mod takeover;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use haggle_auth::{CredentialManager, GatewayCredentialSource};
use haggle_connection::{ConnectionSupervisor, WsConnector};
use haggle_core::DeviceId;
use haggle_history::{ConnectionConfig, ConversationStore, SqliteStore};
use haggle_llm::ChatCompletionsClient;
use haggle_routing::ResponseGenerator;
use haggle_session::SessionBatcher;
use haggle_settings::SettingsHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::items::{ItemLookup, MtopItemClient};
use crate::pipeline::{Pipeline, ReplySink};
use crate::takeover::TakeoverRegistry;

/// Haggle marketplace agent.
#[derive(Parser, Debug)]
#[command(name = "haggle", about = "Marketplace auto-reply agent")]
struct Cli {
    /// Settings file (defaults to `~/.haggle/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tracing filter override (e.g. `debug`, `haggle_connection=trace`).
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    Ok(())
}

/// The seller's user id, taken from the cookie's `unb` field. Everything
/// keys off it: the device id, and telling our own messages apart from
/// buyer traffic.
fn cookie_user_id(cookie: &str) -> Option<String> {
    cookie.split(';').find_map(|part| {
        part.trim()
            .strip_prefix("unb=")
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings = match &args.config {
        Some(path) => haggle_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => haggle_settings::load_settings().context("Failed to load settings")?,
    };

    let default_filter = args
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.clone());
    init_tracing(&default_filter);

    let cookie = settings
        .credentials
        .cookie
        .clone()
        .context("No session cookie configured (set HAGGLE_COOKIES or credentials.cookie)")?;
    let user_id =
        cookie_user_id(&cookie).context("Session cookie is missing the unb field")?;
    let device_id = DeviceId::derive(&user_id);
    tracing::info!(user_id = %user_id, "session identity resolved");

    ensure_parent_dir(std::path::Path::new(&settings.store.db_path))?;
    let store: Arc<dyn ConversationStore> = Arc::new(
        SqliteStore::open(&settings.store.db_path, &ConnectionConfig::default())
            .context("Failed to open the conversation store")?,
    );

    let source = GatewayCredentialSource::new(
        settings.gateway.app_key.clone(),
        cookie.clone(),
        settings.gateway.user_agent.clone(),
    )
    .context("Failed to build the credential source")?;
    let credentials = Arc::new(CredentialManager::new(
        Arc::new(source),
        settings.credentials.clone(),
        device_id.clone(),
    ));
    let _ = credentials
        .initialize()
        .await
        .context("Initial credential fetch failed; check the cookie")?;

    let cancel = CancellationToken::new();
    let (cred_tx, cred_rx) = mpsc::channel(8);
    let _refresh_task = credentials.spawn_refresh_loop(cred_tx, cancel.clone());

    let connector = Arc::new(WsConnector::new(
        settings.gateway.endpoint.clone(),
        Some(cookie.clone()),
        settings.gateway.user_agent.clone(),
    ));
    let (mut supervisor, conn_handle) = ConnectionSupervisor::new(
        connector,
        Arc::clone(&credentials),
        settings.gateway.clone(),
        settings.heartbeat.clone(),
        device_id,
        cred_rx,
    );
    let frames = supervisor.subscribe(128);
    let supervisor_task = tokio::spawn(supervisor.run(cancel.clone()));

    let (batch_tx, batch_rx) = mpsc::channel(64);
    let (batcher, batcher_handle) = SessionBatcher::new(settings.batching.clone(), batch_tx);
    let _batcher_task = tokio::spawn(batcher.run(cancel.clone()));

    let takeover = Arc::new(TakeoverRegistry::new(&settings.takeover));
    let item_lookup: Arc<dyn ItemLookup> = Arc::new(
        MtopItemClient::new(
            settings.gateway.app_key.clone(),
            cookie,
            settings.gateway.user_agent.clone(),
        )
        .context("Failed to build the item lookup client")?,
    );
    let generator: Arc<dyn ResponseGenerator> = Arc::new(
        ChatCompletionsClient::new(settings.llm.clone())
            .context("Failed to build the generation client")?,
    );
    let sink: Arc<dyn ReplySink> = Arc::new(conn_handle);

    let pipeline = Arc::new(Pipeline::new(
        SettingsHandle::new(settings),
        store,
        item_lookup,
        generator,
        takeover,
        sink,
        user_id,
    ));
    let _frames_task = tokio::spawn(Arc::clone(&pipeline).run_frames(
        frames,
        batcher_handle,
        cancel.clone(),
    ));
    let _batches_task = tokio::spawn(pipeline.run_batches(batch_rx, cancel.clone()));

    tracing::info!("haggle agent running");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    cancel.cancel();
    let _ = supervisor_task.await;
    tracing::info!("Shutdown complete");
    Ok(())
}
