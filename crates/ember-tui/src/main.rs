use std::sync::Arc;

use ember_proto::config::Config;
use ember_proto::platform;
use ember_proto::store::Store;
use ember_tui::app::{App, LogControl};
use ember_tui::player::Player;
use ember_tui::session::{Session, SessionOptions};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("ember.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Config is read before logging so its filter applies from the first line;
    // a load failure is logged once the subscriber is up.
    let (config, config_err) = match Config::load() {
        Ok(c) => (c, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // RUST_LOG overrides the configured filter.
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log.filter.clone());
    let filter = EnvFilter::try_new(&base_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, reload_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(log_file).with_ansi(false))
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("ember log: {}", log_path.display());

    tracing::info!("ember starting");
    if let Some(e) = config_err {
        tracing::warn!("config load failed, using defaults: {:#}", e);
    }

    // ── Store + player ───────────────────────────────────────────────────────
    let store = Arc::new(Store::open(&data_dir));
    let player = Arc::new(Player::discover(&config.player));
    let servers = store.server_book().await;
    tracing::info!("{} server profile(s) loaded", servers.len());

    // ── Run TUI ──────────────────────────────────────────────────────────────
    let session = Session::new(
        servers,
        SessionOptions::from(&config.network),
        player.is_available(),
    );
    let app = App::new(
        session,
        store,
        player,
        config.network.clone(),
        Some(LogControl::new(reload_handle, base_filter)),
    )?;
    app.run().await?;

    tracing::info!("ember exiting");
    Ok(())
}
