//! Notifier - service and database instance status monitor
//!
//! Polls OS services and MySQL instances, tracks status transitions and
//! keeps a tray-style menu board in sync.

mod config;
mod db;
mod menu;
mod monitor;
mod probe;
mod web;

use config::NotifierConfig;
use db::Store;
use monitor::{spawn_monitor, Collaborators, MonitoredList};
use probe::SystemProbe;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("notifier=info".parse()?))
        .init();

    // Load configuration
    let cfg = NotifierConfig::load();
    tracing::info!("Starting notifier on port {}...", cfg.http_port);

    // Initialize database
    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = cfg.db_path();
    tracing::info!("Using database at {}", db_path.display());
    let store = Arc::new(Store::new(&db_path)?);

    // Menu board
    let (menu, menu_task) = menu::spawn_menu_board();

    // Monitored list
    let probe = Arc::new(SystemProbe);
    let collaborators = Collaborators {
        probe: probe.clone(),
        control: probe,
        persistence: store.clone(),
        definitions: store.clone(),
    };
    let mut list = MonitoredList::load(cfg.monitor.clone(), collaborators)?;
    list.set_menu_sync(Arc::new(menu.sync()));
    menu::subscribe_menu(list.dispatcher(), menu.sync());

    let (monitor, monitor_task) = spawn_monitor(list, cfg.tick);

    // Start web server
    let server = Server::new(cfg, monitor.clone(), menu.clone(), store);
    let served = server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!("Shutting down");
    monitor.shutdown().await;
    if let Err(e) = monitor_task.await {
        tracing::warn!("Monitor task ended abnormally: {}", e);
    }
    menu.shutdown();
    if let Err(e) = menu_task.await {
        tracing::warn!("Menu task ended abnormally: {}", e);
    }

    served
}
