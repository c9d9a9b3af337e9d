use std::sync::Arc;

use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "chime_daemon=info,chime_collector=info,chime_executor=info,chime_store=info"
                        .into()
                }),
        )
        .init();

    // load config: explicit CHIME_CONFIG path > ~/.chime/chime.toml
    let config_path = std::env::var("CHIME_CONFIG").ok();
    let config = chime_core::ChimeConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        chime_core::ChimeConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let conn = rusqlite::Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    // Change feed: store mutations → executor.
    let (feed_tx, feed_rx) = chime_store::feed_channel();
    let store = Arc::new(chime_store::ScheduleStore::new(conn, Some(feed_tx))?);
    let clock: Arc<dyn chime_core::Clock> = Arc::new(chime_core::SystemClock);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let collector = chime_collector::Collector::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        config.collector.clone(),
    );
    let collector_task = tokio::spawn(collector.run(shutdown_rx.clone()));

    let executor = chime_executor::Executor::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        config.executor.clone(),
    );
    let executor_task = tokio::spawn(executor.run(feed_rx, shutdown_rx));

    info!("chime daemon running");
    tokio::signal::ctrl_c().await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(collector_task, executor_task);
    info!("chime daemon stopped");
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
