use anyhow::Context;
use clap::Parser;
use courier_core::config::Settings;
use courier_db::{
    LedgerStore, MemoryLedgerStore, MemoryTokenRegistry, PgLedgerStore, PgTokenRegistry,
    TokenRegistry,
};
use courier_worker::provider::HttpPushProvider;
use courier_worker::{NotificationQueue, QueueConfig};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod error;
mod middleware;
mod routes;
mod state;

use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "courier-api", about = "Push notification delivery service")]
struct Args {
    /// Address to listen on. Overrides COURIER_API_BIND.
    #[arg(long)]
    bind: Option<String>,
    /// Number of concurrent delivery workers. Overrides COURIER_WORKER_CONCURRENCY.
    #[arg(long)]
    concurrency: Option<usize>,
    /// Skip running database migrations on startup.
    #[arg(long, default_value_t = false)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let mut config = QueueConfig::from_settings(&settings);
    if let Some(concurrency) = args.concurrency {
        config.worker_concurrency = concurrency;
    }

    let (ledger, tokens): (Arc<dyn LedgerStore>, Arc<dyn TokenRegistry>) =
        match settings.database_url.as_deref() {
            Some(database_url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(database_url)
                    .await
                    .context("connecting to database")?;
                if !args.skip_migrations {
                    sqlx::migrate!("../../migrations").run(&db).await?;
                }
                (
                    Arc::new(PgLedgerStore::new(db.clone())),
                    Arc::new(PgTokenRegistry::new(db)),
                )
            }
            None => {
                warn!("no DATABASE_URL set, using in-memory ledger and token registry");
                (
                    Arc::new(MemoryLedgerStore::new()),
                    Arc::new(MemoryTokenRegistry::new()),
                )
            }
        };

    let provider_url = settings
        .provider_url
        .clone()
        .context("COURIER_PROVIDER_URL must be set")?;
    let provider = HttpPushProvider::new(
        provider_url,
        settings.provider_api_key.clone(),
        settings.signing_secret.clone(),
        config.provider_timeout,
    )?;

    let queue = Arc::new(NotificationQueue::new(
        config,
        Arc::new(provider),
        ledger,
        tokens,
    )?);
    queue.start();

    let state = AppState {
        queue: queue.clone(),
        courier_env: settings.courier_env.clone(),
    };
    let app = routes::app(state);

    let addr: SocketAddr = args.bind.unwrap_or(settings.api_bind).parse()?;
    info!(%addr, env = %settings.courier_env, "starting api");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
