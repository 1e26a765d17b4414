//! Jackpot server: HTTP API plus the background draw scheduler.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Error};
use jackpot::{
    Platform,
    auth::TokenVerifier,
    cache::MemoryCache,
    db::{Database, MemoryStore, PgStore},
    notify::LogNotifier,
};
use jp_server::{
    api,
    config::{ServerConfig, StorageBackend},
    logging, metrics,
};
use pico_args::Arguments;
use tokio::sync::watch;

const HELP: &str = "\
Run the jackpot ledger server

USAGE:
  jp_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --memory                 Keep all state in process (development only)
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND                 Server bind address (e.g., 0.0.0.0:8080)
  METRICS_BIND                Prometheus exporter address (disabled when unset)
  DATABASE_URL                PostgreSQL connection string
  JWT_SECRET                  Access token signing secret (required)
  NOWPAYMENTS_IPN_SECRET      Payment gateway callback secret (required)
  REFERRAL_BONUS_PERCENTAGE   Commission on referred deposits [default: 5]
  TICKET_FUNDING_POLICY       deposit_only or bonus_first [default: deposit_only]
  DRAW_POLL_INTERVAL_SECS     Scheduler tick [default: 30]
  DRAW_STALE_AFTER_SECS       Age at which a stuck draw is resumed [default: 300]
  CACHE_TTL_SECS              Jackpot listing cache lifetime [default: 10]
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        memory: pargs.contains("--memory"),
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url, args.memory)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!("Prometheus metrics on http://{}/metrics", addr);
    }

    let notifier = Arc::new(LogNotifier);
    let (platform, database) = match config.storage {
        StorageBackend::Postgres => {
            let db = Database::new(&config.database)
                .await
                .context("Failed to connect to database")?;
            db.run_migrations()
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Database connected and migrated");

            let store = Arc::new(PgStore::from_database(&db));
            (
                Platform::new(store, config.platform.clone(), notifier),
                Some(db),
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("Running on the in-memory store; all state is lost on exit");
            let store = Arc::new(MemoryStore::new());
            (Platform::new(store, config.platform.clone(), notifier), None)
        }
    };

    let verifier = TokenVerifier::new(&config.security.jwt_secret)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = platform.scheduler(config.scheduler.clone()).spawn(shutdown_rx);

    let state = api::AppState {
        platform,
        verifier: Arc::new(verifier),
        cache: Arc::new(MemoryCache::new()),
        cache_ttl: config.cache_ttl,
        ipn_secret: Arc::from(config.security.ipn_secret.as_str()),
        database: database.clone(),
    };
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    tracing::info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down server...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        tracing::error!("Draw scheduler task failed: {}", e);
    }
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
