//! Product service with per-request tracing.
//!
//! Run with: cargo run --bin product-server -- --database-url sqlite://product.db?mode=rwc

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use product_tracing::http::{router, serve, shutdown_signal, AppState};
use product_tracing::monitor::Monitor;
use product_tracing::store::{self, SeaOrmStore};
use product_tracing::{NotFoundPolicy, ServiceConfig, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "product-server")]
#[command(about = "Traced product service backed by SeaORM", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "PRODUCT_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Database URL (sqlite, postgres or mysql)
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://product.db?mode=rwc")]
    database_url: String,

    /// Application name reported with every trace
    #[arg(long, env = "PRODUCT_APP_NAME", default_value = "gorm-demo")]
    app_name: String,

    /// Directory served for unmatched paths
    #[arg(long, env = "PRODUCT_STATIC_ROOT")]
    static_root: Option<PathBuf>,

    /// Status for lookups without a match: `backend-error` (500) or `not-found` (404)
    #[arg(long, env = "PRODUCT_NOT_FOUND", default_value = "backend-error")]
    not_found: NotFoundPolicy,

    /// Upper bound for one store call, in milliseconds
    #[arg(long, env = "PRODUCT_STORE_TIMEOUT_MS", default_value_t = 5000)]
    store_timeout_ms: u64,

    /// Include SQL text in statement spans
    #[arg(long)]
    log_statements: bool,

    /// Include bound parameter values in statement spans
    #[arg(long)]
    log_parameters: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    product_tracing::logging::init(
        "info,product_tracing=debug,tower_http=debug",
        cli.json_logs,
    );

    let tracing_config = TracingConfig::production()
        .with_statement_logging(cli.log_statements)
        .with_parameter_logging(cli.log_parameters);
    let db = store::connect(&cli.database_url, tracing_config)
        .await
        .with_context(|| format!("connecting to {}", cli.database_url))?;
    store::migrate(&db).await.context("migrating schema")?;

    let config = ServiceConfig::new()
        .with_store_timeout(Duration::from_millis(cli.store_timeout_ms))
        .with_not_found_policy(cli.not_found);
    tracing::info!(
        app = %cli.app_name,
        bind = %cli.bind,
        not_found = ?config.not_found_policy,
        store_timeout_ms = cli.store_timeout_ms,
        "Configuration loaded"
    );

    let state = AppState::new(
        Arc::new(SeaOrmStore::new(db)),
        Monitor::logging(cli.app_name),
        config,
    );
    let app = router(state, cli.static_root);

    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    serve(listener, app, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
