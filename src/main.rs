mod companies;
mod duplicates;
mod error;
mod handlers;
mod merge;
mod models;
mod queue;
mod repository;
mod store;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use duplicates::FinderConfig;
use handlers::AppState;
use store::SqliteStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crmdedup", about = "CRM contact and company duplicate detection and merge queue")]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// SQLite database path
    #[arg(long, env = "CRMDEDUP_DB", default_value = "crmdedup.db")]
    db: String,

    /// Minimum name similarity (0.5 to 1.0) for a name match
    #[arg(long, env = "CRMDEDUP_NAME_THRESHOLD", default_value_t = duplicates::DEFAULT_NAME_THRESHOLD)]
    name_threshold: f64,

    /// Maximum contacts compared per name scan
    #[arg(long, env = "CRMDEDUP_NAME_POOL_LIMIT", default_value_t = duplicates::DEFAULT_NAME_POOL_LIMIT)]
    name_pool_limit: usize,

    /// Maximum companies compared per company name scan
    #[arg(long, env = "CRMDEDUP_COMPANY_POOL_LIMIT", default_value_t = duplicates::DEFAULT_COMPANY_POOL_LIMIT)]
    company_pool_limit: usize,

    /// Seed the database with sample data if empty
    #[arg(long, default_value_t = false)]
    seed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("crmdedup=info".parse()?))
        .init();

    let cli = Cli::parse();

    let finder = FinderConfig {
        name_threshold: cli.name_threshold,
        name_pool_limit: cli.name_pool_limit,
        company_pool_limit: cli.company_pool_limit,
    };
    finder.validate().map_err(|e| anyhow!(e))?;

    let store = SqliteStore::open(&cli.db)?;

    // Seed if requested and DB is empty
    if cli.seed && store.is_empty()? {
        info!("Seeding database with sample companies and contacts...");
        let count = store.seed_data()?;
        info!("Seeded {} contacts.", count);
    }

    let state = Arc::new(AppState { store, finder });

    // CORS: allow all
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("0.0.0.0:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name_threshold = finder.name_threshold,
        name_pool_limit = finder.name_pool_limit,
        company_pool_limit = finder.company_pool_limit,
        "crmdedup listening on http://localhost:{}",
        cli.port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for CTRL+C: {}", e);
            }
            info!("Shutting down crmdedup...");
        })
        .await?;

    Ok(())
}
