use std::net::SocketAddr;
use std::sync::Arc;
use streamclash::datasource::LastfmHistorySource;
use streamclash::orchestration::{Reconciler, Scheduler};
use streamclash::{api, config::Config, db::init_db, HistorySource, Repository};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    let source: Arc<dyn HistorySource> = Arc::new(LastfmHistorySource::new(
        config.lastfm_api_url.clone(),
        config.lastfm_api_key.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        source.clone(),
        repo.clone(),
        config.clone(),
    ));

    // Background lifecycle driver for this worker's shard.
    let scheduler = Arc::new(Scheduler::new(
        repo.clone(),
        reconciler.clone(),
        source,
        config.clone(),
    ));
    tokio::spawn(scheduler.run());

    // Create router
    let app = api::create_router(api::AppState::new(repo, config, reconciler));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
