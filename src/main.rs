use anyhow::{Context, Result};
use slotdb::{
    config::ServerConfig,
    engine::{Catalog, Database},
    server::serve,
};
use std::{fs, sync::Arc};
use tracing_subscriber::{fmt, EnvFilter};

/// Loads (or creates) the catalog under `--data`, opens its tables and serves
/// the line protocol on `--listen`.
///
/// Every connection runs on the single runtime thread, table I/O included.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = ServerConfig::command().get_matches();
    let config = ServerConfig::from_matches(&matches)?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Load the catalog and open its tables
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    let catalog = Catalog::load_or_create(config.data_dir.join("catalog.json"))?;
    let db = Arc::new(
        Database::open(&config.data_dir, &catalog)
            .with_context(|| format!("opening tables in {}", config.data_dir.display()))?,
    );

    // Start the server
    serve(db, &config).await
}
