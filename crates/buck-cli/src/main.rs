//! Buck Gateway - S3-compatible versioned object store

use buck_cli::{run_server, GatewayConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "buck-gateway")]
#[command(about = "S3-compatible gateway for the Buck versioned object store")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "BUCK_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "9000", env = "BUCK_PORT")]
    port: u16,

    /// Directory for blobs and the ledger index
    #[arg(long, default_value = "/tmp/buck-store", env = "BUCK_DATA_DIR")]
    data_dir: PathBuf,

    /// Use in-memory storage (for testing, data will not persist)
    #[arg(long, env = "BUCK_MEMORY_STORE")]
    memory_store: bool,

    /// Attempts for a transient storage failure
    #[arg(long, default_value_t = buck_blockstore::DEFAULT_MAX_RETRIES, env = "BUCK_MAX_RETRIES")]
    max_retries: u32,

    /// Region reported for new buckets
    #[arg(long, default_value = buck_core::metadata::DEFAULT_REGION, env = "BUCK_REGION")]
    region: String,

    /// Enable debug logging
    #[arg(short, long, env = "BUCK_DEBUG")]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Parse arguments
    let args = Args::parse();

    // Setup logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("buck_cli={log_level},buck_core={log_level},tower_http=debug").into()
            }),
        )
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!("Starting Buck gateway on {}:{}", args.host, args.port);

    if args.memory_store {
        tracing::warn!("Using in-memory storage - data will NOT persist!");
    } else {
        tracing::info!("Data directory: {}", args.data_dir.display());
    }

    // Build configuration
    let config = GatewayConfig {
        host: args.host,
        port: args.port,
        data_dir: args.data_dir,
        use_memory_store: args.memory_store,
        max_retries: args.max_retries,
        region: args.region,
        ..Default::default()
    };

    // Run the server
    run_server(config).await
}
