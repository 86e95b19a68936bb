use clap::Parser;
use log::info;
use tracing_subscriber::EnvFilter;

use hl7_mllp_gateway::cli::Args;
use hl7_mllp_gateway::{server, ConnectionPool};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // the fmt subscriber also picks up `log` records through its tracing-log bridge
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = args.into_config()?;
    let options = config.mllp.pool_options();
    info!(
        "Forwarding to MLLP endpoint {} (keep-alive {:?}, max messages {:?}, timeout {:?})",
        config.mllp.address, options.keep_alive, options.max_messages, options.timeout
    );

    let pool = ConnectionPool::new(config.mllp.address.clone(), options);
    let served = server::serve(&config.http, pool.clone()).await;

    pool.shutdown().await;
    info!("Shutdown complete");
    served?;
    Ok(())
}
