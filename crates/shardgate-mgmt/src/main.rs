use anyhow::Result;
use clap::Parser;
use shardgate_mgmt::cli::{self, Cli, Command};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Serve { config } => {
            tracing::info!("ShardGate management server starting...");
            cli::serve(config).await
        }
        _ => cli.run().await,
    }
}
