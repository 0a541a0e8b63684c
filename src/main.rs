use clap::Parser;
use streamlet::{cli::Cli, config::Config, node::NodeSupervisor};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();
  let config = Config::load(&cli.config, cli.id)?;
  let self_addr = config
    .self_addr(cli.id)
    .ok_or_else(|| anyhow::anyhow!("node {} has no valid listen address in config", cli.id))?;

  info!("node {}: seed {} epoch_duration {}s", cli.id, config.seed, config.epoch_duration);

  let node = NodeSupervisor::new(cli.id, &config)?;
  node.run(self_addr).await
}
