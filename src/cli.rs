use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(version, about = "Streamlet-style epoch consensus node")]
pub struct Cli {
  #[clap(long, help = "this node's id, must appear in the config's node list")]
  pub id: u32,

  #[clap(long, default_value = "config.yaml", help = "path to the cluster config file")]
  pub config: PathBuf,
}
