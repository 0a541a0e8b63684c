//! Typed failures the core surfaces inward. Everything at the process
//! boundary (startup, config loading) uses `anyhow::Result` instead; this
//! enum exists for the handful of failures callers may want to match on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
  #[error("malformed frame: {0}")]
  MalformedFrame(#[from] bincode::Error),

  #[error("invalid config: {0}")]
  InvalidConfig(String),
}
