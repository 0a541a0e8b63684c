//! Cluster configuration, shared verbatim by every node in a run.
//!
//! Loaded from a YAML file; the grammar is kept deliberately small — it is
//! someone else's concern to keep stable, this crate only needs to parse
//! and validate it (spec.md §6).

use crate::error::ConsensusError;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde::Deserialize;
use std::{
  collections::{HashMap, HashSet},
  net::SocketAddr,
  path::Path,
};

#[derive(Clone, Debug, Deserialize)]
pub struct NodeEntry {
  pub id: u32,
  pub ip: String,
  pub port: u16,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
  pub epoch_duration: u64,
  pub seed: u64,
  pub start_time: String,
  #[serde(default)]
  pub confusion_start: u64,
  #[serde(default)]
  pub confusion_duration: u64,
  pub nodes: Vec<NodeEntry>,
}

impl Config {
  /// Reads, parses and validates the config file at `path`, checking that
  /// `self_id` is itself one of the listed nodes.
  pub fn load(path: &Path, self_id: u32) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path)
      .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
    let config: Config = serde_yaml::from_str(&text)
      .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
    config.validate(self_id)?;
    Ok(config)
  }

  fn validate(&self, self_id: u32) -> Result<(), ConsensusError> {
    if self.epoch_duration == 0 {
      return Err(ConsensusError::InvalidConfig("epoch_duration must be non-zero".into()));
    }
    if NaiveTime::parse_from_str(&self.start_time, "%H:%M:%S").is_err() {
      return Err(ConsensusError::InvalidConfig(format!(
        "start_time {:?} is not HH:MM:SS",
        self.start_time
      )));
    }
    let mut ids = HashSet::new();
    for node in &self.nodes {
      if !ids.insert(node.id) {
        return Err(ConsensusError::InvalidConfig(format!("duplicate node id {}", node.id)));
      }
    }
    if !ids.contains(&self_id) {
      return Err(ConsensusError::InvalidConfig(format!(
        "this node's id {self_id} is not listed in nodes"
      )));
    }
    Ok(())
  }

  pub fn n(&self) -> u32 {
    self.nodes.len() as u32
  }

  /// Every peer's socket address, excluding `self_id`'s own entry.
  pub fn peer_addrs(&self, self_id: u32) -> HashMap<u32, SocketAddr> {
    self
      .nodes
      .iter()
      .filter(|node| node.id != self_id)
      .filter_map(|node| {
        format!("{}:{}", node.ip, node.port).parse().ok().map(|addr| (node.id, addr))
      })
      .collect()
  }

  pub fn self_addr(&self, self_id: u32) -> Option<SocketAddr> {
    let node = self.nodes.iter().find(|node| node.id == self_id)?;
    format!("{}:{}", node.ip, node.port).parse().ok()
  }

  /// The wall-clock instant `start_time` names, on today's date in UTC.
  pub fn start_time_utc(&self) -> anyhow::Result<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(&self.start_time, "%H:%M:%S")?;
    let today = Utc::now().date_naive();
    Utc
      .from_local_datetime(&today.and_time(time))
      .single()
      .ok_or_else(|| anyhow::anyhow!("ambiguous start_time {}", self.start_time))
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn sample() -> Config {
    Config {
      epoch_duration: 1,
      seed: 42,
      start_time: "00:00:00".into(),
      confusion_start: 0,
      confusion_duration: 0,
      nodes: vec![
        NodeEntry { id: 0, ip: "127.0.0.1".into(), port: 9000 },
        NodeEntry { id: 1, ip: "127.0.0.1".into(), port: 9001 },
      ],
    }
  }

  #[test]
  fn rejects_zero_epoch_duration() {
    let mut config = sample();
    config.epoch_duration = 0;
    assert!(config.validate(0).is_err());
  }

  #[test]
  fn rejects_malformed_start_time() {
    let mut config = sample();
    config.start_time = "not-a-time".into();
    assert!(config.validate(0).is_err());
  }

  #[test]
  fn rejects_duplicate_node_ids() {
    let mut config = sample();
    config.nodes.push(NodeEntry { id: 0, ip: "127.0.0.1".into(), port: 9002 });
    assert!(config.validate(0).is_err());
  }

  #[test]
  fn rejects_self_missing_from_nodes() {
    let config = sample();
    assert!(config.validate(7).is_err());
  }

  #[test]
  fn peer_addrs_excludes_self() {
    let config = sample();
    let peers = config.peer_addrs(0);
    assert_eq!(peers.len(), 1);
    assert!(peers.contains_key(&1));
  }
}
