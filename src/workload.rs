//! The internal transaction workload generator.
//!
//! Stands in for an external client (spec.md §6's ingress MAY clause covers
//! the alternative) so a node is runnable standalone: every half epoch it
//! appends one randomly generated transaction to the shared pending-tx
//! buffer, grounded in `examples/original_source/src/utils/workload.py`.

use crate::consensus::Transaction;
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

/// Runs forever, generating one transaction from `self_id` to a random
/// other node every `period`.
pub async fn run(self_id: u32, n: u32, period: Duration, pending: Arc<Mutex<Vec<Transaction>>>) {
  let mut ticker = tokio::time::interval(period);
  let mut next_tx_id = 0u64;
  loop {
    ticker.tick().await;
    let tx = Transaction {
      sender_id: self_id,
      receiver_id: random_other(self_id, n),
      tx_id: next_tx_id,
      amount: rand::thread_rng().gen_range(1.0..100.0),
    };
    next_tx_id += 1;
    pending.lock().await.push(tx);
  }
}

fn random_other(self_id: u32, n: u32) -> u32 {
  if n <= 1 {
    return self_id;
  }
  let mut rng = rand::thread_rng();
  loop {
    let candidate = rng.gen_range(0..n);
    if candidate != self_id {
      return candidate;
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn random_other_never_picks_self() {
    for _ in 0..100 {
      assert_ne!(random_other(2, 5), 2);
    }
  }

  #[test]
  fn random_other_falls_back_to_self_in_a_single_node_cluster() {
    assert_eq!(random_other(0, 1), 0);
  }
}
