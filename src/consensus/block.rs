//! Block and transaction types.
//!
//! A [`Block`] is immutable once created: its hash is deterministic over
//! its four fields and never changes. The chain attaches finalization
//! state to blocks externally (see [`crate::consensus::chain`]) rather
//! than mutating the block itself, so `Block` can stay `Clone + Eq` and be
//! shipped as-is over the wire.

use crate::hash::Hash;
use serde::{Deserialize, Serialize};

/// A single transfer between two accounts known to the workload.
///
/// `tx_id` is unique per sender; the pair `(sender_id, tx_id)` identifies
/// a transaction. Consumed once when packed into a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
  pub sender_id: u32,
  pub receiver_id: u32,
  pub tx_id: u64,
  pub amount: f64,
}

/// An immutable block in the fork tree.
///
/// Equality and hashing only ever consider these four fields — anything
/// the chain layer tracks about a block (finalization, vote count, fork
/// position) lives alongside it in [`crate::consensus::chain::BlockChain`],
/// not inside `Block` itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
  pub previous_hash: Hash,
  pub epoch: u64,
  pub length: u64,
  pub transactions: Vec<Transaction>,
}

impl Block {
  pub fn genesis() -> Self {
    Block {
      previous_hash: Hash::ZERO,
      epoch: 0,
      length: 0,
      transactions: Vec::new(),
    }
  }

  pub fn is_genesis(&self) -> bool {
    self.previous_hash == Hash::ZERO && self.epoch == 0 && self.length == 0
  }

  /// Deterministic digest over the block's immutable fields. Stable
  /// across runs and hosts — used as the block's identity throughout
  /// the chain, the vote tables and the wire protocol.
  pub fn hash(&self) -> Hash {
    Hash::of_encoded(self)
  }
}
