//! The per-node blockchain: fork tracking, vote bookkeeping, and the
//! notarization / finalization predicates.
//!
//! This is the structure guarded by the node's single chain lock (see
//! [`crate::consensus::SharedChain`]) — every public method here either
//! reads a consistent snapshot or performs one atomic mutation; none of
//! them call back into another locking entry point, which is what lets a
//! plain `tokio::sync::Mutex` stand in for the "reentrant lock" spec.md
//! calls for (see DESIGN.md).

use crate::{consensus::block::Block, hash::Hash};
use std::collections::{HashMap, HashSet};

/// Holds every received block that descends from the current finalized
/// tip and has not yet been pruned away by finalization.
pub struct BlockChain {
  n: usize,
  genesis_hash: Hash,
  finalized_chain: Vec<Block>,
  pending_blocks: HashMap<Hash, Block>,
  /// parent hash -> child hashes, covering the finalized tip and every
  /// pending block, used to walk the fork tree in [`Self::get_forks`].
  children_of: HashMap<Hash, Vec<Hash>>,
  /// preserves the order blocks were accepted in, so that
  /// [`Self::best_parent`] can break length ties by insertion order.
  insertion_order: Vec<Hash>,
  votes: HashMap<Hash, HashSet<u32>>,
  last_block: Block,
}

impl BlockChain {
  /// `n` is the total number of nodes in the cluster — used by the
  /// notarization predicate.
  pub fn new(n: usize) -> Self {
    let genesis = Block::genesis();
    let genesis_hash = genesis.hash();
    BlockChain {
      n,
      genesis_hash,
      last_block: genesis.clone(),
      finalized_chain: vec![genesis],
      pending_blocks: HashMap::new(),
      children_of: HashMap::new(),
      insertion_order: Vec::new(),
      votes: HashMap::new(),
    }
  }

  pub fn genesis_hash(&self) -> Hash {
    self.genesis_hash
  }

  pub fn finalized_chain(&self) -> &[Block] {
    &self.finalized_chain
  }

  pub fn finalized_tip(&self) -> &Block {
    self.finalized_chain.last().expect("genesis is always present")
  }

  /// The length of the most recently appended block, used only for
  /// chain-length reporting (whether an incoming PROPOSE extends the tip).
  pub fn tip_length(&self) -> u64 {
    self.last_block.length
  }

  pub fn is_finalized(&self, hash: Hash) -> bool {
    self.finalized_chain.iter().any(|b| b.hash() == hash)
  }

  pub fn get_pending(&self, hash: Hash) -> Option<&Block> {
    self.pending_blocks.get(&hash)
  }

  pub fn votes_for(&self, hash: Hash) -> usize {
    self.votes.get(&hash).map_or(0, |v| v.len())
  }

  /// Attaches a block to the fork tree. The parent must already resolve
  /// to either the finalized tip or another pending block — otherwise the
  /// block is dropped (it cannot extend a notarized fork; see DESIGN.md
  /// for why this crate does not reparent unknown blocks to genesis).
  ///
  /// Idempotent: re-adding an already-known block is a no-op.
  pub fn add_block(&mut self, block: Block) {
    let hash = block.hash();
    if self.pending_blocks.contains_key(&hash) || self.is_finalized(hash) {
      return;
    }

    let parent_hash = block.previous_hash;
    let parent_known =
      parent_hash == self.finalized_tip().hash() || self.pending_blocks.contains_key(&parent_hash);
    if !parent_known {
      return;
    }

    self.children_of.entry(parent_hash).or_default().push(hash);
    self.insertion_order.push(hash);
    self.last_block = block.clone();
    self.pending_blocks.insert(hash, block);
  }

  /// Records a vote for `block` from `voter_id`. Idempotent — set
  /// semantics mean casting the same vote twice has no further effect.
  pub fn add_vote(&mut self, block: &Block, voter_id: u32) {
    self.votes.entry(block.hash()).or_default().insert(voter_id);
  }

  /// Genesis is notarized by definition; any other block is notarized
  /// once strictly more than half the nodes have voted for it.
  pub fn check_notarization(&self, block: &Block) -> bool {
    if block.hash() == self.genesis_hash {
      return true;
    }
    self.votes_for(block.hash()) > self.n / 2
  }

  /// Counts pending (non-finalized) blocks that are currently notarized.
  /// Used by the node supervisor's RECOVERED → RUNNING transition.
  pub fn notarized_pending_count(&self) -> usize {
    self.pending_blocks.values().filter(|b| self.check_notarization(b)).count()
  }

  /// Selects the parent for a new proposal: the notarized pending block
  /// with the greatest length, ties broken by insertion order, falling
  /// back to genesis if no pending block is notarized yet.
  pub fn best_parent(&self) -> Block {
    let mut best: Option<&Block> = None;
    for hash in &self.insertion_order {
      let block = self.pending_blocks.get(hash).expect("insertion_order is consistent");
      if !self.check_notarization(block) {
        continue;
      }
      if best.map_or(true, |b| block.length > b.length) {
        best = Some(block);
      }
    }
    best.cloned().unwrap_or_else(|| self.finalized_tip().clone())
  }

  /// Enumerates every maximal root-to-leaf path in the pending tree,
  /// rooted at the current finalized tip.
  pub fn get_forks(&self) -> Vec<Vec<Block>> {
    let root = self.finalized_tip().clone();
    let root_hash = root.hash();
    let mut forks = Vec::new();
    let mut path = vec![root];
    self.collect_forks(root_hash, &mut path, &mut forks);
    forks
  }

  fn collect_forks(&self, hash: Hash, path: &mut Vec<Block>, forks: &mut Vec<Vec<Block>>) {
    match self.children_of.get(&hash) {
      None => forks.push(path.clone()),
      Some(children) if children.is_empty() => forks.push(path.clone()),
      Some(children) => {
        for child_hash in children {
          if let Some(block) = self.pending_blocks.get(child_hash) {
            path.push(block.clone());
            self.collect_forks(*child_hash, path, forks);
            path.pop();
          }
        }
      }
    }
  }

  /// Scans every fork for three consecutive notarized blocks at three
  /// consecutive epochs. Among forks containing such a triple, the one
  /// finalizing the most blocks wins; ties are broken by the order
  /// [`Self::get_forks`] returns (deterministic — insertion order of
  /// children).
  pub fn update_finalization(&mut self) {
    let forks = self.get_forks();
    let mut winner: Option<Vec<Block>> = None;

    for fork in forks {
      if fork.len() < 3 {
        continue;
      }
      let mut furthest: Option<usize> = None;
      for i in 0..=fork.len() - 3 {
        let (a, b, c) = (&fork[i], &fork[i + 1], &fork[i + 2]);
        let consecutive = a.epoch + 1 == b.epoch && b.epoch + 1 == c.epoch;
        let notarized =
          self.check_notarization(a) && self.check_notarization(b) && self.check_notarization(c);
        if consecutive && notarized {
          furthest = Some(i);
        }
      }
      if let Some(i) = furthest {
        let truncated = fork[0..=i + 2].to_vec();
        if winner.as_ref().map_or(true, |w| truncated.len() > w.len()) {
          winner = Some(truncated);
        }
      }
    }

    if let Some(fork) = winner {
      self.stabilize_fork(fork);
    }
  }

  /// Finalizes all but the last two blocks of a triple-anchored fork
  /// (the triple's first block becomes the new finalized tip), then
  /// prunes `pending_blocks` down to the transitive descendants of that
  /// new tip.
  fn stabilize_fork(&mut self, fork: Vec<Block>) {
    let to_finalize = &fork[0..fork.len() - 2];
    for block in to_finalize {
      if !self.is_finalized(block.hash()) {
        self.finalized_chain.push(block.clone());
      }
    }

    let new_tip_hash = self.finalized_tip().hash();
    self.prune_to(new_tip_hash);
  }

  /// Keeps only the pending blocks that are transitive descendants of
  /// `root_hash`, and drops votes for everything else.
  fn prune_to(&mut self, root_hash: Hash) {
    let mut keep = HashSet::new();
    let mut frontier = vec![root_hash];
    while let Some(hash) = frontier.pop() {
      if let Some(children) = self.children_of.get(&hash) {
        for child in children {
          if keep.insert(*child) {
            frontier.push(*child);
          }
        }
      }
    }

    self.pending_blocks.retain(|hash, _| keep.contains(hash));
    self.children_of.retain(|hash, _| *hash == root_hash || keep.contains(hash));
    self.insertion_order.retain(|hash| keep.contains(hash));
    self.votes.retain(|hash, _| keep.contains(hash));
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn child_of(parent: &Block, epoch: u64) -> Block {
    Block {
      previous_hash: parent.hash(),
      epoch,
      length: parent.length + 1,
      transactions: vec![],
    }
  }

  fn notarize(chain: &mut BlockChain, block: &Block, n: usize) {
    for voter in 0..n as u32 {
      chain.add_vote(block, voter);
    }
  }

  #[test]
  fn genesis_is_notarized_and_finalized() {
    let chain = BlockChain::new(5);
    assert!(chain.check_notarization(chain.finalized_tip()));
    assert!(chain.is_finalized(chain.genesis_hash()));
  }

  #[test]
  fn add_block_requires_known_parent() {
    let mut chain = BlockChain::new(5);
    let orphan = Block {
      previous_hash: Hash::of(b"nonexistent"),
      epoch: 1,
      length: 1,
      transactions: vec![],
    };
    chain.add_block(orphan.clone());
    assert!(chain.get_pending(orphan.hash()).is_none());
  }

  #[test]
  fn add_block_extends_tip() {
    let mut chain = BlockChain::new(5);
    let genesis = chain.finalized_tip().clone();
    let b1 = child_of(&genesis, 1);
    chain.add_block(b1.clone());
    assert!(chain.get_pending(b1.hash()).is_some());
    assert_eq!(chain.tip_length(), 1);
  }

  #[test]
  fn vote_idempotence() {
    let mut chain = BlockChain::new(5);
    let genesis = chain.finalized_tip().clone();
    let b1 = child_of(&genesis, 1);
    chain.add_block(b1.clone());
    chain.add_vote(&b1, 0);
    chain.add_vote(&b1, 0);
    chain.add_vote(&b1, 0);
    assert_eq!(chain.votes_for(b1.hash()), 1);
  }

  #[test]
  fn notarization_requires_strict_majority() {
    // n=4 requires 3 voters (supermajority), per spec.md Design Note 3.
    let mut chain = BlockChain::new(4);
    let genesis = chain.finalized_tip().clone();
    let b1 = child_of(&genesis, 1);
    chain.add_block(b1.clone());
    chain.add_vote(&b1, 0);
    chain.add_vote(&b1, 1);
    assert!(!chain.check_notarization(&b1));
    chain.add_vote(&b1, 2);
    assert!(chain.check_notarization(&b1));
  }

  #[test]
  fn finalizes_three_consecutive_notarized_epochs() {
    let n = 5;
    let mut chain = BlockChain::new(n);
    let genesis = chain.finalized_tip().clone();
    let b1 = child_of(&genesis, 1);
    let b2 = child_of(&b1, 2);
    let b3 = child_of(&b2, 3);

    chain.add_block(b1.clone());
    chain.add_block(b2.clone());
    chain.add_block(b3.clone());
    notarize(&mut chain, &b1, n);
    notarize(&mut chain, &b2, n);
    notarize(&mut chain, &b3, n);

    chain.update_finalization();

    assert!(chain.is_finalized(b1.hash()));
    assert!(!chain.is_finalized(b2.hash()));
    assert!(!chain.is_finalized(b3.hash()));
    assert_eq!(chain.finalized_tip().hash(), b1.hash());
    // b2, b3 remain pending, descending from the new tip.
    assert!(chain.get_pending(b2.hash()).is_some());
    assert!(chain.get_pending(b3.hash()).is_some());
  }

  #[test]
  fn non_consecutive_epochs_do_not_finalize() {
    let n = 5;
    let mut chain = BlockChain::new(n);
    let genesis = chain.finalized_tip().clone();
    let b1 = child_of(&genesis, 1);
    let b2 = child_of(&b1, 3); // gap: not epoch 2
    let b3 = child_of(&b2, 4);

    chain.add_block(b1.clone());
    chain.add_block(b2.clone());
    chain.add_block(b3.clone());
    notarize(&mut chain, &b1, n);
    notarize(&mut chain, &b2, n);
    notarize(&mut chain, &b3, n);

    chain.update_finalization();
    assert!(!chain.is_finalized(b1.hash()));
  }

  #[test]
  fn forks_are_enumerated_and_longest_wins() {
    let n = 5;
    let mut chain = BlockChain::new(n);
    let genesis = chain.finalized_tip().clone();

    // fork A: three consecutive notarized blocks, qualifies for finalization.
    let a1 = child_of(&genesis, 1);
    let a2 = child_of(&a1, 2);
    let a3 = child_of(&a2, 3);

    // fork B: competing single block, not notarized.
    let b1 = child_of(&genesis, 1);

    chain.add_block(a1.clone());
    chain.add_block(a2.clone());
    chain.add_block(a3.clone());
    chain.add_block(b1.clone());

    let forks = chain.get_forks();
    assert_eq!(forks.len(), 2);

    notarize(&mut chain, &a1, n);
    notarize(&mut chain, &a2, n);
    notarize(&mut chain, &a3, n);
    chain.update_finalization();

    assert!(chain.is_finalized(a1.hash()));
  }

  #[test]
  fn notarized_pending_count_ignores_unnotarized_blocks() {
    let n = 5;
    let mut chain = BlockChain::new(n);
    let genesis = chain.finalized_tip().clone();
    let b1 = child_of(&genesis, 1);
    let b2 = child_of(&genesis, 1);
    chain.add_block(b1.clone());
    chain.add_block(b2.clone());
    notarize(&mut chain, &b1, n);
    assert_eq!(chain.notarized_pending_count(), 1);
  }

  #[test]
  fn best_parent_falls_back_to_genesis() {
    let chain = BlockChain::new(5);
    assert_eq!(chain.best_parent().hash(), chain.genesis_hash());
  }

  #[test]
  fn best_parent_picks_longest_notarized_pending_block() {
    let n = 5;
    let mut chain = BlockChain::new(n);
    let genesis = chain.finalized_tip().clone();
    let b1 = child_of(&genesis, 1);
    let b2 = child_of(&b1, 2);

    chain.add_block(b1.clone());
    chain.add_block(b2.clone());
    notarize(&mut chain, &b1, n);
    // b2 not notarized yet: best_parent should still pick b1.
    assert_eq!(chain.best_parent().hash(), b1.hash());

    notarize(&mut chain, &b2, n);
    assert_eq!(chain.best_parent().hash(), b2.hash());
  }
}
