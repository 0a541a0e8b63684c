//! Uniform reliable broadcast: first-echo flood delivery.
//!
//! Guarantees (spec.md §4.4): if any correct node delivers payload `P`,
//! every correct node eventually delivers `P`, and each node delivers `P`
//! at most once. Implemented as a bounded dedup window of the 200 most
//! recently delivered payload hashes, paired with the peer link layer for
//! the ECHO re-broadcast.

use crate::{
  consensus::{self, Message, MessageKind},
  hash::Hash,
  network::PeerLinks,
};
use std::{collections::{HashSet, VecDeque}, sync::Arc};
use tokio::sync::Mutex;

const DEDUP_WINDOW: usize = 200;

struct DedupWindow {
  order: VecDeque<Hash>,
  seen: HashSet<Hash>,
  capacity: usize,
}

impl DedupWindow {
  fn new(capacity: usize) -> Self {
    DedupWindow { order: VecDeque::with_capacity(capacity), seen: HashSet::new(), capacity }
  }

  /// Records `hash` if it hasn't been seen before. Returns whether it was
  /// new.
  fn record_if_new(&mut self, hash: Hash) -> bool {
    if !self.seen.insert(hash) {
      return false;
    }
    self.order.push_back(hash);
    if self.order.len() > self.capacity {
      if let Some(evicted) = self.order.pop_front() {
        self.seen.remove(&evicted);
      }
    }
    true
  }
}

pub struct Urb {
  self_id: u32,
  window: Mutex<DedupWindow>,
  links: Arc<PeerLinks>,
}

impl Urb {
  pub fn new(self_id: u32, links: Arc<PeerLinks>) -> Self {
    Urb { self_id, window: Mutex::new(DedupWindow::new(DEDUP_WINDOW)), links }
  }

  /// Feeds one received message through the URB layer. Returns the
  /// payload to deliver to the handler exactly once, or `None` if it is a
  /// duplicate (including an ECHO of something already delivered).
  ///
  /// On first receipt of a non-ECHO message this also re-broadcasts it
  /// wrapped in an ECHO, per spec.md §4.4 — ECHOes themselves are never
  /// re-echoed.
  pub async fn receive(&self, message: Message) -> Option<Message> {
    match message.kind {
      MessageKind::Echo(inner) => {
        let hash = inner.hash();
        let is_new = self.window.lock().await.record_if_new(hash);
        is_new.then(|| *inner)
      }
      _ => {
        let hash = message.hash();
        let is_new = self.window.lock().await.record_if_new(hash);
        if is_new {
          let echo = Message::echo(message.clone(), self.self_id);
          self.send_raw(&echo).await;
          Some(message)
        } else {
          None
        }
      }
    }
  }

  /// Originates a message: sent directly to every peer. Peers will wrap
  /// it in an ECHO and re-broadcast on their own first receipt.
  pub async fn broadcast(&self, message: &Message) {
    self.send_raw(message).await;
  }

  async fn send_raw(&self, message: &Message) {
    match consensus::serialize(message) {
      Ok(bytes) => self.links.broadcast(&bytes).await,
      Err(e) => tracing::error!("failed to serialize outgoing message: {e}"),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::consensus::Block;
  use std::collections::HashMap;

  fn links() -> Arc<PeerLinks> {
    Arc::new(PeerLinks::new(0, HashMap::new()))
  }

  #[tokio::test]
  async fn delivers_a_fresh_propose_exactly_once() {
    let urb = Urb::new(0, links());
    let msg = Message::propose(Block::genesis(), 1);

    let first = urb.receive(msg.clone()).await;
    assert!(first.is_some());

    let second = urb.receive(msg).await;
    assert!(second.is_none());
  }

  #[tokio::test]
  async fn echo_unwraps_and_delivers_the_inner_payload_once() {
    let urb = Urb::new(0, links());
    let inner = Message::vote(Block::genesis(), 2);
    let echo = Message::echo(inner.clone(), 3);

    let delivered = urb.receive(echo.clone()).await.unwrap();
    assert_eq!(delivered.hash(), inner.hash());

    // a second echo of the same inner payload must not be delivered again.
    let echo_again = Message::echo(inner, 4);
    assert!(urb.receive(echo_again).await.is_none());
  }

  #[tokio::test]
  async fn dedup_window_evicts_oldest_entries() {
    let mut window = DedupWindow::new(2);
    let h1 = Hash::of(b"1");
    let h2 = Hash::of(b"2");
    let h3 = Hash::of(b"3");

    assert!(window.record_if_new(h1));
    assert!(window.record_if_new(h2));
    assert!(window.record_if_new(h3)); // evicts h1
    assert!(window.record_if_new(h1)); // h1 forgotten, treated as new again
  }
}
