//! The peer link layer: a pool of persistent, length-prefixed stream
//! connections to each peer, with lazy reconnection.
//!
//! Each node dials every peer once at startup and keeps that connection
//! around for sending; a separate accept loop on the node's own listening
//! socket handles the reverse direction (every peer dials us once). Dead
//! or never-connected outbound entries are stored as `None` and healed by
//! the reconnector, following spec.md §4.3.

use crate::{
  consensus::{self, WireFrame},
  network::frame,
};
use socket2::SockRef;
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
  net::{TcpListener, TcpStream},
  sync::{mpsc, Mutex},
};
use tracing::{debug, info, warn};

/// Enables TCP keep-alive (spec.md §4.3: "Keep-alive is enabled on all
/// sockets; no explicit heartbeat protocol"). `tokio::net::TcpStream`
/// doesn't expose `SO_KEEPALIVE` directly, so this borrows the raw socket
/// through `socket2`, the ecosystem's usual route for socket options
/// tokio itself doesn't surface.
fn enable_keepalive(stream: &TcpStream) {
  if let Err(e) = SockRef::from(stream).set_keepalive(true) {
    warn!("failed to enable TCP keepalive: {e}");
  }
}

type OutboundSlot = Option<Arc<Mutex<TcpStream>>>;

/// Owns the outbound connection pool. Reading happens on connections
/// accepted by [`accept_loop`], which are independent sockets — see the
/// module docs.
pub struct PeerLinks {
  self_id: u32,
  addrs: HashMap<u32, SocketAddr>,
  outbound: Mutex<HashMap<u32, OutboundSlot>>,
}

impl PeerLinks {
  pub fn new(self_id: u32, addrs: HashMap<u32, SocketAddr>) -> Self {
    let outbound = addrs.keys().map(|id| (*id, None)).collect();
    PeerLinks { self_id, addrs, outbound: Mutex::new(outbound) }
  }

  pub fn peer_ids(&self) -> Vec<u32> {
    self.addrs.keys().copied().collect()
  }

  /// Attempts to (re)connect to every peer currently missing a live
  /// outbound socket. Called once at startup and then periodically by
  /// [`Self::run_reconnector`].
  pub async fn reconnect_all(&self) {
    let missing: Vec<u32> = {
      let outbound = self.outbound.lock().await;
      outbound.iter().filter(|(_, slot)| slot.is_none()).map(|(id, _)| *id).collect()
    };
    for peer_id in missing {
      self.try_connect(peer_id).await;
    }
  }

  async fn try_connect(&self, peer_id: u32) {
    let Some(addr) = self.addrs.get(&peer_id) else { return };
    match TcpStream::connect(addr).await {
      Ok(stream) => {
        let _ = stream.set_nodelay(true);
        enable_keepalive(&stream);
        debug!("node {}: connected to peer {peer_id} at {addr}", self.self_id);
        self.outbound.lock().await.insert(peer_id, Some(Arc::new(Mutex::new(stream))));
      }
      Err(e) => {
        debug!("node {}: failed to connect to peer {peer_id}: {e}", self.self_id);
      }
    }
  }

  /// Background task: every `period`, heals any dead outbound sockets.
  pub async fn run_reconnector(self: Arc<Self>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
      ticker.tick().await;
      self.reconnect_all().await;
    }
  }

  /// Sends one already-encoded frame payload to `peer_id`. Silently
  /// drops the payload if there is no live socket; on a write error the
  /// socket is closed and nulled so the reconnector picks it up.
  pub async fn send(&self, peer_id: u32, payload: &[u8]) {
    let slot = {
      let outbound = self.outbound.lock().await;
      outbound.get(&peer_id).cloned().flatten()
    };
    let Some(conn) = slot else { return };
    let mut stream = conn.lock().await;
    if let Err(e) = frame::write_frame(&mut *stream, payload).await {
      warn!("node {}: peer {peer_id} unreachable ({e}), will retry", self.self_id);
      drop(stream);
      self.outbound.lock().await.insert(peer_id, None);
    }
  }

  /// Sends `payload` to every peer. Used by the URB layer to originate a
  /// broadcast (peers wrap and re-ECHO it on receipt).
  pub async fn broadcast(&self, payload: &[u8]) {
    for peer_id in self.peer_ids() {
      self.send(peer_id, payload).await;
    }
  }
}

/// Accepts inbound connections on `listener` forever, spawning one reader
/// task per connection. Each decoded [`WireFrame`] is pushed onto
/// `inbound`. Returns once `listener` is closed (e.g. during shutdown).
pub async fn accept_loop(listener: TcpListener, inbound: mpsc::UnboundedSender<WireFrame>) {
  loop {
    match listener.accept().await {
      Ok((stream, addr)) => {
        info!("accepted connection from {addr}");
        enable_keepalive(&stream);
        let inbound = inbound.clone();
        tokio::spawn(async move { read_peer(stream, inbound).await });
      }
      Err(e) => {
        warn!("accept failed: {e}");
        break;
      }
    }
  }
}

async fn read_peer(mut stream: TcpStream, inbound: mpsc::UnboundedSender<WireFrame>) {
  loop {
    match frame::read_frame(&mut stream).await {
      Ok(Some(bytes)) => match consensus::deserialize_frame(&bytes) {
        Ok(frame) => {
          if inbound.send(frame).is_err() {
            break; // dispatcher shut down
          }
        }
        Err(e) => warn!("dropping malformed frame: {e}"),
      },
      Ok(None) => break, // peer closed the connection
      Err(e) => {
        warn!("connection error: {e}");
        break;
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[tokio::test]
  async fn send_to_unconnected_peer_is_a_silent_noop() {
    let links = PeerLinks::new(0, HashMap::from([(1u32, "127.0.0.1:1".parse().unwrap())]));
    links.send(1, b"hi").await; // must not panic or block
  }

  #[tokio::test]
  async fn connects_and_delivers_a_frame_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(accept_loop(listener, tx));

    let links = PeerLinks::new(0, HashMap::from([(1u32, addr)]));
    links.reconnect_all().await;

    let block = crate::consensus::Block::genesis();
    let msg = crate::consensus::Message::propose(block, 0);
    let frame = WireFrame::Msg(msg.clone());
    let bytes = consensus::serialize_frame(&frame).unwrap();
    links.send(1, &bytes).await;

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    match received {
      WireFrame::Msg(m) => assert_eq!(m.hash(), msg.hash()),
      WireFrame::Txn(_) => panic!("expected Msg"),
    }
  }
}
