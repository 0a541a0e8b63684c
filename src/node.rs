//! The node supervisor: wires every other component together, drives the
//! per-epoch loop, and runs the confusion-period dispatch policy.
//!
//! See spec.md §5 for the six-task concurrency model this mirrors: accept
//! (in `network::accept_loop`), one reader per peer (also `network`), the
//! dispatcher (`run_dispatcher`), the epoch driver (`run_epoch_driver`), the
//! transaction generator (`crate::workload`), and the reconnector
//! (`PeerLinks::run_reconnector`).

use crate::{
  config::Config,
  consensus::{
    elect_leader, in_confusion_period, Block, BlockChain, EpochClock, Message, MessageKind,
    SharedChain, Transaction, WireFrame,
  },
  network::{self, PeerLinks},
  urb::Urb,
  workload,
};
use chrono::Utc;
use std::{
  collections::VecDeque,
  net::SocketAddr,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
  time::Duration,
};
use tokio::{
  net::TcpListener,
  sync::{mpsc, watch, Mutex},
};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
  /// Before the configured start time.
  Waiting,
  /// Normal operation.
  Running,
  /// Started after the configured start time; catching up.
  Recovered,
}

pub struct NodeSupervisor {
  self_id: u32,
  n: u32,
  seed: u64,
  confusion_start: u64,
  confusion_duration: u64,
  clock: EpochClock,
  chain: SharedChain,
  links: Arc<PeerLinks>,
  urb: Arc<Urb>,
  pending_tx: Arc<Mutex<Vec<Transaction>>>,
  state: Arc<Mutex<NodeState>>,
  current_epoch: Arc<AtomicU64>,
}

impl NodeSupervisor {
  pub fn new(self_id: u32, config: &Config) -> anyhow::Result<Self> {
    let n = config.n();
    let start_time = config.start_time_utc()?;
    let clock = EpochClock::new(start_time, Duration::from_secs(config.epoch_duration));
    let links = Arc::new(PeerLinks::new(self_id, config.peer_addrs(self_id)));
    let urb = Arc::new(Urb::new(self_id, links.clone()));
    let chain = Arc::new(Mutex::new(BlockChain::new(n as usize)));

    Ok(NodeSupervisor {
      self_id,
      n,
      seed: config.seed,
      confusion_start: config.confusion_start,
      confusion_duration: config.confusion_duration,
      clock,
      chain,
      links,
      urb,
      pending_tx: Arc::new(Mutex::new(Vec::new())),
      state: Arc::new(Mutex::new(NodeState::Waiting)),
      current_epoch: Arc::new(AtomicU64::new(1)),
    })
  }

  /// Starts every background task and runs the epoch driver until shutdown.
  pub async fn run(self, self_addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(self_addr).await?;
    info!("node {}: listening on {self_addr}", self.self_id);

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(network::accept_loop(listener, inbound_tx));

    self.links.reconnect_all().await;
    tokio::spawn(self.links.clone().run_reconnector(self.clock.epoch_duration / 2));

    tokio::spawn(workload::run(
      self.self_id,
      self.n,
      self.clock.epoch_duration / 2,
      self.pending_tx.clone(),
    ));

    tokio::spawn(Self::run_dispatcher(
      inbound_rx,
      self.urb.clone(),
      self.chain.clone(),
      self.pending_tx.clone(),
      self.confusion_start,
      self.confusion_duration,
      self.current_epoch.clone(),
      self.self_id,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
      }
    });

    self.run_epoch_driver(shutdown_rx).await;
    Ok(())
  }

  /// Single-threaded consumer of the inbound frame queue (spec.md §4.8). A
  /// deterministic round-robin confusion window suspends normal delivery:
  /// the predicate is re-polled every 100 ms, and on exit the buffer is
  /// drained FIFO before any fresh arrival is processed.
  async fn run_dispatcher(
    mut inbound: mpsc::UnboundedReceiver<WireFrame>,
    urb: Arc<Urb>,
    chain: SharedChain,
    pending_tx: Arc<Mutex<Vec<Transaction>>>,
    confusion_start: u64,
    confusion_duration: u64,
    current_epoch: Arc<AtomicU64>,
    self_id: u32,
  ) {
    let mut buffered: VecDeque<WireFrame> = VecDeque::new();
    let mut was_confused = false;

    loop {
      let epoch = current_epoch.load(Ordering::Relaxed);
      if in_confusion_period(epoch, confusion_start, confusion_duration) {
        was_confused = true;
        match tokio::time::timeout(Duration::from_millis(100), inbound.recv()).await {
          Ok(Some(frame)) => buffered.push_back(frame),
          Ok(None) => return,
          Err(_elapsed) => continue,
        }
        continue;
      }

      if was_confused {
        was_confused = false;
        while let Some(frame) = buffered.pop_front() {
          Self::handle_frame(frame, &urb, &chain, &pending_tx, self_id).await;
        }
      }

      match inbound.recv().await {
        Some(frame) => Self::handle_frame(frame, &urb, &chain, &pending_tx, self_id).await,
        None => return,
      }
    }
  }

  async fn handle_frame(
    frame: WireFrame,
    urb: &Arc<Urb>,
    chain: &SharedChain,
    pending_tx: &Arc<Mutex<Vec<Transaction>>>,
    self_id: u32,
  ) {
    match frame {
      WireFrame::Txn(tx) => pending_tx.lock().await.push(tx),
      WireFrame::Msg(message) => {
        let Some(delivered) = urb.receive(message).await else { return };
        match delivered.kind {
          MessageKind::Propose(block) => {
            let extends_tip = chain.lock().await.tip_length() < block.length;
            if extends_tip {
              chain.lock().await.add_block(block.clone());
              debug!(
                "node {self_id}: accepted proposal at epoch {} length {}",
                block.epoch, block.length
              );
              urb.broadcast(&Message::vote(block, self_id)).await;
            }
          }
          MessageKind::Vote(block) => {
            chain.lock().await.add_vote(&block, delivered.sender);
          }
          MessageKind::Echo(_) => {
            warn!("node {self_id}: urb delivered a nested echo, dropping");
          }
        }
      }
    }
  }

  async fn run_epoch_driver(&self, mut shutdown: watch::Receiver<bool>) {
    let now = Utc::now();
    let mut epoch;
    if now < self.clock.start_time {
      *self.state.lock().await = NodeState::Waiting;
      if !self.sleep_or_shutdown(0, &mut shutdown).await {
        return;
      }
      *self.state.lock().await = NodeState::Running;
      epoch = 1;
    } else {
      *self.state.lock().await = NodeState::Recovered;
      epoch = self.clock.epoch_at(now);
      info!("node {}: starting in RECOVERED state at epoch {epoch}", self.self_id);
    }

    loop {
      if *shutdown.borrow() {
        break;
      }
      self.current_epoch.store(epoch, Ordering::Relaxed);

      // 1. synchronize_epoch: resync to the wall-clock boundary.
      if !self.sleep_or_shutdown(epoch, &mut shutdown).await {
        break;
      }

      // 2. elect_leader
      let leader = elect_leader(epoch, self.seed, self.n, self.confusion_start, self.confusion_duration);
      debug!("node {}: epoch {epoch} leader is {leader}", self.self_id);

      // 3. leader phase, only while RUNNING
      let state = *self.state.lock().await;
      if leader == self.self_id && state == NodeState::Running {
        self.run_leader_phase(epoch).await;
      }

      // 4. sleep the remainder of the epoch
      if !self.sleep_or_shutdown(epoch + 1, &mut shutdown).await {
        break;
      }

      // 5. finalize
      self.chain.lock().await.update_finalization();

      // 6. recovery check
      let mut state_guard = self.state.lock().await;
      if *state_guard == NodeState::Recovered {
        let notarized = self.chain.lock().await.notarized_pending_count();
        if notarized >= 3 {
          *state_guard = NodeState::Running;
          info!("node {}: caught up, resuming normal operation at epoch {epoch}", self.self_id);
        }
      }
      drop(state_guard);

      // 7. advance
      epoch += 1;
    }

    info!("node {}: shutting down", self.self_id);
  }

  /// Builds and broadcasts the proposal only — does not add it to the
  /// local chain. The leader is also a peer of everyone it sends to, so
  /// its own PROPOSE comes back wrapped in an ECHO and is delivered
  /// through the normal `handle_frame` path just like any other node's
  /// view of it, which is what casts the leader's own vote (spec.md §4.7,
  /// matching `examples/original_source/src/node.py`'s leader, which does
  /// not special-case its own proposal either).
  async fn run_leader_phase(&self, epoch: u64) {
    let parent = self.chain.lock().await.best_parent();
    let transactions = std::mem::take(&mut *self.pending_tx.lock().await);
    let block = Block {
      previous_hash: parent.hash(),
      epoch,
      length: parent.length + 1,
      transactions,
    };
    info!("node {}: proposing block at epoch {epoch} length {}", self.self_id, block.length);
    self.urb.broadcast(&Message::propose(block, self.self_id)).await;
  }

  async fn sleep_or_shutdown(&self, epoch: u64, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
      _ = self.clock.sleep_until_epoch(epoch) => true,
      _ = shutdown.changed() => false,
    }
  }
}
