//! The replicated state machine: blocks, the fork-tracking chain, the
//! message envelope, and leader election / epoch timing.

mod block;
mod chain;
mod message;
mod schedule;

pub use block::{Block, Transaction};
pub use chain::BlockChain;
pub use message::{deserialize, deserialize_frame, serialize, serialize_frame, Message, MessageKind, WireFrame};
pub use schedule::{elect_leader, in_confusion_period, EpochClock};

use std::sync::Arc;
use tokio::sync::Mutex;

/// The chain, guarded by a single lock shared across every task that
/// touches consensus state (accept/reader tasks via the dispatcher, the
/// epoch driver, the recovery check). See `chain.rs` module docs for why a
/// plain (non-reentrant) `tokio::sync::Mutex` is sufficient here.
pub type SharedChain = Arc<Mutex<BlockChain>>;
