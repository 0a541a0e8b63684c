//! Point-to-point stream connections between nodes.

mod frame;
mod peer;

pub use peer::{accept_loop, PeerLinks};
