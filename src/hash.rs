//! Canonical block/message hashing.
//!
//! All hashes in this crate are raw SHA-1 digest bytes. There is no
//! security claim here — the digest is only used as a duplicate-detection
//! and content-addressing key at the scale of a testbed cluster.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; 20]);

impl Hash {
  /// The reserved sentinel previous-hash of the genesis block.
  pub const ZERO: Hash = Hash([0u8; 20]);

  pub fn of(bytes: &[u8]) -> Self {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    Hash(out)
  }

  /// Hashes the canonical bincode encoding of `value`.
  pub fn of_encoded<T: Serialize>(value: &T) -> Self {
    let bytes = bincode::serialize(value).expect("in-memory types always serialize");
    Self::of(&bytes)
  }

  pub fn as_bytes(&self) -> &[u8; 20] {
    &self.0
  }
}

impl fmt::Display for Hash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in &self.0 {
      write!(f, "{byte:02x}")?;
    }
    Ok(())
  }
}

impl fmt::Debug for Hash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Hash({self})")
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn same_input_same_hash() {
    assert_eq!(Hash::of(b"abc"), Hash::of(b"abc"));
    assert_ne!(Hash::of(b"abc"), Hash::of(b"abd"));
  }

  #[test]
  fn zero_is_stable() {
    assert_eq!(Hash::ZERO.as_bytes(), &[0u8; 20]);
  }
}
