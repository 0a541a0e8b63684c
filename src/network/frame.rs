//! The on-wire frame: a big-endian `u32` length prefix followed by exactly
//! that many bytes of payload. The payload itself is an opaque,
//! self-describing bincode encoding produced by the caller — this module
//! only owns the length-delimiting, matching spec.md §6's wire protocol.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Largest frame this node will accept from a peer. Guards against a
/// corrupt or adversarial length prefix causing an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub async fn write_frame<W: AsyncWriteExt + Unpin>(
  writer: &mut W,
  payload: &[u8],
) -> std::io::Result<()> {
  writer.write_u32(payload.len() as u32).await?;
  writer.write_all(payload).await?;
  writer.flush().await
}

/// Reads one frame. Returns `Ok(None)` on clean EOF before any bytes of a
/// new frame arrive (the connection was closed between frames).
pub async fn read_frame<R: AsyncReadExt + Unpin>(
  reader: &mut R,
) -> std::io::Result<Option<Vec<u8>>> {
  let len = match reader.read_u32().await {
    Ok(len) => len,
    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
    Err(e) => return Err(e),
  };
  if len > MAX_FRAME_LEN {
    return Err(std::io::Error::new(
      std::io::ErrorKind::InvalidData,
      format!("frame length {len} exceeds maximum {MAX_FRAME_LEN}"),
    ));
  }
  let mut buf = vec![0u8; len as usize];
  reader.read_exact(&mut buf).await?;
  Ok(Some(buf))
}
