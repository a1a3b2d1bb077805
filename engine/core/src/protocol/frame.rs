//! Frame Protocol
//!
//! Wire format for wearable messages: one JSON object per line, UTF-8,
//! terminated by `\n`.
//!
//! # Frame Format
//!
//! ```text
//! {"cmd":"LOGS_DATA","data":{"logs":[...]},"count":3}\n
//! {"status":"pong"}\n
//! ```
//!
//! Notifications arrive in arbitrarily sized chunks. A frame may span many
//! chunks and a chunk may carry many frames, so the decoder accumulates
//! bytes and only releases complete lines. Splitting happens on raw bytes,
//! so a multi-byte UTF-8 sequence cut by a chunk boundary is reassembled
//! before it is decoded.
//!
//! No frame size bound is enforced here.

use serde::Serialize;

use crate::error::SyncError;

/// Frame delimiter
pub const DELIMITER: u8 = b'\n';

/// Bytes of ATT overhead per write; payload per write is `mtu - ATT_HEADER_SIZE`
pub const ATT_HEADER_SIZE: usize = 3;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 512;

/// Encode a message to a newline-terminated JSON frame
///
/// # Errors
///
/// Returns `SyncError::ProtocolError` if JSON serialization fails.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, SyncError> {
    let mut buf =
        serde_json::to_vec(msg).map_err(|e| SyncError::ProtocolError(e.to_string()))?;
    buf.push(DELIMITER);
    Ok(buf)
}

/// Split an encoded frame into transport-sized writes
///
/// An MTU at or below the ATT header size still yields one byte per write.
pub fn write_chunks(frame: &[u8], mtu: u16) -> impl Iterator<Item = &[u8]> {
    let payload = usize::from(mtu).saturating_sub(ATT_HEADER_SIZE).max(1);
    frame.chunks(payload)
}

/// Decoder for streaming line frames
///
/// Buffers incoming bytes and yields complete, non-empty, trimmed lines.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
        }
    }

    /// Append a chunk and return every line it completed, in order
    ///
    /// The bytes after the last delimiter (possibly none) stay buffered.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        // The retained tail never contains a delimiter, so only the new
        // bytes need scanning.
        let mut scan = self.buffer.len();
        self.buffer.extend_from_slice(data);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[scan..].iter().position(|&b| b == DELIMITER) {
            let end = scan + offset;
            if let Some(line) = complete_line(&self.buffer[start..end]) {
                lines.push(line);
            }
            start = end + 1;
            scan = start;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        lines
    }

    /// The buffered partial frame
    #[must_use]
    pub fn pending(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// Number of buffered bytes
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

fn complete_line(raw: &[u8]) -> Option<String> {
    match std::str::from_utf8(raw) {
        Ok(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, len = raw.len(), "Dropping frame that is not valid UTF-8");
            tracing::debug!(frame = %hex::encode(raw), "Undecodable frame");
            None
        }
    }
}
