//! Byte framing for envelopes.
//!
//! Envelopes travel as JSON documents. The codec enforces a maximum frame size
//! in both directions so that an oversized message is rejected before it is
//! parsed.

use crate::envelope::Envelope;
use crate::WireError;
use bytes::Bytes;
use serde_json::Value;
use tracing::trace;

/// Maximum encoded envelope size (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// JSON frame codec with a size limit
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec with the default size limit
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Configured size limit
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode an envelope to a contiguous buffer
    pub fn encode(&self, envelope: &Envelope) -> Result<Bytes, WireError> {
        let buf = serde_json::to_vec(envelope)?;
        if buf.len() > self.max_frame_size {
            return Err(WireError::Size(buf.len()));
        }
        trace!(
            "Encoded {} #{} ({} bytes)",
            envelope.kind,
            envelope.sequence,
            buf.len()
        );
        Ok(Bytes::from(buf))
    }

    /// Decode a frame into a JSON value.
    ///
    /// The value may or may not be an envelope; legacy unframed messages are
    /// valid JSON too and are left for the router to classify.
    pub fn decode(&self, buf: &[u8]) -> Result<Value, WireError> {
        if buf.len() > self.max_frame_size {
            return Err(WireError::Size(buf.len()));
        }
        Ok(serde_json::from_slice(buf)?)
    }

    /// Decode a frame that must be an envelope
    pub fn decode_envelope(&self, buf: &[u8]) -> Result<Envelope, WireError> {
        Envelope::from_value(self.decode(buf)?)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}
