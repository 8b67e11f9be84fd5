//! Stream tunables.
//!
//! [`StreamConfig`] can be built in code or deserialized from JSON; any
//! field left out takes its default.
//!
//! ```
//! use secure_stream::StreamConfig;
//!
//! let config = StreamConfig::from_json(r#"{ "max_frame_payload": 4096 }"#).unwrap();
//! assert_eq!(config.max_frame_payload, 4096);
//! assert_eq!(config.read_chunk_size, secure_stream::config::DEFAULT_READ_CHUNK_SIZE);
//! ```

use serde::Deserialize;

use crate::error::{Result, StreamError};
use crate::protocol::DEFAULT_INITIAL_SIZE;

/// Default plaintext bytes per outgoing frame (16 KiB).
pub const DEFAULT_MAX_FRAME_PAYLOAD: usize = 16 * 1024;

/// Default bytes requested per transport read: one full frame plus overhead.
pub const DEFAULT_READ_CHUNK_SIZE: usize = DEFAULT_MAX_FRAME_PAYLOAD + 64;

/// Configuration for a [`SecureStream`](crate::SecureStream).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Plaintext bytes carried by each outgoing frame.
    pub max_frame_payload: usize,
    /// Free space requested from the frame buffer before each transport read.
    pub read_chunk_size: usize,
    /// First allocation of the frame buffer.
    pub initial_buffer_size: usize,
    /// When false, `close` also shuts down the transport's write half.
    pub leave_inner_open: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            initial_buffer_size: DEFAULT_INITIAL_SIZE,
            leave_inner_open: false,
        }
    }
}

impl StreamConfig {
    /// Same as [`StreamConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StreamConfig = serde_json::from_str(json).map_err(|e| {
            tracing::warn!(error = %e, "rejected stream config");
            StreamError::InvalidState("stream config is not valid JSON")
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set the largest plaintext carried by one frame.
    pub fn max_frame_payload(mut self, bytes: usize) -> Self {
        self.max_frame_payload = bytes;
        self
    }

    /// Set the free space guaranteed before each transport read.
    pub fn read_chunk_size(mut self, bytes: usize) -> Self {
        self.read_chunk_size = bytes;
        self
    }

    /// Set the first allocation of the receive buffer.
    pub fn initial_buffer_size(mut self, bytes: usize) -> Self {
        self.initial_buffer_size = bytes;
        self
    }

    /// Keep the transport open when the stream is closed.
    pub fn leave_inner_open(mut self, leave_open: bool) -> Self {
        self.leave_inner_open = leave_open;
        self
    }

    /// Reject values the stream cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_payload == 0 {
            return Err(StreamError::InvalidState("max_frame_payload must be non-zero"));
        }
        if self.read_chunk_size == 0 {
            return Err(StreamError::InvalidState("read_chunk_size must be non-zero"));
        }
        if self.initial_buffer_size == 0 {
            return Err(StreamError::InvalidState("initial_buffer_size must be non-zero"));
        }
        Ok(())
    }
}
