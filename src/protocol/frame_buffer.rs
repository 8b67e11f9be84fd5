//! Frame buffer holding both received ciphertext and decrypted plaintext.
//!
//! One contiguous region is split into three adjacent zones:
//!
//! ```text
//! start                                                   start + active
//!   │ decrypted │ padding │ encrypted-pending │ available ...
//!   └───────────┴─────────┴───────────────────┘
//! ```
//!
//! - `decrypted`: plaintext of the current frame not yet handed to the caller.
//! - `padding`: trailer of the current frame (MAC, padding) still physically present.
//! - `encrypted`: raw transport bytes, possibly several frames or a partial one.
//!
//! Frames are decrypted in place by the engine, so a frame moves from the
//! encrypted zone into the decrypted zone without copying.
//!
//! The storage is released when the buffer drains and lazily allocated again
//! on the next [`FrameBuffer::ensure_available`].

use bytes::BytesMut;

use crate::error::{Result, StreamError};

/// Default first allocation when the buffer becomes valid again.
pub const DEFAULT_INITIAL_SIZE: usize = 4096;

/// Growable receive buffer with decrypted/padding/encrypted zones.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Backing storage. Zero-filled to its full length while valid, empty when returned.
    storage: BytesMut,
    /// Offset of the first active byte.
    start: usize,
    /// Number of active bytes (all three zones).
    active: usize,
    /// Plaintext bytes at the front of the active region.
    decrypted_len: usize,
    /// Trailer bytes following the plaintext.
    decrypted_padding: usize,
    /// Allocation size used when the buffer is (re)created.
    initial_size: usize,
}

impl FrameBuffer {
    /// Create an unallocated buffer with the default initial size.
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_SIZE)
    }

    /// Create an unallocated buffer that allocates `initial_size` bytes on first use.
    pub fn with_initial_size(initial_size: usize) -> Self {
        Self {
            storage: BytesMut::new(),
            start: 0,
            active: 0,
            decrypted_len: 0,
            decrypted_padding: 0,
            initial_size: initial_size.max(1),
        }
    }

    /// Whether storage is currently allocated.
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.storage.is_empty()
    }

    /// Total allocated bytes (0 when returned).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes in all three zones.
    #[inline]
    pub fn active_len(&self) -> usize {
        self.active
    }

    /// Plaintext bytes not yet handed out.
    #[inline]
    pub fn decrypted_len(&self) -> usize {
        self.decrypted_len
    }

    /// Trailer bytes behind the plaintext.
    #[inline]
    pub fn decrypted_padding(&self) -> usize {
        self.decrypted_padding
    }

    /// Raw bytes not yet processed by the engine.
    #[inline]
    pub fn encrypted_len(&self) -> usize {
        self.active - self.decrypted_len - self.decrypted_padding
    }

    /// Free bytes after the active region.
    #[inline]
    pub fn available_len(&self) -> usize {
        self.storage.len() - self.start - self.active
    }

    /// Check if no bytes are buffered at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    /// Guarantee at least `n` free bytes after the active region.
    ///
    /// Compacts the active region to the front when that is enough, otherwise
    /// grows the storage. Buffered bytes are preserved either way.
    pub fn ensure_available(&mut self, n: usize) {
        if !self.is_valid() {
            self.storage = BytesMut::zeroed(self.initial_size.max(n));
            self.start = 0;
            return;
        }

        if self.available_len() >= n {
            return;
        }

        let total = self.storage.len();
        if total - self.active >= n {
            let end = self.start + self.active;
            self.storage.copy_within(self.start..end, 0);
            self.start = 0;
            return;
        }

        let new_len = (total * 2).max(self.active + n);
        let mut grown = BytesMut::zeroed(new_len);
        grown[..self.active].copy_from_slice(&self.storage[self.start..self.start + self.active]);
        tracing::trace!(from = total, to = new_len, "frame buffer grown");
        self.storage = grown;
        self.start = 0;
    }

    /// Writable region after the active bytes, for a transport read.
    #[inline]
    pub fn available_mut(&mut self) -> &mut [u8] {
        let end = self.start + self.active;
        &mut self.storage[end..]
    }

    /// Mark `n` freshly read bytes as part of the encrypted zone.
    pub fn commit(&mut self, n: usize) -> Result<()> {
        if n > self.available_len() {
            return Err(StreamError::Protocol(format!(
                "transport reported {} bytes read into {} available",
                n,
                self.available_len()
            )));
        }
        self.active += n;
        Ok(())
    }

    /// Plaintext ready for the caller.
    #[inline]
    pub fn decrypted(&self) -> &[u8] {
        &self.storage[self.start..self.start + self.decrypted_len]
    }

    /// Raw bytes not yet processed by the engine.
    #[inline]
    pub fn encrypted(&self) -> &[u8] {
        let from = self.start + self.decrypted_len + self.decrypted_padding;
        &self.storage[from..self.start + self.active]
    }

    /// Mutable view of the encrypted zone, for in-place decryption.
    #[inline]
    pub fn encrypted_mut(&mut self) -> &mut [u8] {
        let from = self.start + self.decrypted_len + self.decrypted_padding;
        let end = self.start + self.active;
        &mut self.storage[from..end]
    }

    /// Consume up to `n` plaintext bytes from the front of the decrypted zone.
    ///
    /// When the decrypted zone drains, the frame trailer is dropped as well
    /// and the buffer is ready for the next frame.
    pub fn discard_decrypted(&mut self, n: usize) {
        let n = n.min(self.decrypted_len);
        self.advance(n);
        self.decrypted_len -= n;

        if self.decrypted_len == 0 && self.decrypted_padding > 0 {
            let padding = self.decrypted_padding;
            self.decrypted_padding = 0;
            self.advance(padding);
        }
    }

    /// Consume `n` bytes from the encrypted zone (handshake tokens).
    ///
    /// Only valid while no decrypted frame is pending.
    pub fn discard_encrypted(&mut self, n: usize) -> Result<()> {
        debug_assert!(
            self.decrypted_len == 0 && self.decrypted_padding == 0,
            "discard_encrypted with a decrypted frame pending"
        );
        self.check_encrypted(n)?;
        self.advance(n);
        Ok(())
    }

    /// Consume `n` bytes from the encrypted zone, keeping any pending plaintext.
    ///
    /// The plaintext is moved up against the remaining encrypted bytes and the
    /// trailer of its frame is dropped.
    pub fn skip_encrypted(&mut self, n: usize) -> Result<()> {
        if self.decrypted_len == 0 && self.decrypted_padding == 0 {
            return self.discard_encrypted(n);
        }
        self.check_encrypted(n)?;

        let held = self.decrypted_len;
        let encrypted_at = self.start + held + self.decrypted_padding;
        self.relocate_decrypted(encrypted_at + n - held);
        self.decrypted_padding = 0;
        Ok(())
    }

    /// Record the engine's in-place decryption of the frame at the front of
    /// the encrypted zone.
    ///
    /// A frame without payload (control frame) is discarded entirely.
    pub fn on_decrypted(
        &mut self,
        payload_offset: usize,
        payload_length: usize,
        frame_size: usize,
    ) -> Result<()> {
        if self.decrypted_len != 0 || self.decrypted_padding != 0 {
            return Err(StreamError::InvalidState(
                "frame decrypted while previous frame still pending",
            ));
        }
        self.check_frame(payload_offset, payload_length, frame_size)?;

        if payload_length == 0 {
            self.advance(frame_size);
            return Ok(());
        }

        self.advance(payload_offset);
        self.decrypted_len = payload_length;
        self.decrypted_padding = frame_size - payload_offset - payload_length;
        Ok(())
    }

    /// Like [`on_decrypted`](Self::on_decrypted), but appends the payload to
    /// plaintext that is still pending instead of rejecting the frame.
    ///
    /// Used for application data that arrives in the middle of a handshake.
    pub fn append_decrypted(
        &mut self,
        payload_offset: usize,
        payload_length: usize,
        frame_size: usize,
    ) -> Result<()> {
        if self.decrypted_len == 0 && self.decrypted_padding == 0 {
            return self.on_decrypted(payload_offset, payload_length, frame_size);
        }
        self.check_frame(payload_offset, payload_length, frame_size)?;

        let held = self.decrypted_len;
        let payload_at = self.start + held + self.decrypted_padding + payload_offset;
        self.relocate_decrypted(payload_at - held);
        self.decrypted_len = held + payload_length;
        self.decrypted_padding = frame_size - payload_offset - payload_length;
        Ok(())
    }

    /// Copy plaintext into `dst` and consume it. Returns the bytes copied.
    pub fn take_decrypted(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.decrypted_len);
        dst[..n].copy_from_slice(&self.decrypted()[..n]);
        self.discard_decrypted(n);
        n
    }

    /// Consume a single plaintext byte.
    pub fn take_byte(&mut self) -> Option<u8> {
        if self.decrypted_len == 0 {
            return None;
        }
        let byte = self.storage[self.start];
        self.discard_decrypted(1);
        Some(byte)
    }

    /// Release the backing storage. The buffer must be empty.
    pub fn return_buffer(&mut self) {
        debug_assert!(self.active == 0, "returning a buffer with pending bytes");
        self.storage = BytesMut::new();
        self.start = 0;
        self.active = 0;
        self.decrypted_len = 0;
        self.decrypted_padding = 0;
    }

    /// Drop everything buffered and release the storage.
    pub fn clear(&mut self) {
        self.active = 0;
        self.return_buffer();
    }

    /// Return the storage if nothing is buffered. Returns whether it did.
    pub fn release_if_idle(&mut self) -> bool {
        if self.active == 0 && self.is_valid() {
            self.return_buffer();
            return true;
        }
        false
    }

    fn check_encrypted(&self, n: usize) -> Result<()> {
        if n > self.encrypted_len() {
            return Err(StreamError::Protocol(format!(
                "discard of {} bytes exceeds {} encrypted",
                n,
                self.encrypted_len()
            )));
        }
        Ok(())
    }

    fn check_frame(&self, payload_offset: usize, payload_length: usize, frame_size: usize) -> Result<()> {
        if payload_offset + payload_length > frame_size || frame_size > self.encrypted_len() {
            return Err(StreamError::Protocol(format!(
                "engine reported frame of {} bytes (payload {}+{}) with {} bytes buffered",
                frame_size,
                payload_offset,
                payload_length,
                self.encrypted_len()
            )));
        }
        Ok(())
    }

    /// Move the pending plaintext so it starts at `to`, dropping everything
    /// between its old end and `to + decrypted_len`.
    fn relocate_decrypted(&mut self, to: usize) {
        let held = self.decrypted_len;
        let end = self.start + self.active;
        self.storage.copy_within(self.start..self.start + held, to);
        self.start = to;
        self.active = end - to;
    }

    fn advance(&mut self, n: usize) {
        self.start += n;
        self.active -= n;
        if self.active == 0 {
            self.start = 0;
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
