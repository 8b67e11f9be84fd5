//! Authenticated read path.

use super::{ReadSide, SecureStream};
use crate::engine::{DecryptOutcome, FrameKind, HandshakeEngine};
use crate::error::{Operation, Result, StreamError};
use crate::transport::{TransportRead, TransportWrite};

impl<E, R, W> SecureStream<E, R, W>
where
    E: HandshakeEngine,
    R: TransportRead,
    W: TransportWrite,
{
    /// Read decrypted bytes into `buf`.
    ///
    /// Returns as soon as any plaintext is available. `Ok(0)` means the peer
    /// closed the stream (close notification or end of transport on a frame
    /// boundary). Control frames, including renegotiation requests, are
    /// handled here without returning to the caller.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.state.check()?;
        if !self.state.is_authenticated() {
            return Err(StreamError::NotAuthenticated);
        }
        let _slot = self.read_slot.try_claim(Operation::Read)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut rs = self.reader.lock().await;
        let armed = self.state.arm();
        let result = self.read_frames(&mut rs, buf).await;
        armed.disarm();

        if self.state.is_disposed() {
            rs.buffer.clear();
        }
        self.state.settle(result)
    }

    /// Read one decrypted byte. `Ok(None)` at end of stream.
    pub async fn read_byte(&self) -> Result<Option<u8>> {
        self.state.check()?;
        if !self.state.is_authenticated() {
            return Err(StreamError::NotAuthenticated);
        }
        let _slot = self.read_slot.try_claim(Operation::Read)?;

        let mut rs = self.reader.lock().await;
        if let Some(byte) = rs.buffer.take_byte() {
            rs.buffer.release_if_idle();
            return Ok(Some(byte));
        }

        let mut one = [0u8; 1];
        let armed = self.state.arm();
        let result = self.read_frames(&mut rs, &mut one).await;
        armed.disarm();

        if self.state.is_disposed() {
            rs.buffer.clear();
        }
        let n = self.state.settle(result)?;
        Ok((n == 1).then_some(one[0]))
    }

    async fn read_frames(&self, rs: &mut ReadSide<R>, buf: &mut [u8]) -> Result<usize> {
        loop {
            if rs.buffer.decrypted_len() > 0 {
                let n = rs.buffer.take_decrypted(buf);
                rs.buffer.release_if_idle();
                return Ok(n);
            }
            if rs.close_received {
                rs.buffer.release_if_idle();
                return Ok(0);
            }

            match self.decrypt_next(rs)? {
                Some(FrameKind::RenegotiationRequest) => {
                    self.accept_renegotiation(rs).await?;
                    continue;
                }
                Some(_) => continue,
                None => {}
            }

            let pending = rs.buffer.encrypted_len();
            if self.fill(rs, None).await? == 0 {
                if pending > 0 {
                    return Err(StreamError::Protocol(format!(
                        "transport closed inside a frame ({pending} bytes pending)"
                    )));
                }
                rs.buffer.release_if_idle();
                return Ok(0);
            }
        }
    }

    /// Decrypt the frame at the front of the encrypted zone, if complete.
    fn decrypt_next(&self, rs: &mut ReadSide<R>) -> Result<Option<FrameKind>> {
        if rs.buffer.encrypted_len() == 0 {
            return Ok(None);
        }

        let frame = match self.with_engine(|e| e.decrypt_frame(rs.buffer.encrypted_mut()))? {
            DecryptOutcome::Incomplete => return Ok(None),
            DecryptOutcome::Decoded(frame) => frame,
        };
        rs.buffer
            .on_decrypted(frame.payload_offset, frame.payload_length, frame.frame_size)?;

        match frame.kind {
            FrameKind::CloseNotify => {
                tracing::debug!("close notification received");
                rs.close_received = true;
            }
            FrameKind::ApplicationData => {
                tracing::trace!(bytes = frame.payload_length, "frame decrypted");
            }
            FrameKind::RenegotiationRequest | FrameKind::Control => {}
        }
        Ok(Some(frame.kind))
    }
}
