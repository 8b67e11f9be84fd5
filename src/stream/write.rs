//! Authenticated write path and shutdown.

use super::SecureStream;
use crate::engine::HandshakeEngine;
use crate::error::{Operation, Result, StreamError};
use crate::transport::{TransportRead, TransportWrite};

impl<E, R, W> SecureStream<E, R, W>
where
    E: HandshakeEngine,
    R: TransportRead,
    W: TransportWrite,
{
    /// Encrypt and send all of `buf`.
    ///
    /// The data is split into frames of at most `max_frame_payload` bytes.
    /// Each frame is written before the next is encrypted. On error, frames
    /// already written stay sent.
    pub async fn write(&self, buf: &[u8]) -> Result<()> {
        self.state.check()?;
        if !self.state.is_authenticated() {
            return Err(StreamError::NotAuthenticated);
        }
        let _slot = self.write_slot.try_claim(Operation::Write)?;
        if self.state.is_shutdown_sent() {
            return Err(StreamError::InvalidState("write after shutdown"));
        }
        if buf.is_empty() {
            return Ok(());
        }

        let armed = self.state.arm();
        let result = self.write_frames(buf).await;
        armed.disarm();
        self.state.settle(result)
    }

    async fn write_frames(&self, buf: &[u8]) -> Result<()> {
        let mut ws = self.suspend(self.writer.lock(), None).await?;
        let ws = &mut *ws;

        for chunk in buf.chunks(self.config.max_frame_payload) {
            ws.scratch.clear();
            self.with_engine(|e| e.encrypt_frame(chunk, &mut ws.scratch))?;
            self.suspend(ws.transport.write_all(&ws.scratch), None)
                .await??;
        }
        self.suspend(ws.transport.flush(), None).await??;

        tracing::trace!(bytes = buf.len(), "write completed");
        Ok(())
    }

    /// Flush the transport.
    pub async fn flush(&self) -> Result<()> {
        self.state.check()?;
        let _slot = self.write_slot.try_claim(Operation::Write)?;

        let armed = self.state.arm();
        let result = async {
            let mut ws = self.suspend(self.writer.lock(), None).await?;
            self.suspend(ws.transport.flush(), None).await??;
            Ok::<_, StreamError>(())
        }
        .await;
        armed.disarm();
        self.state.settle(result)
    }

    /// Send the close notification. Later writes fail with `InvalidState`.
    ///
    /// Reads keep working until the peer closes its side. Calling this again
    /// after it succeeded does nothing.
    pub async fn shutdown(&self) -> Result<()> {
        self.state.check()?;
        if !self.state.is_authenticated() {
            return Err(StreamError::NotAuthenticated);
        }
        let _slot = self.write_slot.try_claim(Operation::Write)?;
        if self.state.is_shutdown_sent() {
            return Ok(());
        }

        let armed = self.state.arm();
        let result = async {
            let mut ws = self.suspend(self.writer.lock(), None).await?;
            let token = self.with_engine(|e| e.create_shutdown_token())?;
            self.state.mark_shutdown_sent();
            self.send(&mut ws, &token, None).await
        }
        .await;
        armed.disarm();

        self.state.settle(result)?;
        tracing::debug!("shutdown sent");
        Ok(())
    }
}
