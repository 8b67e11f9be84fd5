//! Handshake, renegotiation and the loop they share.

use tokio_util::sync::CancellationToken;

use super::{Policy, ReadSide, SecureStream, WriteSide};
use crate::engine::{
    DecryptOutcome, EngineError, FrameKind, HandshakeEngine, HandshakeParams, HandshakeStatus, Role,
};
use crate::error::{Operation, Result, StreamError};
use crate::guard::claim_both;
use crate::options::{ClientOptions, ServerOptions};
use crate::transport::{TransportRead, TransportWrite};

impl<E, R, W> SecureStream<E, R, W>
where
    E: HandshakeEngine,
    R: TransportRead,
    W: TransportWrite,
{
    /// Run the handshake as initiator.
    pub async fn authenticate_as_client(&self, options: ClientOptions) -> Result<()> {
        self.authenticate_as_client_with_cancel(options, &CancellationToken::new())
            .await
    }

    /// Run the handshake as initiator, giving up when `cancel` fires.
    ///
    /// Cancellation leaves the stream faulted.
    pub async fn authenticate_as_client_with_cancel(
        &self,
        options: ClientOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let params = options.handshake_params();
        let policy = Policy {
            allow_renegotiation: options.allow_renegotiation,
            validator: options.validator,
            selector: None,
        };
        self.authenticate(Role::Client, params, policy, cancel).await
    }

    /// Run the handshake as responder.
    pub async fn authenticate_as_server(&self, options: ServerOptions) -> Result<()> {
        self.authenticate_as_server_with_cancel(options, &CancellationToken::new())
            .await
    }

    /// Run the handshake as responder, giving up when `cancel` fires.
    pub async fn authenticate_as_server_with_cancel(
        &self,
        options: ServerOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let params = options.handshake_params();
        let policy = Policy {
            allow_renegotiation: options.allow_renegotiation,
            selector: options.selector(),
            validator: options.validator,
        };
        self.authenticate(Role::Server, params, policy, cancel).await
    }

    async fn authenticate(
        &self,
        role: Role,
        params: HandshakeParams,
        policy: Policy,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.state.check()?;
        if self.state.is_authenticated() {
            return Err(StreamError::InvalidState("stream is already authenticated"));
        }
        let (_read, _write) = claim_both(&self.read_slot, &self.write_slot, Operation::Authenticate)?;

        let mut rs = self.reader.lock().await;
        let mut ws = self.writer.lock().await;
        let _ = self.role.set(role);
        let _ = self.policy.set(policy);

        tracing::debug!(?role, "handshake started");
        let armed = self.state.arm();
        let result = async {
            self.with_engine(|e| e.start(role, params))?;
            self.drive_handshake(&mut rs, &mut ws, Some(cancel)).await
        }
        .await;
        armed.disarm();

        self.finish_handshake(result)?;
        self.state.mark_authenticated();
        rs.buffer.release_if_idle();
        tracing::debug!(?role, "handshake completed");
        Ok(())
    }

    /// Ask the peer for a fresh handshake on an authenticated session.
    ///
    /// Only valid while no peer certificate is present and nothing unread is
    /// buffered. Both slots are held for the duration.
    pub async fn renegotiate(&self) -> Result<()> {
        self.renegotiate_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`renegotiate`](Self::renegotiate), giving up when `cancel` fires.
    pub async fn renegotiate_with_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        self.state.check()?;
        if !self.state.is_authenticated() {
            return Err(StreamError::NotAuthenticated);
        }
        let (_read, _write) = claim_both(&self.read_slot, &self.write_slot, Operation::Renegotiate)?;

        if self.session().is_some_and(|s| s.peer_certificate.is_some()) {
            return Err(StreamError::InvalidState("peer certificate already present"));
        }

        let mut rs = self.reader.lock().await;
        if !rs.buffer.is_empty() || rs.close_received {
            return Err(StreamError::InvalidState(
                "cannot renegotiate with unread data buffered",
            ));
        }
        let mut ws = self.writer.lock().await;

        let armed = self.state.arm();
        let result = async {
            let token = self.with_engine(|e| e.begin_renegotiation())?;
            tracing::debug!("renegotiation requested");
            self.send(&mut ws, &token, Some(cancel)).await?;
            self.drive_handshake(&mut rs, &mut ws, Some(cancel)).await
        }
        .await;
        armed.disarm();

        self.finish_handshake(result)?;
        rs.buffer.release_if_idle();
        tracing::debug!("renegotiation completed");
        Ok(())
    }

    /// Answer a renegotiation request the peer sent mid-read.
    ///
    /// The caller holds the read side; the write side is taken here once
    /// any in-flight write has finished.
    pub(super) async fn accept_renegotiation(&self, rs: &mut ReadSide<R>) -> Result<()> {
        if !self.policy()?.allow_renegotiation {
            return Err(StreamError::Protocol(
                "peer requested renegotiation, which is not allowed".into(),
            ));
        }
        tracing::debug!("peer requested renegotiation");

        let mut ws = self.suspend(self.writer.lock(), None).await?;
        let result = self.drive_handshake(rs, &mut ws, None).await;
        self.finish_handshake(result)?;
        tracing::debug!("renegotiation completed");
        Ok(())
    }

    /// Every handshake failure except disposal faults the stream.
    fn finish_handshake(&self, result: Result<()>) -> Result<()> {
        if let Err(err) = &result {
            if !matches!(err, StreamError::Disposed) {
                self.state.record_fault(err);
            }
        }
        result
    }

    /// Decrypt a frame the peer sent before it joined the handshake and keep
    /// its payload for the next read.
    fn hold_interleaved_frame(&self, rs: &mut ReadSide<R>) -> Result<()> {
        let frame = match self.with_engine(|e| e.decrypt_frame(rs.buffer.encrypted_mut()))? {
            DecryptOutcome::Decoded(frame) => frame,
            DecryptOutcome::Incomplete => {
                return Err(StreamError::Protocol(
                    "engine deferred a frame it could not decrypt".into(),
                ))
            }
        };

        match frame.kind {
            FrameKind::ApplicationData => {
                tracing::debug!(bytes = frame.payload_length, "application data held during handshake");
            }
            FrameKind::CloseNotify => {
                tracing::debug!("close notification received during handshake");
                rs.close_received = true;
            }
            FrameKind::Control => {}
            FrameKind::RenegotiationRequest => {
                return Err(StreamError::Protocol(
                    "renegotiation request during a handshake".into(),
                ))
            }
        }
        rs.buffer
            .append_decrypted(frame.payload_offset, frame.payload_length, frame.frame_size)
    }

    /// Feed buffered input to the engine until it reports completion.
    ///
    /// Tokens are written as soon as the engine produces them; input is read
    /// only when the engine asks for more.
    async fn drive_handshake(
        &self,
        rs: &mut ReadSide<R>,
        ws: &mut WriteSide<W>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        loop {
            let progress = self.with_engine(|e| e.process_handshake(rs.buffer.encrypted()))?;
            if progress.consumed > 0 {
                rs.buffer.skip_encrypted(progress.consumed)?;
            }
            if let Some(token) = progress.output {
                self.send(ws, &token, cancel).await?;
            }

            match progress.status {
                HandshakeStatus::NeedMoreInput => {
                    if self.fill(rs, cancel).await? == 0 {
                        return Err(StreamError::Protocol(
                            "transport closed during handshake".into(),
                        ));
                    }
                }
                HandshakeStatus::Continue => {}
                HandshakeStatus::DecryptFrame => self.hold_interleaved_frame(rs)?,
                HandshakeStatus::SelectCredentials(hello) => {
                    let selector = self
                        .policy()?
                        .selector
                        .clone()
                        .ok_or(StreamError::Engine(EngineError::MissingCredentials))?;
                    tracing::debug!(server_name = ?hello.server_name, "selecting credentials");
                    let credentials = self.suspend(selector.select(&hello), cancel).await??;
                    self.with_engine(|e| e.provide_credentials(credentials))?;
                }
                HandshakeStatus::ValidatePeer(peer) => {
                    let accepted = match self.policy()?.validator.clone() {
                        Some(validator) => self.suspend(validator.validate(&peer), cancel).await?,
                        None => true,
                    };
                    tracing::debug!(accepted, chain = peer.chain.len(), "peer certificate checked");
                    self.with_engine(|e| e.resolve_validation(accepted))?;
                }
                HandshakeStatus::Complete => return Ok(()),
            }
        }
    }
}
