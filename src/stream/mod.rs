//! The secure stream orchestrator.
//!
//! [`SecureStream`] owns a [`HandshakeEngine`], a [`FrameBuffer`] and the two
//! halves of a transport. All methods take `&self`: one read and one write
//! may run at the same time, each side guarded by its own
//! [`OperationSlot`]. A second concurrent read (or write) fails fast with
//! [`StreamError::NestedCall`].
//!
//! # Locking
//!
//! - read-side data and write-side data each live behind a `tokio` mutex,
//!   taken after the matching slot has been claimed;
//! - when both are needed (handshake, renegotiation), the read side is
//!   always locked first;
//! - the engine sits behind a `std` mutex held only for a single engine
//!   call, never across a suspension point.
//!
//! # Execution
//!
//! Every operation is one `async` algorithm. With [`Suspending`] transports
//! it yields to the runtime; with [`Blocking`] transports it runs to
//! completion on the calling thread (see the `*_blocking` methods).

mod blocking;
mod handshake;
mod read;
mod write;

use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use bytes::BytesMut;
use futures::FutureExt;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::engine::{EngineError, HandshakeEngine, Role, SessionInfo};
use crate::error::{Operation, Result, StreamError};
use crate::guard::OperationSlot;
use crate::options::{CredentialSelector, PeerValidator};
use crate::protocol::FrameBuffer;
use crate::state::ConnectionState;
use crate::transport::{Blocking, Suspending, TransportRead, TransportWrite};

/// A stream over a tokio I/O object split into halves.
pub type AsyncSecureStream<E, T> =
    SecureStream<E, Suspending<ReadHalf<T>>, Suspending<WriteHalf<T>>>;

/// A stream over blocking `std::io` halves.
pub type BlockingSecureStream<E, R, W> = SecureStream<E, Blocking<R>, Blocking<W>>;

struct ReadSide<R> {
    transport: R,
    buffer: FrameBuffer,
    /// The peer's close notification has been received.
    close_received: bool,
}

struct WriteSide<W> {
    transport: W,
    /// Reused output buffer for one encrypted frame.
    scratch: BytesMut,
}

/// Callbacks and flags captured from the options of the first handshake.
struct Policy {
    allow_renegotiation: bool,
    validator: Option<Arc<dyn PeerValidator>>,
    selector: Option<Arc<dyn CredentialSelector>>,
}

/// Snapshot of the negotiated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub role: Role,
    pub mutually_authenticated: bool,
    #[serde(flatten)]
    pub session: SessionInfo,
}

/// Authenticated, encrypted duplex stream over a transport.
pub struct SecureStream<E, R, W> {
    engine: Mutex<E>,
    reader: tokio::sync::Mutex<ReadSide<R>>,
    writer: tokio::sync::Mutex<WriteSide<W>>,
    read_slot: OperationSlot,
    write_slot: OperationSlot,
    state: ConnectionState,
    role: OnceLock<Role>,
    policy: OnceLock<Policy>,
    config: StreamConfig,
}

impl<E, R, W> SecureStream<E, R, W>
where
    E: HandshakeEngine,
    R: TransportRead,
    W: TransportWrite,
{
    /// Wrap transport halves with the default configuration.
    pub fn new(engine: E, reader: R, writer: W) -> Self {
        Self::build(engine, reader, writer, StreamConfig::default())
    }

    /// Wrap transport halves with `config`, rejecting an invalid one.
    pub fn with_config(engine: E, reader: R, writer: W, config: StreamConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(engine, reader, writer, config))
    }

    fn build(engine: E, reader: R, writer: W, config: StreamConfig) -> Self {
        Self {
            engine: Mutex::new(engine),
            reader: tokio::sync::Mutex::new(ReadSide {
                transport: reader,
                buffer: FrameBuffer::with_initial_size(config.initial_buffer_size),
                close_received: false,
            }),
            writer: tokio::sync::Mutex::new(WriteSide {
                transport: writer,
                scratch: BytesMut::new(),
            }),
            read_slot: OperationSlot::new(),
            write_slot: OperationSlot::new(),
            state: ConnectionState::new(),
            role: OnceLock::new(),
            policy: OnceLock::new(),
            config,
        }
    }

    /// The configuration the stream was built with.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Whether a handshake has completed. Stays true after shutdown.
    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    /// Whether the stream authenticated as the responder.
    pub fn is_server(&self) -> bool {
        self.role.get() == Some(&Role::Server)
    }

    /// The close notification has been sent.
    pub fn is_shutdown_sent(&self) -> bool {
        self.state.is_shutdown_sent()
    }

    /// Both sides presented a certificate.
    pub fn is_mutually_authenticated(&self) -> bool {
        self.is_authenticated()
            && self
                .session()
                .map(|s| s.peer_certificate.is_some() && s.local_certificate.is_some())
                .unwrap_or(false)
    }

    /// Negotiated parameters of the current session.
    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        self.state.check()?;
        if !self.is_authenticated() {
            return Err(StreamError::NotAuthenticated);
        }
        let session = self.session().ok_or(StreamError::NotAuthenticated)?;
        let role = self.role.get().copied().ok_or(StreamError::NotAuthenticated)?;
        Ok(ConnectionInfo {
            role,
            mutually_authenticated: session.peer_certificate.is_some()
                && session.local_certificate.is_some(),
            session,
        })
    }

    /// Dispose of the stream.
    ///
    /// Wakes every suspended operation with [`StreamError::Disposed`] first.
    /// Then, if nothing else is writing, makes one attempt to send the close
    /// notification and shuts the transport's write half down unless
    /// `leave_inner_open` is set. Neither step waits on a transport that is
    /// not ready, and their errors are ignored. Closing twice is a no-op.
    pub async fn close(&self) {
        if self.state.is_disposed() {
            return;
        }

        let slot = self.write_slot.try_claim(Operation::Write).ok();
        let mut writer = slot.as_ref().and_then(|_| self.writer.try_lock().ok());
        let token = match writer {
            Some(_)
                if self.state.check().is_ok()
                    && self.is_authenticated()
                    && !self.is_shutdown_sent() =>
            {
                self.with_engine(|e| e.create_shutdown_token()).ok()
            }
            _ => None,
        };

        if self.state.dispose() {
            tracing::debug!("stream disposed");
        }

        if let Some(ws) = writer.as_mut() {
            if let Some(token) = token {
                self.state.mark_shutdown_sent();
                match ws.transport.write_all(&token).now_or_never() {
                    Some(Ok(())) => {
                        let _ = ws.transport.flush().now_or_never();
                        tracing::debug!("shutdown sent on close");
                    }
                    Some(Err(e)) => tracing::debug!(error = %e, "shutdown on close failed"),
                    None => tracing::debug!("transport not ready, shutdown dropped on close"),
                }
            }
            if !self.config.leave_inner_open {
                let _ = ws.transport.shutdown().now_or_never();
            }
            ws.scratch = BytesMut::new();
        }
        drop(writer);
        drop(slot);

        if let Ok(mut rs) = self.reader.try_lock() {
            rs.buffer.clear();
        }
    }

    /// Take the transport halves back.
    ///
    /// Buffered but unread bytes are lost.
    pub fn into_inner(self) -> (R, W) {
        let (_, reader, writer) = self.into_parts();
        (reader, writer)
    }

    /// Take the engine and the transport halves back.
    pub fn into_parts(self) -> (E, R, W) {
        let engine = self
            .engine
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let reader = self.reader.into_inner();
        let writer = self.writer.into_inner();
        (engine, reader.transport, writer.transport)
    }

    fn session(&self) -> Option<SessionInfo> {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .session()
    }

    fn with_engine<T>(
        &self,
        f: impl FnOnce(&mut E) -> std::result::Result<T, EngineError>,
    ) -> Result<T> {
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *engine).map_err(StreamError::from)
    }

    fn policy(&self) -> Result<&Policy> {
        self.policy.get().ok_or(StreamError::NotAuthenticated)
    }

    /// Await `op` at a suspension point.
    ///
    /// Disposal wins over cancellation, which wins over completion. Disposal
    /// is checked again once `op` finishes so no result escapes a disposed
    /// stream.
    async fn suspend<F: Future>(
        &self,
        op: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<F::Output> {
        let disposed = self.state.disposal_token();
        let output = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = disposed.cancelled() => return Err(StreamError::Disposed),
                _ = token.cancelled() => return Err(StreamError::Cancelled),
                output = op => output,
            },
            None => tokio::select! {
                biased;
                _ = disposed.cancelled() => return Err(StreamError::Disposed),
                output = op => output,
            },
        };
        if self.state.is_disposed() {
            return Err(StreamError::Disposed);
        }
        Ok(output)
    }

    /// Write one token and flush it.
    async fn send(
        &self,
        ws: &mut WriteSide<W>,
        token: &[u8],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.suspend(ws.transport.write_all(token), cancel).await??;
        self.suspend(ws.transport.flush(), cancel).await??;
        Ok(())
    }

    /// Read once from the transport into the encrypted zone.
    async fn fill(&self, rs: &mut ReadSide<R>, cancel: Option<&CancellationToken>) -> Result<usize> {
        rs.buffer.ensure_available(self.config.read_chunk_size);
        let ReadSide {
            transport, buffer, ..
        } = &mut *rs;
        let n = self
            .suspend(transport.read(buffer.available_mut()), cancel)
            .await??;
        rs.buffer.commit(n)?;
        tracing::trace!(bytes = n, "transport read");
        Ok(n)
    }
}

impl<E, T> AsyncSecureStream<E, T>
where
    E: HandshakeEngine,
    T: AsyncRead + AsyncWrite + Send,
{
    /// Split `io` and wrap both halves.
    pub fn from_async(engine: E, io: T) -> Self {
        let (r, w) = tokio::io::split(io);
        Self::new(engine, Suspending::new(r), Suspending::new(w))
    }

    /// Split `io` and wrap both halves with `config`.
    pub fn from_async_with_config(engine: E, io: T, config: StreamConfig) -> Result<Self> {
        let (r, w) = tokio::io::split(io);
        Self::with_config(engine, Suspending::new(r), Suspending::new(w), config)
    }
}

impl<E, R, W> std::fmt::Debug for SecureStream<E, R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStream")
            .field("role", &self.role.get())
            .field("authenticated", &self.state.is_authenticated())
            .field("shutdown_sent", &self.state.is_shutdown_sent())
            .field("failure", &self.state.failure())
            .finish_non_exhaustive()
    }
}
