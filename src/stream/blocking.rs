//! Blocking façade.
//!
//! With [`Blocking`] transports every suspension point completes on first
//! poll, so driving the async core with `block_on` runs it entirely on the
//! calling thread. Callbacks (validator, credential selector) are polled the
//! same way and must not depend on a tokio runtime.

use std::io::{self, Read, Write};

use futures::executor::block_on;
use tokio_util::sync::CancellationToken;

use super::{BlockingSecureStream, SecureStream};
use crate::config::StreamConfig;
use crate::engine::HandshakeEngine;
use crate::error::Result;
use crate::options::{ClientOptions, ServerOptions};
use crate::transport::Blocking;

impl<E, R, W> BlockingSecureStream<E, R, W>
where
    E: HandshakeEngine,
    R: Read + Send,
    W: Write + Send,
{
    /// Wrap blocking transport halves, e.g. a socket and its `try_clone`.
    pub fn from_blocking(engine: E, reader: R, writer: W) -> Self {
        SecureStream::new(engine, Blocking::new(reader), Blocking::new(writer))
    }

    /// Wrap blocking halves with `config`, rejecting an invalid one.
    pub fn from_blocking_with_config(
        engine: E,
        reader: R,
        writer: W,
        config: StreamConfig,
    ) -> Result<Self> {
        SecureStream::with_config(engine, Blocking::new(reader), Blocking::new(writer), config)
    }

    /// Blocking [`authenticate_as_client`](Self::authenticate_as_client).
    pub fn authenticate_as_client_blocking(&self, options: ClientOptions) -> Result<()> {
        block_on(self.authenticate_as_client(options))
    }

    /// Blocking [`authenticate_as_server`](Self::authenticate_as_server).
    pub fn authenticate_as_server_blocking(&self, options: ServerOptions) -> Result<()> {
        block_on(self.authenticate_as_server(options))
    }

    /// Blocking [`read`](Self::read).
    pub fn read_blocking(&self, buf: &mut [u8]) -> Result<usize> {
        block_on(self.read(buf))
    }

    /// Blocking [`read_byte`](Self::read_byte).
    pub fn read_byte_blocking(&self) -> Result<Option<u8>> {
        block_on(self.read_byte())
    }

    /// Blocking [`write`](Self::write).
    pub fn write_blocking(&self, buf: &[u8]) -> Result<()> {
        block_on(self.write(buf))
    }

    /// Blocking [`flush`](Self::flush).
    pub fn flush_blocking(&self) -> Result<()> {
        block_on(self.flush())
    }

    /// Blocking [`shutdown`](Self::shutdown).
    pub fn shutdown_blocking(&self) -> Result<()> {
        block_on(self.shutdown())
    }

    /// Blocking [`renegotiate`](Self::renegotiate).
    pub fn renegotiate_blocking(&self) -> Result<()> {
        block_on(self.renegotiate_with_cancel(&CancellationToken::new()))
    }

    /// Blocking [`close`](Self::close).
    ///
    /// A `std::io::Write` cannot report "not ready", so the close
    /// notification write can still block on a full socket. Set a write
    /// timeout on the socket to bound it.
    pub fn close_blocking(&self) {
        block_on(self.close())
    }
}

impl<E, R, W> Read for &BlockingSecureStream<E, R, W>
where
    E: HandshakeEngine,
    R: Read + Send,
    W: Write + Send,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_blocking(buf)?)
    }
}

impl<E, R, W> Write for &BlockingSecureStream<E, R, W>
where
    E: HandshakeEngine,
    R: Read + Send,
    W: Write + Send,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_blocking(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.flush_blocking()?)
    }
}

impl<E, R, W> Read for BlockingSecureStream<E, R, W>
where
    E: HandshakeEngine,
    R: Read + Send,
    W: Write + Send,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        <&Self as Read>::read(&mut &*self, buf)
    }
}

impl<E, R, W> Write for BlockingSecureStream<E, R, W>
where
    E: HandshakeEngine,
    R: Read + Send,
    W: Write + Send,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        <&Self as Write>::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        <&Self as Write>::flush(&mut &*self)
    }
}
