//! Suspending adapter over tokio's async I/O traits.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{TransportRead, TransportWrite};

/// Yields to the scheduler while the transport is not ready.
#[derive(Debug)]
pub struct Suspending<T>(T);

impl<T> Suspending<T> {
    /// Wrap a tokio I/O half.
    pub fn new(inner: T) -> Self {
        Self(inner)
    }

    /// The wrapped I/O object.
    pub fn get_ref(&self) -> &T {
        &self.0
    }

    /// Unwrap the I/O object.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: AsyncRead + Unpin + Send> TransportRead for Suspending<T> {
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a {
        self.0.read(buf)
    }
}

impl<T: AsyncWrite + Unpin + Send> TransportWrite for Suspending<T> {
    fn write_all<'a>(
        &'a mut self,
        buf: &'a [u8],
    ) -> impl Future<Output = io::Result<()>> + Send + 'a {
        self.0.write_all(buf)
    }

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send + '_ {
        self.0.flush()
    }

    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> + Send + '_ {
        self.0.shutdown()
    }
}
