//! Blocking adapter over `std::io`.

use std::future::Future;
use std::io::{self, Read, Write};

use super::{TransportRead, TransportWrite};

/// Runs transport calls to completion on the calling thread.
///
/// The returned futures never return `Pending`.
#[derive(Debug)]
pub struct Blocking<T>(T);

impl<T> Blocking<T> {
    /// Wrap a `std::io` object.
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

impl<T: Read + Send> TransportRead for Blocking<T> {
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a {
        async move {
            loop {
                match self.0.read(buf) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    other => return other,
                }
            }
        }
    }
}

impl<T: Write + Send> TransportWrite for Blocking<T> {
    fn write_all<'a>(
        &'a mut self,
        buf: &'a [u8],
    ) -> impl Future<Output = io::Result<()>> + Send + 'a {
        async move { self.0.write_all(buf) }
    }

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send + '_ {
        async move { self.0.flush() }
    }

    // std::io::Write has no half-close; flushing is all that can be done.
    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> + Send + '_ {
        async move { self.0.flush() }
    }
}
