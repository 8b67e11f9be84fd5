//! Transport execution adapters.
//!
//! The stream's algorithm is written once as `async` code against
//! [`TransportRead`] and [`TransportWrite`]. Two adapters decide how a
//! transport call waits:
//!
//! - [`Blocking`] wraps `std::io::{Read, Write}`; its futures complete on
//!   first poll, so the whole operation runs on the calling thread.
//! - [`Suspending`] wraps tokio's `AsyncRead`/`AsyncWrite`; its futures yield
//!   to the scheduler until the transport is ready.
//!
//! # Example
//!
//! ```ignore
//! use secure_stream::transport::{Blocking, Suspending};
//!
//! let (r, w) = tokio::io::split(socket);
//! let (r, w) = (Suspending::new(r), Suspending::new(w));
//! ```

mod blocking;
mod suspending;

use std::future::Future;
use std::io;

pub use blocking::Blocking;
pub use suspending::Suspending;

/// Read half of a transport.
pub trait TransportRead: Send {
    /// Read into `buf`. `Ok(0)` means end of stream.
    fn read<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a;
}

/// Write half of a transport.
pub trait TransportWrite: Send {
    /// Write the whole of `buf`.
    fn write_all<'a>(
        &'a mut self,
        buf: &'a [u8],
    ) -> impl Future<Output = io::Result<()>> + Send + 'a;

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send + '_;

    /// Signal that nothing more will be written.
    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> + Send + '_;
}
