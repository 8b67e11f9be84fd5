//! # secure-stream
//!
//! An authenticated, encrypted duplex stream over any byte transport.
//!
//! The crate is the orchestration and buffering layer of a TLS-like
//! channel. It drives a handshake to completion, keeps received ciphertext
//! and decrypted plaintext in one reusable buffer, splits writes into
//! frames and tracks the connection lifecycle. The record protocol itself
//! is delegated to a [`HandshakeEngine`].
//!
//! ## Architecture
//!
//! ```text
//! transport ──► FrameBuffer (encrypted) ──► engine decrypts in place
//!                                              │
//!   caller ◄── FrameBuffer (decrypted) ◄───────┘
//!
//!   caller ──► engine encrypts one frame ──► transport, frame by frame
//! ```
//!
//! - **One algorithm, two execution models**: the core is `async`. Tokio
//!   transports ([`transport::Suspending`]) yield while waiting; `std::io`
//!   transports ([`transport::Blocking`]) run on the calling thread.
//! - **Sticky failure**: once a transport, engine or protocol error occurs,
//!   every later call replays it.
//! - **Single reader, single writer**: a read and a write may overlap, two
//!   reads may not.
//!
//! ## Example
//!
//! ```ignore
//! use secure_stream::engine::loopback::LoopbackEngine;
//! use secure_stream::{ClientOptions, SecureStream};
//!
//! let stream = SecureStream::from_async(LoopbackEngine::new(), socket);
//! stream.authenticate_as_client(ClientOptions::new("example.test")).await?;
//! stream.write(b"hello").await?;
//!
//! let mut buf = [0u8; 1024];
//! let n = stream.read(&mut buf).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod options;
pub mod protocol;
pub mod state;
pub mod stream;
pub mod transport;

pub use config::StreamConfig;
pub use engine::HandshakeEngine;
pub use error::{Operation, Result, StreamError};
pub use options::{ClientOptions, CredentialSelector, PeerValidator, ServerOptions};
pub use stream::{AsyncSecureStream, BlockingSecureStream, ConnectionInfo, SecureStream};
pub use tokio_util::sync::CancellationToken;
