//! Handshake/record engine capability.
//!
//! The stream never looks inside frames. It hands raw bytes to a
//! [`HandshakeEngine`] and acts on what the engine reports back:
//!
//! - during a handshake: bytes consumed, an optional token to send, and a
//!   [`HandshakeStatus`] telling the stream what to do next;
//! - for protected data: whether a whole frame is buffered and, if so, where
//!   the decrypted payload sits inside it.
//!
//! Engines decrypt in place, so the payload offset/length reported by
//! [`HandshakeEngine::decrypt_frame`] index into the slice that was passed in.
//!
//! [`loopback::LoopbackEngine`] is a reference engine with real framing and no
//! real cryptography.

pub mod loopback;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;

/// Endpoint role in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Handshake initiator.
    Client,
    /// Handshake responder.
    Server,
}

/// Opaque certificate (DER or whatever the engine understands).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate(pub Bytes);

impl Certificate {
    /// Certificate over static bytes.
    pub fn from_static(der: &'static [u8]) -> Self {
        Self(Bytes::from_static(der))
    }

    /// Raw certificate bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Certificate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex_string(&self.0))
    }
}

fn hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Credentials a responder presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCredentials {
    pub certificate: Certificate,
}

/// Parameters handed to the engine when a handshake starts.
#[derive(Debug, Clone, Default)]
pub struct HandshakeParams {
    /// Host name the initiator expects (initiator only).
    pub server_name: Option<String>,
    /// Application protocols offered (initiator) or accepted (responder), in preference order.
    pub application_protocols: Vec<Vec<u8>>,
    /// Certificate presented by this side, if any.
    pub local_certificate: Option<Certificate>,
    /// Responder only: ask the initiator for a certificate.
    pub client_certificate_required: bool,
}

/// What the responder learned from the initiator's first message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub server_name: Option<String>,
    pub application_protocols: Vec<Vec<u8>>,
}

/// Certificate chain the engine wants the application to judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerValidation {
    pub role: Role,
    pub chain: Vec<Certificate>,
    /// Host name the initiator asked for, when validating a responder.
    pub server_name: Option<String>,
}

/// Next action requested by the engine during a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Read more bytes from the transport and call again.
    NeedMoreInput,
    /// Call again without reading (more work is ready).
    Continue,
    /// Responder must choose credentials; call `provide_credentials` then continue.
    SelectCredentials(ClientHello),
    /// A peer certificate arrived; call `resolve_validation` then continue.
    ValidatePeer(PeerValidation),
    /// A whole protected frame that is not part of the handshake sits at the
    /// front of the input, typically application data the peer sent before
    /// it saw a renegotiation request. Pass it to `decrypt_frame`, keep the
    /// payload for the reader, then continue.
    DecryptFrame,
    /// The handshake is done.
    Complete,
}

/// Result of one handshake step.
#[derive(Debug, Clone)]
pub struct HandshakeProgress {
    /// Input bytes consumed from the front of the slice passed in.
    pub consumed: usize,
    /// Token to write to the transport before acting on `status`.
    pub output: Option<Bytes>,
    pub status: HandshakeStatus,
}

impl HandshakeProgress {
    pub fn need_more_input() -> Self {
        Self {
            consumed: 0,
            output: None,
            status: HandshakeStatus::NeedMoreInput,
        }
    }
}

/// Kind of a decrypted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// User payload.
    ApplicationData,
    /// The peer asked for a new handshake (payload is absorbed by the engine).
    RenegotiationRequest,
    /// The peer will send nothing more.
    CloseNotify,
    /// Any other control frame the engine consumed internally.
    Control,
}

/// Location of a decrypted payload within the frame at the front of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    pub payload_offset: usize,
    pub payload_length: usize,
    pub frame_size: usize,
    pub kind: FrameKind,
}

/// Outcome of [`HandshakeEngine::decrypt_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptOutcome {
    /// The input does not yet hold a whole frame.
    Incomplete,
    Decoded(DecodedFrame),
}

/// Negotiated session parameters, valid once authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub protocol_version: String,
    pub cipher_suite: String,
    pub peer_certificate: Option<Certificate>,
    pub local_certificate: Option<Certificate>,
    #[serde(serialize_with = "serialize_protocol")]
    pub application_protocol: Option<Vec<u8>>,
    #[serde(skip)]
    pub channel_binding: Option<Bytes>,
}

fn serialize_protocol<S: serde::Serializer>(
    protocol: &Option<Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match protocol {
        Some(p) => serializer.serialize_some(&String::from_utf8_lossy(p)),
        None => serializer.serialize_none(),
    }
}

/// Errors raised by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("frame integrity check failed")]
    BadRecordMac,

    #[error("peer certificate rejected")]
    PeerRejected,

    #[error("no credentials available for this handshake")]
    MissingCredentials,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}

/// The handshake and record engine a [`SecureStream`](crate::SecureStream) drives.
///
/// Every method runs to completion without I/O. The stream serializes calls
/// through a lock, so implementations need no internal synchronization.
pub trait HandshakeEngine: Send {
    /// Reset handshake state and record the parameters for a new handshake.
    fn start(&mut self, role: Role, params: HandshakeParams) -> Result<(), EngineError>;

    /// Advance the handshake using buffered input.
    fn process_handshake(&mut self, input: &[u8]) -> Result<HandshakeProgress, EngineError>;

    /// Supply the credentials requested by [`HandshakeStatus::SelectCredentials`].
    fn provide_credentials(&mut self, credentials: ServerCredentials) -> Result<(), EngineError>;

    /// Report the application's verdict on [`HandshakeStatus::ValidatePeer`].
    fn resolve_validation(&mut self, accepted: bool) -> Result<(), EngineError>;

    /// Produce the token that asks the peer for a fresh handshake on an
    /// authenticated session.
    fn begin_renegotiation(&mut self) -> Result<Bytes, EngineError>;

    /// Decrypt the frame at the front of `input` in place.
    fn decrypt_frame(&mut self, input: &mut [u8]) -> Result<DecryptOutcome, EngineError>;

    /// Append one encrypted frame carrying `payload` to `out`.
    fn encrypt_frame(&mut self, payload: &[u8], out: &mut BytesMut) -> Result<(), EngineError>;

    /// Produce the shutdown (close notification) token.
    fn create_shutdown_token(&mut self) -> Result<Bytes, EngineError>;

    /// Negotiated parameters, `None` until a handshake has completed.
    fn session(&self) -> Option<SessionInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_info_serializes() {
        let info = SessionInfo {
            protocol_version: "LB1".into(),
            cipher_suite: "LOOPBACK_XOR_CRC32".into(),
            peer_certificate: Some(Certificate::from_static(&[0xde, 0xad])),
            local_certificate: None,
            application_protocol: Some(b"h2".to_vec()),
            channel_binding: Some(Bytes::from_static(b"cb")),
        };

        let json: serde_json::Value = serde_json::to_value(&info).unwrap();
        assert_eq!(json["protocol_version"], "LB1");
        assert_eq!(json["peer_certificate"], "dead");
        assert_eq!(json["application_protocol"], "h2");
        assert!(json.get("channel_binding").is_none());
    }

    #[test]
    fn test_need_more_input_progress() {
        let progress = HandshakeProgress::need_more_input();
        assert_eq!(progress.consumed, 0);
        assert!(progress.output.is_none());
        assert_eq!(progress.status, HandshakeStatus::NeedMoreInput);
    }
}
