//! Reference engine with real record framing and no real cryptography.
//!
//! Frames use a 5-byte header:
//! ```text
//! ┌──────────┬──────────┬──────────┐
//! │ Type     │ Version  │ Length   │
//! │ 1 byte   │ u16 BE   │ u16 BE   │
//! └──────────┴──────────┴──────────┘
//! ```
//!
//! Handshake frames are sent in the clear until the session is established.
//! Protected frames carry `nonce (8) | payload ^ keystream | checksum (4)`,
//! so a decrypted payload sits at offset 13 with a 4-byte trailer.
//!
//! The keystream and checksum are derived from a CRC of the handshake
//! transcript. They detect corruption and key mismatch; they provide no
//! confidentiality. Use this engine for tests, demos and interop of the
//! stream layer only.

use bytes::{BufMut, Bytes, BytesMut};

use super::{
    Certificate, ClientHello, DecodedFrame, DecryptOutcome, EngineError, FrameKind,
    HandshakeEngine, HandshakeParams, HandshakeProgress, HandshakeStatus, PeerValidation, Role,
    ServerCredentials, SessionInfo,
};

/// Frame header size.
pub const HEADER_LEN: usize = 5;
/// Explicit nonce carried by every protected frame.
pub const NONCE_LEN: usize = 8;
/// Checksum trailer of every protected frame.
pub const TAG_LEN: usize = 4;
/// Offset of the payload inside a protected frame.
pub const PAYLOAD_OFFSET: usize = HEADER_LEN + NONCE_LEN;
/// Largest payload a protected frame can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize - NONCE_LEN - TAG_LEN;

const VERSION: u16 = 0x4c42;

mod content_type {
    pub const ALERT: u8 = 21;
    pub const HANDSHAKE: u8 = 22;
    pub const APPLICATION_DATA: u8 = 23;
}

mod message {
    pub const CLIENT_HELLO: u8 = 1;
    pub const SERVER_HELLO: u8 = 2;
    pub const CERTIFICATE: u8 = 11;
    pub const CERTIFICATE_REQUEST: u8 = 13;
    pub const FINISHED: u8 = 20;
}

const ALERT_CLOSE_NOTIFY: u8 = 0;
const FLAG_CLIENT_CERT_REQUESTED: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    SendClientHello,
    AwaitServerHello,
    SendFinished,
    AwaitClientHello,
    AwaitCredentials,
    SendServerHello,
    AwaitFinished,
    /// A `ValidatePeer` status was returned; waiting for `resolve_validation`.
    AwaitValidation,
    /// Validation accepted; the next call completes the handshake.
    Finishing,
    Established,
    /// Initiator owes a certificate after a renegotiation request.
    SendCertificate,
    /// Responder asked for a certificate and waits for it.
    AwaitCertificate,
    Failed,
}

/// Reference [`HandshakeEngine`].
#[derive(Debug)]
pub struct LoopbackEngine {
    role: Role,
    params: HandshakeParams,
    state: State,
    transcript: Vec<u8>,
    key: Option<[u8; 4]>,
    send_nonce: u64,
    hello: Option<ClientHello>,
    client_cert_requested: bool,
    peer_certificate: Option<Certificate>,
    application_protocol: Option<Vec<u8>>,
    established: bool,
    frames_sealed: u64,
    frames_opened: u64,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self {
            role: Role::Client,
            params: HandshakeParams::default(),
            state: State::Idle,
            transcript: Vec::new(),
            key: None,
            send_nonce: 0,
            hello: None,
            client_cert_requested: false,
            peer_certificate: None,
            application_protocol: None,
            established: false,
            frames_sealed: 0,
            frames_opened: 0,
        }
    }

    /// Application data frames produced by `encrypt_frame`.
    pub fn frames_sealed(&self) -> u64 {
        self.frames_sealed
    }

    /// Application data frames accepted by `decrypt_frame`.
    pub fn frames_opened(&self) -> u64 {
        self.frames_opened
    }

    fn establish(&mut self) {
        if self.key.is_none() {
            self.key = Some(crc32fast::hash(&self.transcript).to_be_bytes());
        }
        self.established = true;
        self.state = State::Established;
        tracing::trace!(role = ?self.role, "loopback session established");
    }

    fn fail<T>(&mut self, err: EngineError) -> Result<T, EngineError> {
        self.state = State::Failed;
        Err(err)
    }

    fn seal(&mut self, kind: u8, payload: &[u8], out: &mut BytesMut) -> Result<(), EngineError> {
        let key = self
            .key
            .ok_or_else(|| EngineError::UnexpectedMessage("no session keys".into()))?;
        if payload.len() > MAX_PAYLOAD {
            return Err(EngineError::Malformed(format!(
                "payload of {} bytes exceeds {}",
                payload.len(),
                MAX_PAYLOAD
            )));
        }

        let nonce = self.send_nonce;
        self.send_nonce += 1;

        let body_len = NONCE_LEN + payload.len() + TAG_LEN;
        out.reserve(HEADER_LEN + body_len);
        out.put_u8(kind);
        out.put_u16(VERSION);
        out.put_u16(body_len as u16);

        let nonce_at = out.len();
        out.put_u64(nonce);
        out.extend_from_slice(payload);
        apply_keystream(key, nonce, &mut out[nonce_at + NONCE_LEN..]);
        let tag = checksum(key, &out[nonce_at..]);
        out.put_u32(tag);
        Ok(())
    }

    fn seal_to_bytes(&mut self, kind: u8, payload: &[u8]) -> Result<Bytes, EngineError> {
        let mut out = BytesMut::new();
        self.seal(kind, payload, &mut out)?;
        Ok(out.freeze())
    }

    /// Verify and decrypt the protected frame at the front of `input`.
    fn open(&self, input: &mut [u8]) -> Result<Option<OpenedFrame>, EngineError> {
        let key = self
            .key
            .ok_or_else(|| EngineError::UnexpectedMessage("no session keys".into()))?;
        let Some((kind, body_len)) = peek_header(input)? else {
            return Ok(None);
        };
        let frame_size = HEADER_LEN + body_len;
        if input.len() < frame_size {
            return Ok(None);
        }
        if body_len < NONCE_LEN + TAG_LEN {
            return Err(EngineError::Malformed(format!(
                "protected frame body of {body_len} bytes"
            )));
        }

        let tag_at = frame_size - TAG_LEN;
        let expected = u32::from_be_bytes([
            input[tag_at],
            input[tag_at + 1],
            input[tag_at + 2],
            input[tag_at + 3],
        ]);
        if checksum(key, &input[HEADER_LEN..tag_at]) != expected {
            return Err(EngineError::BadRecordMac);
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&input[HEADER_LEN..PAYLOAD_OFFSET]);
        apply_keystream(key, u64::from_be_bytes(nonce), &mut input[PAYLOAD_OFFSET..tag_at]);

        Ok(Some(OpenedFrame {
            kind,
            payload_length: tag_at - PAYLOAD_OFFSET,
            frame_size,
        }))
    }

    fn client_hello_body(&self) -> Result<Vec<u8>, EngineError> {
        let mut body = vec![message::CLIENT_HELLO];
        let name = self.params.server_name.as_deref().unwrap_or("");
        put_short(&mut body, name.as_bytes())?;
        let count = u8::try_from(self.params.application_protocols.len())
            .map_err(|_| EngineError::Malformed("too many application protocols".into()))?;
        body.push(count);
        for proto in &self.params.application_protocols {
            put_short(&mut body, proto)?;
        }
        Ok(body)
    }

    fn server_hello_body(&mut self) -> Result<Vec<u8>, EngineError> {
        let offered = self
            .hello
            .as_ref()
            .map(|h| h.application_protocols.clone())
            .unwrap_or_default();
        self.application_protocol = offered
            .into_iter()
            .find(|p| self.params.application_protocols.contains(p));

        let mut body = vec![message::SERVER_HELLO];
        body.push(if self.params.client_certificate_required {
            FLAG_CLIENT_CERT_REQUESTED
        } else {
            0
        });
        put_short(&mut body, self.application_protocol.as_deref().unwrap_or(&[]))?;
        let cert = self
            .params
            .local_certificate
            .as_ref()
            .map(|c| c.0.clone())
            .unwrap_or_default();
        put_long(&mut body, &cert)?;
        Ok(body)
    }

    fn certificate_body(&self, kind: u8) -> Result<Vec<u8>, EngineError> {
        let mut body = vec![kind];
        let cert = self
            .params
            .local_certificate
            .as_ref()
            .map(|c| c.0.clone())
            .unwrap_or_default();
        put_long(&mut body, &cert)?;
        Ok(body)
    }

    fn validation_request(&mut self, certificate: Certificate) -> HandshakeStatus {
        self.peer_certificate = Some(certificate.clone());
        self.state = State::AwaitValidation;
        HandshakeStatus::ValidatePeer(PeerValidation {
            role: self.role,
            chain: vec![certificate],
            server_name: match self.role {
                Role::Client => self.params.server_name.clone(),
                Role::Server => self.hello.as_ref().and_then(|h| h.server_name.clone()),
            },
        })
    }

    fn on_server_hello(&mut self, body: &[u8]) -> Result<HandshakeStatus, EngineError> {
        let mut r = Cursor::new(body);
        expect_message(&mut r, message::SERVER_HELLO)?;
        let flags = r.u8()?;
        let alpn = r.short()?;
        let cert = r.long()?;

        self.client_cert_requested = flags & FLAG_CLIENT_CERT_REQUESTED != 0;
        self.application_protocol = (!alpn.is_empty()).then(|| alpn.to_vec());
        self.transcript.extend_from_slice(body);

        if cert.is_empty() {
            self.state = State::SendFinished;
            return Ok(HandshakeStatus::Continue);
        }
        Ok(self.validation_request(Certificate(Bytes::copy_from_slice(cert))))
    }

    fn on_client_hello(&mut self, body: &[u8]) -> Result<HandshakeStatus, EngineError> {
        let mut r = Cursor::new(body);
        expect_message(&mut r, message::CLIENT_HELLO)?;
        let name = r.short()?;
        let count = r.u8()?;
        let mut protocols = Vec::with_capacity(count as usize);
        for _ in 0..count {
            protocols.push(r.short()?.to_vec());
        }

        let server_name = if name.is_empty() {
            None
        } else {
            Some(
                String::from_utf8(name.to_vec())
                    .map_err(|_| EngineError::Malformed("server name is not UTF-8".into()))?,
            )
        };
        let hello = ClientHello {
            server_name,
            application_protocols: protocols,
        };
        self.transcript.extend_from_slice(body);
        self.hello = Some(hello.clone());

        if self.params.local_certificate.is_none() {
            self.state = State::AwaitCredentials;
            return Ok(HandshakeStatus::SelectCredentials(hello));
        }
        self.state = State::SendServerHello;
        Ok(HandshakeStatus::Continue)
    }

    fn on_finished(&mut self, body: &[u8]) -> Result<HandshakeStatus, EngineError> {
        let mut r = Cursor::new(body);
        expect_message(&mut r, message::FINISHED)?;
        let cert = r.long()?;

        if cert.is_empty() {
            if self.params.client_certificate_required {
                return Err(EngineError::HandshakeFailed(
                    "client certificate required".into(),
                ));
            }
            self.establish();
            return Ok(HandshakeStatus::Complete);
        }
        Ok(self.validation_request(Certificate(Bytes::copy_from_slice(cert))))
    }

    fn step(&mut self, input: &[u8]) -> Result<HandshakeProgress, EngineError> {
        match self.state {
            State::SendClientHello => {
                let body = self.client_hello_body()?;
                self.transcript.extend_from_slice(&body);
                self.state = State::AwaitServerHello;
                Ok(HandshakeProgress {
                    consumed: 0,
                    output: Some(plain_frame(content_type::HANDSHAKE, &body)?),
                    status: HandshakeStatus::NeedMoreInput,
                })
            }
            State::AwaitServerHello => self.with_plain_frame(input, Self::on_server_hello),
            State::SendFinished => {
                let cert = if self.client_cert_requested {
                    self.params.local_certificate.clone()
                } else {
                    None
                };
                let mut body = vec![message::FINISHED];
                put_long(&mut body, cert.as_ref().map(|c| c.as_bytes()).unwrap_or(&[]))?;
                self.establish();
                Ok(HandshakeProgress {
                    consumed: 0,
                    output: Some(plain_frame(content_type::HANDSHAKE, &body)?),
                    status: HandshakeStatus::Complete,
                })
            }
            State::AwaitClientHello => self.with_plain_frame(input, Self::on_client_hello),
            State::SendServerHello => {
                let body = self.server_hello_body()?;
                self.transcript.extend_from_slice(&body);
                self.state = State::AwaitFinished;
                Ok(HandshakeProgress {
                    consumed: 0,
                    output: Some(plain_frame(content_type::HANDSHAKE, &body)?),
                    status: HandshakeStatus::NeedMoreInput,
                })
            }
            State::AwaitFinished => self.with_plain_frame(input, Self::on_finished),
            State::Finishing => {
                self.establish();
                Ok(HandshakeProgress {
                    consumed: 0,
                    output: None,
                    status: HandshakeStatus::Complete,
                })
            }
            State::SendCertificate => {
                let body = self.certificate_body(message::CERTIFICATE)?;
                let token = self.seal_to_bytes(content_type::HANDSHAKE, &body)?;
                self.state = State::Established;
                Ok(HandshakeProgress {
                    consumed: 0,
                    output: Some(token),
                    status: HandshakeStatus::Complete,
                })
            }
            State::AwaitCertificate => {
                let Some((kind, body_len)) = peek_header(input)? else {
                    return Ok(HandshakeProgress::need_more_input());
                };
                let frame_size = HEADER_LEN + body_len;
                if input.len() < frame_size {
                    return Ok(HandshakeProgress::need_more_input());
                }
                if kind != content_type::HANDSHAKE {
                    return Ok(HandshakeProgress {
                        consumed: 0,
                        output: None,
                        status: HandshakeStatus::DecryptFrame,
                    });
                }
                let mut frame = input[..frame_size].to_vec();
                let opened = self
                    .open(&mut frame)?
                    .ok_or_else(|| EngineError::Malformed("short frame".into()))?;
                if opened.kind != content_type::HANDSHAKE {
                    return Err(EngineError::UnexpectedMessage(format!(
                        "frame type {} during renegotiation",
                        opened.kind
                    )));
                }
                let payload = &frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + opened.payload_length];
                let mut r = Cursor::new(payload);
                expect_message(&mut r, message::CERTIFICATE)?;
                let cert = r.long()?;
                if cert.is_empty() {
                    return Err(EngineError::HandshakeFailed(
                        "peer sent no certificate".into(),
                    ));
                }
                let status = self.validation_request(Certificate(Bytes::copy_from_slice(cert)));
                Ok(HandshakeProgress {
                    consumed: frame_size,
                    output: None,
                    status,
                })
            }
            State::AwaitCredentials => Err(EngineError::MissingCredentials),
            State::AwaitValidation => Err(EngineError::UnexpectedMessage(
                "peer validation still pending".into(),
            )),
            State::Idle | State::Established | State::Failed => Err(
                EngineError::UnexpectedMessage(format!("no handshake in progress ({:?})", self.state)),
            ),
        }
    }

    fn with_plain_frame(
        &mut self,
        input: &[u8],
        on_body: fn(&mut Self, &[u8]) -> Result<HandshakeStatus, EngineError>,
    ) -> Result<HandshakeProgress, EngineError> {
        let Some((kind, body_len)) = peek_header(input)? else {
            return Ok(HandshakeProgress::need_more_input());
        };
        let frame_size = HEADER_LEN + body_len;
        if input.len() < frame_size {
            return Ok(HandshakeProgress::need_more_input());
        }
        if kind != content_type::HANDSHAKE {
            return Err(EngineError::UnexpectedMessage(format!(
                "frame type {kind} during handshake"
            )));
        }
        let status = on_body(self, &input[HEADER_LEN..frame_size])?;
        Ok(HandshakeProgress {
            consumed: frame_size,
            output: None,
            status,
        })
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeEngine for LoopbackEngine {
    fn start(&mut self, role: Role, params: HandshakeParams) -> Result<(), EngineError> {
        self.role = role;
        self.params = params;
        self.transcript.clear();
        self.key = None;
        self.send_nonce = 0;
        self.hello = None;
        self.peer_certificate = None;
        self.application_protocol = None;
        self.established = false;
        self.state = match role {
            Role::Client => State::SendClientHello,
            Role::Server => State::AwaitClientHello,
        };
        Ok(())
    }

    fn process_handshake(&mut self, input: &[u8]) -> Result<HandshakeProgress, EngineError> {
        match self.step(input) {
            Ok(progress) => Ok(progress),
            Err(err) => self.fail(err),
        }
    }

    fn provide_credentials(&mut self, credentials: ServerCredentials) -> Result<(), EngineError> {
        if self.state != State::AwaitCredentials {
            return self.fail(EngineError::UnexpectedMessage(
                "credentials were not requested".into(),
            ));
        }
        self.params.local_certificate = Some(credentials.certificate);
        self.state = State::SendServerHello;
        Ok(())
    }

    fn resolve_validation(&mut self, accepted: bool) -> Result<(), EngineError> {
        if self.state != State::AwaitValidation {
            return self.fail(EngineError::UnexpectedMessage(
                "validation was not requested".into(),
            ));
        }
        if !accepted {
            self.peer_certificate = None;
            return self.fail(EngineError::PeerRejected);
        }
        self.state = match (self.role, self.established) {
            (Role::Client, false) => State::SendFinished,
            _ => State::Finishing,
        };
        Ok(())
    }

    fn begin_renegotiation(&mut self) -> Result<Bytes, EngineError> {
        if self.role != Role::Server || self.state != State::Established {
            return Err(EngineError::UnexpectedMessage(
                "renegotiation is started by an established responder".into(),
            ));
        }
        let token = self.seal_to_bytes(content_type::HANDSHAKE, &[message::CERTIFICATE_REQUEST])?;
        self.state = State::AwaitCertificate;
        Ok(token)
    }

    fn decrypt_frame(&mut self, input: &mut [u8]) -> Result<DecryptOutcome, EngineError> {
        let Some(opened) = self.open(input)? else {
            return Ok(DecryptOutcome::Incomplete);
        };
        let payload = &input[PAYLOAD_OFFSET..PAYLOAD_OFFSET + opened.payload_length];

        let control = |kind| -> Result<DecryptOutcome, EngineError> {
            Ok(DecryptOutcome::Decoded(DecodedFrame {
                payload_offset: PAYLOAD_OFFSET,
                payload_length: 0,
                frame_size: opened.frame_size,
                kind,
            }))
        };

        match opened.kind {
            content_type::APPLICATION_DATA => {
                self.frames_opened += 1;
                Ok(DecryptOutcome::Decoded(DecodedFrame {
                    payload_offset: PAYLOAD_OFFSET,
                    payload_length: opened.payload_length,
                    frame_size: opened.frame_size,
                    kind: FrameKind::ApplicationData,
                }))
            }
            content_type::HANDSHAKE => match payload.first() {
                Some(&message::CERTIFICATE_REQUEST) if self.role == Role::Client => {
                    self.state = State::SendCertificate;
                    control(FrameKind::RenegotiationRequest)
                }
                _ => self.fail(EngineError::UnexpectedMessage(
                    "handshake message on established session".into(),
                )),
            },
            content_type::ALERT => match payload {
                [_, ALERT_CLOSE_NOTIFY] => control(FrameKind::CloseNotify),
                [_, desc] => {
                    let desc = *desc;
                    self.fail(EngineError::HandshakeFailed(format!("peer alert {desc}")))
                }
                _ => self.fail(EngineError::Malformed("alert frame".into())),
            },
            other => self.fail(EngineError::Malformed(format!("unknown frame type {other}"))),
        }
    }

    fn encrypt_frame(&mut self, payload: &[u8], out: &mut BytesMut) -> Result<(), EngineError> {
        self.seal(content_type::APPLICATION_DATA, payload, out)?;
        self.frames_sealed += 1;
        Ok(())
    }

    fn create_shutdown_token(&mut self) -> Result<Bytes, EngineError> {
        self.seal_to_bytes(content_type::ALERT, &[1, ALERT_CLOSE_NOTIFY])
    }

    fn session(&self) -> Option<SessionInfo> {
        if !self.established {
            return None;
        }
        let key = self.key?;
        let mut binding = BytesMut::with_capacity(8);
        binding.put_slice(&key);
        binding.put_u32(crc32fast::hash(&self.transcript));

        Some(SessionInfo {
            protocol_version: "LOOPBACK/1".into(),
            cipher_suite: "LOOPBACK_XOR_CRC32".into(),
            peer_certificate: self.peer_certificate.clone(),
            local_certificate: self.params.local_certificate.clone(),
            application_protocol: self.application_protocol.clone(),
            channel_binding: Some(binding.freeze()),
        })
    }
}

struct OpenedFrame {
    kind: u8,
    payload_length: usize,
    frame_size: usize,
}

fn peek_header(input: &[u8]) -> Result<Option<(u8, usize)>, EngineError> {
    if input.len() < HEADER_LEN {
        return Ok(None);
    }
    let version = u16::from_be_bytes([input[1], input[2]]);
    if version != VERSION {
        return Err(EngineError::Malformed(format!(
            "unknown frame version {version:#06x}"
        )));
    }
    let body_len = u16::from_be_bytes([input[3], input[4]]) as usize;
    Ok(Some((input[0], body_len)))
}

fn plain_frame(kind: u8, body: &[u8]) -> Result<Bytes, EngineError> {
    let len = u16::try_from(body.len())
        .map_err(|_| EngineError::Malformed("handshake message too large".into()))?;
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_u8(kind);
    out.put_u16(VERSION);
    out.put_u16(len);
    out.put_slice(body);
    Ok(out.freeze())
}

fn apply_keystream(key: [u8; 4], nonce: u64, data: &mut [u8]) {
    let salt = nonce.to_be_bytes();
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4] ^ salt[i % 8] ^ (i as u8);
    }
}

fn checksum(key: [u8; 4], data: &[u8]) -> u32 {
    crc32fast::hash(data) ^ u32::from_be_bytes(key)
}

fn put_short(out: &mut Vec<u8>, data: &[u8]) -> Result<(), EngineError> {
    let len = u8::try_from(data.len())
        .map_err(|_| EngineError::Malformed("field longer than 255 bytes".into()))?;
    out.push(len);
    out.extend_from_slice(data);
    Ok(())
}

fn put_long(out: &mut Vec<u8>, data: &[u8]) -> Result<(), EngineError> {
    let len = u16::try_from(data.len())
        .map_err(|_| EngineError::Malformed("field longer than 65535 bytes".into()))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(data);
    Ok(())
}

fn expect_message(r: &mut Cursor<'_>, kind: u8) -> Result<(), EngineError> {
    let got = r.u8()?;
    if got != kind {
        return Err(EngineError::UnexpectedMessage(format!(
            "expected handshake message {kind}, got {got}"
        )));
    }
    Ok(())
}

/// Bounds-checked reader over a handshake message body.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EngineError> {
        if self.data.len() - self.pos < n {
            return Err(EngineError::Malformed("truncated handshake message".into()));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, EngineError> {
        Ok(self.take(1)?[0])
    }

    fn short(&mut self) -> Result<&'a [u8], EngineError> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    fn long(&mut self) -> Result<&'a [u8], EngineError> {
        let len = self.take(2)?;
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_CERT: &[u8] = b"server-cert";

    fn client_params() -> HandshakeParams {
        HandshakeParams {
            server_name: Some("example.test".into()),
            application_protocols: vec![b"h2".to_vec(), b"http/1.1".to_vec()],
            ..Default::default()
        }
    }

    fn server_params() -> HandshakeParams {
        HandshakeParams {
            application_protocols: vec![b"http/1.1".to_vec(), b"h2".to_vec()],
            local_certificate: Some(Certificate::from_static(SERVER_CERT)),
            ..Default::default()
        }
    }

    /// Drive both engines directly until each reports completion.
    fn handshake(client: &mut LoopbackEngine, server: &mut LoopbackEngine) {
        client.start(Role::Client, client_params()).unwrap();
        server.start(Role::Server, server_params()).unwrap();

        let hello = client.process_handshake(&[]).unwrap();
        let hello = hello.output.unwrap();

        let step = server.process_handshake(&hello).unwrap();
        assert_eq!(step.consumed, hello.len());
        assert_eq!(step.status, HandshakeStatus::Continue);
        let server_hello = server.process_handshake(&[]).unwrap().output.unwrap();

        let step = client.process_handshake(&server_hello).unwrap();
        assert!(matches!(step.status, HandshakeStatus::ValidatePeer(_)));
        client.resolve_validation(true).unwrap();
        let finish = client.process_handshake(&[]).unwrap();
        assert_eq!(finish.status, HandshakeStatus::Complete);

        let step = server.process_handshake(&finish.output.unwrap()).unwrap();
        assert_eq!(step.status, HandshakeStatus::Complete);
    }

    #[test]
    fn test_handshake_negotiates_session() {
        let mut client = LoopbackEngine::new();
        let mut server = LoopbackEngine::new();
        handshake(&mut client, &mut server);

        let info = client.session().unwrap();
        assert_eq!(info.application_protocol.as_deref(), Some(&b"h2"[..]));
        assert_eq!(info.peer_certificate, Some(Certificate::from_static(SERVER_CERT)));
        assert_eq!(
            client.session().unwrap().channel_binding,
            server.session().unwrap().channel_binding
        );
    }

    #[test]
    fn test_incomplete_input_needs_more() {
        let mut server = LoopbackEngine::new();
        server.start(Role::Server, server_params()).unwrap();

        let step = server.process_handshake(&[content_type::HANDSHAKE, 0x4c]).unwrap();
        assert_eq!(step.status, HandshakeStatus::NeedMoreInput);
        assert_eq!(step.consumed, 0);
    }

    #[test]
    fn test_server_without_credentials_asks_for_selection() {
        let mut client = LoopbackEngine::new();
        let mut server = LoopbackEngine::new();
        client.start(Role::Client, client_params()).unwrap();
        server
            .start(
                Role::Server,
                HandshakeParams {
                    local_certificate: None,
                    ..server_params()
                },
            )
            .unwrap();

        let hello = client.process_handshake(&[]).unwrap().output.unwrap();
        let step = server.process_handshake(&hello).unwrap();
        match step.status {
            HandshakeStatus::SelectCredentials(hello) => {
                assert_eq!(hello.server_name.as_deref(), Some("example.test"));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            server.process_handshake(&[]).unwrap_err(),
            EngineError::MissingCredentials
        );
    }

    #[test]
    fn test_frame_roundtrip_in_place() {
        let mut client = LoopbackEngine::new();
        let mut server = LoopbackEngine::new();
        handshake(&mut client, &mut server);

        let mut wire = BytesMut::new();
        client.encrypt_frame(b"hello world", &mut wire).unwrap();
        assert_eq!(wire.len(), PAYLOAD_OFFSET + 11 + TAG_LEN);

        let outcome = server.decrypt_frame(&mut wire).unwrap();
        let DecryptOutcome::Decoded(frame) = outcome else {
            panic!("expected decoded frame");
        };
        assert_eq!(frame.kind, FrameKind::ApplicationData);
        assert_eq!(
            &wire[frame.payload_offset..frame.payload_offset + frame.payload_length],
            b"hello world"
        );
        assert_eq!(client.frames_sealed(), 1);
        assert_eq!(server.frames_opened(), 1);
    }

    #[test]
    fn test_partial_frame_is_incomplete() {
        let mut client = LoopbackEngine::new();
        let mut server = LoopbackEngine::new();
        handshake(&mut client, &mut server);

        let mut wire = BytesMut::new();
        client.encrypt_frame(b"abc", &mut wire).unwrap();
        let mut partial = wire[..wire.len() - 1].to_vec();

        assert_eq!(
            server.decrypt_frame(&mut partial).unwrap(),
            DecryptOutcome::Incomplete
        );
    }

    #[test]
    fn test_tampered_frame_is_rejected() {
        let mut client = LoopbackEngine::new();
        let mut server = LoopbackEngine::new();
        handshake(&mut client, &mut server);

        let mut wire = BytesMut::new();
        client.encrypt_frame(b"abc", &mut wire).unwrap();
        wire[PAYLOAD_OFFSET] ^= 0xff;

        assert_eq!(
            server.decrypt_frame(&mut wire).unwrap_err(),
            EngineError::BadRecordMac
        );
    }

    #[test]
    fn test_shutdown_token_is_close_notify() {
        let mut client = LoopbackEngine::new();
        let mut server = LoopbackEngine::new();
        handshake(&mut client, &mut server);

        let mut token = client.create_shutdown_token().unwrap().to_vec();
        let outcome = server.decrypt_frame(&mut token).unwrap();
        assert!(matches!(
            outcome,
            DecryptOutcome::Decoded(DecodedFrame {
                kind: FrameKind::CloseNotify,
                payload_length: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_renegotiation_exchanges_client_certificate() {
        let mut client = LoopbackEngine::new();
        let mut server = LoopbackEngine::new();
        handshake(&mut client, &mut server);
        client.params.local_certificate = Some(Certificate::from_static(b"client-cert"));

        let mut request = server.begin_renegotiation().unwrap().to_vec();
        let outcome = client.decrypt_frame(&mut request).unwrap();
        assert!(matches!(
            outcome,
            DecryptOutcome::Decoded(DecodedFrame {
                kind: FrameKind::RenegotiationRequest,
                ..
            })
        ));

        let reply = client.process_handshake(&[]).unwrap();
        assert_eq!(reply.status, HandshakeStatus::Complete);
        let reply = reply.output.unwrap();

        let step = server.process_handshake(&reply).unwrap();
        assert_eq!(step.consumed, reply.len());
        assert!(matches!(step.status, HandshakeStatus::ValidatePeer(_)));
        server.resolve_validation(true).unwrap();
        assert_eq!(
            server.process_handshake(&[]).unwrap().status,
            HandshakeStatus::Complete
        );
        assert_eq!(
            server.session().unwrap().peer_certificate,
            Some(Certificate::from_static(b"client-cert"))
        );
    }

    #[test]
    fn test_application_data_during_renegotiation_is_deferred() {
        let mut client = LoopbackEngine::new();
        let mut server = LoopbackEngine::new();
        handshake(&mut client, &mut server);
        server.begin_renegotiation().unwrap();

        let mut out = BytesMut::new();
        client.encrypt_frame(b"in flight", &mut out).unwrap();

        let step = server.process_handshake(&out).unwrap();
        assert_eq!(step.consumed, 0);
        assert_eq!(step.status, HandshakeStatus::DecryptFrame);

        match server.decrypt_frame(&mut out).unwrap() {
            DecryptOutcome::Decoded(frame) => {
                assert_eq!(frame.kind, FrameKind::ApplicationData);
                let payload = &out[frame.payload_offset..frame.payload_offset + frame.payload_length];
                assert_eq!(payload, b"in flight");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(server.state, State::AwaitCertificate);
    }

    #[test]
    fn test_rejected_validation_fails_engine() {
        let mut client = LoopbackEngine::new();
        let mut server = LoopbackEngine::new();
        client.start(Role::Client, client_params()).unwrap();
        server.start(Role::Server, server_params()).unwrap();

        let hello = client.process_handshake(&[]).unwrap().output.unwrap();
        server.process_handshake(&hello).unwrap();
        let server_hello = server.process_handshake(&[]).unwrap().output.unwrap();
        client.process_handshake(&server_hello).unwrap();

        assert_eq!(
            client.resolve_validation(false).unwrap_err(),
            EngineError::PeerRejected
        );
        assert!(client.session().is_none());
    }
}
