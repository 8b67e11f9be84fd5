//! Integration tests for secure-stream over in-memory tokio transports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use secure_stream::engine::loopback::{LoopbackEngine, HEADER_LEN};
use secure_stream::engine::{
    Certificate, ClientHello, DecryptOutcome, FrameKind, HandshakeEngine, HandshakeParams,
    HandshakeStatus, PeerValidation, Role, ServerCredentials,
};
use secure_stream::{
    AsyncSecureStream, CancellationToken, ClientOptions, CredentialSelector, Operation,
    SecureStream, ServerOptions, StreamConfig, StreamError,
};

type Stream = AsyncSecureStream<LoopbackEngine, DuplexStream>;

const SERVER_CERT: &[u8] = b"server-certificate";
const CLIENT_CERT: &[u8] = b"client-certificate";

fn server_options() -> ServerOptions {
    ServerOptions::with_credentials(ServerCredentials {
        certificate: Certificate::from_static(SERVER_CERT),
    })
}

fn client_options() -> ClientOptions {
    ClientOptions::new("example.test")
}

fn pair_with(client_config: StreamConfig, server_config: StreamConfig) -> (Stream, Stream) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (
        SecureStream::from_async_with_config(LoopbackEngine::new(), a, client_config).unwrap(),
        SecureStream::from_async_with_config(LoopbackEngine::new(), b, server_config).unwrap(),
    )
}

async fn connect_with(client_opts: ClientOptions, server_opts: ServerOptions) -> (Stream, Stream) {
    let (client, server) = pair_with(StreamConfig::default(), StreamConfig::default());
    let (c, s) = tokio::join!(
        client.authenticate_as_client(client_opts),
        server.authenticate_as_server(server_opts),
    );
    c.unwrap();
    s.unwrap();
    (client, server)
}

async fn connect() -> (Stream, Stream) {
    connect_with(client_options(), server_options()).await
}

/// Read exactly `len` bytes using reads of at most `chunk` bytes.
async fn read_exact(stream: &Stream, len: usize, chunk: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut buf = vec![0u8; chunk];
    while out.len() < len {
        let want = chunk.min(len - out.len());
        let n = stream.read(&mut buf[..want]).await.unwrap();
        assert!(n > 0, "unexpected end of stream after {} bytes", out.len());
        out.extend_from_slice(&buf[..n]);
    }
    out
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Read one whole frame from a raw transport.
async fn read_raw_frame(io: &mut DuplexStream) -> Vec<u8> {
    let mut frame = vec![0u8; HEADER_LEN];
    io.read_exact(&mut frame).await.unwrap();
    let body = u16::from_be_bytes([frame[3], frame[4]]) as usize;
    frame.resize(HEADER_LEN + body, 0);
    io.read_exact(&mut frame[HEADER_LEN..]).await.unwrap();
    frame
}

/// Authenticate `client` against a responder driven by hand over `raw`.
async fn manual_server(client: &Arc<Stream>, raw: &mut DuplexStream) -> LoopbackEngine {
    let mut engine = LoopbackEngine::new();
    engine
        .start(
            Role::Server,
            HandshakeParams {
                local_certificate: Some(Certificate::from_static(SERVER_CERT)),
                ..Default::default()
            },
        )
        .unwrap();

    let c = client.clone();
    let handshake = tokio::spawn(async move {
        c.authenticate_as_client(client_options().client_certificate(Certificate::from_static(CLIENT_CERT)))
            .await
    });

    let hello = read_raw_frame(raw).await;
    let step = engine.process_handshake(&hello).unwrap();
    assert_eq!(step.status, HandshakeStatus::Continue);
    let server_hello = engine.process_handshake(&[]).unwrap().output.unwrap();
    raw.write_all(&server_hello).await.unwrap();

    let finished = read_raw_frame(raw).await;
    let step = engine.process_handshake(&finished).unwrap();
    assert_eq!(step.status, HandshakeStatus::Complete);

    handshake.await.unwrap().unwrap();
    engine
}

/// Bytes written in many sizes are reassembled exactly whatever the read size.
#[tokio::test]
async fn test_roundtrip_with_arbitrary_read_chunking() {
    let (client, server) = connect().await;
    let sizes = [1usize, 10, 1000, 20_000, 7, 16_384, 16_385, 3];
    let total: usize = sizes.iter().sum();
    let data = pattern(total);

    let writer = async {
        let mut offset = 0;
        for size in sizes {
            client.write(&data[offset..offset + size]).await.unwrap();
            offset += size;
        }
    };
    let reader = async {
        let chunks = [1usize, 3, 7, 100, 5000, 16_384];
        let mut out = Vec::with_capacity(total);
        let mut buf = vec![0u8; 16_384];
        let mut i = 0;
        while out.len() < total {
            let want = chunks[i % chunks.len()].min(total - out.len());
            let n = server.read(&mut buf[..want]).await.unwrap();
            out.extend_from_slice(&buf[..n]);
            i += 1;
        }
        out
    };

    let ((), received) = tokio::join!(writer, reader);
    assert_eq!(received, data);
}

/// 100,000 bytes with a 16 KiB frame cap arrive intact in 7 frames.
#[tokio::test]
async fn test_large_write_is_split_into_frames() {
    let (client, server) = connect().await;
    let data = pattern(100_000);

    let (sent, received) = tokio::join!(client.write(&data), read_exact(&server, 100_000, 4096));
    sent.unwrap();
    assert_eq!(received, data);

    let (client_engine, _, _) = client.into_parts();
    let (server_engine, _, _) = server.into_parts();
    assert_eq!(client_engine.frames_sealed(), 7);
    assert_eq!(server_engine.frames_opened(), 7);
}

/// A smaller frame cap produces more frames.
#[tokio::test]
async fn test_frame_cap_is_configurable() {
    let (client, server) = pair_with(
        StreamConfig::default().max_frame_payload(1000),
        StreamConfig::default().read_chunk_size(333),
    );
    let (c, s) = tokio::join!(
        client.authenticate_as_client(client_options()),
        server.authenticate_as_server(server_options()),
    );
    c.unwrap();
    s.unwrap();

    let data = pattern(10_001);
    let (sent, received) = tokio::join!(client.write(&data), read_exact(&server, data.len(), 4096));
    sent.unwrap();
    assert_eq!(received, data);

    let (engine, _, _) = client.into_parts();
    assert_eq!(engine.frames_sealed(), 11);
}

/// A second read while one is outstanding fails without disturbing the first.
#[tokio::test]
async fn test_concurrent_read_is_nested_call() {
    let (client, server) = connect().await;
    let client = Arc::new(client);

    let c = client.clone();
    let first = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        let n = c.read(&mut buf).await?;
        Ok::<_, StreamError>(buf[..n].to_vec())
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut buf = [0u8; 16];
    let err = client.read(&mut buf).await.unwrap_err();
    assert!(matches!(err, StreamError::NestedCall(Operation::Read)));

    server.write(b"hello").await.unwrap();
    assert_eq!(first.await.unwrap().unwrap(), b"hello");

    server.write(b"again").await.unwrap();
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"again");
}

/// A read and a write may be in flight at the same time.
#[tokio::test]
async fn test_read_and_write_overlap() {
    let (client, server) = connect().await;
    let client = Arc::new(client);

    let c = client.clone();
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 8];
        let n = c.read(&mut buf).await?;
        Ok::<_, StreamError>(buf[..n].to_vec())
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.write(b"ping").await.unwrap();
    let mut buf = [0u8; 8];
    let n = server.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ping");

    server.write(b"pong").await.unwrap();
    assert_eq!(reader.await.unwrap().unwrap(), b"pong");
}

/// Writes after shutdown are rejected without touching the transport.
#[tokio::test]
async fn test_write_after_shutdown_is_invalid_state() {
    let (client, server) = connect().await;

    client.shutdown().await.unwrap();
    assert!(client.is_shutdown_sent());

    let err = client.write(b"too late").await.unwrap_err();
    assert!(matches!(err, StreamError::InvalidState(_)));

    // Only the close notification reached the peer.
    let mut buf = [0u8; 16];
    assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    assert_eq!(server.read(&mut buf).await.unwrap(), 0);

    // Not sticky: the stream still works in the other direction.
    assert!(client.connection_info().is_ok());
    server.write(b"still open").await.unwrap();
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"still open");

    // A second shutdown is a no-op.
    client.shutdown().await.unwrap();
}

/// Renegotiation with a peer certificate present fails before any I/O.
#[tokio::test]
async fn test_renegotiate_with_peer_certificate_is_invalid() {
    let (client, server) = connect().await;

    let err = client.renegotiate().await.unwrap_err();
    assert!(matches!(err, StreamError::InvalidState(_)));

    client.write(b"fine").await.unwrap();
    let mut buf = [0u8; 8];
    let n = server.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"fine");
}

#[tokio::test]
async fn test_renegotiate_requires_authentication() {
    let (client, _server) = pair_with(StreamConfig::default(), StreamConfig::default());
    assert!(matches!(
        client.renegotiate().await,
        Err(StreamError::NotAuthenticated)
    ));
}

/// Renegotiation with unread bytes buffered is refused.
#[tokio::test]
async fn test_renegotiate_with_unread_data_is_invalid() {
    let (client, server) = connect().await;

    client.write(b"0123456789").await.unwrap();
    let mut buf = [0u8; 4];
    server.read(&mut buf).await.unwrap();

    let err = server.renegotiate().await.unwrap_err();
    assert!(matches!(err, StreamError::InvalidState(_)));

    let mut rest = [0u8; 16];
    let n = server.read(&mut rest).await.unwrap();
    assert_eq!(&rest[..n], b"456789");
}

/// A responder-initiated renegotiation is answered inside the peer's read.
#[tokio::test]
async fn test_renegotiation_is_transparent_to_reader() {
    let validated = Arc::new(AtomicUsize::new(0));
    let seen = validated.clone();
    let server_opts = server_options().validator(move |peer: &PeerValidation| {
        seen.fetch_add(1, Ordering::SeqCst);
        peer.chain.first().map(|c| c.as_bytes()) == Some(CLIENT_CERT)
    });
    let client_opts = client_options().client_certificate(Certificate::from_static(CLIENT_CERT));
    let (client, server) = connect_with(client_opts, server_opts).await;
    let client = Arc::new(client);

    assert!(!server.is_mutually_authenticated());

    let c = client.clone();
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 32];
        let n = c.read(&mut buf).await?;
        Ok::<_, StreamError>(buf[..n].to_vec())
    });

    server.renegotiate().await.unwrap();
    assert_eq!(validated.load(Ordering::SeqCst), 1);
    assert!(server.is_mutually_authenticated());
    assert_eq!(
        server.connection_info().unwrap().session.peer_certificate,
        Some(Certificate::from_static(CLIENT_CERT))
    );

    server.write(b"after renegotiation").await.unwrap();
    assert_eq!(reader.await.unwrap().unwrap(), b"after renegotiation");
}

/// A peer that disallows renegotiation faults on the request.
#[tokio::test]
async fn test_refused_renegotiation_faults_reader() {
    let (client, server) =
        connect_with(client_options().allow_renegotiation(false), server_options()).await;
    let server = Arc::new(server);

    let s = server.clone();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let renegotiation = tokio::spawn(async move { s.renegotiate_with_cancel(&token).await });

    let mut buf = [0u8; 8];
    let err = client.read(&mut buf).await.unwrap_err();
    assert!(matches!(err, StreamError::Protocol(_)));

    // Sticky: the same failure is replayed.
    let replay = client.write(b"x").await.unwrap_err();
    assert!(matches!(replay, StreamError::Protocol(_)));

    cancel.cancel();
    let result = renegotiation.await.unwrap();
    assert!(matches!(result, Err(StreamError::Cancelled)));
    assert!(matches!(server.write(b"x").await, Err(StreamError::Cancelled)));
}

/// A write issued while a renegotiation request is in flight succeeds and
/// leaves the request for the next read.
#[tokio::test]
async fn test_write_leaves_pending_renegotiation_request_to_read() {
    let (a, mut raw) = tokio::io::duplex(64 * 1024);
    let client = Arc::new(SecureStream::from_async(LoopbackEngine::new(), a));
    let mut engine = manual_server(&client, &mut raw).await;

    raw.write_all(&engine.begin_renegotiation().unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    client.write(b"early").await.unwrap();
    let mut frame = read_raw_frame(&mut raw).await;
    match engine.decrypt_frame(&mut frame).unwrap() {
        DecryptOutcome::Decoded(f) => {
            assert_eq!(f.kind, FrameKind::ApplicationData);
            assert_eq!(&frame[f.payload_offset..f.payload_offset + f.payload_length], b"early");
        }
        other => panic!("unexpected {other:?}"),
    }

    let c = client.clone();
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        let n = c.read(&mut buf).await?;
        Ok::<_, StreamError>(buf[..n].to_vec())
    });

    let reply = read_raw_frame(&mut raw).await;
    let step = engine.process_handshake(&reply).unwrap();
    match step.status {
        HandshakeStatus::ValidatePeer(peer) => {
            assert_eq!(peer.chain, vec![Certificate::from_static(CLIENT_CERT)]);
        }
        other => panic!("unexpected {other:?}"),
    }
    engine.resolve_validation(true).unwrap();
    assert_eq!(
        engine.process_handshake(&[]).unwrap().status,
        HandshakeStatus::Complete
    );

    let mut out = BytesMut::new();
    engine.encrypt_frame(b"late", &mut out).unwrap();
    raw.write_all(&out).await.unwrap();
    assert_eq!(reader.await.unwrap().unwrap(), b"late");
}

/// Data the peer wrote before it saw a renegotiation request is kept for
/// the next read instead of failing the handshake.
#[tokio::test]
async fn test_renegotiation_keeps_data_sent_before_request() {
    let client_opts = client_options().client_certificate(Certificate::from_static(CLIENT_CERT));
    let (client, server) = connect_with(client_opts, server_options()).await;
    let client = Arc::new(client);

    client.write(b"in flight, ").await.unwrap();
    client.write(b"and more").await.unwrap();

    let c = client.clone();
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 32];
        let n = c.read(&mut buf).await?;
        Ok::<_, StreamError>(buf[..n].to_vec())
    });

    server.renegotiate().await.unwrap();
    assert!(server.is_mutually_authenticated());

    let early = read_exact(&server, 19, 32).await;
    assert_eq!(early, b"in flight, and more");

    server.write(b"reply").await.unwrap();
    assert_eq!(reader.await.unwrap().unwrap(), b"reply");

    client.write(b"after").await.unwrap();
    assert_eq!(read_exact(&server, 5, 32).await, b"after");
}

/// End of transport inside a frame is a sticky protocol error.
#[tokio::test]
async fn test_truncated_frame_is_protocol_error() {
    let (a, mut raw) = tokio::io::duplex(64 * 1024);
    let client = Arc::new(SecureStream::from_async(LoopbackEngine::new(), a));
    let mut engine = manual_server(&client, &mut raw).await;

    let mut out = BytesMut::new();
    engine.encrypt_frame(b"cut short", &mut out).unwrap();
    raw.write_all(&out[..out.len() - 3]).await.unwrap();
    drop(raw);

    let mut buf = [0u8; 16];
    let err = client.read(&mut buf).await.unwrap_err();
    assert!(matches!(err, StreamError::Protocol(_)));
    assert!(matches!(
        client.read(&mut buf).await,
        Err(StreamError::Protocol(_))
    ));
}

/// End of transport on a frame boundary is a clean end of stream.
#[tokio::test]
async fn test_eof_on_frame_boundary_reads_zero() {
    let (client, server) = connect().await;
    server.write(b"last").await.unwrap();
    let (_, _, w) = server.into_parts();
    drop(w);

    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"last");
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
}

/// Disposal wakes a suspended read exactly once; a second close is a no-op.
#[tokio::test]
async fn test_close_wakes_suspended_read() {
    let (client, _server) = connect().await;
    let client = Arc::new(client);

    let c = client.clone();
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        c.read(&mut buf).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.close().await;
    let result = reader.await.unwrap();
    assert!(matches!(result, Err(StreamError::Disposed)));

    client.close().await;
    let mut buf = [0u8; 4];
    assert!(matches!(client.read(&mut buf).await, Err(StreamError::Disposed)));
    assert!(matches!(client.shutdown().await, Err(StreamError::Disposed)));
}

/// Closing sends the close notification to the peer.
#[tokio::test]
async fn test_close_notifies_peer() {
    let (client, server) = connect().await;
    client.close().await;

    let mut buf = [0u8; 4];
    assert_eq!(server.read(&mut buf).await.unwrap(), 0);
}

/// Closing does not wait on a peer that stopped reading and still wakes a
/// suspended read.
#[tokio::test]
async fn test_close_with_stalled_peer_wakes_read() {
    let (a, b) = tokio::io::duplex(64);
    let client = Arc::new(SecureStream::from_async(LoopbackEngine::new(), a));
    let server = SecureStream::from_async(LoopbackEngine::new(), b);
    let (c, s) = tokio::join!(
        client.authenticate_as_client(client_options()),
        server.authenticate_as_server(server_options()),
    );
    c.unwrap();
    s.unwrap();

    // One 64-byte frame fills the transport; the server never reads it.
    client.write(&[7u8; 47]).await.unwrap();

    let c = client.clone();
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        c.read(&mut buf).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_millis(500), client.close())
        .await
        .expect("close waited on a full transport");
    let result = tokio::time::timeout(Duration::from_millis(500), reader)
        .await
        .expect("suspended read was not woken")
        .unwrap();
    assert!(matches!(result, Err(StreamError::Disposed)));
    assert!(matches!(client.write(b"x").await, Err(StreamError::Disposed)));
    drop(server);
}

/// A transport failure is replayed by every later call without I/O.
#[tokio::test]
async fn test_transport_error_is_sticky() {
    let (client, server) = connect().await;
    drop(server);

    let err = client.write(b"into the void").await.unwrap_err();
    let StreamError::Io(io) = &err else {
        panic!("unexpected {err:?}");
    };
    assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe);

    let mut buf = [0u8; 4];
    assert!(matches!(client.read(&mut buf).await, Err(StreamError::Io(_))));
    assert!(matches!(client.flush().await, Err(StreamError::Io(_))));
    assert!(matches!(client.connection_info(), Err(StreamError::Io(_))));
}

/// Explicit cancellation of a handshake faults the stream.
#[tokio::test]
async fn test_cancelled_handshake_faults_stream() {
    let (client, _server) = pair_with(StreamConfig::default(), StreamConfig::default());
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = client
        .authenticate_as_client_with_cancel(client_options(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::Cancelled));

    let replay = client.authenticate_as_client(client_options()).await.unwrap_err();
    assert!(matches!(replay, StreamError::Cancelled));
}

/// Dropping an in-flight read faults the stream.
#[tokio::test]
async fn test_dropped_read_faults_stream() {
    let (client, _server) = connect().await;

    let mut buf = [0u8; 4];
    let timed_out = tokio::time::timeout(Duration::from_millis(20), client.read(&mut buf)).await;
    assert!(timed_out.is_err());

    assert!(matches!(client.write(b"x").await, Err(StreamError::Cancelled)));
}

/// Credentials chosen asynchronously from the client hello.
#[tokio::test]
async fn test_async_credential_selector() {
    struct ByName;

    impl CredentialSelector for ByName {
        fn select<'a>(
            &'a self,
            hello: &'a ClientHello,
        ) -> BoxFuture<'a, secure_stream::Result<ServerCredentials>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let name = hello.server_name.clone().unwrap_or_default();
                Ok(ServerCredentials {
                    certificate: Certificate(format!("cert-for-{name}").into_bytes().into()),
                })
            })
        }
    }

    let (client, server) = connect_with(
        ClientOptions::new("api.example.test").application_protocol("h2"),
        ServerOptions::with_selector(ByName).application_protocol("h2"),
    )
    .await;

    let info = client.connection_info().unwrap();
    assert_eq!(
        info.session.peer_certificate.unwrap().as_bytes(),
        b"cert-for-api.example.test"
    );
    assert_eq!(info.session.application_protocol.as_deref(), Some(&b"h2"[..]));
    assert!(server.is_server());
}

/// A rejected certificate fails the handshake on both sides.
#[tokio::test]
async fn test_rejected_certificate_fails_handshake() {
    let (client, server) = pair_with(StreamConfig::default(), StreamConfig::default());
    let opts = client_options().validator(|_: &PeerValidation| false);

    let (c, s) = tokio::join!(
        async {
            let result = client.authenticate_as_client(opts).await;
            let replay = client.read(&mut [0u8; 1]).await;
            client.close().await;
            (result, replay)
        },
        server.authenticate_as_server(server_options()),
    );

    let (result, replay) = c;
    assert!(matches!(
        result,
        Err(StreamError::Engine(secure_stream::engine::EngineError::PeerRejected))
    ));
    assert!(matches!(replay, Err(StreamError::Engine(_))));
    assert!(matches!(s, Err(StreamError::Protocol(_))));
    assert!(!client.is_authenticated());
}

/// Both sides present certificates when the responder requires one.
#[tokio::test]
async fn test_mutual_authentication() {
    let (client, server) = connect_with(
        client_options().client_certificate(Certificate::from_static(CLIENT_CERT)),
        server_options().client_certificate_required(true),
    )
    .await;

    assert!(client.is_mutually_authenticated());
    assert!(server.is_mutually_authenticated());
    assert!(server.connection_info().unwrap().mutually_authenticated);
}

/// A responder requiring a certificate rejects an initiator without one.
#[tokio::test]
async fn test_missing_client_certificate_fails() {
    let (client, server) = pair_with(StreamConfig::default(), StreamConfig::default());
    let (c, s) = tokio::join!(
        async {
            let result = client.authenticate_as_client(client_options()).await;
            // The initiator completes first and only learns of the failure
            // when the responder hangs up.
            let mut buf = [0u8; 1];
            let read = client.read(&mut buf).await;
            (result, read)
        },
        async {
            let result = server
                .authenticate_as_server(server_options().client_certificate_required(true))
                .await;
            server.close().await;
            result
        },
    );

    assert!(matches!(s, Err(StreamError::Engine(_))));
    let (result, read) = c;
    result.unwrap();
    assert_eq!(read.unwrap(), 0);
}

#[tokio::test]
async fn test_authenticate_twice_is_invalid_state() {
    let (client, server) = connect().await;

    let err = client.authenticate_as_client(client_options()).await.unwrap_err();
    assert!(matches!(err, StreamError::InvalidState(_)));

    client.write(b"ok").await.unwrap();
    let mut buf = [0u8; 2];
    server.read(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok");
}

#[tokio::test]
async fn test_read_byte() {
    let (client, server) = connect().await;
    client.write(b"ab").await.unwrap();

    assert_eq!(server.read_byte().await.unwrap(), Some(b'a'));
    assert_eq!(server.read_byte().await.unwrap(), Some(b'b'));

    client.shutdown().await.unwrap();
    assert_eq!(server.read_byte().await.unwrap(), None);
}

#[tokio::test]
async fn test_empty_read_and_write() {
    let (client, _server) = connect().await;
    client.write(&[]).await.unwrap();
    assert_eq!(client.read(&mut []).await.unwrap(), 0);
}
