//! Two secure streams talking over an in-memory pipe.
//!
//! Run with: `cargo run --example loopback`

use secure_stream::engine::loopback::LoopbackEngine;
use secure_stream::engine::{Certificate, ServerCredentials};
use secure_stream::{ClientOptions, SecureStream, ServerOptions};

#[tokio::main]
async fn main() -> secure_stream::Result<()> {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let client = SecureStream::from_async(LoopbackEngine::new(), a);
    let server = SecureStream::from_async(LoopbackEngine::new(), b);

    let server_opts = ServerOptions::with_credentials(ServerCredentials {
        certificate: Certificate::from_static(b"demo-server"),
    })
    .application_protocol("echo/1");
    let client_opts = ClientOptions::new("demo.local").application_protocol("echo/1");

    let (c, s) = tokio::join!(
        client.authenticate_as_client(client_opts),
        server.authenticate_as_server(server_opts),
    );
    c?;
    s?;

    let info = client.connection_info()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&info).unwrap_or_else(|e| e.to_string())
    );

    let message = b"hello through the loopback engine";
    let echo = async {
        let mut buf = [0u8; 256];
        let n = server.read(&mut buf).await?;
        server.write(&buf[..n]).await?;
        server.shutdown().await
    };
    let (sent, echoed) = tokio::join!(client.write(message), echo);
    sent?;
    echoed?;

    let mut reply = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let n = client.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        reply.extend_from_slice(&buf[..n]);
    }
    println!("echoed: {}", String::from_utf8_lossy(&reply));

    client.close().await;
    server.close().await;
    Ok(())
}
