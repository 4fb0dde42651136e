//! Bidirectional TCP byte forwarding.
//!
//! Pure byte piping between an accepted client connection and a backend.
//! Each direction shuts down independently: a half-close on one leg
//! propagates as EOF to the peer without killing the other direction.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Byte counters for a completed proxy session.
#[derive(Debug)]
pub struct ProxyResult {
    /// Bytes forwarded from client to backend.
    pub bytes_to_backend: u64,
    /// Bytes forwarded from backend to client.
    pub bytes_to_client: u64,
}

/// Copy data in both directions until both legs reach EOF or error.
///
/// When one direction hits EOF, the corresponding write half is shut down
/// so the peer observes the half-close, while the opposite direction keeps
/// flowing. A mid-stream error on one leg counts as end of that leg.
pub async fn proxy_bidirectional<C, B>(client: C, backend: B) -> ProxyResult
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let client_to_backend = async {
        let copied = tokio::io::copy(&mut client_read, &mut backend_write).await;
        let _ = backend_write.shutdown().await;
        copied
    };
    let backend_to_client = async {
        let copied = tokio::io::copy(&mut backend_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        copied
    };

    let (c2b, b2c) = tokio::join!(client_to_backend, backend_to_client);

    if let Err(e) = &c2b {
        debug!(error = %e, "client-to-backend leg ended with error");
    }
    if let Err(e) = &b2c {
        debug!(error = %e, "backend-to-client leg ended with error");
    }

    ProxyResult {
        bytes_to_backend: c2b.unwrap_or(0),
        bytes_to_client: b2c.unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_proxies_both_directions() {
        // Backend echoes whatever it receives.
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = backend_listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
        });

        // The "client" side of the proxy is a local socket pair.
        let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client_listener.local_addr().unwrap();

        let proxy = tokio::spawn(async move {
            let (client_side, _) = client_listener.accept().await.unwrap();
            let backend_side = TcpStream::connect(backend_addr).await.unwrap();
            proxy_bidirectional(client_side, backend_side).await
        });

        let mut client = TcpStream::connect(client_addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        client.shutdown().await.unwrap();

        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"ping");

        let result = proxy.await.unwrap();
        assert_eq!(result.bytes_to_backend, 4);
        assert_eq!(result.bytes_to_client, 4);
    }

    #[tokio::test]
    async fn test_half_close_keeps_other_direction_open() {
        // Backend that waits for client EOF, then responds.
        let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = backend_listener.accept().await.unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).await.unwrap();
            stream.write_all(b"late-reply").await.unwrap();
        });

        let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (client_side, _) = client_listener.accept().await.unwrap();
            let backend_side = TcpStream::connect(backend_addr).await.unwrap();
            proxy_bidirectional(client_side, backend_side).await
        });

        let mut client = TcpStream::connect(client_addr).await.unwrap();
        client.write_all(b"done").await.unwrap();
        // Half-close the write side; the reply must still arrive.
        client.shutdown().await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"late-reply");
    }
}
