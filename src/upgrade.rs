//! HTTP upgrade over a tokio stream.
//!
//! [`accept`] runs the server side and [`connect`] the client side. Both
//! read the HTTP head within `Limits::max_handshake_size` and
//! `Timeouts::handshake`, split the stream, and return a CONNECTED
//! [`WebSocket`] together with the read half for [`WebSocket::serve`].
//! Bytes the peer sent after the head are kept at the front of that read
//! half.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Chain, ReadHalf};
use tracing::debug;

use crate::config::Config;
use crate::connection::{Listener, Role, WebSocket};
use crate::error::{Error, Result};
use crate::extensions::ExtensionRegistry;
use crate::protocol::handshake::{
    ClientHandshake, HandshakeRequest, HandshakeResponse, HandshakeValidator, find_head_end,
};

/// Read half of an upgraded stream, preceded by any bytes that arrived
/// together with the handshake.
pub type UpgradedReader<S> = Chain<Cursor<Vec<u8>>, ReadHalf<S>>;

/// Accept a WebSocket upgrade on `stream`.
///
/// The request must satisfy both `validator` and the origin allow-list of
/// `config`; `Config::subprotocols` apply when the validator has none. A
/// request that fails validation is answered with an HTTP error response
/// (400, 403, 426 or 431) before the error is returned.
///
/// # Errors
///
/// - any handshake error from [`HandshakeValidator::validate`]
/// - `Error::HandshakeTooLarge` if the request head exceeds the limit
/// - `Error::Transport` on I/O failure or when `Timeouts::handshake` expires
pub async fn accept<S>(
    mut stream: S,
    validator: &HandshakeValidator,
    config: Config,
    listeners: Vec<Arc<dyn Listener>>,
) -> Result<(WebSocket, UpgradedReader<S>)>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let read = read_head(
        &mut stream,
        config.limits.max_handshake_size,
        config.timeouts.handshake,
    )
    .await;

    let accepted = read.and_then(|(head, rest)| {
        let request = HandshakeRequest::parse(&head)?;
        validator
            .validate_with_config(&request, &config)
            .map(|accepted| (accepted, rest))
    });

    let (accepted, rest) = match accepted {
        Ok(accepted) => accepted,
        Err(Error::Transport(reason)) => return Err(Error::Transport(reason)),
        Err(err) => {
            debug!(error = %err, "upgrade rejected");
            let mut buf = Vec::new();
            HandshakeResponse::write_rejection(
                HandshakeResponse::rejection_status(&err),
                &err.to_string(),
                &mut buf,
            );
            stream.write_all(&buf).await?;
            stream.shutdown().await?;
            return Err(err);
        }
    };

    let mut buf = Vec::new();
    accepted.response.write(&mut buf)?;
    stream.write_all(&buf).await?;
    stream.flush().await?;

    let (reader, writer) = tokio::io::split(stream);
    let ws = WebSocket::builder(Role::Server)
        .config(config)
        .extensions(accepted.extensions)
        .protocol(accepted.response.protocol)
        .request(accepted.request)
        .listeners(listeners)
        .build(writer);
    debug!(connection = %ws.id(), protocol = ?ws.protocol(), extensions = ?ws.extensions(), "upgrade accepted");

    ws.on_connect();
    Ok((ws, Cursor::new(rest).chain(reader)))
}

/// Perform the client side of the upgrade on `stream`.
///
/// When `handshake` offers no subprotocols, `Config::subprotocols` is
/// offered; when it offers no extensions, every extension in `registry` is.
///
/// # Errors
///
/// - any error from [`ClientHandshake::verify`]
/// - `Error::HandshakeTooLarge` if the response head exceeds the limit
/// - `Error::Transport` on I/O failure or when `Timeouts::handshake` expires
pub async fn connect<S>(
    mut stream: S,
    mut handshake: ClientHandshake,
    registry: &ExtensionRegistry,
    config: Config,
    listeners: Vec<Arc<dyn Listener>>,
) -> Result<(WebSocket, UpgradedReader<S>)>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    if handshake.protocols().is_empty() && !config.subprotocols.is_empty() {
        handshake = handshake.with_protocols(config.subprotocols.iter().cloned());
    }
    if handshake.extensions().is_empty() && !registry.is_empty() {
        handshake = handshake.with_extensions(registry.offers());
    }

    let mut buf = Vec::new();
    handshake.write_request(&mut buf)?;
    stream.write_all(&buf).await?;
    stream.flush().await?;

    let (head, rest) = read_head(
        &mut stream,
        config.limits.max_handshake_size,
        config.timeouts.handshake,
    )
    .await?;
    let accepted = handshake.verify(&head, registry)?;

    let (reader, writer) = tokio::io::split(stream);
    let ws = WebSocket::builder(Role::Client)
        .config(config)
        .extensions(accepted.extensions)
        .protocol(accepted.protocol)
        .listeners(listeners)
        .build(writer);
    debug!(connection = %ws.id(), protocol = ?ws.protocol(), extensions = ?ws.extensions(), "upgrade complete");

    ws.on_connect();
    Ok((ws, Cursor::new(rest).chain(reader)))
}

/// Read an HTTP head. Returns the head and whatever followed it.
async fn read_head<S>(stream: &mut S, max: usize, limit: Duration) -> Result<(Vec<u8>, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let read = async {
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(end) = find_head_end(&buf).filter(|end| *end <= max) {
                let rest = buf.split_off(end);
                return Ok((buf, rest));
            }
            if buf.len() >= max {
                return Err(Error::HandshakeTooLarge {
                    size: buf.len(),
                    max,
                });
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::MalformedHandshake(
                    "connection closed during handshake".into(),
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    };

    tokio::time::timeout(limit, read)
        .await
        .map_err(|_| Error::Transport(format!("handshake timed out after {limit:?}")))?
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::config::Timeouts;

    const REQUEST: &str = "GET /chat HTTP/1.1\r\n\
                           Host: example.com\r\n\
                           Upgrade: websocket\r\n\
                           Connection: Upgrade\r\n\
                           Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                           Sec-WebSocket-Version: 13\r\n\r\n";

    async fn read_all(stream: &mut (impl AsyncRead + Unpin)) -> String {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_read_head_keeps_trailing_bytes() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(b"GET / HTTP/1.1\r\n\r\nextra").await.unwrap();
        let (head, rest) = read_head(&mut server, 1024, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(head, b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(rest, b"extra");
    }

    #[tokio::test]
    async fn test_read_head_enforces_size() {
        let (mut client, mut server) = duplex(4096);
        client.write_all(&[b'a'; 2048]).await.unwrap();
        assert!(matches!(
            read_head(&mut server, 512, Duration::from_secs(1)).await,
            Err(Error::HandshakeTooLarge { max: 512, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_head_times_out() {
        let (_client, mut server) = duplex(64);
        assert!(matches!(
            read_head(&mut server, 512, Duration::from_secs(30)).await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_writes_101() {
        let (mut client, server) = duplex(4096);
        client.write_all(REQUEST.as_bytes()).await.unwrap();

        let validator = HandshakeValidator::new();
        let (ws, _reader) = accept(server, &validator, Config::server(), Vec::new())
            .await
            .unwrap();
        assert!(ws.is_connected());
        assert_eq!(ws.role(), Role::Server);
        assert_eq!(ws.upgrade_request().map(|r| r.path.as_str()), Some("/chat"));

        let mut response = vec![0u8; 256];
        let n = client.read(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response[..n]);
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[tokio::test]
    async fn test_accept_rejects_wrong_version_with_426() {
        let (mut client, server) = duplex(4096);
        let request = REQUEST.replace("Version: 13", "Version: 8");
        client.write_all(request.as_bytes()).await.unwrap();

        let result = accept(server, &HandshakeValidator::new(), Config::server(), Vec::new()).await;
        assert!(matches!(result, Err(Error::UnsupportedVersion(_))));

        let response = read_all(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(response.contains("Sec-WebSocket-Version: 13\r\n"));
    }

    #[tokio::test]
    async fn test_accept_rejects_origin_with_403() {
        let (mut client, server) = duplex(4096);
        let request = REQUEST.replace("\r\n\r\n", "\r\nOrigin: https://evil.example\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();

        let validator =
            HandshakeValidator::new().with_allowed_origins(vec!["https://good.example".into()]);
        let result = accept(server, &validator, Config::server(), Vec::new()).await;
        assert!(matches!(result, Err(Error::OriginNotAllowed { .. })));
        assert!(read_all(&mut client).await.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    }

    #[tokio::test]
    async fn test_accept_enforces_config_origins() {
        let (mut client, server) = duplex(4096);
        let request = REQUEST.replace("\r\n\r\n", "\r\nOrigin: https://evil.example\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();

        let config = Config::server().with_allowed_origins(vec!["https://good.example".into()]);
        let result = accept(server, &HandshakeValidator::new(), config, Vec::new()).await;
        assert!(matches!(result, Err(Error::OriginNotAllowed { .. })));
        assert!(read_all(&mut client).await.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    }

    #[tokio::test]
    async fn test_accept_uses_config_subprotocols() {
        let (mut client, server) = duplex(4096);
        let request =
            REQUEST.replace("\r\n\r\n", "\r\nSec-WebSocket-Protocol: superchat, chat\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();

        let config = Config::server().with_subprotocols(["chat"]);
        let (ws, _reader) = accept(server, &HandshakeValidator::new(), config, Vec::new())
            .await
            .unwrap();
        assert_eq!(ws.protocol(), Some("chat"));
    }

    #[tokio::test]
    async fn test_connect_and_accept_negotiate_subprotocol() {
        let (client_io, server_io) = duplex(4096);
        let server = tokio::spawn(async move {
            let validator = HandshakeValidator::new().with_subprotocols(["chat"]);
            accept(server_io, &validator, Config::server(), Vec::new()).await
        });

        let handshake = ClientHandshake::new("example.com", "/chat").unwrap();
        let config = Config::client()
            .with_subprotocols(["superchat", "chat"])
            .with_timeouts(Timeouts::new(Duration::from_secs(5), Duration::from_secs(1)));
        let (client, _reader) =
            connect(client_io, handshake, &ExtensionRegistry::new(), config, Vec::new())
                .await
                .unwrap();
        let (server, _reader) = server.await.unwrap().unwrap();

        assert_eq!(client.protocol(), Some("chat"));
        assert_eq!(server.protocol(), Some("chat"));
        assert_eq!(client.role(), Role::Client);
        assert!(client.is_connected() && server.is_connected());
    }
}
