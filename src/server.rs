use crate::config::FixtureConfig;
use crate::error::FixtureError;
use crate::request::{socket_to_request, with_timeout, BUF_SIZE};
use crate::response::{error_response, log_request_response, send_response};
use crate::routes;
use bytes::BytesMut;
use http::StatusCode;
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket};
#[cfg(feature = "trace")]
use tracing::instrument;

const BACKLOG: u32 = 1024;

pub struct Server {
    config: Arc<FixtureConfig>,
    listener: TcpListener,
}

impl Server {
    /// Binds the loopback listener. Must be called from within a tokio runtime.
    #[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
    pub fn bind(config: FixtureConfig) -> Result<Self, FixtureError> {
        let addr = config.addr();
        if config.verbose() {
            info!("Binding to {}...", addr);
        }
        let listener = bind_listener(addr)?;
        if config.verbose() {
            info!("Bind successful. Serving forever...");
        }
        Ok(Server {
            config: Arc::new(config),
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, FixtureError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the process is killed.
    #[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
    pub async fn run(self) -> Result<(), FixtureError> {
        loop {
            let (mut stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    debug!("Accept error: {}", err);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_connection(&mut stream, &config).await {
                    debug!("Connection {}: {}", peer, err);
                }
                let _ = stream.shutdown().await;
            });
        }
    }
}

/// SO_REUSEADDR is set so a restart on the same port does not trip over
/// sockets left in TIME_WAIT by the previous process.
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener, FixtureError> {
    let bind = || -> std::io::Result<TcpListener> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(BACKLOG)
    };
    bind().map_err(|source| FixtureError::Bind { addr, source })
}

/// Handles exactly one request on `socket`. Malformed heads get a 400; a peer
/// that goes away or times out gets nothing.
#[cfg_attr(feature = "trace", instrument(level = "trace", skip_all))]
pub async fn serve_connection<S>(socket: &mut S, config: &FixtureConfig) -> Result<(), FixtureError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUF_SIZE);
    let request = match with_timeout(config.body_timeout, socket_to_request(socket, &mut buffer)).await {
        Ok(request) => request,
        Err(
            err @ (FixtureError::ConnectionClosed
            | FixtureError::Timeout
            | FixtureError::IOError { .. }),
        ) => return Err(err),
        Err(err) => {
            send_response(socket, error_response(StatusCode::BAD_REQUEST)?).await?;
            return Err(err);
        }
    };

    let response = routes::handle(socket, &mut buffer, &request, config).await?;
    if config.access_log {
        log_request_response(&request, response.status());
    }
    send_response(socket, response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteSet;
    use std::error::Error;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    async fn exchange(raw: &[u8], config: &FixtureConfig) -> (String, Result<(), FixtureError>) {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        client.write_all(raw).await.unwrap();
        let result = serve_connection(&mut server, config).await;
        drop(server);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        (String::from_utf8(out).unwrap(), result)
    }

    fn extended() -> FixtureConfig {
        let mut config = FixtureConfig::new(1);
        config.routes = RouteSet::Extended;
        config
    }

    fn body_of(response: &str) -> &str {
        response.split_once("\r\n\r\n").map_or("", |(_, body)| body)
    }

    #[tokio::test]
    async fn test_hello() {
        let (resp, result) = exchange(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n", &extended()).await;
        assert!(result.is_ok());
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("content-length: 5\r\n"));
        assert_eq!(body_of(&resp), "hello");
    }

    #[tokio::test]
    async fn test_json() {
        let (resp, _) = exchange(b"GET /json HTTP/1.1\r\n\r\n", &extended()).await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("content-type: application/json; charset=utf-8\r\n"));
        assert!(resp.contains("content-length: 32\r\n"));
        assert_eq!(body_of(&resp), r#"{"message": "hello", "count": 2}"#);
    }

    #[tokio::test]
    async fn test_json_absent_from_base_set() {
        let (resp, _) = exchange(b"GET /json HTTP/1.1\r\n\r\n", &FixtureConfig::new(1)).await;
        assert!(resp.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert_eq!(body_of(&resp), "not found");
    }

    #[tokio::test]
    async fn test_echo_post_and_put() {
        for method in ["POST", "PUT"] {
            let raw = format!("{method} /echo HTTP/1.1\r\nContent-Length: 4\r\n\r\nping");
            let (resp, result) = exchange(raw.as_bytes(), &extended()).await;
            assert!(result.is_ok());
            assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
            assert!(resp.contains("content-type: text/plain; charset=utf-8\r\n"));
            assert!(resp.contains("content-length: 10\r\n"));
            assert_eq!(body_of(&resp), "echo: ping");
        }
    }

    #[tokio::test]
    async fn test_echo_is_repeatable() {
        let raw = "POST /echo HTTP/1.1\r\nContent-Length: 11\r\n\r\nsame thing!";
        let (first, _) = exchange(raw.as_bytes(), &extended()).await;
        let (second, _) = exchange(raw.as_bytes(), &extended()).await;
        assert_eq!(first, second);
        assert_eq!(body_of(&first), "echo: same thing!");
    }

    #[tokio::test]
    async fn test_echo_empty_bodies() {
        for raw in [
            "PUT /echo HTTP/1.1\r\n\r\n",
            "PUT /echo HTTP/1.1\r\nContent-Length: 0\r\n\r\n",
            "POST /echo HTTP/1.1\r\nContent-Length: nope\r\n\r\n",
        ] {
            let (resp, _) = exchange(raw.as_bytes(), &extended()).await;
            assert!(resp.contains("content-length: 6\r\n"));
            assert_eq!(body_of(&resp), "echo: ");
        }
    }

    #[tokio::test]
    async fn test_echo_multibyte_length() {
        let body = "héllo → wörld";
        let raw = format!("POST /echo HTTP/1.1\r\nContent-Length: {}\r\n\r\n{body}", body.len());
        let (resp, _) = exchange(raw.as_bytes(), &extended()).await;
        let expected = format!("echo: {body}");
        assert!(resp.contains(&format!("content-length: {}\r\n", expected.len())));
        assert_eq!(body_of(&resp), expected);
    }

    #[tokio::test]
    async fn test_not_found() {
        for raw in [
            "GET /missing HTTP/1.1\r\n\r\n",
            "DELETE /echo HTTP/1.1\r\n\r\n",
            "OPTIONS /hello HTTP/1.1\r\n\r\n",
            "GET /hello/ HTTP/1.1\r\n\r\n",
        ] {
            let (resp, _) = exchange(raw.as_bytes(), &extended()).await;
            assert!(resp.starts_with("HTTP/1.1 404 Not Found\r\n"), "{raw}");
            assert!(resp.contains("content-length: 9\r\n"));
            assert_eq!(body_of(&resp), "not found");
        }
    }

    #[tokio::test]
    async fn test_malformed_head() {
        let (resp, result) = exchange(b"GET /hello HTTP/7.1\r\n\r\n", &extended()).await;
        assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(body_of(&resp), "bad request");
        assert!(matches!(result, Err(FixtureError::RequestError { .. })));
    }

    #[tokio::test]
    async fn test_body_never_completes() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(b"POST /echo HTTP/1.1\r\nContent-Length: 100\r\n\r\nshort")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let result = serve_connection(&mut server, &extended()).await;
        assert!(matches!(result, Err(FixtureError::ConnectionClosed)));
        drop(server);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_body_timeout() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(b"POST /echo HTTP/1.1\r\nContent-Length: 100\r\n\r\nshort")
            .await
            .unwrap();

        let mut config = extended();
        config.body_timeout = Some(Duration::from_millis(20));
        let result = serve_connection(&mut server, &config).await;
        assert!(matches!(result, Err(FixtureError::Timeout)));
    }

    async fn request_over_tcp(addr: SocketAddr, raw: &str) -> Result<String, Box<dyn Error>> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(raw.as_bytes()).await?;
        let mut out = String::new();
        stream.read_to_string(&mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn test_serves_over_loopback() -> Result<(), Box<dyn Error>> {
        let server = Server::bind(extended_on(0))?;
        let addr = server.local_addr()?;
        assert!(addr.ip().is_loopback());
        let handle = tokio::spawn(server.run());

        let hello = request_over_tcp(addr, "GET /hello HTTP/1.1\r\n\r\n").await?;
        assert_eq!(body_of(&hello), "hello");

        let echo = request_over_tcp(addr, "POST /echo HTTP/1.1\r\nContent-Length: 4\r\n\r\nping").await?;
        assert_eq!(body_of(&echo), "echo: ping");

        // A broken client must not take the listener down.
        drop(TcpStream::connect(addr).await?);
        let again = request_over_tcp(addr, "GET /missing HTTP/1.1\r\n\r\n").await?;
        assert_eq!(body_of(&again), "not found");

        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn test_rebind_same_port() -> Result<(), Box<dyn Error>> {
        let server = Server::bind(extended_on(0))?;
        let addr = server.local_addr()?;
        let handle = tokio::spawn(server.run());
        let resp = request_over_tcp(addr, "GET /hello HTTP/1.1\r\n\r\n").await?;
        assert_eq!(body_of(&resp), "hello");
        handle.abort();
        let _ = handle.await;

        let server = Server::bind(extended_on(addr.port()))?;
        let handle = tokio::spawn(server.run());
        let resp = request_over_tcp(addr, "GET /hello HTTP/1.1\r\n\r\n").await?;
        assert_eq!(body_of(&resp), "hello");
        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn test_bind_conflict() -> Result<(), Box<dyn Error>> {
        let server = Server::bind(extended_on(0))?;
        let port = server.local_addr()?.port();
        let second = Server::bind(extended_on(port));
        assert!(matches!(second, Err(FixtureError::Bind { .. })));
        Ok(())
    }

    fn extended_on(port: u16) -> FixtureConfig {
        let mut config = extended();
        config.port = port;
        config
    }
}
