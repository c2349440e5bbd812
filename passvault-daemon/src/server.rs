//! TLS endpoint server.
//!
//! Each accepted connection gets its own task; the TLS handshake runs in
//! that task under a timeout and holds no store lock. Requests on one
//! connection are answered in order.

use std::net::SocketAddr;
use std::time::Duration;

use passvault_proto::{read_message, write_message, FrameError, Request};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use crate::endpoint::Endpoint;
use crate::shutdown::ShutdownSignal;

/// Accept TLS connections and serve endpoint requests until shutdown.
///
/// On shutdown the listener closes; open connections finish the request
/// in flight and then close.
pub async fn serve_endpoint(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    endpoint: Endpoint,
    handshake_timeout: Duration,
    shutdown: ShutdownSignal,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((tcp_stream, peer)) => {
                    connections.spawn(accept_connection(
                        tcp_stream,
                        peer,
                        acceptor.clone(),
                        endpoint.clone(),
                        handshake_timeout,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.recv() => {
                tracing::info!("Endpoint listener shutting down");
                break;
            }
        }
    }

    while connections.join_next().await.is_some() {}
}

async fn accept_connection(
    tcp_stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    endpoint: Endpoint,
    handshake_timeout: Duration,
    shutdown: ShutdownSignal,
) {
    match tokio::time::timeout(handshake_timeout, acceptor.accept(tcp_stream)).await {
        Ok(Ok(tls_stream)) => {
            tracing::debug!(peer = %peer, "TLS handshake successful");
            handle_connection(tls_stream, peer, endpoint, shutdown).await;
        }
        Ok(Err(e)) => {
            tracing::warn!(peer = %peer, error = %e, "TLS handshake failed");
        }
        Err(_) => {
            tracing::warn!(peer = %peer, timeout_secs = handshake_timeout.as_secs(), "TLS handshake timed out");
        }
    }
}

/// Serve requests on one established connection.
///
/// A malformed frame or undecodable request closes the connection; it is
/// never answered with a business outcome.
pub async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    endpoint: Endpoint,
    shutdown: ShutdownSignal,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let request = tokio::select! {
            request = read_message::<_, Request>(&mut stream) => request,
            _ = shutdown.recv() => break,
        };

        match request {
            Ok(Some(request)) => {
                tracing::debug!(peer = %peer, request = ?request, "Request");
                let response = endpoint.handle(request).await;
                match write_message(&mut stream, &response).await {
                    Ok(()) => {}
                    Err(FrameError::Io(e)) => {
                        tracing::debug!(peer = %peer, error = %e, "Failed to write response");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "Response could not be encoded, closing connection");
                        break;
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(peer = %peer, "Client disconnected");
                break;
            }
            Err(FrameError::Malformed(e)) => {
                tracing::warn!(peer = %peer, error = %e, "Malformed request, closing connection");
                break;
            }
            Err(FrameError::TooLarge(len)) => {
                tracing::warn!(peer = %peer, len, "Oversized frame, closing connection");
                break;
            }
            Err(FrameError::Io(e)) => {
                tracing::debug!(peer = %peer, error = %e, "Connection lost");
                return;
            }
        }
    }

    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownCoordinator;
    use passvault_core::CredentialStore;
    use passvault_proto::framing::write_frame;
    use passvault_proto::Response;
    use std::sync::Arc;

    fn endpoint() -> Endpoint {
        Endpoint::new(Arc::new(CredentialStore::new()), None)
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 50000))
    }

    #[tokio::test]
    async fn test_requests_answered_in_order() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let coordinator = ShutdownCoordinator::new();
        let task = tokio::spawn(handle_connection(
            server,
            peer(),
            endpoint(),
            coordinator.signal(),
        ));

        let mut client = client;
        let requests = [
            Request::Register {
                username: "alice".to_string(),
                master_secret: "m".to_string(),
            },
            Request::Register {
                username: "alice".to_string(),
                master_secret: "m".to_string(),
            },
            Request::ListServices {
                username: "alice".to_string(),
            },
        ];
        for request in &requests {
            write_message(&mut client, request).await.unwrap();
        }

        let mut responses = Vec::new();
        for _ in &requests {
            let response: Response = read_message(&mut client).await.unwrap().unwrap();
            responses.push(response);
        }
        assert_eq!(
            responses,
            vec![
                Response::Outcome(true),
                Response::Outcome(false),
                Response::Services(vec![]),
            ]
        );

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request_closes_connection() {
        let (mut client, server) = tokio::io::duplex(4096);
        let coordinator = ShutdownCoordinator::new();
        let endpoint = endpoint();
        let task = tokio::spawn(handle_connection(
            server,
            peer(),
            endpoint.clone(),
            coordinator.signal(),
        ));

        write_frame(&mut client, br#"{"drop_table":{}}"#).await.unwrap();

        let reply: Option<Response> = read_message(&mut client).await.unwrap();
        assert!(reply.is_none(), "connection closes without a response");
        task.await.unwrap();
        assert_eq!(endpoint.store().user_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_idle_connection() {
        let (_client, server) = tokio::io::duplex(4096);
        let coordinator = ShutdownCoordinator::new();
        let task = tokio::spawn(handle_connection(
            server,
            peer(),
            endpoint(),
            coordinator.signal(),
        ));

        coordinator.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
