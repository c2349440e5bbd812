//! TLS client for the passvault endpoint.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use passvault_proto::{
    read_message, write_message, FrameError, RegistryRequest, RegistryResponse, Request, Response,
};
use passvault_tls::{build_client_config, TransportConfig, TrustStore};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::TransportError;

/// Ask the registry at `registry_address` where `name` is served.
pub async fn lookup_endpoint(
    registry_address: &str,
    name: &str,
    timeout: Duration,
) -> Result<String, TransportError> {
    let exchange = async {
        let mut stream = TcpStream::connect(registry_address).await.map_err(|source| {
            TransportError::RegistryUnreachable {
                address: registry_address.to_string(),
                source,
            }
        })?;

        let request = RegistryRequest::Lookup {
            name: name.to_string(),
        };
        write_message(&mut stream, &request)
            .await
            .map_err(frame_error)?;

        match read_message::<_, RegistryResponse>(&mut stream)
            .await
            .map_err(frame_error)?
        {
            Some(RegistryResponse::Location(Some(endpoint))) => Ok::<_, TransportError>(endpoint),
            Some(RegistryResponse::Location(None)) => Err(TransportError::NotBound(name.to_string())),
            Some(other) => Err(TransportError::Protocol(format!(
                "unexpected registry response: {other:?}"
            ))),
            None => Err(TransportError::ConnectionLost(
                io::ErrorKind::UnexpectedEof.into(),
            )),
        }
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| TransportError::Timeout {
            what: format!("registry lookup at {registry_address}"),
            after: timeout,
        })?
}

fn frame_error(e: FrameError) -> TransportError {
    match e {
        FrameError::Io(e) => TransportError::ConnectionLost(e),
        FrameError::TooLarge(len) => TransportError::Protocol(format!("frame too large: {len} bytes")),
        FrameError::Malformed(e) => TransportError::Protocol(format!("malformed message: {e}")),
    }
}

/// Name the server certificate must match for `host:port`.
fn server_name(endpoint: &str) -> Result<ServerName<'static>, TransportError> {
    let invalid = || TransportError::InvalidEndpoint(endpoint.to_string());
    let (host, _port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(host.to_string()).map_err(|_| invalid())
}

/// A TLS connection to the service endpoint.
///
/// Calls may be issued from several tasks; each call holds the connection
/// for its request and response. A call that is dropped or fails between
/// sending its request and reading the reply leaves the connection out of
/// step, so every later call fails with [`TransportError::ConnectionLost`].
pub struct PassvaultClient {
    endpoint: String,
    conn: Mutex<Connection>,
}

struct Connection {
    stream: TlsStream<TcpStream>,
    /// Set while a request is awaiting its reply.
    in_flight: bool,
}

impl std::fmt::Debug for PassvaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassvaultClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl PassvaultClient {
    /// Load the trust store, look the endpoint up and connect to it.
    pub async fn discover(config: &TransportConfig) -> Result<Self, TransportError> {
        let trust = TrustStore::load(
            &config.client_trust_path,
            config.client_trust_passphrase.as_ref(),
        )?;
        let tls = build_client_config(trust)?;

        let endpoint = lookup_endpoint(
            &config.registry_address,
            &config.discovery_name,
            config.handshake_timeout(),
        )
        .await?;
        tracing::debug!(name = %config.discovery_name, endpoint = %endpoint, "Resolved endpoint");

        Self::connect(&endpoint, tls, config.handshake_timeout()).await
    }

    /// Connect and complete the TLS handshake within `timeout`.
    pub async fn connect(
        endpoint: &str,
        tls: Arc<ClientConfig>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let server_name = server_name(endpoint)?;
        let connector = TlsConnector::from(tls);

        let attempt = async {
            let tcp = TcpStream::connect(endpoint)
                .await
                .map_err(|source| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            connector
                .connect(server_name, tcp)
                .await
                .map_err(|source| TransportError::Handshake {
                    endpoint: endpoint.to_string(),
                    source,
                })
        };

        let stream = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| TransportError::Timeout {
                what: format!("connecting to {endpoint}"),
                after: timeout,
            })??;
        tracing::debug!(endpoint, "TLS handshake successful");

        Ok(Self {
            endpoint: endpoint.to_string(),
            conn: Mutex::new(Connection {
                stream,
                in_flight: false,
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, request: &Request) -> Result<Response, TransportError> {
        let mut conn = self.conn.lock().await;
        if conn.in_flight {
            return Err(TransportError::ConnectionLost(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "an earlier call was interrupted before its reply arrived",
            )));
        }

        conn.in_flight = true;
        write_message(&mut conn.stream, request)
            .await
            .map_err(frame_error)?;
        let response = read_message::<_, Response>(&mut conn.stream)
            .await
            .map_err(frame_error)?
            .ok_or_else(|| TransportError::ConnectionLost(io::ErrorKind::UnexpectedEof.into()))?;
        conn.in_flight = false;

        Ok(response)
    }

    async fn call_outcome(&self, request: Request) -> Result<bool, TransportError> {
        match self.call(&request).await? {
            Response::Outcome(ok) => Ok(ok),
            other => Err(unexpected(&request, other)),
        }
    }

    pub async fn register(&self, username: &str, master_secret: &str) -> Result<bool, TransportError> {
        self.call_outcome(Request::Register {
            username: username.to_string(),
            master_secret: master_secret.to_string(),
        })
        .await
    }

    pub async fn authenticate(
        &self,
        username: &str,
        master_secret: &str,
    ) -> Result<bool, TransportError> {
        self.call_outcome(Request::Authenticate {
            username: username.to_string(),
            master_secret: master_secret.to_string(),
        })
        .await
    }

    /// `Ok(false)` when the user is unknown or the service already exists.
    pub async fn add_service(
        &self,
        username: &str,
        service: &str,
        secret: &str,
    ) -> Result<bool, TransportError> {
        self.call_outcome(Request::AddService {
            username: username.to_string(),
            service: service.to_string(),
            secret: secret.to_string(),
        })
        .await
    }

    pub async fn get_service(
        &self,
        username: &str,
        service: &str,
    ) -> Result<Option<String>, TransportError> {
        let request = Request::GetService {
            username: username.to_string(),
            service: service.to_string(),
        };
        match self.call(&request).await? {
            Response::Secret(secret) => Ok(secret),
            other => Err(unexpected(&request, other)),
        }
    }

    pub async fn change_service(
        &self,
        username: &str,
        service: &str,
        new_secret: &str,
    ) -> Result<bool, TransportError> {
        self.call_outcome(Request::ChangeService {
            username: username.to_string(),
            service: service.to_string(),
            new_secret: new_secret.to_string(),
        })
        .await
    }

    pub async fn delete_service(&self, username: &str, service: &str) -> Result<bool, TransportError> {
        self.call_outcome(Request::DeleteService {
            username: username.to_string(),
            service: service.to_string(),
        })
        .await
    }

    pub async fn list_services(&self, username: &str) -> Result<Vec<String>, TransportError> {
        let request = Request::ListServices {
            username: username.to_string(),
        };
        match self.call(&request).await? {
            Response::Services(names) => Ok(names),
            other => Err(unexpected(&request, other)),
        }
    }

    /// Send TLS close_notify and drop the connection.
    pub async fn close(self) {
        let mut conn = self.conn.into_inner();
        let _ = conn.stream.shutdown().await;
    }
}

fn unexpected(request: &Request, response: Response) -> TransportError {
    TransportError::Protocol(format!(
        "unexpected response to {}: {response:?}",
        request.name()
    ))
}
