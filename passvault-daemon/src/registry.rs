//! Discovery registry.
//!
//! Maps a discovery name to the `host:port` of a TLS endpoint. The table
//! holds locations only and is served over plain TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use passvault_proto::{read_message, write_message, FrameError, RegistryRequest, RegistryResponse};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::shutdown::ShutdownSignal;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("name already bound: {0}")]
    AlreadyBound(String),
}

/// Name to endpoint location table.
#[derive(Debug, Default)]
pub struct Registry {
    entries: DashMap<String, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `endpoint`. An existing binding is never replaced.
    pub fn bind(&self, name: &str, endpoint: &str) -> Result<(), RegistryError> {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyBound(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(endpoint.to_string());
                tracing::info!(name, endpoint, "Bound discovery name");
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<String> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    /// Remove `name`. Returns whether it was bound.
    pub fn unbind(&self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            tracing::info!(name, "Unbound discovery name");
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Answer a request from `peer`. Bindings change only for loopback
    /// peers; anyone may look names up.
    pub fn handle_remote(&self, peer: SocketAddr, request: RegistryRequest) -> RegistryResponse {
        let mutating = matches!(
            request,
            RegistryRequest::Bind { .. } | RegistryRequest::Unbind { .. }
        );
        if mutating && !peer.ip().to_canonical().is_loopback() {
            tracing::warn!(peer = %peer, request = ?request, "Refused registry change from remote peer");
            return RegistryResponse::Refused;
        }
        self.handle(request)
    }

    /// Answer one request from inside the process.
    pub fn handle(&self, request: RegistryRequest) -> RegistryResponse {
        match request {
            RegistryRequest::Bind { name, endpoint } => match self.bind(&name, &endpoint) {
                Ok(()) => RegistryResponse::Bound,
                Err(RegistryError::AlreadyBound(_)) => RegistryResponse::AlreadyBound,
            },
            RegistryRequest::Lookup { name } => RegistryResponse::Location(self.lookup(&name)),
            RegistryRequest::Unbind { name } => RegistryResponse::Unbound(self.unbind(&name)),
            RegistryRequest::List => RegistryResponse::Names(self.names()),
        }
    }
}

/// Serve registry requests until shutdown.
pub async fn serve_registry(
    listener: TcpListener,
    registry: Arc<Registry>,
    shutdown: ShutdownSignal,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let registry = registry.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(handle_registry_connection(stream, peer, registry, shutdown));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept registry connection");
                }
            },
            _ = shutdown.recv() => {
                tracing::info!("Registry listener shutting down");
                break;
            }
        }
    }

    while connections.join_next().await.is_some() {}
}

async fn handle_registry_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    shutdown: ShutdownSignal,
) {
    loop {
        let request = tokio::select! {
            request = read_message::<_, RegistryRequest>(&mut stream) => request,
            _ = shutdown.recv() => break,
        };

        match request {
            Ok(Some(request)) => {
                tracing::debug!(peer = %peer, request = ?request, "Registry request");
                let response = registry.handle_remote(peer, request);
                if let Err(e) = write_message(&mut stream, &response).await {
                    tracing::debug!(peer = %peer, error = %e, "Registry client went away");
                    break;
                }
            }
            Ok(None) => break,
            Err(FrameError::Malformed(e)) => {
                tracing::warn!(peer = %peer, error = %e, "Malformed registry request");
                break;
            }
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Registry connection error");
                break;
            }
        }
    }
}
