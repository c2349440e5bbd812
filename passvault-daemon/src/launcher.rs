//! Server start-up.
//!
//! Start-up walks `Unbound → RegistryCreated → EndpointBound`:
//! 1. create (or attach to) the discovery registry
//! 2. open the key store and bind the TLS endpoint
//! 3. publish the endpoint under the discovery name
//!
//! Any failure aborts the attempt, releases what it acquired and leaves
//! the launcher `Unbound` so the operator can retry. Shutting a running
//! server down returns the launcher to `Unbound` as well.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use passvault_tls::{build_server_config, KeyStore, TlsError, TransportConfig};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::endpoint::Endpoint;
use crate::registry::{serve_registry, Registry, RegistryError};
use crate::server::serve_endpoint;
use crate::shutdown::ShutdownCoordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Unbound,
    RegistryCreated,
    EndpointBound,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("server is already running")]
    AlreadyStarted,
    #[error("failed to create registry on {address}: {source}")]
    Registry {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to load key store: {0}")]
    KeyStore(#[from] TlsError),
    #[error("failed to bind endpoint on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("discovery name {0:?} is already bound")]
    NameTaken(String),
}

impl From<RegistryError> for LaunchError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::AlreadyBound(name) => LaunchError::NameTaken(name),
        }
    }
}

/// Drives one server through start-up.
pub struct Launcher {
    config: TransportConfig,
    endpoint: Endpoint,
    shared_registry: Option<Arc<Registry>>,
    /// Shared with the running server, which resets it on shutdown.
    state: Arc<watch::Sender<LaunchState>>,
}

impl Launcher {
    /// Launcher that creates and serves its own registry on
    /// `config.registry_address`.
    pub fn new(config: TransportConfig, endpoint: Endpoint) -> Self {
        Self {
            config,
            endpoint,
            shared_registry: None,
            state: Arc::new(watch::Sender::new(LaunchState::Unbound)),
        }
    }

    /// Launcher that publishes into an existing in-process registry instead
    /// of serving one.
    pub fn with_registry(config: TransportConfig, endpoint: Endpoint, registry: Arc<Registry>) -> Self {
        Self {
            shared_registry: Some(registry),
            ..Self::new(config, endpoint)
        }
    }

    pub fn state(&self) -> LaunchState {
        *self.state.borrow()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Run start-up. On failure the launcher is back in `Unbound`.
    pub async fn start(&mut self) -> Result<RunningServer, LaunchError> {
        if self.state() != LaunchState::Unbound {
            return Err(LaunchError::AlreadyStarted);
        }

        match self.try_start().await {
            Ok(running) => {
                self.state.send_replace(LaunchState::EndpointBound);
                tracing::info!(
                    name = %self.config.discovery_name,
                    endpoint = %running.advertised,
                    "Server started"
                );
                Ok(running)
            }
            Err(e) => {
                self.state.send_replace(LaunchState::Unbound);
                tracing::error!(error = %e, "Server start-up failed");
                Err(e)
            }
        }
    }

    async fn try_start(&self) -> Result<RunningServer, LaunchError> {
        let config = &self.config;

        let (registry, registry_listener) = match &self.shared_registry {
            Some(registry) => (registry.clone(), None),
            None => {
                let listener = TcpListener::bind(&config.registry_address)
                    .await
                    .map_err(|source| LaunchError::Registry {
                        address: config.registry_address.clone(),
                        source,
                    })?;
                tracing::info!(address = %config.registry_address, "Registry listening");
                (Arc::new(Registry::new()), Some(listener))
            }
        };
        self.state.send_replace(LaunchState::RegistryCreated);

        let key_store = KeyStore::load(
            &config.server_cert_path,
            config.server_cert_passphrase.as_ref(),
        )?;
        match key_store.fingerprint() {
            Ok(fingerprint) => tracing::info!(%fingerprint, "Loaded server key store"),
            Err(e) => tracing::warn!(error = %e, "Could not fingerprint server certificate"),
        }
        let acceptor = TlsAcceptor::from(build_server_config(key_store)?);

        let listener = TcpListener::bind(&config.bind_address)
            .await
            .map_err(|source| LaunchError::Bind {
                address: config.bind_address.clone(),
                source,
            })?;
        let endpoint_addr = listener.local_addr().map_err(|source| LaunchError::Bind {
            address: config.bind_address.clone(),
            source,
        })?;

        let advertised = advertised_address(config.advertise_host.as_deref(), endpoint_addr);
        registry.bind(&config.discovery_name, &advertised)?;

        let registry_addr = registry_listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok());

        let shutdown = ShutdownCoordinator::new();
        let mut tasks = Vec::new();
        if let Some(listener) = registry_listener {
            tasks.push(tokio::spawn(serve_registry(
                listener,
                registry.clone(),
                shutdown.signal(),
            )));
        }
        tasks.push(tokio::spawn(serve_endpoint(
            listener,
            acceptor,
            self.endpoint.clone(),
            config.handshake_timeout(),
            shutdown.signal(),
        )));

        Ok(RunningServer {
            registry,
            registry_addr,
            endpoint_addr,
            advertised,
            name: config.discovery_name.clone(),
            shutdown,
            tasks,
            launch_state: self.state.clone(),
        })
    }
}

/// Address published in the registry for a bound endpoint.
fn advertised_address(advertise_host: Option<&str>, bound: SocketAddr) -> String {
    if let Some(host) = advertise_host {
        return format!("{host}:{}", bound.port());
    }
    let ip = match bound.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, bound.port()).to_string()
}

/// A server that completed start-up.
pub struct RunningServer {
    registry: Arc<Registry>,
    registry_addr: Option<SocketAddr>,
    endpoint_addr: SocketAddr,
    advertised: String,
    name: String,
    shutdown: ShutdownCoordinator,
    tasks: Vec<JoinHandle<()>>,
    launch_state: Arc<watch::Sender<LaunchState>>,
}

impl std::fmt::Debug for RunningServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningServer")
            .field("name", &self.name)
            .field("registry_addr", &self.registry_addr)
            .field("endpoint_addr", &self.endpoint_addr)
            .finish_non_exhaustive()
    }
}

impl RunningServer {
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Registry listen address; `None` when attached to a shared registry.
    pub fn registry_addr(&self) -> Option<SocketAddr> {
        self.registry_addr
    }

    pub fn endpoint_addr(&self) -> SocketAddr {
        self.endpoint_addr
    }

    /// Location published under the discovery name.
    pub fn advertised(&self) -> &str {
        &self.advertised
    }

    /// Unpublish, stop accepting and wait for open connections to finish.
    /// The launcher that started this server is `Unbound` afterwards.
    pub async fn shutdown(self) {
        self.registry.unbind(&self.name);
        self.shutdown.shutdown();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Server task panicked");
            }
        }
        self.launch_state.send_replace(LaunchState::Unbound);
        tracing::info!(name = %self.name, "Server stopped");
    }
}
