//! # Passvault Daemon
//!
//! Hosts the credential store behind a TLS endpoint and publishes the
//! endpoint's location in a discovery registry.
//!
//! - [`endpoint`] - One method per remote operation, emitting call events
//! - [`server`] - TLS accept loop and per-connection request loop
//! - [`registry`] - Name to `host:port` table served over plain TCP
//! - [`launcher`] - Start-up sequence: registry, key store, endpoint, bind
//! - [`log_sink`] - Log sinks for the console viewer and for tracing
//! - [`shutdown`] - Shutdown coordination across the serving tasks

pub mod endpoint;
pub mod launcher;
pub mod log_sink;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use endpoint::Endpoint;
pub use launcher::{LaunchError, LaunchState, Launcher, RunningServer};
pub use log_sink::{ChannelLogSink, TracingLogSink};
pub use registry::{Registry, RegistryError};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
