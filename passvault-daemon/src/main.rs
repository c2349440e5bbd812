//! Passvault Daemon - password vault service.
//!
//! Hosts the in-memory credential store behind a TLS endpoint, publishes
//! the endpoint in a discovery registry and shows a live call log.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use passvault_core::{CallEvent, CredentialStore, LogSink};
use passvault_daemon::log_sink::DEFAULT_VIEWER_CAPACITY;
use passvault_daemon::{ChannelLogSink, Endpoint, Launcher, TracingLogSink};
use passvault_tls::cert::{build_self_signed, CertParams};
use passvault_tls::keystore::{write_key_store, write_trust_bundle, DEFAULT_KDF_ITERATIONS};
use passvault_tls::{Passphrase, TransportConfig};
use tokio::signal;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// Passvault Daemon - password vault service
#[derive(Parser)]
#[command(name = "passvault-daemon", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "PASSVAULT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the registry and the TLS endpoint (default if no command given)
    Serve(ServeArgs),

    /// Generate a self-signed server key store and the client trust bundle
    Keygen(KeygenArgs),
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Server key store (PEM certificate chain + private key)
    #[arg(long, env = "PASSVAULT_SERVER_CERT_PATH")]
    server_cert_path: Option<PathBuf>,

    /// Passphrase for the key store's private key
    #[arg(long, env = "PASSVAULT_SERVER_CERT_PASSPHRASE", hide_env_values = true)]
    server_cert_passphrase: Option<Passphrase>,

    /// Endpoint listen address (port 0 picks a free port)
    #[arg(long, env = "PASSVAULT_BIND_ADDRESS")]
    bind_address: Option<String>,

    /// Host to publish in the registry instead of the bound IP
    #[arg(long, env = "PASSVAULT_ADVERTISE_HOST")]
    advertise_host: Option<String>,

    /// Name the endpoint is published under
    #[arg(long, env = "PASSVAULT_DISCOVERY_NAME")]
    discovery_name: Option<String>,

    /// Registry listen address
    #[arg(long, env = "PASSVAULT_REGISTRY_ADDRESS")]
    registry_address: Option<String>,

    /// Seconds a client has to complete the TLS handshake
    #[arg(long, env = "PASSVAULT_HANDSHAKE_TIMEOUT_SECS")]
    handshake_timeout_secs: Option<u64>,

    /// Send call events to the tracing log instead of the console view
    #[arg(long)]
    no_viewer: bool,
}

#[derive(Args)]
struct KeygenArgs {
    /// Key store to write
    #[arg(long, env = "PASSVAULT_SERVER_CERT_PATH", default_value = "server-keystore.pem")]
    out: PathBuf,

    /// Client trust bundle to write
    #[arg(long, default_value = "client-truststore.pem")]
    trust_out: PathBuf,

    /// Passphrase sealing the private key
    #[arg(long, env = "PASSVAULT_SERVER_CERT_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<Passphrase>,

    /// Write the private key unencrypted
    #[arg(long, conflicts_with = "passphrase")]
    no_passphrase: bool,

    /// Extra subject alternative name (DNS name or IP), repeatable
    #[arg(long = "san")]
    sans: Vec<String>,

    /// Certificate validity in days
    #[arg(long, default_value_t = 365)]
    days: u32,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Keygen(args)) => cmd_keygen(args),
        Some(Commands::Serve(args)) => cmd_serve(cli.config, args).await,
        None => cmd_serve(cli.config, ServeArgs::default()).await,
    }
}

// ============================================================================
// Serve
// ============================================================================

/// Defaults, then the config file, then environment and flags.
fn load_config(path: Option<PathBuf>, args: &ServeArgs) -> anyhow::Result<TransportConfig> {
    let mut config = match path {
        Some(path) => TransportConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TransportConfig::default(),
    };

    if let Some(path) = &args.server_cert_path {
        config.server_cert_path = path.clone();
    }
    if let Some(passphrase) = &args.server_cert_passphrase {
        config.server_cert_passphrase = Some(passphrase.clone());
    }
    if let Some(address) = &args.bind_address {
        config.bind_address = address.clone();
    }
    if let Some(host) = &args.advertise_host {
        config.advertise_host = Some(host.clone());
    }
    if let Some(name) = &args.discovery_name {
        config.discovery_name = name.clone();
    }
    if let Some(address) = &args.registry_address {
        config.registry_address = address.clone();
    }
    if let Some(secs) = args.handshake_timeout_secs {
        config.handshake_timeout_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

async fn cmd_serve(config_path: Option<PathBuf>, args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(config_path, &args)?;
    tracing::debug!(config = ?config, "Effective configuration");

    let sink: Arc<dyn LogSink> = if args.no_viewer {
        Arc::new(TracingLogSink)
    } else {
        let (sink, events) = ChannelLogSink::new(DEFAULT_VIEWER_CAPACITY);
        tokio::spawn(run_log_viewer(events));
        Arc::new(sink)
    };

    let store = Arc::new(CredentialStore::new());
    let endpoint = Endpoint::new(store, Some(sink));

    let mut launcher = Launcher::new(config, endpoint);
    let running = launcher.start().await?;

    println!(
        "Server is running. Registry on {}, service \"{}\" at {}",
        running
            .registry_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default(),
        launcher.config().discovery_name,
        running.advertised()
    );

    wait_for_shutdown_signal().await;
    running.shutdown().await;

    Ok(())
}

/// Console view of the call log.
async fn run_log_viewer(mut events: mpsc::Receiver<CallEvent>) {
    while let Some(event) = events.recv().await {
        println!("{} {event}", event.ts.format("%H:%M:%S"));
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

// ============================================================================
// Keygen
// ============================================================================

fn cmd_keygen(args: KeygenArgs) -> anyhow::Result<()> {
    for path in [&args.out, &args.trust_out] {
        if path.exists() && !args.force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
    }
    if args.passphrase.is_none() && !args.no_passphrase {
        bail!("a key store passphrase is required (--passphrase or PASSVAULT_SERVER_CERT_PASSPHRASE), or pass --no-passphrase");
    }

    let mut params = CertParams {
        validity_days: args.days,
        ..CertParams::default()
    };
    for san in &args.sans {
        params = params.with_san(san);
    }

    let identity = build_self_signed(&params).context("failed to generate server certificate")?;
    write_key_store(
        &args.out,
        &identity,
        args.passphrase.as_ref(),
        DEFAULT_KDF_ITERATIONS,
    )
    .context("failed to write key store")?;
    write_trust_bundle(&args.trust_out, &identity).context("failed to write trust bundle")?;

    let fingerprint = passvault_tls::fingerprint(&identity.cert_der)?;
    println!("Key store:    {}", args.out.display());
    println!("Trust bundle: {}", args.trust_out.display());
    println!("Fingerprint:  {fingerprint}");
    if args.passphrase.is_none() {
        println!("warning: private key written unencrypted");
    }

    Ok(())
}
