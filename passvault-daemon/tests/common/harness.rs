//! Test harness: a real daemon on ephemeral ports with generated TLS
//! material in a temp directory.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use passvault_core::{CallEvent, CredentialStore, LogSink};
use passvault_daemon::{Endpoint, Launcher, RunningServer};
use passvault_tls::cert::{build_self_signed, CertParams};
use passvault_tls::keystore::{write_key_store, write_trust_bundle};
use passvault_tls::{Passphrase, TransportConfig};
use tempfile::TempDir;

/// Low KDF cost keeps key store fixtures fast.
pub const TEST_KDF_ITERATIONS: u32 = 1_000;

pub const TEST_PASSPHRASE: &str = "test-passphrase";

/// Sink that records every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CallEvent>>,
}

impl RecordingSink {
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn lines(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl LogSink for RecordingSink {
    fn emit(&self, event: &CallEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Key store and trust bundle written to a temp directory.
pub struct TlsFixture {
    pub dir: TempDir,
    pub key_store: PathBuf,
    pub trust_bundle: PathBuf,
}

impl TlsFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let key_store = dir.path().join("server-keystore.pem");
        let trust_bundle = dir.path().join("client-truststore.pem");

        let identity =
            build_self_signed(&CertParams::default()).expect("Failed to build server identity");
        write_key_store(
            &key_store,
            &identity,
            Some(&Passphrase::new(TEST_PASSPHRASE)),
            TEST_KDF_ITERATIONS,
        )
        .expect("Failed to write key store");
        write_trust_bundle(&trust_bundle, &identity).expect("Failed to write trust bundle");

        Self {
            dir,
            key_store,
            trust_bundle,
        }
    }

    /// Server config on ephemeral ports.
    pub fn server_config(&self) -> TransportConfig {
        TransportConfig {
            server_cert_path: self.key_store.clone(),
            server_cert_passphrase: Some(Passphrase::new(TEST_PASSPHRASE)),
            client_trust_path: self.trust_bundle.clone(),
            bind_address: "127.0.0.1:0".to_string(),
            registry_address: "127.0.0.1:0".to_string(),
            handshake_timeout_secs: 5,
            ..TransportConfig::default()
        }
    }
}

/// A running daemon plus what tests need to reach and inspect it.
pub struct TestDaemon {
    pub fixture: TlsFixture,
    pub store: Arc<CredentialStore>,
    pub sink: Arc<RecordingSink>,
    pub running: RunningServer,
    config: TransportConfig,
}

impl TestDaemon {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with a tweaked server config.
    pub async fn start_with(tweak: impl FnOnce(&mut TransportConfig)) -> Self {
        let fixture = TlsFixture::new();
        let mut config = fixture.server_config();
        tweak(&mut config);

        let store = Arc::new(CredentialStore::new());
        let sink = Arc::new(RecordingSink::default());
        let endpoint = Endpoint::new(store.clone(), Some(sink.clone()));

        let mut launcher = Launcher::new(config.clone(), endpoint);
        let running = launcher.start().await.expect("Failed to start daemon");

        Self {
            fixture,
            store,
            sink,
            running,
            config,
        }
    }

    /// Client config pointing at this daemon's registry.
    pub fn client_config(&self) -> TransportConfig {
        let registry = self
            .running
            .registry_addr()
            .expect("Daemon serves its own registry");
        TransportConfig {
            registry_address: registry.to_string(),
            ..self.config.clone()
        }
    }

    pub async fn stop(self) {
        self.running.shutdown().await;
    }
}
