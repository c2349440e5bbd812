//! Start-up state machine tests.

mod common;

use std::sync::Arc;

use common::TlsFixture;
use passvault_core::CredentialStore;
use passvault_daemon::{Endpoint, LaunchError, LaunchState, Launcher, Registry};
use passvault_tls::{Passphrase, TlsError};
use tokio::net::TcpListener;

fn endpoint() -> Endpoint {
    Endpoint::new(Arc::new(CredentialStore::new()), None)
}

/// A free loopback address, released before returning.
async fn free_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

#[tokio::test]
async fn test_start_reaches_endpoint_bound() {
    let fixture = TlsFixture::new();
    let mut launcher = Launcher::new(fixture.server_config(), endpoint());
    assert_eq!(launcher.state(), LaunchState::Unbound);

    let running = launcher.start().await.unwrap();

    assert_eq!(launcher.state(), LaunchState::EndpointBound);
    assert_eq!(
        running.registry().lookup("PasswordManagerService").as_deref(),
        Some(running.advertised())
    );
    assert_eq!(
        running.advertised(),
        running.endpoint_addr().to_string()
    );

    let again = launcher.start().await;
    assert!(matches!(again, Err(LaunchError::AlreadyStarted)));
    assert_eq!(launcher.state(), LaunchState::EndpointBound);

    running.shutdown().await;
}

#[tokio::test]
async fn test_unreadable_key_store_releases_registry() {
    let fixture = TlsFixture::new();
    let registry_address = free_address().await;
    let mut config = fixture.server_config();
    config.registry_address = registry_address.clone();
    config.server_cert_path = fixture.dir.path().join("absent.pem");

    let mut launcher = Launcher::new(config, endpoint());
    let result = launcher.start().await;

    assert!(matches!(
        result,
        Err(LaunchError::KeyStore(TlsError::Read { .. }))
    ));
    assert_eq!(launcher.state(), LaunchState::Unbound);

    // The failed attempt must not keep the registry port.
    TcpListener::bind(&registry_address)
        .await
        .expect("registry port released");
}

#[tokio::test]
async fn test_wrong_passphrase_fails_start() {
    let fixture = TlsFixture::new();
    let mut config = fixture.server_config();
    config.server_cert_passphrase = Some(Passphrase::new("wrong"));

    let mut launcher = Launcher::new(config, endpoint());
    let result = launcher.start().await;

    assert!(matches!(
        result,
        Err(LaunchError::KeyStore(TlsError::Decrypt(_)))
    ));
    assert_eq!(launcher.state(), LaunchState::Unbound);
}

#[tokio::test]
async fn test_missing_passphrase_fails_start() {
    let fixture = TlsFixture::new();
    let mut config = fixture.server_config();
    config.server_cert_passphrase = None;

    let mut launcher = Launcher::new(config, endpoint());
    let result = launcher.start().await;

    assert!(matches!(
        result,
        Err(LaunchError::KeyStore(TlsError::PassphraseRequired(_)))
    ));
}

#[tokio::test]
async fn test_registry_port_in_use() {
    let fixture = TlsFixture::new();
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = fixture.server_config();
    config.registry_address = occupied.local_addr().unwrap().to_string();

    let mut launcher = Launcher::new(config, endpoint());
    let result = launcher.start().await;

    assert!(matches!(result, Err(LaunchError::Registry { .. })));
    assert_eq!(launcher.state(), LaunchState::Unbound);
}

#[tokio::test]
async fn test_endpoint_port_in_use() {
    let fixture = TlsFixture::new();
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = fixture.server_config();
    config.bind_address = occupied.local_addr().unwrap().to_string();

    let mut launcher = Launcher::new(config, endpoint());
    let result = launcher.start().await;

    assert!(matches!(result, Err(LaunchError::Bind { .. })));
    assert_eq!(launcher.state(), LaunchState::Unbound);
}

#[tokio::test]
async fn test_name_collision_then_retry() {
    let fixture = TlsFixture::new();
    let registry = Arc::new(Registry::new());

    let mut first = Launcher::with_registry(fixture.server_config(), endpoint(), registry.clone());
    let running = first.start().await.unwrap();
    assert_eq!(running.registry_addr(), None);

    let mut second = Launcher::with_registry(fixture.server_config(), endpoint(), registry.clone());
    let result = second.start().await;
    assert!(matches!(
        result,
        Err(LaunchError::NameTaken(name)) if name == "PasswordManagerService"
    ));
    assert_eq!(second.state(), LaunchState::Unbound);

    // The first binding is untouched.
    assert_eq!(
        registry.lookup("PasswordManagerService").as_deref(),
        Some(running.advertised())
    );

    running.shutdown().await;
    assert_eq!(registry.lookup("PasswordManagerService"), None);

    let retried = second.start().await.unwrap();
    assert_eq!(second.state(), LaunchState::EndpointBound);
    assert_eq!(
        registry.lookup("PasswordManagerService").as_deref(),
        Some(retried.advertised())
    );
    retried.shutdown().await;
}

#[tokio::test]
async fn test_unencrypted_key_store_without_passphrase() {
    use passvault_tls::cert::{build_self_signed, CertParams};
    use passvault_tls::keystore::write_key_store;

    let fixture = TlsFixture::new();
    let plain = fixture.dir.path().join("plain.pem");
    let identity = build_self_signed(&CertParams::default()).unwrap();
    write_key_store(&plain, &identity, None, common::TEST_KDF_ITERATIONS).unwrap();

    let mut config = fixture.server_config();
    config.server_cert_path = plain;
    config.server_cert_passphrase = None;

    let mut launcher = Launcher::new(config, endpoint());
    let running = launcher.start().await.unwrap();
    running.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_returns_launcher_to_unbound() {
    let fixture = TlsFixture::new();
    let mut launcher = Launcher::new(fixture.server_config(), endpoint());

    let first = launcher.start().await.unwrap();
    assert_eq!(launcher.state(), LaunchState::EndpointBound);
    first.shutdown().await;
    assert_eq!(launcher.state(), LaunchState::Unbound);

    let second = launcher.start().await.unwrap();
    assert_eq!(launcher.state(), LaunchState::EndpointBound);
    assert_eq!(
        second.registry().lookup("PasswordManagerService").as_deref(),
        Some(second.advertised())
    );
    second.shutdown().await;
    assert_eq!(launcher.state(), LaunchState::Unbound);
}
