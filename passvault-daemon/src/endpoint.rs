//! The service endpoint.
//!
//! Exposes the credential store operations to remote callers. Every call
//! produces exactly one [`CallEvent`] for the injected log sink, whatever
//! the outcome. Rejection reasons reach the log only; callers see `false`,
//! `None` or an empty list.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use passvault_core::{CallEvent, CredentialStore, LogSink, Operation, Outcome};
use passvault_proto::{Request, Response};

#[derive(Clone)]
pub struct Endpoint {
    store: Arc<CredentialStore>,
    sink: Option<Arc<dyn LogSink>>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("store", &self.store)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Endpoint {
    pub fn new(store: Arc<CredentialStore>, sink: Option<Arc<dyn LogSink>>) -> Self {
        Self { store, sink }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub async fn register(&self, username: &str, master_secret: &str) -> bool {
        let result = self.store.register(username, master_secret).await;
        self.emit(CallEvent::new(Operation::Register, username, Outcome::from(&result)));
        result.is_ok()
    }

    pub async fn authenticate(&self, username: &str, master_secret: &str) -> bool {
        let result = self.store.authenticate(username, master_secret).await;
        self.emit(CallEvent::new(
            Operation::Authenticate,
            username,
            Outcome::from(&result),
        ));
        result.is_ok()
    }

    /// `false` covers both an unknown user and an existing service.
    pub async fn add_service(&self, username: &str, service: &str, secret: &str) -> bool {
        let result = self.store.add_service(username, service, secret).await;
        self.emit(
            CallEvent::new(Operation::AddService, username, Outcome::from(&result))
                .with_service(service),
        );
        result.is_ok()
    }

    pub async fn get_service(&self, username: &str, service: &str) -> Option<String> {
        let result = self.store.get_service(username, service).await;
        self.emit(
            CallEvent::new(Operation::GetService, username, Outcome::from(&result))
                .with_service(service),
        );
        result.ok()
    }

    pub async fn change_service(&self, username: &str, service: &str, new_secret: &str) -> bool {
        let result = self
            .store
            .change_service(username, service, new_secret)
            .await;
        self.emit(
            CallEvent::new(Operation::ChangeService, username, Outcome::from(&result))
                .with_service(service),
        );
        result.is_ok()
    }

    pub async fn delete_service(&self, username: &str, service: &str) -> bool {
        let result = self.store.delete_service(username, service).await;
        self.emit(
            CallEvent::new(Operation::DeleteService, username, Outcome::from(&result))
                .with_service(service),
        );
        result.is_ok()
    }

    /// Service names in no particular order; empty for an unknown user.
    pub async fn list_services(&self, username: &str) -> Vec<String> {
        let result = self.store.list_services(username).await;
        let mut event = CallEvent::new(Operation::ListServices, username, Outcome::from(&result));
        if let Ok(names) = &result {
            event = event.with_listed(names.len());
        }
        self.emit(event);
        result.unwrap_or_default()
    }

    /// Dispatch one wire request.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Register {
                username,
                master_secret,
            } => Response::Outcome(self.register(&username, &master_secret).await),
            Request::Authenticate {
                username,
                master_secret,
            } => Response::Outcome(self.authenticate(&username, &master_secret).await),
            Request::AddService {
                username,
                service,
                secret,
            } => Response::Outcome(self.add_service(&username, &service, &secret).await),
            Request::GetService { username, service } => {
                Response::Secret(self.get_service(&username, &service).await)
            }
            Request::ChangeService {
                username,
                service,
                new_secret,
            } => Response::Outcome(
                self.change_service(&username, &service, &new_secret)
                    .await,
            ),
            Request::DeleteService { username, service } => {
                Response::Outcome(self.delete_service(&username, &service).await)
            }
            Request::ListServices { username } => {
                Response::Services(self.list_services(&username).await)
            }
        }
    }

    fn emit(&self, event: CallEvent) {
        tracing::debug!(
            op = %event.operation,
            user = %event.username,
            applied = event.outcome.is_applied(),
            "Endpoint call"
        );

        let Some(sink) = &self.sink else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| sink.emit(&event))).is_err() {
            tracing::warn!(op = %event.operation, "Log sink panicked, event dropped");
        }
    }
}
