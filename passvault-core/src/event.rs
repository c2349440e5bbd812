//! Call events emitted by the service endpoint.
//!
//! One [`CallEvent`] is produced per endpoint call, whatever the outcome.
//! Its `Display` form is the human-readable line shown by log viewers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Rejection;

/// Remote operation that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Register,
    Authenticate,
    AddService,
    GetService,
    ChangeService,
    DeleteService,
    ListServices,
}

impl Operation {
    /// Stable snake_case name, matching the serde form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Register => "register",
            Operation::Authenticate => "authenticate",
            Operation::AddService => "add_service",
            Operation::GetService => "get_service",
            Operation::ChangeService => "change_service",
            Operation::DeleteService => "delete_service",
            Operation::ListServices => "list_services",
        }
    }
}

impl Operation {
    /// Name used in failure log lines, e.g. `addPassword FAILED ...`.
    pub fn log_name(&self) -> &'static str {
        match self {
            Operation::Register => "registerUser",
            Operation::Authenticate => "authenticateUser",
            Operation::AddService => "addPassword",
            Operation::GetService => "getPassword",
            Operation::ChangeService => "changePassword",
            Operation::DeleteService => "deletePassword",
            Operation::ListServices => "listServices",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a call as recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum Outcome {
    Applied,
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

impl<T> From<&Result<T, Rejection>> for Outcome {
    fn from(result: &Result<T, Rejection>) -> Self {
        match result {
            Ok(_) => Outcome::Applied,
            Err(rejection) => Outcome::Rejected(*rejection),
        }
    }
}

/// A structured record of one endpoint call.
///
/// Never carries secrets: only the operation, the username, the service
/// name where one applies, and the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEvent {
    /// When the call completed.
    pub ts: DateTime<Utc>,

    pub operation: Operation,

    pub username: String,

    /// Service name for per-service operations.
    pub service: Option<String>,

    pub outcome: Outcome,

    /// Number of names returned, for `list_services`.
    pub listed: Option<usize>,
}

impl CallEvent {
    /// Create a new event with the current timestamp.
    pub fn new(operation: Operation, username: impl Into<String>, outcome: Outcome) -> Self {
        Self::with_timestamp(Utc::now(), operation, username, outcome)
    }

    /// Create a new event with a specific timestamp.
    pub fn with_timestamp(
        ts: DateTime<Utc>,
        operation: Operation,
        username: impl Into<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            ts,
            operation,
            username: username.into(),
            service: None,
            outcome,
            listed: None,
        }
    }

    /// Attach the service name (builder pattern).
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Attach the number of listed services (builder pattern).
    pub fn with_listed(mut self, count: usize) -> Self {
        self.listed = Some(count);
        self
    }
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = &self.username;
        let service = self.service.as_deref().unwrap_or("");

        match (self.operation, self.outcome) {
            (Operation::Register, Outcome::Applied) => {
                write!(f, "[SERVER] Registered user: {user}")
            }
            (Operation::Authenticate, Outcome::Applied) => {
                write!(f, "[SERVER] Authenticated user: {user}")
            }
            (Operation::Authenticate, Outcome::Rejected(Rejection::SecretMismatch)) => {
                write!(f, "[SERVER] Authentication FAILED for: {user}")
            }
            (Operation::AddService, Outcome::Applied) => {
                write!(f, "[SERVER] [{user}] Added service: {service}")
            }
            (Operation::GetService, Outcome::Applied) => {
                write!(f, "[SERVER] [{user}] Retrieved password for: {service}")
            }
            (Operation::ChangeService, Outcome::Applied) => {
                write!(f, "[SERVER] [{user}] Changed password for: {service}")
            }
            (Operation::DeleteService, Outcome::Applied) => {
                write!(f, "[SERVER] [{user}] Deleted service: {service}")
            }
            (Operation::ListServices, Outcome::Applied) => write!(
                f,
                "[SERVER] [{user}] Listing services: {}",
                self.listed.unwrap_or(0)
            ),
            (op, Outcome::Rejected(rejection)) => {
                let op = op.log_name();
                match rejection {
                    Rejection::UserExists => write!(f, "[SERVER] {op} FAILED (exists): {user}"),
                    Rejection::UserNotFound => write!(f, "[SERVER] {op} FAILED (no user): {user}"),
                    Rejection::ServiceExists => {
                        write!(f, "[SERVER] {op} FAILED (service exists): {user} → {service}")
                    }
                    Rejection::ServiceNotFound => {
                        write!(f, "[SERVER] {op} FAILED (no service): {user} → {service}")
                    }
                    Rejection::SecretMismatch => {
                        write!(f, "[SERVER] {op} FAILED (secret mismatch): {user}")
                    }
                    Rejection::ListingFull => {
                        write!(f, "[SERVER] {op} FAILED (listing full): {user} → {service}")
                    }
                }
            }
        }
    }
}
