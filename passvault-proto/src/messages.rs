//! Endpoint request and response messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A call from a client to the service endpoint.
///
/// Strings are carried verbatim; the endpoint applies them literally.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    Register {
        username: String,
        master_secret: String,
    },
    Authenticate {
        username: String,
        master_secret: String,
    },
    AddService {
        username: String,
        service: String,
        secret: String,
    },
    GetService {
        username: String,
        service: String,
    },
    ChangeService {
        username: String,
        service: String,
        new_secret: String,
    },
    DeleteService {
        username: String,
        service: String,
    },
    ListServices {
        username: String,
    },
}

impl Request {
    /// Wire name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Register { .. } => "register",
            Request::Authenticate { .. } => "authenticate",
            Request::AddService { .. } => "add_service",
            Request::GetService { .. } => "get_service",
            Request::ChangeService { .. } => "change_service",
            Request::DeleteService { .. } => "delete_service",
            Request::ListServices { .. } => "list_services",
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Request::Register { username, .. }
            | Request::Authenticate { username, .. }
            | Request::AddService { username, .. }
            | Request::GetService { username, .. }
            | Request::ChangeService { username, .. }
            | Request::DeleteService { username, .. }
            | Request::ListServices { username } => username,
        }
    }

    /// Service name, for per-service operations.
    pub fn service(&self) -> Option<&str> {
        match self {
            Request::AddService { service, .. }
            | Request::GetService { service, .. }
            | Request::ChangeService { service, .. }
            | Request::DeleteService { service, .. } => Some(service),
            Request::Register { .. }
            | Request::Authenticate { .. }
            | Request::ListServices { .. } => None,
        }
    }
}

// Secrets never reach Debug output.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Request");
        s.field("op", &self.name())
            .field("username", &self.username());
        if let Some(service) = self.service() {
            s.field("service", &service);
        }
        s.finish_non_exhaustive()
    }
}

/// The endpoint's answer to one [`Request`].
///
/// Business outcomes only: a `false`, a missing secret or an empty list.
/// Transport problems never appear here; they end the connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    /// `true` when the operation was applied (or, for authenticate, matched).
    Outcome(bool),
    /// Stored secret, `None` when the user or service does not exist.
    Secret(Option<String>),
    /// Service names in no particular order.
    Services(Vec<String>),
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Outcome(ok) => f.debug_tuple("Outcome").field(ok).finish(),
            Response::Secret(secret) => f
                .debug_tuple("Secret")
                .field(&secret.as_ref().map(|_| "<redacted>"))
                .finish(),
            Response::Services(names) => f.debug_tuple("Services").field(names).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let req = Request::AddService {
            username: "alice".to_string(),
            service: "gmail".to_string(),
            secret: "hunter2".to_string(),
        };

        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"add_service":{"username":"alice","service":"gmail","secret":"hunter2"}}"#
        );
        assert_eq!(serde_json::from_str::<Request>(&json).unwrap(), req);
    }

    #[test]
    fn response_wire_shape() {
        assert_eq!(
            serde_json::to_string(&Response::Outcome(false)).unwrap(),
            r#"{"outcome":false}"#
        );
        assert_eq!(
            serde_json::to_string(&Response::Secret(None)).unwrap(),
            r#"{"secret":null}"#
        );
        assert_eq!(
            serde_json::to_string(&Response::Services(vec![])).unwrap(),
            r#"{"services":[]}"#
        );
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let json = r#"{"delete_user":{"username":"alice"}}"#;
        assert!(serde_json::from_str::<Request>(json).is_err());
    }

    #[test]
    fn debug_hides_secrets() {
        let req = Request::Register {
            username: "alice".to_string(),
            master_secret: "hunter2".to_string(),
        };
        let resp = Response::Secret(Some("hunter2".to_string()));

        let rendered = format!("{req:?} {resp:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("alice"));
        assert!(rendered.contains("register"));
    }

    #[test]
    fn accessors() {
        let req = Request::ChangeService {
            username: "bob".to_string(),
            service: "bank".to_string(),
            new_secret: "s".to_string(),
        };
        assert_eq!(req.name(), "change_service");
        assert_eq!(req.username(), "bob");
        assert_eq!(req.service(), Some("bank"));

        let list = Request::ListServices {
            username: "bob".to_string(),
        };
        assert_eq!(list.service(), None);
    }
}
