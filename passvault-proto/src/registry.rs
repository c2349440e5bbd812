//! Discovery registry messages.
//!
//! The registry maps a discovery name to the `host:port` where the
//! endpoint accepts TLS connections. It carries locations only, never
//! secrets, and runs over plain TCP. Bind and unbind are honoured only
//! for peers on the registry's own host.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryRequest {
    /// Associate `name` with `endpoint`. Fails if the name is taken.
    Bind { name: String, endpoint: String },
    Lookup { name: String },
    Unbind { name: String },
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryResponse {
    Bound,
    AlreadyBound,
    /// Lookup result; `None` when nothing is bound under the name.
    Location(Option<String>),
    /// Whether an entry existed before the unbind.
    Unbound(bool),
    Names(Vec<String>),
    /// The registry does not change bindings for this peer.
    Refused,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_wire_shape() {
        let bind = RegistryRequest::Bind {
            name: "PasswordManagerService".to_string(),
            endpoint: "127.0.0.1:4433".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&bind).unwrap(),
            r#"{"bind":{"name":"PasswordManagerService","endpoint":"127.0.0.1:4433"}}"#
        );
        assert_eq!(
            serde_json::to_string(&RegistryRequest::List).unwrap(),
            r#""list""#
        );
        assert_eq!(
            serde_json::to_string(&RegistryResponse::Location(None)).unwrap(),
            r#"{"location":null}"#
        );
        assert_eq!(
            serde_json::to_string(&RegistryResponse::Refused).unwrap(),
            r#""refused""#
        );
    }
}
