//! In-memory credential storage with per-user locking.
//!
//! Records live in a `DashMap` keyed by username. Each value is an
//! `Arc<RwLock<UserRecord>>`, so an operation holds the map shard only long
//! enough to clone the `Arc` and then works under that user's own lock.
//! Calls on the same user serialize; calls on different users never wait on
//! each other.

use std::collections::hash_map;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

/// Why a store operation was not applied.
///
/// Clients only ever see the boolean / optional outcome; the reason is kept
/// for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    #[error("username already exists")]
    UserExists,
    #[error("user not found")]
    UserNotFound,
    #[error("service already exists")]
    ServiceExists,
    #[error("service not found")]
    ServiceNotFound,
    #[error("master secret does not match")]
    SecretMismatch,
    #[error("service listing would exceed the response size limit")]
    ListingFull,
}

/// Largest JSON-encoded service listing a user may accumulate, in bytes.
///
/// Sized so a full `list_services` answer, envelope included, still fits in
/// one 1 MiB wire frame.
pub const MAX_LISTING_BYTES: usize = 1024 * 1024 - 64;

/// Bytes `name` adds to a JSON array of strings: the escaped text, two
/// quotes and a separating comma.
fn listing_cost(name: &str) -> usize {
    let escaped: usize = name
        .chars()
        .map(|c| match c {
            '"' | '\\' | '\u{08}' | '\u{0c}' | '\n' | '\r' | '\t' => 2,
            c if (c as u32) < 0x20 => 6,
            c => c.len_utf8(),
        })
        .sum();
    escaped + 3
}

/// State held for one registered user.
///
/// Secrets are stored verbatim; `Zeroizing` only wipes the memory when a
/// value is replaced or dropped.
struct UserRecord {
    master_secret: Zeroizing<String>,
    services: HashMap<String, Zeroizing<String>>,
    /// Sum of `listing_cost` over the service names.
    listing_bytes: usize,
}

impl UserRecord {
    fn new(master_secret: &str) -> Self {
        Self {
            master_secret: Zeroizing::new(master_secret.to_owned()),
            services: HashMap::new(),
            listing_bytes: 0,
        }
    }
}

/// In-memory credential store.
pub struct CredentialStore {
    users: DashMap<String, Arc<RwLock<UserRecord>>>,
    listing_limit: usize,
}

impl CredentialStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::with_listing_limit(MAX_LISTING_BYTES)
    }

    /// Create a store whose per-user service listing is capped at
    /// `limit` encoded bytes.
    pub fn with_listing_limit(limit: usize) -> Self {
        Self {
            users: DashMap::new(),
            listing_limit: limit,
        }
    }

    /// Clone the handle for one user's record out of the map.
    ///
    /// The shard guard is dropped before this returns, so callers may await
    /// the record lock freely.
    fn user(&self, username: &str) -> Option<Arc<RwLock<UserRecord>>> {
        self.users.get(username).map(|entry| Arc::clone(entry.value()))
    }

    /// Create a user with an empty service map.
    ///
    /// An existing username is never overwritten.
    pub async fn register(&self, username: &str, master_secret: &str) -> Result<(), Rejection> {
        match self.users.entry(username.to_owned()) {
            Entry::Occupied(_) => Err(Rejection::UserExists),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(UserRecord::new(master_secret))));
                Ok(())
            }
        }
    }

    /// Check a master secret. Exact match, compared in constant time.
    pub async fn authenticate(&self, username: &str, master_secret: &str) -> Result<(), Rejection> {
        let user = self.user(username).ok_or(Rejection::UserNotFound)?;
        let record = user.read().await;

        if record
            .master_secret
            .as_bytes()
            .ct_eq(master_secret.as_bytes())
            .into()
        {
            Ok(())
        } else {
            Err(Rejection::SecretMismatch)
        }
    }

    /// Insert a new service entry. Duplicates are rejected, not overwritten,
    /// and so is a name that would push the listing past the size limit.
    pub async fn add_service(
        &self,
        username: &str,
        service: &str,
        secret: &str,
    ) -> Result<(), Rejection> {
        let user = self.user(username).ok_or(Rejection::UserNotFound)?;
        let mut record = user.write().await;
        let record = &mut *record;

        match record.services.entry(service.to_owned()) {
            hash_map::Entry::Occupied(_) => Err(Rejection::ServiceExists),
            hash_map::Entry::Vacant(slot) => {
                // Two bytes for the array brackets.
                let grown = record.listing_bytes + listing_cost(service);
                if grown + 2 > self.listing_limit {
                    return Err(Rejection::ListingFull);
                }
                slot.insert(Zeroizing::new(secret.to_owned()));
                record.listing_bytes = grown;
                Ok(())
            }
        }
    }

    /// Get the stored secret for a service.
    pub async fn get_service(&self, username: &str, service: &str) -> Result<String, Rejection> {
        let user = self.user(username).ok_or(Rejection::UserNotFound)?;
        let record = user.read().await;

        record
            .services
            .get(service)
            .map(|secret| String::clone(secret))
            .ok_or(Rejection::ServiceNotFound)
    }

    /// Overwrite the secret of an existing service. Never creates one.
    pub async fn change_service(
        &self,
        username: &str,
        service: &str,
        new_secret: &str,
    ) -> Result<(), Rejection> {
        let user = self.user(username).ok_or(Rejection::UserNotFound)?;
        let mut record = user.write().await;

        let slot = record
            .services
            .get_mut(service)
            .ok_or(Rejection::ServiceNotFound)?;
        *slot = Zeroizing::new(new_secret.to_owned());
        Ok(())
    }

    /// Remove a service entry.
    pub async fn delete_service(&self, username: &str, service: &str) -> Result<(), Rejection> {
        let user = self.user(username).ok_or(Rejection::UserNotFound)?;
        let mut record = user.write().await;

        record
            .services
            .remove(service)
            .ok_or(Rejection::ServiceNotFound)?;
        record.listing_bytes -= listing_cost(service);
        Ok(())
    }

    /// List a user's service names. Order is unspecified.
    pub async fn list_services(&self, username: &str) -> Result<Vec<String>, Rejection> {
        let user = self.user(username).ok_or(Rejection::UserNotFound)?;
        let record = user.read().await;
        Ok(record.services.keys().cloned().collect())
    }

    /// Number of registered users.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of services stored for `username`, `None` for an unknown user.
    pub async fn service_count(&self, username: &str) -> Option<usize> {
        let user = self.user(username)?;
        let record = user.read().await;
        Some(record.services.len())
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("users", &self.users.len())
            .field("listing_limit", &self.listing_limit)
            .finish()
    }
}
