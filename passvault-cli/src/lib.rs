//! Passvault client library.
//!
//! [`PassvaultClient`] finds the endpoint through the discovery registry,
//! connects over TLS and exposes one method per remote operation. Every
//! method returns the business outcome in `Ok` and any transport fault as
//! a [`TransportError`].

pub mod client;
pub mod error;

pub use client::{lookup_endpoint, PassvaultClient};
pub use error::TransportError;
