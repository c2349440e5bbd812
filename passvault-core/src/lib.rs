//! # Passvault Core
//!
//! The credential store and the call-event types shared by the passvault
//! daemon and its log consumers.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No logging backend
//!
//! State lives in memory for the lifetime of the process. The network
//! surface, TLS and discovery live in `passvault-daemon`.
//!
//! ## Modules
//!
//! - [`store`] - Per-user credential records with per-user locking
//! - [`event`] - Structured log events emitted once per endpoint call
//! - [`sink`] - The log sink capability injected into the endpoint

pub mod event;
pub mod sink;
pub mod store;

pub use event::{CallEvent, Operation, Outcome};
pub use sink::LogSink;
pub use store::{CredentialStore, Rejection};
