//! Passvault protocol - wire types for client, endpoint and registry.
//!
//! Every message travels as one length-delimited frame (see [`framing`])
//! whose payload is the JSON encoding of a message enum.

pub mod framing;
pub mod messages;
pub mod registry;

pub use framing::{read_message, write_message, FrameError, MAX_FRAME_SIZE};
pub use messages::{Request, Response};
pub use registry::{RegistryRequest, RegistryResponse};
