//! Observable types published to the host.
//!
//! Everything derives `serde::Serialize` + `serde::Deserialize` so a host UI
//! can forward events verbatim as JSON.

pub mod events;
