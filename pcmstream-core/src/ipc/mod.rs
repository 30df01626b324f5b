//! Types published to engine subscribers over broadcast channels.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host
//! application can relay them to its own UI transport.

pub mod events;
