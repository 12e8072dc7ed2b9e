//! Service mode: the engine behind a local socket.
//!
//! Frames are single lines of JSON. Clients send [`protocol::ClientFrame`]
//! requests and receive [`protocol::ServerFrame`] responses interleaved
//! with state-change pushes once subscribed.

pub mod client;
pub mod protocol;
pub mod server;
