//! Interfaces to the external messaging-network client library.
//!
//! The wire protocol itself is owned by an external library; waplex only
//! sees an opaque [`Connection`] object, its event stream, and a credential
//! [`SessionStore`]. Everything here is a seam for injection so the rest of
//! the workspace can be exercised against test doubles.

pub mod connection;
pub mod store;
pub mod types;

pub use {
    connection::{Connection, ConnectionFactory, ConnectionHandle},
    store::{MemorySessionStore, SessionStore, SnapshotSink},
    types::{ClientEvent, DisconnectReason, IncomingMessage, OutboundContent, Presence},
};
