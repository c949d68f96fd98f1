//! Session registry and connection supervision.
//!
//! A session is one logical account on the messaging network. The registry
//! owns the authoritative id-to-record map; the supervisor drives each
//! session's connection lifecycle (handshake artifacts, reconnect backoff,
//! terminal ban detection) and reports every transition to the webhook
//! delivery engine.

pub mod artifact;
pub mod config;
pub mod error;
pub mod registry;
pub mod state;
pub mod supervisor;

pub use {
    artifact::Artifact,
    config::{SessionConfig, SessionConfigPatch},
    error::SessionError,
    registry::{SessionRecord, SessionRegistry, SessionSummary, SessionView},
    state::{ConnEvent, Effect, ReconnectPolicy, SessionState, Transition, transition},
    supervisor::{ConnectionSupervisor, SupervisorConfig},
};
