//! Outbound message pacing.
//!
//! Sends to one or many recipients strictly in sequence, simulating a human
//! cadence (typing presence, inter-message delays) so a burst of sends does
//! not trip the network's abuse heuristics. One recipient's failure never
//! aborts the rest; every call returns a full per-recipient report.

pub mod normalize;
pub mod pacer;

pub use {
    normalize::normalize_recipient,
    pacer::{MessagePacer, RecipientReport, SendOptions, SendReport},
};
