//! viscalink-transport: the two transports the gateway bridges.
//!
//! ```text
//! controllers/cameras ── TCP (tcp::TcpTarget) ──┐
//!                                               ├── peer logic
//! remote peer ── SRT (srt::SrtEndpoint) ────────┘
//! ```
//!
//! [`srt`] wraps the SRT channel (caller and listener roles, latency and
//! bandwidth tuning, whole-datagram send/recv). [`tcp`] is the downstream
//! connector primitive: one connection attempt per call, retry pacing left
//! to the owning task.

pub mod srt;
pub mod tcp;

pub use srt::{SrtAcceptor, SrtEndpoint, SrtReceiver, SrtSender};
pub use tcp::{TcpTarget, MTU};

use thiserror::Error;

/// SRT channel failures, each carrying the underlying description.
///
/// Bind/listen failures are fatal for the server's listener; connect
/// failures are retried by the client caller; send/recv failures end the
/// session they belong to.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to create SRT socket: {detail}")]
    CreateFailed { detail: String },

    #[error("failed to bind SRT socket: {detail}")]
    BindFailed { detail: String },

    #[error("SRT listener closed: {detail}")]
    ListenFailed { detail: String },

    #[error("failed to connect SRT socket: {detail}")]
    ConnectFailed { detail: String },

    #[error("failed to accept SRT connection: {detail}")]
    AcceptFailed { detail: String },

    #[error("SRT send failed: {detail}")]
    SendFailed { detail: String },

    #[error("SRT channel closed: {detail}")]
    RecvClosed { detail: String },
}
