//! Unified error type for the Rollcall server.

use rollcall_attendance::AttendanceError;
use rollcall_codes::CodeError;
use rollcall_protocol::ProtocolError;

use crate::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls,
/// so `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RollcallError {
    /// A transport-level error (bind, upgrade, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A code-layer error (collision, not found, not issuer).
    #[error(transparent)]
    Code(#[from] CodeError),

    /// An attendance-layer error (auth, capacity, collaborator failure).
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
}
