//! Error types for the attendance layer.
//!
//! None of these are user mistakes. A wrong code or a student standing
//! outside the geofence is an
//! [`AttendanceOutcome`](rollcall_protocol::AttendanceOutcome), returned
//! as data. An `AttendanceError` means the system could not do its job.

use std::time::Duration;

use rollcall_codes::CodeError;

/// Errors that can occur while issuing or redeeming attendance codes.
#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    /// The identity resolver rejected the caller's credential.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A code-layer error that reached the caller: invalid coordinates,
    /// closing an unknown code, or closing another teacher's code.
    #[error(transparent)]
    Code(#[from] CodeError),

    /// Every generated candidate collided with a live code.
    #[error("no free attendance code after {attempts} attempts")]
    Capacity { attempts: u32 },

    /// A collaborator (directory or attendance book) reported a failure.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// A collaborator didn't answer within the hook timeout.
    #[error("{hook} timed out after {after:?}")]
    Timeout { hook: &'static str, after: Duration },
}
