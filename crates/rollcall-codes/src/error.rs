//! Error types for the code layer.

use rollcall_protocol::{Coordinates, UserId};

/// Errors that can occur while registering or closing attendance codes.
#[derive(Debug, thiserror::Error)]
pub enum CodeError {
    /// A live code with this value already exists. The caller is expected
    /// to generate a new candidate and try again.
    #[error("code {0} is already active")]
    Collision(String),

    /// Coordinates outside the valid latitude/longitude ranges, or not
    /// finite.
    #[error("invalid coordinates {0}")]
    InvalidCoordinates(Coordinates),

    /// No live code with this value.
    #[error("code {0} not found")]
    NotFound(String),

    /// The code exists but was issued by another teacher.
    #[error("code {code} was not issued by {teacher_id}")]
    NotIssuer { code: String, teacher_id: UserId },
}
