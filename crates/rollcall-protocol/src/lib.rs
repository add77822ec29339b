//! Wire protocol for Rollcall.
//!
//! - **Types** ([`Envelope`], [`Message`], [`AttendanceOutcome`], ids and
//!   [`Coordinates`]): what travels between client and server.
//! - **Codec** ([`Codec`], [`JsonCodec`]): how those types become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Attendance (codes, outcomes)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    AttendanceOutcome, ClassSession, Coordinates, Envelope, Message, Module,
    ModuleId, UserId,
};
