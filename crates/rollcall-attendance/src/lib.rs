//! Roll call orchestration for Rollcall.
//!
//! This crate ties the code layer to the outside world:
//!
//! 1. **Collaborators**: who the caller is ([`IdentityResolver`]), what a
//!    teacher teaches ([`Directory`]), and where attendance is written
//!    ([`AttendanceBook`]). The server doesn't implement any of them;
//!    you plug in your school's systems.
//! 2. **Orchestration**: [`AttendanceService`] runs the two flows that
//!    matter, issuing a code and redeeming one, with bounded retries and
//!    a timeout on every collaborator call.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)                ← handshake, request routing
//!     ↕
//! Attendance layer (this crate) ← generate → register → prepare roster
//!                                  lookup → geofence → mark present
//!     ↕
//! Code layer (below)            ← generator, registry, validator
//! ```

mod config;
mod error;
mod roster;
mod service;

pub use config::AttendanceConfig;
pub use error::AttendanceError;
pub use roster::{AttendanceBook, Directory, IdentityResolver, SubjectsAndClasses};
pub use service::{AttendanceService, InitialInfo};
