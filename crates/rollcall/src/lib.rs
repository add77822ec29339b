//! # Rollcall
//!
//! Classroom attendance over WebSocket.
//!
//! A teacher asks the server for a short code (optionally pinned to the
//! classroom's coordinates) and writes it on the board. Students type the
//! code into their client within its lifetime, from close enough to the
//! classroom, and are marked present.
//!
//! You implement three traits for your school's systems:
//! [`IdentityResolver`](prelude::IdentityResolver),
//! [`Directory`](prelude::Directory) and
//! [`AttendanceBook`](prelude::AttendanceBook). The server handles the
//! transport, the handshake, code issuing, expiry, and the geofence.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rollcall::prelude::*;
//!
//! // Implement the collaborator traits, then:
//! // let server = RollcallServer::builder()
//! //     .bind("0.0.0.0:8080")
//! //     .build(resolver, directory, book)
//! //     .await?;
//! // server.run().await
//! ```

mod error;
mod handler;
mod server;
mod transport;

pub use error::RollcallError;
pub use server::{PROTOCOL_VERSION, RollcallServer, RollcallServerBuilder};
pub use transport::{ConnectionId, TransportError};

/// Everything needed to implement the collaborators and start a server.
pub mod prelude {
    pub use crate::{PROTOCOL_VERSION, RollcallError, RollcallServer, RollcallServerBuilder};
    pub use rollcall_attendance::{
        AttendanceBook, AttendanceConfig, AttendanceError, Directory, IdentityResolver,
        SubjectsAndClasses,
    };
    pub use rollcall_codes::{ActiveCode, CodeConfig};
    pub use rollcall_protocol::{
        AttendanceOutcome, ClassSession, Coordinates, Envelope, Message, Module, ModuleId,
        UserId,
    };
}
