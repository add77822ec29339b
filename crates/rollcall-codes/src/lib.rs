//! Attendance code lifecycle for Rollcall.
//!
//! This crate owns everything that happens to an attendance code between
//! the moment a teacher asks for one and the moment it expires:
//!
//! 1. **Generation**: short, typeable candidates ([`CodeGenerator`])
//! 2. **Registration**: an atomic uniqueness check against every live
//!    code ([`CodeRegistry::try_register`])
//! 3. **Redemption**: lookup plus geofence validation
//!    ([`CodeRegistry::lookup`], [`RedemptionValidator`]) and per-student
//!    bookkeeping ([`ActiveCode::begin_redemption`])
//! 4. **Expiry**: lazy on every access, plus a periodic [`Sweeper`]
//!
//! # How it fits in the stack
//!
//! ```text
//! Attendance service (above)  ← retries generation, calls roster hooks
//!     ↕
//! Code layer (this crate)     ← codes, TTLs, geofences
//!     ↕
//! Protocol layer (below)      ← UserId, Coordinates, ClassSession
//! ```

mod config;
mod error;
mod generator;
mod geofence;
mod registry;
mod sweep;

pub use config::CodeConfig;
pub use error::CodeError;
pub use generator::{CODE_ALPHABET, CodeGenerator, RandomCodeGenerator, normalize_code};
pub use geofence::{EARTH_RADIUS_M, GeofenceViolation, RedemptionValidator, haversine_m};
pub use registry::{ActiveCode, CodeRegistry, NewCode, Redemption};
pub use sweep::{SharedRegistry, Sweeper, spawn_sweeper};
