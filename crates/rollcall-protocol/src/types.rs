//! Core protocol types for Rollcall's wire format.
//!
//! Everything in this module travels between a client (a teacher's or a
//! student's app) and the server. Types that the attendance core also
//! uses internally, such as [`UserId`] and [`Coordinates`], live here so
//! both sides agree on a single definition.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Opaque identifier for a user (teacher or student).
///
/// The value comes from the identity resolver and is trusted as-is. The
/// core never parses it; it only compares and forwards it.
///
/// `#[serde(transparent)]` makes `UserId("t-17")` serialize as the bare
/// string `"t-17"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Creates a `UserId` from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a module, the time slot a roll call is taken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// A point on the earth in decimal degrees (WGS84).
///
/// Both fields are required on the wire, so a point can never be half
/// populated: a JSON object missing `longitude` fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Returns `true` if both values are finite and inside the valid
    /// ranges: latitude in `-90..=90`, longitude in `-180..=180`.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

// ---------------------------------------------------------------------------
// Class sessions and directory data
// ---------------------------------------------------------------------------

/// What a roll call is for: which subject, which class, which module.
///
/// Opaque to the attendance core. It is stored with the code and handed
/// to the roster hooks unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassSession {
    pub subject: String,
    pub class_name: String,
    pub module_id: ModuleId,
}

/// A module a teacher can choose when starting a roll call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    /// Human-readable label, e.g. `"08:15-09:45"`.
    pub name: String,
}

// ---------------------------------------------------------------------------
// AttendanceOutcome
// ---------------------------------------------------------------------------

/// The user-facing result of a redemption attempt.
///
/// Everything here is an *expected* outcome, returned as data. System
/// failures (the roster service being down, a timeout) never show up as
/// an outcome; they travel as [`Message::Error`] instead, so a client can
/// tell "your code was wrong" from "the system failed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttendanceOutcome {
    /// The student was marked present. `message` is whatever the
    /// attendance book answered.
    Registered { message: String },

    /// No code is active anywhere, so there was nothing to match.
    NoActiveCodes,

    /// The submitted code does not match an active code.
    InvalidCode,

    /// The code is geofenced and the student sent no location.
    CoordinatesRequired,

    /// The student is farther than the geofence radius from the center.
    OutOfRange { distance_m: f64 },

    /// This student already redeemed this code.
    AlreadyRegistered,

    /// An earlier attempt by this student on this code is still waiting
    /// on the attendance book. Retrying later is safe.
    RegistrationInProgress,
}

impl AttendanceOutcome {
    /// Returns `true` only for [`AttendanceOutcome::Registered`].
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }
}

impl fmt::Display for AttendanceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered { message } => f.write_str(message),
            Self::NoActiveCodes => f.write_str("No active codes"),
            Self::InvalidCode => f.write_str("Invalid code"),
            Self::CoordinatesRequired => f.write_str("Coordinates required"),
            Self::OutOfRange { distance_m } => {
                write!(f, "Invalid coordinates ({distance_m:.1} m from the classroom)")
            }
            Self::AlreadyRegistered => f.write_str("Attendance already registered"),
            Self::RegistrationInProgress => {
                f.write_str("Attendance registration already in progress")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Message / Envelope
// ---------------------------------------------------------------------------

/// Every message the client and server exchange.
///
/// Internally tagged: `Message::Classes { subject: "Math".into() }`
/// becomes `{"type":"Classes","subject":"Math"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    // -- client → server --------------------------------------------------
    /// First message on every connection.
    Handshake { version: u32, token: String },

    /// Teacher: subjects and classes for the first subject, plus modules.
    InitialInfo,

    /// Teacher: classes taught in `subject`.
    Classes { subject: String },

    /// Teacher: open a roll call and get a code for it.
    RequestCode {
        subject: String,
        class_name: String,
        module_id: ModuleId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<Coordinates>,
    },

    /// Teacher: close one of their codes before it expires.
    CloseCode { code: String },

    /// Student: redeem a code.
    RegisterAttendance {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coordinates: Option<Coordinates>,
    },

    /// Either side: the connection is about to close.
    Disconnect { reason: String },

    // -- server → client --------------------------------------------------
    /// Handshake accepted; the caller is `user_id`.
    HandshakeAck { user_id: UserId },

    /// Answer to [`Message::InitialInfo`].
    InitialInfoResult {
        subjects: Vec<String>,
        classes: Vec<String>,
        modules: Vec<Module>,
    },

    /// Answer to [`Message::Classes`].
    ClassList { classes: Vec<String> },

    /// Answer to [`Message::RequestCode`].
    CodeIssued { code: String, expires_in_secs: u64 },

    /// Answer to [`Message::CloseCode`].
    CodeClosed { code: String },

    /// Answer to [`Message::RegisterAttendance`].
    Attendance { outcome: AttendanceOutcome },

    /// A request failed for a system reason. `code` follows HTTP
    /// conventions (400, 401, 403, 404, 503, 504).
    Error { code: u16, message: String },
}

/// The wrapper around every message on the wire.
///
/// `id` is chosen by the client; the server echoes it on the response so
/// the client can pair answers with requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub payload: Message,
}

impl Envelope {
    pub fn new(id: u64, payload: Message) -> Self {
        Self { id, payload }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_user_id_serializes_as_bare_string() {
        let value = serde_json::to_value(UserId::new("t-17")).unwrap();
        assert_eq!(value, json!("t-17"));
    }

    #[test]
    fn test_module_id_display() {
        assert_eq!(ModuleId(3).to_string(), "M-3");
    }

    #[test]
    fn test_coordinates_is_valid_accepts_ranges() {
        assert!(Coordinates::new(55.6761, 12.5683).is_valid());
        assert!(Coordinates::new(-90.0, 180.0).is_valid());
        assert!(Coordinates::new(90.0, -180.0).is_valid());
    }

    #[test]
    fn test_coordinates_is_valid_rejects_out_of_range_and_nan() {
        assert!(!Coordinates::new(90.5, 0.0).is_valid());
        assert!(!Coordinates::new(0.0, -180.1).is_valid());
        assert!(!Coordinates::new(f64::NAN, 0.0).is_valid());
        assert!(!Coordinates::new(0.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn test_coordinates_missing_field_fails_to_decode() {
        let result: Result<Coordinates, _> =
            serde_json::from_value(json!({ "latitude": 55.0 }));
        assert!(result.is_err(), "half a point must not decode");
    }

    #[test]
    fn test_request_code_without_coordinates_omits_field() {
        let msg = Message::RequestCode {
            subject: "Math".into(),
            class_name: "3b".into(),
            module_id: ModuleId(2),
            coordinates: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "RequestCode",
                "subject": "Math",
                "class_name": "3b",
                "module_id": 2,
            })
        );
    }

    #[test]
    fn test_register_attendance_decodes_without_coordinates() {
        let msg: Message = serde_json::from_value(json!({
            "type": "RegisterAttendance",
            "code": "AB12",
        }))
        .unwrap();
        assert_eq!(
            msg,
            Message::RegisterAttendance {
                code: "AB12".into(),
                coordinates: None,
            }
        );
    }

    #[test]
    fn test_outcome_json_uses_status_tag() {
        let out = AttendanceOutcome::OutOfRange { distance_m: 150.0 };
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value, json!({ "status": "out_of_range", "distance_m": 150.0 }));

        let value = serde_json::to_value(AttendanceOutcome::NoActiveCodes).unwrap();
        assert_eq!(value, json!({ "status": "no_active_codes" }));

        let value = serde_json::to_value(AttendanceOutcome::RegistrationInProgress).unwrap();
        assert_eq!(value, json!({ "status": "registration_in_progress" }));
    }

    #[test]
    fn test_outcome_display_messages() {
        assert_eq!(AttendanceOutcome::NoActiveCodes.to_string(), "No active codes");
        assert_eq!(AttendanceOutcome::InvalidCode.to_string(), "Invalid code");
        assert_eq!(
            AttendanceOutcome::CoordinatesRequired.to_string(),
            "Coordinates required"
        );
        let registered = AttendanceOutcome::Registered {
            message: "Attendance registered".into(),
        };
        assert_eq!(registered.to_string(), "Attendance registered");
        assert!(registered.is_registered());
        assert!(!AttendanceOutcome::InvalidCode.is_registered());
        assert!(!AttendanceOutcome::RegistrationInProgress.is_registered());
    }

    #[test]
    fn test_envelope_shape() {
        let env = Envelope::new(7, Message::InitialInfo);
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value, json!({ "id": 7, "payload": { "type": "InitialInfo" } }));
    }
}
