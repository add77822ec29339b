//! Collaborator traits: identity, directory, and the attendance book.
//!
//! Rollcall doesn't know how your school stores teachers, classes, or
//! attendance. These traits are the seams: implement them over your
//! database, an HTTP API, or (in tests) a couple of `HashMap`s.
//!
//! Every method returns a `Send` future so the server can call it from
//! any Tokio worker thread. Implementors can simply write `async fn`.

use std::future::Future;

use rollcall_codes::ActiveCode;
use rollcall_protocol::{Module, UserId};

use crate::AttendanceError;

/// Turns a client credential into a user id.
///
/// The returned id is trusted as-is for the rest of the connection.
///
/// # Example
///
/// ```rust
/// use rollcall_attendance::{AttendanceError, IdentityResolver};
/// use rollcall_protocol::UserId;
///
/// /// Uses the token itself as the user id. Development only.
/// struct DevResolver;
///
/// impl IdentityResolver for DevResolver {
///     async fn resolve(&self, token: &str) -> Result<UserId, AttendanceError> {
///         if token.is_empty() {
///             return Err(AttendanceError::AuthFailed("empty token".into()));
///         }
///         Ok(UserId::new(token))
///     }
/// }
/// ```
pub trait IdentityResolver: Send + Sync + 'static {
    /// Validates `token` and returns who it belongs to.
    ///
    /// # Returns
    /// - `Ok(UserId)`: the caller's identity
    /// - `Err(AttendanceError::AuthFailed)`: the token is invalid or expired
    fn resolve(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<UserId, AttendanceError>> + Send;
}

/// A teacher's subjects, plus the classes for the first of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectsAndClasses {
    pub subjects: Vec<String>,
    pub classes: Vec<String>,
}

/// Read-only view of who teaches what. Only used to fill the teacher's
/// pickers before a code is requested.
pub trait Directory: Send + Sync + 'static {
    /// Subjects taught by `teacher_id` and the classes of the first subject.
    fn subjects_and_classes(
        &self,
        teacher_id: &UserId,
    ) -> impl Future<Output = Result<SubjectsAndClasses, AttendanceError>> + Send;

    /// Classes `teacher_id` teaches `subject` to.
    fn classes(
        &self,
        teacher_id: &UserId,
        subject: &str,
    ) -> impl Future<Output = Result<Vec<String>, AttendanceError>> + Send;

    /// Every module (time slot) a roll call can be taken for.
    fn modules(&self) -> impl Future<Output = Result<Vec<Module>, AttendanceError>> + Send;
}

/// Where attendance ends up.
pub trait AttendanceBook: Send + Sync + 'static {
    /// Called once per issued code, before the code is handed to the
    /// teacher. Typically creates "absent" rows for every student in
    /// `code.session()` so redemptions only have to flip them.
    fn prepare_students(
        &self,
        code: &ActiveCode,
    ) -> impl Future<Output = Result<(), AttendanceError>> + Send;

    /// Called once per successful redemption. The returned message is
    /// passed back to the student verbatim.
    fn register_attendance(
        &self,
        student_id: &UserId,
        code: &ActiveCode,
    ) -> impl Future<Output = Result<String, AttendanceError>> + Send;
}
