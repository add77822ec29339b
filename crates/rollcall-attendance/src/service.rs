//! The attendance service: the two flows everything else calls.
//!
//! ```text
//! generate_code:        generate ─→ try_register ─┬─→ prepare_students ─→ code
//!                          ↑                      │
//!                          └──── collision ───────┘   (at most max_attempts)
//!
//! register_attendance:  any live? ─→ lookup ─→ geofence ─→ begin_redemption
//!                          ─→ register_attendance ─┬─ ok ──→ confirm_redemption
//!                                                  └─ err ─→ abandon_redemption
//! ```
//!
//! Neither flow holds the registry lock across a collaborator call or
//! across generation attempts.

use std::future::Future;
use std::sync::Arc;

use rollcall_codes::{
    ActiveCode, CodeError, CodeGenerator, CodeRegistry, NewCode, RandomCodeGenerator,
    Redemption, RedemptionValidator, SharedRegistry, Sweeper, normalize_code, spawn_sweeper,
};
use rollcall_protocol::{AttendanceOutcome, ClassSession, Coordinates, Module, UserId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{AttendanceBook, AttendanceConfig, AttendanceError, Directory};

const HOOK_PREPARE: &str = "prepare_students";
const HOOK_MARK_PRESENT: &str = "register_attendance";
const HOOK_DIRECTORY: &str = "directory";

/// Everything a teacher needs to start a roll call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitialInfo {
    pub subjects: Vec<String>,
    pub classes: Vec<String>,
    pub modules: Vec<Module>,
}

/// Issues attendance codes and redeems them.
///
/// Owns the code registry; the server creates one service at startup and
/// shares it (via `Arc`) with every connection.
pub struct AttendanceService<D: Directory, B: AttendanceBook> {
    registry: SharedRegistry,
    generator: Box<dyn CodeGenerator>,
    validator: RedemptionValidator,
    directory: D,
    book: B,
    config: AttendanceConfig,
}

impl<D: Directory, B: AttendanceBook> AttendanceService<D, B> {
    /// Creates a service with an empty registry and the random generator.
    pub fn new(config: AttendanceConfig, directory: D, book: B) -> Self {
        let codes = config.codes.clone().validated();
        let config = AttendanceConfig { codes, ..config };

        Self {
            registry: Arc::new(Mutex::new(CodeRegistry::new(config.codes.ttl))),
            generator: Box::new(RandomCodeGenerator::new(config.codes.code_length)),
            validator: RedemptionValidator::new(config.codes.geofence_radius_m),
            directory,
            book,
            config,
        }
    }

    /// Replaces the code generator.
    pub fn with_generator(mut self, generator: impl CodeGenerator) -> Self {
        self.generator = Box::new(generator);
        self
    }

    pub fn config(&self) -> &AttendanceConfig {
        &self.config
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn book(&self) -> &B {
        &self.book
    }

    /// Starts the background expiry sweep for this service's registry.
    pub fn spawn_sweeper(&self) -> Sweeper {
        spawn_sweeper(Arc::clone(&self.registry), self.config.codes.sweep_interval)
    }

    // ---------------------------------------------------------------------
    // Directory queries
    // ---------------------------------------------------------------------

    /// Subjects, classes of the first subject, and all modules.
    pub async fn initial_info(&self, teacher_id: &UserId) -> Result<InitialInfo, AttendanceError> {
        let overview = self
            .bounded(HOOK_DIRECTORY, self.directory.subjects_and_classes(teacher_id))
            .await?;
        let modules = self.bounded(HOOK_DIRECTORY, self.directory.modules()).await?;

        Ok(InitialInfo {
            subjects: overview.subjects,
            classes: overview.classes,
            modules,
        })
    }

    /// Classes `teacher_id` teaches `subject` to.
    pub async fn classes(
        &self,
        teacher_id: &UserId,
        subject: &str,
    ) -> Result<Vec<String>, AttendanceError> {
        self.bounded(HOOK_DIRECTORY, self.directory.classes(teacher_id, subject))
            .await
    }

    // ---------------------------------------------------------------------
    // Issuing
    // ---------------------------------------------------------------------

    /// Issues a new attendance code for `session`.
    ///
    /// If `coordinates` is given, the code is geofenced around it.
    ///
    /// # Errors
    /// - [`AttendanceError::Code`] with `InvalidCoordinates` for a bad point
    /// - [`AttendanceError::Capacity`] when every attempt collided
    /// - [`AttendanceError::Unavailable`] / [`AttendanceError::Timeout`]
    ///   when roster preparation fails; the code is withdrawn first
    pub async fn generate_code(
        &self,
        teacher_id: &UserId,
        session: ClassSession,
        coordinates: Option<Coordinates>,
    ) -> Result<Arc<ActiveCode>, AttendanceError> {
        if let Some(point) = coordinates.filter(|c| !c.is_valid()) {
            return Err(CodeError::InvalidCoordinates(point).into());
        }

        let request = NewCode {
            teacher_id: teacher_id.clone(),
            session,
            geofence: coordinates,
        };
        let entry = self.register_unique(&request).await?;

        if let Err(e) = self
            .bounded(HOOK_PREPARE, self.book.prepare_students(&entry))
            .await
        {
            self.registry.lock().await.discard(&entry);
            return Err(e);
        }

        info!(
            code = %entry.code(),
            %teacher_id,
            class = %entry.session().class_name,
            module = %entry.session().module_id,
            geofenced = entry.geofence().is_some(),
            "attendance code issued"
        );
        Ok(entry)
    }

    /// Generates candidates until one registers, or gives up after
    /// `max_attempts`. The lock is taken once per attempt, never across.
    async fn register_unique(
        &self,
        request: &NewCode,
    ) -> Result<Arc<ActiveCode>, AttendanceError> {
        let max_attempts = self.config.codes.max_attempts;

        for attempt in 1..=max_attempts {
            let candidate = self.generator.generate();
            let result = self.registry.lock().await.try_register(candidate, request);
            match result {
                Ok(entry) => return Ok(entry),
                Err(CodeError::Collision(code)) => {
                    debug!(%code, attempt, "attendance code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            attempts = max_attempts,
            space = self.config.codes.code_space(),
            "no free attendance code"
        );
        Err(AttendanceError::Capacity {
            attempts: max_attempts,
        })
    }

    /// Closes one of `teacher_id`'s codes before it expires.
    pub async fn close_code(
        &self,
        teacher_id: &UserId,
        code: &str,
    ) -> Result<Arc<ActiveCode>, AttendanceError> {
        let code = normalize_code(code);
        let closed = self.registry.lock().await.revoke(&code, teacher_id)?;
        Ok(closed)
    }

    // ---------------------------------------------------------------------
    // Redeeming
    // ---------------------------------------------------------------------

    /// Redeems `code` for `student_id`.
    ///
    /// Every user-facing result, good or bad, is an [`AttendanceOutcome`].
    /// `Err` is reserved for system failures.
    ///
    /// # Errors
    /// - [`AttendanceError::Code`] with `InvalidCoordinates` for a bad point
    /// - [`AttendanceError::Unavailable`] / [`AttendanceError::Timeout`]
    ///   when marking present fails; the redemption is rolled back so the
    ///   student can retry
    ///
    /// A second attempt by the same student while the first is still
    /// waiting on the book gets [`AttendanceOutcome::RegistrationInProgress`].
    pub async fn register_attendance(
        &self,
        student_id: &UserId,
        code: &str,
        coordinates: Option<Coordinates>,
    ) -> Result<AttendanceOutcome, AttendanceError> {
        if let Some(point) = coordinates.filter(|c| !c.is_valid()) {
            return Err(CodeError::InvalidCoordinates(point).into());
        }

        let code = normalize_code(code);
        let entry = {
            let registry = self.registry.lock().await;
            if !registry.has_live() {
                debug!(%student_id, "redemption with no active codes");
                return Ok(AttendanceOutcome::NoActiveCodes);
            }
            registry.lookup(&code)
        };

        let Some(entry) = entry else {
            debug!(%student_id, %code, "redemption with unknown code");
            return Ok(AttendanceOutcome::InvalidCode);
        };

        if let Err(violation) = self.validator.validate(&entry, coordinates) {
            debug!(%student_id, %code, ?violation, "redemption failed geofence");
            return Ok(violation.into());
        }

        match entry.begin_redemption(student_id) {
            Redemption::Claimed => {}
            Redemption::InProgress => {
                debug!(%student_id, %code, "redemption already in flight for student");
                return Ok(AttendanceOutcome::RegistrationInProgress);
            }
            Redemption::AlreadyRedeemed => {
                debug!(%student_id, %code, "code already redeemed by student");
                return Ok(AttendanceOutcome::AlreadyRegistered);
            }
        }
        let pending = PendingRedemption {
            entry: &entry,
            student_id,
            confirmed: false,
        };

        let message = self
            .bounded(HOOK_MARK_PRESENT, self.book.register_attendance(student_id, &entry))
            .await?;
        pending.confirm();

        info!(%student_id, %code, "attendance registered");
        Ok(AttendanceOutcome::Registered { message })
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    /// Runs a collaborator call under the hook timeout.
    async fn bounded<T>(
        &self,
        hook: &'static str,
        call: impl Future<Output = Result<T, AttendanceError>>,
    ) -> Result<T, AttendanceError> {
        let after = self.config.hook_timeout;
        match tokio::time::timeout(after, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(hook, error = %e, "collaborator call failed");
                Err(e)
            }
            Err(_) => {
                warn!(hook, ?after, "collaborator call timed out");
                Err(AttendanceError::Timeout { hook, after })
            }
        }
    }
}

/// A claimed redemption. Abandoned on drop unless confirmed, which covers
/// a failed book call and a caller that stops polling mid-call.
struct PendingRedemption<'a> {
    entry: &'a ActiveCode,
    student_id: &'a UserId,
    confirmed: bool,
}

impl PendingRedemption<'_> {
    fn confirm(mut self) {
        self.entry.confirm_redemption(self.student_id);
        self.confirmed = true;
    }
}

impl Drop for PendingRedemption<'_> {
    fn drop(&mut self) {
        if !self.confirmed {
            self.entry.abandon_redemption(self.student_id);
        }
    }
}
