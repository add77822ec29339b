use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rollcall::prelude::*;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// How long a roll stays in the register after its code expires.
const ROLL_RETENTION: Duration = Duration::from_secs(15 * 60);

// ---------------------------------------------------------------------------
// School data
// ---------------------------------------------------------------------------

/// (teacher, subject, classes)
const TEACHING: &[(&str, &str, &[&str])] = &[
    ("t-hansen", "Math", &["3b", "3c"]),
    ("t-hansen", "Physics", &["2a"]),
    ("t-larsen", "English", &["3b"]),
];

/// (class, students)
const ENROLMENT: &[(&str, &[&str])] = &[
    ("2a", &["s-ada", "s-bo"]),
    ("3b", &["s-cleo", "s-dan", "s-eva"]),
    ("3c", &["s-finn"]),
];

const MODULES: &[(u32, &str)] = &[
    (1, "08:15-09:45"),
    (2, "10:00-11:30"),
    (3, "12:15-13:45"),
];

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Who teaches which subject to which classes.
struct Timetable {
    subjects: HashMap<UserId, Vec<(String, Vec<String>)>>,
    modules: Vec<Module>,
}

impl Timetable {
    fn seeded() -> Self {
        let mut subjects: HashMap<UserId, Vec<(String, Vec<String>)>> = HashMap::new();
        for (teacher, subject, classes) in TEACHING {
            let classes = classes.iter().map(|c| c.to_string()).collect();
            subjects
                .entry(UserId::new(*teacher))
                .or_default()
                .push((subject.to_string(), classes));
        }
        let modules = MODULES
            .iter()
            .map(|(id, name)| Module {
                id: ModuleId(*id),
                name: name.to_string(),
            })
            .collect();
        Self { subjects, modules }
    }

    fn taught_by(&self, teacher_id: &UserId) -> &[(String, Vec<String>)] {
        self.subjects.get(teacher_id).map(Vec::as_slice).unwrap_or_default()
    }
}

impl Directory for Timetable {
    async fn subjects_and_classes(
        &self,
        teacher_id: &UserId,
    ) -> Result<SubjectsAndClasses, AttendanceError> {
        let taught = self.taught_by(teacher_id);
        Ok(SubjectsAndClasses {
            subjects: taught.iter().map(|(subject, _)| subject.clone()).collect(),
            classes: taught
                .first()
                .map(|(_, classes)| classes.clone())
                .unwrap_or_default(),
        })
    }

    async fn classes(
        &self,
        teacher_id: &UserId,
        subject: &str,
    ) -> Result<Vec<String>, AttendanceError> {
        Ok(self
            .taught_by(teacher_id)
            .iter()
            .find(|(s, _)| s == subject)
            .map(|(_, classes)| classes.clone())
            .unwrap_or_default())
    }

    async fn modules(&self) -> Result<Vec<Module>, AttendanceError> {
        Ok(self.modules.clone())
    }
}

// ---------------------------------------------------------------------------
// Attendance book
// ---------------------------------------------------------------------------

/// One roll call: every student of the class, present or not.
#[derive(Debug, Clone)]
struct Roll {
    session: ClassSession,
    expires_at: Instant,
    present: BTreeMap<UserId, bool>,
}

/// A code value can come back once its earlier issue expired, so a roll
/// is identified by the code and the moment it was issued.
type RollKey = (String, Instant);

fn roll_key(code: &ActiveCode) -> RollKey {
    (code.code().to_string(), code.created_at())
}

/// Attendance rolls, one per issued code. Cheap to clone; clones share
/// the same rolls.
#[derive(Clone)]
struct Register {
    enrolment: Arc<HashMap<String, Vec<UserId>>>,
    rolls: Arc<Mutex<HashMap<RollKey, Roll>>>,
}

impl Register {
    fn seeded() -> Self {
        let enrolment: HashMap<String, Vec<UserId>> = ENROLMENT
            .iter()
            .map(|(class, students)| {
                (class.to_string(), students.iter().map(|s| UserId::new(*s)).collect())
            })
            .collect();
        Self {
            enrolment: Arc::new(enrolment),
            rolls: Arc::default(),
        }
    }
}

#[cfg(test)]
impl Register {
    /// The most recent roll issued under `code`.
    fn roll(&self, code: &str) -> Option<Roll> {
        let rolls = self.rolls.lock().unwrap_or_else(PoisonError::into_inner);
        rolls
            .iter()
            .filter(|((c, _), _)| c == code)
            .max_by_key(|((_, issued_at), _)| *issued_at)
            .map(|(_, roll)| roll.clone())
    }

    fn roll_count(&self) -> usize {
        self.rolls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Drops rolls whose code expired more than [`ROLL_RETENTION`] ago.
fn close_old_rolls(rolls: &mut HashMap<RollKey, Roll>, now: Instant) {
    rolls.retain(|(code, _), roll| {
        let keep = now < roll.expires_at + ROLL_RETENTION;
        if !keep {
            let present = roll.present.values().filter(|p| **p).count();
            tracing::info!(
                %code,
                class = %roll.session.class_name,
                present,
                total = roll.present.len(),
                "roll closed"
            );
        }
        keep
    });
}

impl AttendanceBook for Register {
    async fn prepare_students(&self, code: &ActiveCode) -> Result<(), AttendanceError> {
        let session = code.session();
        let Some(students) = self.enrolment.get(&session.class_name) else {
            return Err(AttendanceError::Unavailable(format!(
                "no class named {}",
                session.class_name
            )));
        };

        let roll = Roll {
            session: session.clone(),
            expires_at: code.expires_at(),
            present: students.iter().map(|s| (s.clone(), false)).collect(),
        };
        tracing::debug!(code = %code.code(), students = students.len(), "roll prepared");

        let mut rolls = self.rolls.lock().unwrap_or_else(PoisonError::into_inner);
        close_old_rolls(&mut rolls, Instant::now());
        rolls.insert(roll_key(code), roll);
        Ok(())
    }

    async fn register_attendance(
        &self,
        student_id: &UserId,
        code: &ActiveCode,
    ) -> Result<String, AttendanceError> {
        let mut rolls = self.rolls.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(roll) = rolls.get_mut(&roll_key(code)) else {
            return Err(AttendanceError::Unavailable(format!(
                "no roll for {}",
                code.code()
            )));
        };

        let enrolled = roll.present.contains_key(student_id);
        roll.present.insert(student_id.clone(), true);

        let ClassSession {
            subject,
            class_name,
            ..
        } = &roll.session;
        let message = format!("Attendance registered for {subject} in {class_name}");
        if enrolled {
            Ok(message)
        } else {
            Ok(format!("{message} (not on the class list)"))
        }
    }
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

/// Uses the token itself as the user id.
struct TokenResolver;

impl IdentityResolver for TokenResolver {
    async fn resolve(&self, token: &str) -> Result<UserId, AttendanceError> {
        let token = token.trim();
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(AttendanceError::AuthFailed(
                "token must be a single word".into(),
            ));
        }
        Ok(UserId::new(token))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = std::env::var("ROLLCALL_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let server = RollcallServerBuilder::new()
        .bind(&addr)
        .build(TokenResolver, Timetable::seeded(), Register::seeded())
        .await?;
    tracing::info!(addr = %server.local_addr()?, "classroom server ready, ctrl-c to stop");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
