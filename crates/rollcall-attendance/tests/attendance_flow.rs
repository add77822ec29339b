//! Integration tests for `AttendanceService` with in-memory collaborators.
//!
//! The book records every call so tests can assert what reached the
//! "database". A scripted generator makes codes deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rollcall_attendance::{
    AttendanceBook, AttendanceConfig, AttendanceError, AttendanceService, Directory,
    SubjectsAndClasses,
};
use rollcall_codes::{ActiveCode, CodeConfig, CodeError, CodeGenerator, EARTH_RADIUS_M};
use rollcall_protocol::{AttendanceOutcome, ClassSession, Coordinates, Module, ModuleId, UserId};

// =========================================================================
// Mock collaborators
// =========================================================================

/// Hands out a fixed list of codes, then repeats the last one forever.
struct ScriptedGenerator {
    codes: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl ScriptedGenerator {
    fn new(codes: &[&str]) -> Self {
        Self {
            codes: Mutex::new(codes.iter().map(|c| c.to_string()).collect()),
            last: Mutex::new(codes.last().copied().unwrap_or("AAAA").to_string()),
        }
    }
}

impl CodeGenerator for ScriptedGenerator {
    fn generate(&self) -> String {
        match self.codes.lock().unwrap().pop_front() {
            Some(code) => {
                *self.last.lock().unwrap() = code.clone();
                code
            }
            None => self.last.lock().unwrap().clone(),
        }
    }
}

struct FakeDirectory;

impl Directory for FakeDirectory {
    async fn subjects_and_classes(
        &self,
        teacher_id: &UserId,
    ) -> Result<SubjectsAndClasses, AttendanceError> {
        if teacher_id.as_str() == "t-down" {
            return Err(AttendanceError::Unavailable("directory offline".into()));
        }
        Ok(SubjectsAndClasses {
            subjects: vec!["Math".into(), "Physics".into()],
            classes: vec!["3b".into(), "3c".into()],
        })
    }

    async fn classes(
        &self,
        _teacher_id: &UserId,
        subject: &str,
    ) -> Result<Vec<String>, AttendanceError> {
        Ok(match subject {
            "Physics" => vec!["2a".into()],
            _ => vec!["3b".into(), "3c".into()],
        })
    }

    async fn modules(&self) -> Result<Vec<Module>, AttendanceError> {
        Ok(vec![
            Module {
                id: ModuleId(1),
                name: "08:15-09:45".into(),
            },
            Module {
                id: ModuleId(2),
                name: "10:00-11:30".into(),
            },
        ])
    }
}

#[derive(Default)]
struct RecordingBook {
    prepared: Mutex<Vec<String>>,
    marked: Mutex<Vec<(UserId, String)>>,
    fail_prepare: AtomicBool,
    fail_mark: AtomicBool,
    stall: AtomicBool,
}

impl RecordingBook {
    fn prepared(&self) -> Vec<String> {
        self.prepared.lock().unwrap().clone()
    }

    fn marked(&self) -> Vec<(UserId, String)> {
        self.marked.lock().unwrap().clone()
    }

    async fn maybe_stall(&self) {
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }
}

impl AttendanceBook for RecordingBook {
    async fn prepare_students(&self, code: &ActiveCode) -> Result<(), AttendanceError> {
        self.maybe_stall().await;
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(AttendanceError::Unavailable("roster offline".into()));
        }
        self.prepared.lock().unwrap().push(code.code().to_string());
        Ok(())
    }

    async fn register_attendance(
        &self,
        student_id: &UserId,
        code: &ActiveCode,
    ) -> Result<String, AttendanceError> {
        self.maybe_stall().await;
        if self.fail_mark.load(Ordering::SeqCst) {
            return Err(AttendanceError::Unavailable("attendance table locked".into()));
        }
        self.marked
            .lock()
            .unwrap()
            .push((student_id.clone(), code.code().to_string()));
        Ok(format!("{student_id} registered for {}", code.session().class_name))
    }
}

// =========================================================================
// Helpers
// =========================================================================

type Service = AttendanceService<FakeDirectory, RecordingBook>;

const COPENHAGEN: Coordinates = Coordinates {
    latitude: 55.6761,
    longitude: 12.5683,
};

fn config() -> AttendanceConfig {
    AttendanceConfig {
        codes: CodeConfig {
            ttl: Duration::from_secs(600),
            max_attempts: 3,
            ..CodeConfig::default()
        },
        hook_timeout: Duration::from_secs(2),
    }
}

fn service(codes: &[&str]) -> Service {
    AttendanceService::new(config(), FakeDirectory, RecordingBook::default())
        .with_generator(ScriptedGenerator::new(codes))
}

fn uid(id: &str) -> UserId {
    UserId::new(id)
}

fn math_3b() -> ClassSession {
    ClassSession {
        subject: "Math".into(),
        class_name: "3b".into(),
        module_id: ModuleId(1),
    }
}

fn north_of(origin: Coordinates, meters: f64) -> Coordinates {
    Coordinates::new(
        origin.latitude + (meters / EARTH_RADIUS_M).to_degrees(),
        origin.longitude,
    )
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn test_scenario_no_geofence_code_redeemed_without_coordinates() {
    let svc = service(&["AB12"]);

    let entry = svc
        .generate_code(&uid("t-1"), math_3b(), None)
        .await
        .expect("code issued");
    assert_eq!(entry.code(), "AB12");

    let outcome = svc
        .register_attendance(&uid("s-1"), "AB12", None)
        .await
        .expect("no system error");

    assert_eq!(
        outcome,
        AttendanceOutcome::Registered {
            message: "s-1 registered for 3b".into()
        }
    );
    assert_eq!(svc.book().prepared(), vec!["AB12".to_string()]);
    assert_eq!(svc.book().marked(), vec![(uid("s-1"), "AB12".to_string())]);
}

#[tokio::test]
async fn test_scenario_geofenced_code_150m_away_is_out_of_range() {
    let svc = service(&["ZZ99"]);
    svc.generate_code(&uid("t-1"), math_3b(), Some(COPENHAGEN))
        .await
        .unwrap();

    let outcome = svc
        .register_attendance(&uid("s-1"), "ZZ99", Some(north_of(COPENHAGEN, 150.0)))
        .await
        .unwrap();

    match outcome {
        AttendanceOutcome::OutOfRange { distance_m } => {
            assert!((distance_m - 150.0).abs() < 0.01, "got {distance_m}");
        }
        other => panic!("expected OutOfRange, got {other:?}"),
    }
    assert!(svc.book().marked().is_empty(), "nobody marked present");
    assert_eq!(svc.registry().lock().await.lookup("ZZ99").unwrap().redemption_count(), 0);
}

#[tokio::test]
async fn test_scenario_empty_registry_returns_no_active_codes() {
    let svc = service(&["AB12"]);

    let outcome = svc
        .register_attendance(&uid("s-1"), "AB12", None)
        .await
        .unwrap();

    assert_eq!(outcome, AttendanceOutcome::NoActiveCodes);
    assert!(svc.book().marked().is_empty());
}

// =========================================================================
// register_attendance()
// =========================================================================

#[tokio::test]
async fn test_register_attendance_unknown_code_is_invalid() {
    let svc = service(&["AB12"]);
    svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();

    let outcome = svc
        .register_attendance(&uid("s-1"), "XX00", None)
        .await
        .unwrap();

    assert_eq!(outcome, AttendanceOutcome::InvalidCode);
}

#[tokio::test]
async fn test_register_attendance_normalizes_typed_code() {
    let svc = service(&["AB12"]);
    svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();

    let outcome = svc
        .register_attendance(&uid("s-1"), "  ab12 ", None)
        .await
        .unwrap();

    assert!(outcome.is_registered());
}

#[tokio::test]
async fn test_register_attendance_geofenced_without_coordinates_is_required() {
    let svc = service(&["ZZ99"]);
    svc.generate_code(&uid("t-1"), math_3b(), Some(COPENHAGEN))
        .await
        .unwrap();

    let outcome = svc
        .register_attendance(&uid("s-1"), "ZZ99", None)
        .await
        .unwrap();

    assert_eq!(outcome, AttendanceOutcome::CoordinatesRequired);
}

#[tokio::test]
async fn test_register_attendance_geofence_boundary() {
    let svc = service(&["ZZ99"]);
    svc.generate_code(&uid("t-1"), math_3b(), Some(COPENHAGEN))
        .await
        .unwrap();

    let inside = svc
        .register_attendance(&uid("s-1"), "ZZ99", Some(north_of(COPENHAGEN, 99.9)))
        .await
        .unwrap();
    let outside = svc
        .register_attendance(&uid("s-2"), "ZZ99", Some(north_of(COPENHAGEN, 100.1)))
        .await
        .unwrap();

    assert!(inside.is_registered(), "99.9 m is inside, got {inside:?}");
    assert!(
        matches!(outside, AttendanceOutcome::OutOfRange { .. }),
        "100.1 m is outside, got {outside:?}"
    );
}

#[tokio::test]
async fn test_register_attendance_ungeofenced_ignores_coordinates() {
    let svc = service(&["AB12"]);
    svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();

    let outcome = svc
        .register_attendance(&uid("s-1"), "AB12", Some(Coordinates::new(-33.86, 151.2)))
        .await
        .unwrap();

    assert!(outcome.is_registered());
}

#[tokio::test]
async fn test_register_attendance_same_student_twice_is_already_registered() {
    let svc = service(&["AB12"]);
    let entry = svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();

    let first = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();
    let second = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();

    assert!(first.is_registered());
    assert_eq!(second, AttendanceOutcome::AlreadyRegistered);
    assert_eq!(entry.redemption_count(), 1);
    assert_eq!(svc.book().marked().len(), 1, "marked present only once");
}

#[tokio::test]
async fn test_register_attendance_two_students_both_registered() {
    let svc = service(&["AB12"]);
    let entry = svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();

    let a = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();
    let b = svc.register_attendance(&uid("s-2"), "AB12", None).await.unwrap();

    assert!(a.is_registered());
    assert!(b.is_registered());
    assert_eq!(entry.redeemed_by(), vec![uid("s-1"), uid("s-2")]);
}

#[tokio::test]
async fn test_register_attendance_invalid_coordinates_is_error() {
    let svc = service(&["ZZ99"]);
    svc.generate_code(&uid("t-1"), math_3b(), Some(COPENHAGEN))
        .await
        .unwrap();

    let result = svc
        .register_attendance(&uid("s-1"), "ZZ99", Some(Coordinates::new(f64::NAN, 0.0)))
        .await;

    assert!(matches!(
        result,
        Err(AttendanceError::Code(CodeError::InvalidCoordinates(_)))
    ));
}

#[tokio::test]
async fn test_register_attendance_mark_failure_rolls_back_redemption() {
    let svc = service(&["AB12"]);
    let entry = svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();
    svc.book().fail_mark.store(true, Ordering::SeqCst);

    let result = svc.register_attendance(&uid("s-1"), "AB12", None).await;

    assert!(matches!(result, Err(AttendanceError::Unavailable(_))));
    assert!(!entry.has_redeemed(&uid("s-1")), "failed redemption undone");

    // Once the book recovers, the retry goes through.
    svc.book().fail_mark.store(false, Ordering::SeqCst);
    let retry = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();
    assert!(retry.is_registered());
}

#[tokio::test(start_paused = true)]
async fn test_register_attendance_mark_timeout_is_error() {
    let svc = service(&["AB12"]);
    let entry = svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();
    svc.book().stall.store(true, Ordering::SeqCst);

    let result = svc.register_attendance(&uid("s-1"), "AB12", None).await;

    assert!(matches!(
        result,
        Err(AttendanceError::Timeout { hook: "register_attendance", .. })
    ));
    assert_eq!(entry.redemption_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_register_attendance_same_student_while_pending_is_in_progress() {
    let svc = Arc::new(service(&["AB12"]));
    let entry = svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();
    svc.book().stall.store(true, Ordering::SeqCst);

    let first = tokio::spawn({
        let svc = Arc::clone(&svc);
        async move { svc.register_attendance(&uid("s-1"), "AB12", None).await }
    });
    // Let the first attempt reach the stalled book.
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(500)).await;

    let second = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();
    assert_eq!(second, AttendanceOutcome::RegistrationInProgress);

    let first = first.await.unwrap();
    assert!(matches!(
        first,
        Err(AttendanceError::Timeout { hook: "register_attendance", .. })
    ));
    assert!(svc.book().marked().is_empty());
    assert!(!entry.has_redeemed(&uid("s-1")));

    // Nothing was recorded, so the student is free to try again.
    svc.book().stall.store(false, Ordering::SeqCst);
    let retry = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();
    assert!(retry.is_registered());
    let again = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();
    assert_eq!(again, AttendanceOutcome::AlreadyRegistered);
}

#[tokio::test(start_paused = true)]
async fn test_register_attendance_dropped_call_releases_student() {
    let svc = service(&["AB12"]);
    let entry = svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();
    svc.book().stall.store(true, Ordering::SeqCst);

    // Give up before the hook timeout fires, dropping the call mid-flight.
    let cut_short = tokio::time::timeout(
        Duration::from_secs(1),
        svc.register_attendance(&uid("s-1"), "AB12", None),
    )
    .await;
    assert!(cut_short.is_err());
    assert!(!entry.has_redeemed(&uid("s-1")));

    svc.book().stall.store(false, Ordering::SeqCst);
    let retry = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();
    assert!(retry.is_registered(), "got {retry:?}");
}

#[tokio::test(start_paused = true)]
async fn test_register_attendance_after_expiry() {
    let svc = service(&["AB12", "CD34"]);
    svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();
    tokio::time::advance(Duration::from_secs(300)).await;
    svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();

    // AB12 expires at 600 s, CD34 at 900 s.
    tokio::time::advance(Duration::from_secs(301)).await;
    let expired = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();
    assert_eq!(expired, AttendanceOutcome::InvalidCode);

    tokio::time::advance(Duration::from_secs(300)).await;
    let none_left = svc.register_attendance(&uid("s-1"), "CD34", None).await.unwrap();
    assert_eq!(none_left, AttendanceOutcome::NoActiveCodes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_register_attendance_concurrent_students_all_registered() {
    let svc = Arc::new(service(&["AB12"]));
    let entry = svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..30 {
        let svc = Arc::clone(&svc);
        tasks.push(tokio::spawn(async move {
            svc.register_attendance(&UserId::new(format!("s-{i}")), "AB12", None)
                .await
        }));
    }
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.is_registered());
    }

    assert_eq!(entry.redemption_count(), 30);
    assert_eq!(svc.book().marked().len(), 30);
}

// =========================================================================
// generate_code()
// =========================================================================

#[tokio::test]
async fn test_generate_code_retries_after_collision() {
    let svc = service(&["AB12", "AB12", "CD34"]);

    let first = svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();
    let second = svc.generate_code(&uid("t-2"), math_3b(), None).await.unwrap();

    assert_eq!(first.code(), "AB12");
    assert_eq!(second.code(), "CD34");
    assert_eq!(svc.registry().lock().await.count(), 2);
}

#[tokio::test]
async fn test_generate_code_gives_up_after_max_attempts() {
    let svc = service(&["AB12"]);
    svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();

    let result = svc.generate_code(&uid("t-2"), math_3b(), None).await;

    assert!(matches!(result, Err(AttendanceError::Capacity { attempts: 3 })));
    assert_eq!(svc.book().prepared().len(), 1, "no roster for a failed code");
}

#[tokio::test]
async fn test_generate_code_invalid_coordinates_registers_nothing() {
    let svc = service(&["AB12"]);

    let result = svc
        .generate_code(&uid("t-1"), math_3b(), Some(Coordinates::new(0.0, 200.0)))
        .await;

    assert!(matches!(
        result,
        Err(AttendanceError::Code(CodeError::InvalidCoordinates(_)))
    ));
    assert!(svc.registry().lock().await.is_empty());
}

#[tokio::test]
async fn test_generate_code_prepare_failure_withdraws_code() {
    let svc = service(&["AB12"]);
    svc.book().fail_prepare.store(true, Ordering::SeqCst);

    let result = svc.generate_code(&uid("t-1"), math_3b(), None).await;

    assert!(matches!(result, Err(AttendanceError::Unavailable(_))));
    assert!(svc.registry().lock().await.is_empty());
    let outcome = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();
    assert_eq!(outcome, AttendanceOutcome::NoActiveCodes);
}

#[tokio::test(start_paused = true)]
async fn test_generate_code_prepare_timeout_withdraws_code() {
    let svc = service(&["AB12"]);
    svc.book().stall.store(true, Ordering::SeqCst);

    let result = svc.generate_code(&uid("t-1"), math_3b(), None).await;

    match result {
        Err(AttendanceError::Timeout { hook, after }) => {
            assert_eq!(hook, "prepare_students");
            assert_eq!(after, Duration::from_secs(2));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert!(svc.registry().lock().await.is_empty());
}

#[tokio::test]
async fn test_generate_code_uses_random_generator_by_default() {
    let svc = AttendanceService::new(config(), FakeDirectory, RecordingBook::default());

    let entry = svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();

    assert_eq!(entry.code().len(), 4);
    assert!(entry.code().chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
}

// =========================================================================
// close_code()
// =========================================================================

#[tokio::test]
async fn test_close_code_by_issuer_stops_redemptions() {
    let svc = service(&["AB12"]);
    svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();

    let closed = svc.close_code(&uid("t-1"), "ab12").await.expect("issuer closes");
    assert_eq!(closed.code(), "AB12");

    let outcome = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();
    assert_eq!(outcome, AttendanceOutcome::NoActiveCodes);
}

#[tokio::test]
async fn test_close_code_by_other_teacher_is_rejected() {
    let svc = service(&["AB12"]);
    svc.generate_code(&uid("t-1"), math_3b(), None).await.unwrap();

    let result = svc.close_code(&uid("t-2"), "AB12").await;

    assert!(matches!(
        result,
        Err(AttendanceError::Code(CodeError::NotIssuer { .. }))
    ));
    let outcome = svc.register_attendance(&uid("s-1"), "AB12", None).await.unwrap();
    assert!(outcome.is_registered());
}

#[tokio::test]
async fn test_close_code_unknown_is_not_found() {
    let svc = service(&["AB12"]);

    let result = svc.close_code(&uid("t-1"), "AB12").await;

    assert!(matches!(
        result,
        Err(AttendanceError::Code(CodeError::NotFound(_)))
    ));
}

// =========================================================================
// Directory queries
// =========================================================================

#[tokio::test]
async fn test_initial_info_combines_directory_answers() {
    let svc = service(&["AB12"]);

    let info = svc.initial_info(&uid("t-1")).await.unwrap();

    assert_eq!(info.subjects, vec!["Math", "Physics"]);
    assert_eq!(info.classes, vec!["3b", "3c"]);
    assert_eq!(info.modules.len(), 2);
    assert_eq!(info.modules[0].id, ModuleId(1));
}

#[tokio::test]
async fn test_initial_info_directory_failure_is_error() {
    let svc = service(&["AB12"]);

    let result = svc.initial_info(&uid("t-down")).await;

    assert!(matches!(result, Err(AttendanceError::Unavailable(_))));
}

#[tokio::test]
async fn test_classes_for_subject() {
    let svc = service(&["AB12"]);

    let classes = svc.classes(&uid("t-1"), "Physics").await.unwrap();

    assert_eq!(classes, vec!["2a"]);
}
