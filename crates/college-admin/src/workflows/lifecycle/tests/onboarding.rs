use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::common::*;
use crate::workflows::academy::InMemoryAcademy;
use crate::workflows::lifecycle::domain::{
    BatchId, Notification, NotificationAction, NotificationDraft, NotificationTone, ProgramId,
    StudentId,
};
use crate::workflows::lifecycle::repository::{
    CollegeRepository, NotificationError, NotificationSink,
};
use crate::workflows::lifecycle::{
    BatchAssignment, CollegeLifecycleService, EnrollmentEngine, IdentifierAllocator,
    InMemoryCollegeRepository, IntakeGuard, IntakeViolation, LifecycleCollaborators,
    LifecycleError, SYSTEM_PROVENANCE,
};

#[test]
fn scenario_without_batch_enrolls_catalog_and_notifies_once() {
    let repository = Arc::new(InMemoryCollegeRepository::default());
    seed_catalog(&repository);
    let harness = harness_over(repository);

    let report = harness
        .service
        .register_student(form("selam@example.edu"), today())
        .expect("registration succeeds");

    assert_eq!(report.batch, BatchAssignment::Unassigned);
    assert_eq!(report.student.batch_id, None);
    assert_eq!(report.enrolled.len(), 2);
    assert!(report
        .enrolled
        .iter()
        .all(|record| record.created_by == SYSTEM_PROVENANCE));
    assert!(report.notified);

    let stored = harness
        .repository
        .fetch_student(&report.student.id)
        .expect("fetch")
        .expect("present");
    assert_eq!(stored.batch_id, None);
    assert_eq!(stored.student_number, Some(report.student_number.clone()));
    assert!(report.student_number.0.starts_with("CS/"));
    assert!(report.student_number.0.ends_with("/25"));

    let notifications = harness
        .notifications
        .notifications_for(&report.student.id)
        .expect("readable");
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].status, NotificationTone::Success);
    assert_eq!(notifications[0].action, NotificationAction::Create);
}

#[test]
fn latest_starting_overlapping_batch_wins() {
    let repository = Arc::new(InMemoryCollegeRepository::default());
    seed_catalog(&repository);
    repository.add_batch(batch("batch-spring", Some(PROGRAM), date(2025, 3, 1), date(2025, 12, 31)));
    repository.add_batch(batch("batch-summer", Some(PROGRAM), date(2025, 7, 15), date(2025, 11, 30)));
    repository.add_batch(batch("batch-next", Some(PROGRAM), date(2025, 10, 1), date(2026, 3, 31)));
    let harness = harness_over(repository);

    let student = harness.register("dawit@example.edu");
    assert_eq!(student.batch_id, Some(BatchId::from("batch-summer")));
}

#[test]
fn falls_back_to_any_covering_batch_when_program_has_none() {
    let repository = Arc::new(InMemoryCollegeRepository::default());
    seed_catalog(&repository);
    repository.add_batch(batch("batch-open", None, date(2025, 8, 20), date(2025, 12, 20)));
    repository.add_batch(batch("batch-law", Some("prog-law"), date(2025, 8, 25), date(2025, 12, 20)));
    let harness = harness_over(repository);

    let student = harness.register("liya@example.edu");
    assert_eq!(student.batch_id, Some(BatchId::from("batch-law")));
}

#[test]
fn preassigned_batch_is_kept() {
    let harness = harness();
    let mut form = form("meron@example.edu");
    form.batch_id = Some(BatchId::from("batch-legacy"));

    let report = harness
        .service
        .register_student(form, today())
        .expect("registration succeeds");
    assert_eq!(
        report.batch,
        BatchAssignment::AlreadyAssigned {
            batch_id: BatchId::from("batch-legacy")
        }
    );
}

#[test]
fn rerunning_onboarding_is_idempotent() {
    let harness = harness();
    let student = harness.register("yonas@example.edu");

    let rerun = harness
        .service
        .on_student_created(&student.id)
        .expect("rerun succeeds");

    assert_eq!(rerun.student_number, student.student_number.clone().expect("identifier set"));
    assert!(rerun.enrolled.is_empty(), "no duplicate enrollments");
    assert!(!rerun.notified, "creation notice is not repeated");
    assert_eq!(
        harness
            .repository
            .student_courses(&student.id)
            .expect("readable")
            .len(),
        2
    );
    assert_eq!(harness.count_notifications(&student.id, NotificationAction::Create), 1);
}

#[test]
fn enrollment_engine_twice_creates_one_record_per_course() {
    let harness = harness();
    let student = harness.register("ruth@example.edu");
    let engine = EnrollmentEngine;

    let first = engine
        .enroll_program_courses(harness.repository.as_ref(), &student)
        .expect("first pass");
    let second = engine
        .enroll_program_courses(harness.repository.as_ref(), &student)
        .expect("second pass");

    assert!(first.is_empty() && second.is_empty(), "onboarding already enrolled");
    let courses = harness.repository.student_courses(&student.id).expect("readable");
    let distinct: BTreeSet<_> = courses.iter().map(|record| record.course_id.clone()).collect();
    assert_eq!(courses.len(), 2);
    assert_eq!(distinct.len(), 2);
}

#[test]
fn identifiers_stay_unique_under_concurrent_writers() {
    let repository = Arc::new(InMemoryCollegeRepository::default());
    seed_catalog(&repository);

    // Same seed on every writer: each one draws the same candidate sequence.
    let services: Vec<_> = (0..4)
        .map(|_| {
            CollegeLifecycleService::with_allocator(
                repository.clone(),
                LifecycleCollaborators {
                    notifications: repository.clone(),
                    grades: Arc::new(RecordingGradeBook::default()),
                    academy: Arc::new(InMemoryAcademy::default()),
                    alerts: Arc::new(MemoryAlerts::default()),
                },
                IdentifierAllocator::seeded(64, 99),
                &academy_config(),
            )
        })
        .collect();

    let students: Vec<StudentId> = (0..40)
        .map(|index| {
            let student = IntakeGuard
                .admit(form(&format!("writer{index}@example.edu")), today())
                .expect("valid form");
            repository.insert_student(student).expect("insert").id
        })
        .collect();

    let lanes = services.len();
    std::thread::scope(|scope| {
        for (lane, service) in services.iter().enumerate() {
            let students = &students;
            scope.spawn(move || {
                for student in students.iter().skip(lane).step_by(lanes) {
                    service.on_student_created(student).expect("onboarding succeeds");
                }
            });
        }
    });

    let numbers: Vec<_> = repository
        .students()
        .into_iter()
        .map(|student| student.student_number.expect("identifier assigned"))
        .collect();
    let distinct: BTreeSet<_> = numbers.iter().cloned().collect();
    assert_eq!(numbers.len(), 40);
    assert_eq!(distinct.len(), 40, "duplicate identifiers: {numbers:?}");
}

#[test]
fn identifier_collisions_are_retried() {
    let inner = InMemoryCollegeRepository::default();
    seed_catalog(&inner);
    let repository = Arc::new(ContendedRepository::new(inner, 2));
    let harness = harness_with_repository(repository.clone(), Arc::new(InMemoryAcademy::default()));

    let report = harness
        .service
        .register_student(form("hanna@example.edu"), today())
        .expect("third draw succeeds");

    assert!(report.student.student_number.is_some());
    assert_eq!(repository.claims.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[test]
fn exhausted_identifier_space_rolls_back_registration() {
    let inner = InMemoryCollegeRepository::default();
    seed_catalog(&inner);
    let repository = Arc::new(ContendedRepository::new(inner, u32::MAX));
    let harness = harness_with_repository(repository.clone(), Arc::new(InMemoryAcademy::default()));

    match harness
        .service
        .register_student(form("kidus@example.edu"), today())
    {
        Err(LifecycleError::IdentifierExhausted {
            program_code,
            attempts,
        }) => {
            assert_eq!(program_code, "CS");
            assert_eq!(attempts, 4);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert!(repository.inner.students().is_empty(), "creation rolled back");
    assert_eq!(repository.claims.load(std::sync::atomic::Ordering::SeqCst), 4);
}

#[test]
fn direct_onboarding_failure_keeps_the_record() {
    let inner = InMemoryCollegeRepository::default();
    seed_catalog(&inner);
    let student = IntakeGuard
        .admit(form("bethel@example.edu"), today())
        .expect("valid form");
    let student_id = inner.insert_student(student).expect("insert").id;
    let repository = Arc::new(ContendedRepository::new(inner, u32::MAX));
    let harness = harness_with_repository(repository.clone(), Arc::new(InMemoryAcademy::default()));

    let err = harness
        .service
        .on_student_created(&student_id)
        .expect_err("allocation exhausted");
    assert!(matches!(err, LifecycleError::IdentifierExhausted { .. }));
    assert!(repository
        .fetch_student(&student_id)
        .expect("fetch")
        .is_some());
}

#[test]
fn student_without_program_is_rejected_before_any_draw() {
    let inner = InMemoryCollegeRepository::default();
    seed_catalog(&inner);
    let repository = Arc::new(ContendedRepository::new(inner, 0));
    let harness = harness_with_repository(repository.clone(), Arc::new(InMemoryAcademy::default()));
    let mut form = form("noprogram@example.edu");
    form.program_id = None;

    let err = harness
        .service
        .register_student(form, today())
        .expect_err("program required");
    assert!(matches!(err, LifecycleError::MissingProgram(_)));
    assert_eq!(repository.claims.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(repository.inner.students().is_empty());
}

#[test]
fn unknown_program_is_reported() {
    let harness = harness();
    let mut form = form("ghost@example.edu");
    form.program_id = Some(ProgramId::from("prog-ghost"));

    let err = harness
        .service
        .register_student(form, today())
        .expect_err("program must exist");
    assert!(matches!(err, LifecycleError::ProgramNotFound(_)));
}

#[test]
fn intake_violations_store_nothing() {
    let harness = harness();
    let mut bad_email = form("not-an-email");
    bad_email.email = "selam@".to_string();
    let mut weak_password = form("weak@example.edu");
    weak_password.password = "password".to_string();
    let mut unborn = form("unborn@example.edu");
    unborn.date_of_birth = date(2030, 1, 1);

    for (form, expected) in [
        (bad_email, IntakeViolation::InvalidEmail("selam@".to_string())),
        (weak_password, IntakeViolation::PasswordCase),
        (unborn, IntakeViolation::BirthDateInFuture),
    ] {
        match harness.service.register_student(form, today()) {
            Err(LifecycleError::Intake(violation)) => assert_eq!(violation, expected),
            other => panic!("expected intake violation, got {other:?}"),
        }
    }
    assert!(harness.repository.students().is_empty());
}

#[test]
fn duplicate_email_is_an_intake_violation() {
    let harness = harness();
    harness.register("twin@example.edu");

    let err = harness
        .service
        .register_student(form("Twin@Example.edu"), today())
        .expect_err("duplicate email");
    assert!(matches!(
        err,
        LifecycleError::Intake(IntakeViolation::DuplicateEmail(ref email)) if email == "twin@example.edu"
    ));
    assert_eq!(harness.repository.students().len(), 1);
}

#[test]
fn requested_batch_must_exist() {
    let harness = harness();
    let mut form = form("ghostbatch@example.edu");
    form.batch_id = Some(BatchId::from("batch-ghost"));

    let err = harness
        .service
        .register_student(form, today())
        .expect_err("unknown batch");
    assert!(matches!(err, LifecycleError::BatchNotFound(ref id) if id.0 == "batch-ghost"));
    assert!(harness.repository.students().is_empty());
}

#[test]
fn requested_batch_must_be_open_to_the_program() {
    let harness = harness();
    harness
        .repository
        .add_batch(batch("batch-law", Some("prog-law"), date(2025, 8, 1), date(2026, 1, 31)));
    harness
        .repository
        .add_batch(batch("batch-open", None, date(2025, 8, 1), date(2026, 1, 31)));

    let mut foreign = form("lawbatch@example.edu");
    foreign.batch_id = Some(BatchId::from("batch-law"));
    let err = harness
        .service
        .register_student(foreign, today())
        .expect_err("batch of another program");
    assert!(matches!(
        err,
        LifecycleError::BatchOutsideProgram { ref batch_id, ref program_id }
            if batch_id.0 == "batch-law" && program_id.0 == PROGRAM
    ));
    assert!(harness.repository.students().is_empty());

    let mut shared = form("openbatch@example.edu");
    shared.batch_id = Some(BatchId::from("batch-open"));
    let report = harness
        .service
        .register_student(shared, today())
        .expect("batches without a program accept anyone");
    assert_eq!(
        report.batch,
        BatchAssignment::AlreadyAssigned {
            batch_id: BatchId::from("batch-open")
        }
    );
}

/// Notification store with a slow lookup, widening the gap between the dedupe check and the emit.
struct SlowLookupNotifications(InMemoryCollegeRepository);

impl NotificationSink for SlowLookupNotifications {
    fn emit(&self, draft: NotificationDraft) -> Result<Notification, NotificationError> {
        self.0.emit(draft)
    }

    fn notifications_for(&self, id: &StudentId) -> Result<Vec<Notification>, NotificationError> {
        std::thread::sleep(Duration::from_millis(20));
        self.0.notifications_for(id)
    }
}

#[test]
fn concurrent_onboarding_of_one_student_sends_one_welcome() {
    let repository = Arc::new(InMemoryCollegeRepository::default());
    seed_catalog(&repository);
    let notifications = InMemoryCollegeRepository::default();
    let service = CollegeLifecycleService::with_allocator(
        repository.clone(),
        LifecycleCollaborators {
            notifications: Arc::new(SlowLookupNotifications(notifications.clone())),
            grades: Arc::new(RecordingGradeBook::default()),
            academy: Arc::new(InMemoryAcademy::default()),
            alerts: Arc::new(MemoryAlerts::default()),
        },
        IdentifierAllocator::seeded(32, 5),
        &academy_config(),
    );
    let student = IntakeGuard
        .admit(form("double@example.edu"), today())
        .expect("valid form");
    let student_id = repository.insert_student(student).expect("insert").id;

    let (service, target) = (&service, &student_id);
    let reports: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..3)
            .map(|_| scope.spawn(move || service.on_student_created(target)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("onboarding thread").expect("onboarding succeeds"))
            .collect()
    });

    assert_eq!(reports.iter().filter(|report| report.notified).count(), 1);
    let welcomes = notifications
        .notifications_for(&student_id)
        .expect("readable")
        .into_iter()
        .filter(|notification| notification.action == NotificationAction::Create)
        .count();
    assert_eq!(welcomes, 1);
    let numbers: BTreeSet<_> = reports.iter().map(|report| report.student_number.clone()).collect();
    assert_eq!(numbers.len(), 1);
}
