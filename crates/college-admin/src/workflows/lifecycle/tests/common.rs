use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::config::AcademyConfig;
use crate::workflows::academy::{AcademyGateway, InMemoryAcademy};
use crate::workflows::lifecycle::domain::{
    Batch, BatchId, Course, CourseId, CourseRegistration, CourseRegistrationId, Invoice,
    InvoiceId, Notification, NotificationAction, NotificationDraft, PaymentDetails, Program,
    ProgramId, ProvisioningRecord, Student, StudentCourse, StudentId, StudentNumber,
};
use crate::workflows::lifecycle::repository::{
    AlertError, AlertPublisher, CollegeRepository, GradeBook, GradeError, InvoiceCommit,
    NotificationError, NotificationSink, OperationalAlert, RepositoryError,
};
use crate::workflows::lifecycle::{
    CollegeLifecycleService, IdentifierAllocator, InMemoryCollegeRepository,
    LifecycleCollaborators, NewStudent,
};

pub(super) const PROGRAM: &str = "prog-cs";
pub(super) const COURSE_ONE: &str = "course-cs101";
pub(super) const COURSE_TWO: &str = "course-cs102";

pub(super) fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 1).expect("valid date")
}

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

/// Program `CS` with two courses (100 and 200); no batches.
pub(super) fn seed_catalog(repository: &InMemoryCollegeRepository) {
    repository.add_program(Program {
        id: ProgramId::from(PROGRAM),
        name: "Computer Science".to_string(),
        code: "CS".to_string(),
    });
    repository.add_course(Course {
        id: CourseId::from(COURSE_ONE),
        program_id: ProgramId::from(PROGRAM),
        code: "CS101".to_string(),
        title: "Programming Fundamentals".to_string(),
        price: 100,
    });
    repository.add_course(Course {
        id: CourseId::from(COURSE_TWO),
        program_id: ProgramId::from(PROGRAM),
        code: "CS102".to_string(),
        title: "Data Structures".to_string(),
        price: 200,
    });
}

pub(super) fn batch(
    id: &str,
    program: Option<&str>,
    starting_date: NaiveDate,
    ending_date: NaiveDate,
) -> Batch {
    Batch {
        id: BatchId::from(id),
        title: format!("Batch {id}"),
        program_id: program.map(ProgramId::from),
        starting_date,
        ending_date,
    }
}

pub(super) fn form(email: &str) -> NewStudent {
    NewStudent {
        first_name: "Selam".to_string(),
        middle_name: Some("Bekele".to_string()),
        last_name: "Haile".to_string(),
        email: email.to_string(),
        date_of_birth: date(2002, 2, 14),
        password: "Welcome2025".to_string(),
        program_id: Some(ProgramId::from(PROGRAM)),
        batch_id: None,
    }
}

pub(super) fn payment() -> PaymentDetails {
    PaymentDetails {
        account_holder_fullname: "Selam Bekele Haile".to_string(),
        transaction_reference: "FT25244XK9".to_string(),
    }
}

pub(super) fn academy_config() -> AcademyConfig {
    AcademyConfig {
        base_url: None,
        token: String::new(),
        timeout: Duration::from_millis(200),
    }
}

pub(super) struct Harness<R = InMemoryCollegeRepository> {
    pub service: Arc<CollegeLifecycleService<R>>,
    pub repository: Arc<R>,
    pub notifications: Arc<InMemoryCollegeRepository>,
    pub academy: InMemoryAcademy,
    pub grades: Arc<RecordingGradeBook>,
    pub alerts: Arc<MemoryAlerts>,
}

/// Catalog seeded, one batch covering [`today`], academy knows both course codes.
pub(super) fn harness() -> Harness {
    let repository = Arc::new(InMemoryCollegeRepository::default());
    seed_catalog(&repository);
    repository.add_batch(batch("batch-fall", Some(PROGRAM), date(2025, 8, 1), date(2026, 1, 31)));
    harness_over(repository)
}

pub(super) fn harness_over(repository: Arc<InMemoryCollegeRepository>) -> Harness {
    let academy = InMemoryAcademy::with_courses(["CS101", "CS102"]);
    let grades = Arc::new(RecordingGradeBook::default());
    let alerts = Arc::new(MemoryAlerts::default());
    let collaborators = LifecycleCollaborators {
        notifications: repository.clone(),
        grades: grades.clone(),
        academy: Arc::new(academy.clone()),
        alerts: alerts.clone(),
    };
    let service = CollegeLifecycleService::with_allocator(
        repository.clone(),
        collaborators,
        IdentifierAllocator::seeded(32, 2025),
        &academy_config(),
    );
    Harness {
        service: Arc::new(service),
        notifications: repository.clone(),
        repository,
        academy,
        grades,
        alerts,
    }
}

/// Service over an arbitrary repository; notifications go to a separate in-memory sink.
pub(super) fn harness_with_repository<R>(repository: Arc<R>, gateway: Arc<dyn AcademyGateway>) -> Harness<R>
where
    R: CollegeRepository + 'static,
{
    let notifications = Arc::new(InMemoryCollegeRepository::default());
    let grades = Arc::new(RecordingGradeBook::default());
    let alerts = Arc::new(MemoryAlerts::default());
    let collaborators = LifecycleCollaborators {
        notifications: notifications.clone(),
        grades: grades.clone(),
        academy: gateway,
        alerts: alerts.clone(),
    };
    let service = CollegeLifecycleService::with_allocator(
        repository.clone(),
        collaborators,
        IdentifierAllocator::seeded(4, 7),
        &academy_config(),
    );
    Harness {
        service: Arc::new(service),
        repository,
        notifications,
        academy: InMemoryAcademy::default(),
        grades,
        alerts,
    }
}

impl Harness {
    pub(super) fn register(&self, email: &str) -> Student {
        self.service
            .register_student(form(email), today())
            .expect("registration succeeds")
            .student
    }

    /// Registers `course` for the student and submits payment, leaving the invoice pending.
    pub(super) async fn pending_invoice(&self, student: &Student, course: &str) -> Invoice {
        let receipt = self
            .service
            .register_course(&student.id, &CourseId::from(course), today())
            .expect("course registration succeeds");
        self.service
            .submit_payment(&receipt.invoice.id, payment())
            .await
            .expect("payment accepted")
    }

    pub(super) fn invoice(&self, id: &InvoiceId) -> Invoice {
        self.repository
            .fetch_invoice(id)
            .expect("fetch invoice")
            .expect("invoice present")
    }

    pub(super) fn registration(&self, invoice: &Invoice) -> CourseRegistration {
        let id = &invoice.items[0].course_registration_id;
        self.repository
            .fetch_course_registration(id)
            .expect("fetch registration")
            .expect("registration present")
    }

    pub(super) fn count_notifications(&self, student: &StudentId, action: NotificationAction) -> usize {
        self.notifications
            .notifications_for(student)
            .expect("notifications readable")
            .iter()
            .filter(|notification| notification.action == action)
            .count()
    }
}

#[derive(Default)]
pub(super) struct RecordingGradeBook {
    created: Mutex<Vec<CourseRegistrationId>>,
    failing: AtomicBool,
}

impl RecordingGradeBook {
    pub(super) fn created(&self) -> Vec<CourseRegistrationId> {
        self.created.lock().expect("grade mutex poisoned").clone()
    }

    pub(super) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl GradeBook for RecordingGradeBook {
    fn create_grade(&self, registration: &CourseRegistrationId) -> Result<(), GradeError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GradeError::Unavailable("grade service down".to_string()));
        }
        let mut created = self.created.lock().expect("grade mutex poisoned");
        if !created.contains(registration) {
            created.push(registration.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct MemoryAlerts {
    events: Mutex<Vec<OperationalAlert>>,
}

impl MemoryAlerts {
    pub(super) fn events(&self) -> Vec<OperationalAlert> {
        self.events.lock().expect("alert mutex poisoned").clone()
    }

    pub(super) fn templates(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|alert| alert.template)
            .collect()
    }
}

impl AlertPublisher for MemoryAlerts {
    fn publish(&self, alert: OperationalAlert) -> Result<(), AlertError> {
        self.events.lock().expect("alert mutex poisoned").push(alert);
        Ok(())
    }
}

pub(super) struct FailingNotifications;

impl NotificationSink for FailingNotifications {
    fn emit(&self, _draft: NotificationDraft) -> Result<Notification, NotificationError> {
        Err(NotificationError::Unavailable("mailer offline".to_string()))
    }

    fn notifications_for(&self, _id: &StudentId) -> Result<Vec<Notification>, NotificationError> {
        Ok(Vec::new())
    }
}

/// In-memory repository whose identifier claims report a clash a fixed number of times.
/// Invoice inserts can be scripted to fail as well.
pub(super) struct ContendedRepository {
    pub(super) inner: InMemoryCollegeRepository,
    conflicts_left: AtomicU32,
    pub(super) claims: AtomicU32,
    invoice_failures: Mutex<VecDeque<RepositoryError>>,
    pub(super) invoice_inserts: AtomicU32,
}

impl ContendedRepository {
    pub(super) fn new(inner: InMemoryCollegeRepository, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts_left: AtomicU32::new(conflicts),
            claims: AtomicU32::new(0),
            invoice_failures: Mutex::new(VecDeque::new()),
            invoice_inserts: AtomicU32::new(0),
        }
    }

    /// The next invoice inserts fail with these errors, in order.
    pub(super) fn fail_invoice_inserts(&self, failures: impl IntoIterator<Item = RepositoryError>) {
        self.invoice_failures
            .lock()
            .expect("failure queue mutex poisoned")
            .extend(failures);
    }
}

impl CollegeRepository for ContendedRepository {
    fn insert_student(&self, student: Student) -> Result<Student, RepositoryError> {
        self.inner.insert_student(student)
    }

    fn fetch_student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        self.inner.fetch_student(id)
    }

    fn delete_student(&self, id: &StudentId) -> Result<(), RepositoryError> {
        self.inner.delete_student(id)
    }

    fn claim_student_number(
        &self,
        id: &StudentId,
        number: &StudentNumber,
    ) -> Result<bool, RepositoryError> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        let clashed = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if clashed {
            return Err(RepositoryError::Conflict(format!("student number {number}")));
        }
        self.inner.claim_student_number(id, number)
    }

    fn assign_batch_if_unset(&self, id: &StudentId, batch: &BatchId) -> Result<bool, RepositoryError> {
        self.inner.assign_batch_if_unset(id, batch)
    }

    fn fetch_program(&self, id: &ProgramId) -> Result<Option<Program>, RepositoryError> {
        self.inner.fetch_program(id)
    }

    fn program_courses(&self, id: &ProgramId) -> Result<Vec<Course>, RepositoryError> {
        self.inner.program_courses(id)
    }

    fn fetch_course(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError> {
        self.inner.fetch_course(id)
    }

    fn list_batches(&self, program: Option<&ProgramId>) -> Result<Vec<Batch>, RepositoryError> {
        self.inner.list_batches(program)
    }

    fn student_courses(&self, id: &StudentId) -> Result<Vec<StudentCourse>, RepositoryError> {
        self.inner.student_courses(id)
    }

    fn insert_student_course(&self, record: StudentCourse) -> Result<StudentCourse, RepositoryError> {
        self.inner.insert_student_course(record)
    }

    fn insert_course_registration(
        &self,
        registration: CourseRegistration,
    ) -> Result<CourseRegistration, RepositoryError> {
        self.inner.insert_course_registration(registration)
    }

    fn delete_course_registration(&self, id: &CourseRegistrationId) -> Result<(), RepositoryError> {
        self.inner.delete_course_registration(id)
    }

    fn fetch_course_registration(
        &self,
        id: &CourseRegistrationId,
    ) -> Result<Option<CourseRegistration>, RepositoryError> {
        self.inner.fetch_course_registration(id)
    }

    fn course_registrations(&self, id: &StudentId) -> Result<Vec<CourseRegistration>, RepositoryError> {
        self.inner.course_registrations(id)
    }

    fn insert_invoice(&self, invoice: Invoice) -> Result<Invoice, RepositoryError> {
        self.invoice_inserts.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .invoice_failures
            .lock()
            .expect("failure queue mutex poisoned")
            .pop_front();
        match scripted {
            Some(err) => Err(err),
            None => self.inner.insert_invoice(invoice),
        }
    }

    fn fetch_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, RepositoryError> {
        self.inner.fetch_invoice(id)
    }

    fn commit_invoice(&self, commit: InvoiceCommit) -> Result<Invoice, RepositoryError> {
        self.inner.commit_invoice(commit)
    }

    fn fetch_provisioning(&self, id: &StudentId) -> Result<Option<ProvisioningRecord>, RepositoryError> {
        self.inner.fetch_provisioning(id)
    }

    fn save_provisioning(&self, record: ProvisioningRecord) -> Result<(), RepositoryError> {
        self.inner.save_provisioning(record)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
