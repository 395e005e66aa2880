use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{
    Batch, BatchId, Course, CourseId, CourseRegistration, CourseRegistrationId, FinanceApprovalStatus,
    Invoice, InvoiceId, InvoiceStatus, Notification, NotificationAction, NotificationDraft,
    NotificationSubject, PaymentTransaction, Program, ProgramId, ProvisioningRecord, Student,
    StudentCourse, StudentId, StudentNumber,
};

/// Persistence boundary for the lifecycle workflows.
///
/// Implementations must enforce uniqueness of student identifiers, of (student, course)
/// pairs for both catalog enrollments and registrations, and apply [`InvoiceCommit`]s
/// atomically.
pub trait CollegeRepository: Send + Sync {
    fn insert_student(&self, student: Student) -> Result<Student, RepositoryError>;
    fn fetch_student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError>;
    /// Removes the student together with everything it owns.
    fn delete_student(&self, id: &StudentId) -> Result<(), RepositoryError>;
    /// Sets the identifier only if the student has none. Returns `Ok(false)` when one was
    /// already present and `Conflict` when another student holds `number`.
    fn claim_student_number(
        &self,
        id: &StudentId,
        number: &StudentNumber,
    ) -> Result<bool, RepositoryError>;
    /// Sets the batch only if the student has none, without touching other fields.
    fn assign_batch_if_unset(
        &self,
        id: &StudentId,
        batch: &BatchId,
    ) -> Result<bool, RepositoryError>;

    fn fetch_program(&self, id: &ProgramId) -> Result<Option<Program>, RepositoryError>;
    fn program_courses(&self, id: &ProgramId) -> Result<Vec<Course>, RepositoryError>;
    fn fetch_course(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError>;
    /// Batches of `program`, or every batch when `program` is `None`.
    fn list_batches(&self, program: Option<&ProgramId>) -> Result<Vec<Batch>, RepositoryError>;

    fn student_courses(&self, id: &StudentId) -> Result<Vec<StudentCourse>, RepositoryError>;
    fn insert_student_course(
        &self,
        record: StudentCourse,
    ) -> Result<StudentCourse, RepositoryError>;

    fn insert_course_registration(
        &self,
        registration: CourseRegistration,
    ) -> Result<CourseRegistration, RepositoryError>;
    /// Removes a registration that no invoice references yet. Missing ids are a no-op.
    fn delete_course_registration(&self, id: &CourseRegistrationId) -> Result<(), RepositoryError>;
    fn fetch_course_registration(
        &self,
        id: &CourseRegistrationId,
    ) -> Result<Option<CourseRegistration>, RepositoryError>;
    fn course_registrations(
        &self,
        id: &StudentId,
    ) -> Result<Vec<CourseRegistration>, RepositoryError>;

    fn insert_invoice(&self, invoice: Invoice) -> Result<Invoice, RepositoryError>;
    fn fetch_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, RepositoryError>;
    /// Applies a status transition atomically; fails with `Conflict` if the stored status
    /// no longer matches `expected_status`.
    fn commit_invoice(&self, commit: InvoiceCommit) -> Result<Invoice, RepositoryError>;

    fn fetch_provisioning(
        &self,
        id: &StudentId,
    ) -> Result<Option<ProvisioningRecord>, RepositoryError>;
    fn save_provisioning(&self, record: ProvisioningRecord) -> Result<(), RepositoryError>;
}

/// A single invoice state change together with the rows that move with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceCommit {
    pub invoice_id: InvoiceId,
    pub expected_status: InvoiceStatus,
    pub status: InvoiceStatus,
    pub payment: PaymentUpdate,
    /// Registration to flip to enrolled in the same write.
    pub enroll_registration: Option<CourseRegistrationId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentUpdate {
    Keep,
    /// Updates the finance status of an existing transaction; no-op when there is none.
    SetFinanceStatus(FinanceApprovalStatus),
    Replace(PaymentTransaction),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Delivery and storage of student-facing notifications.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, draft: NotificationDraft) -> Result<Notification, NotificationError>;
    fn notifications_for(&self, id: &StudentId) -> Result<Vec<Notification>, NotificationError>;

    fn has_notification(
        &self,
        id: &StudentId,
        subject: &NotificationSubject,
        action: NotificationAction,
    ) -> Result<bool, NotificationError> {
        Ok(self
            .notifications_for(id)?
            .iter()
            .any(|notification| &notification.subject == subject && notification.action == action))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

/// Grade sheet hook fired once a registration is enrolled. Expected to be idempotent.
pub trait GradeBook: Send + Sync {
    fn create_grade(&self, registration: &CourseRegistrationId) -> Result<(), GradeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GradeError {
    #[error("grade book unavailable: {0}")]
    Unavailable(String),
}

/// Outbound hook for operator-facing alerts (pager, e-mail, chat adapters).
pub trait AlertPublisher: Send + Sync {
    fn publish(&self, alert: OperationalAlert) -> Result<(), AlertError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalAlert {
    pub template: String,
    pub student_id: StudentId,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("alert transport unavailable: {0}")]
    Transport(String),
}
