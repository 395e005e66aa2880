use super::domain::{BatchId, CourseId, InvoiceDecision, InvoiceId, InvoiceStatus, ProgramId, StudentId};
use super::intake::IntakeViolation;
use super::repository::{GradeError, NotificationError, RepositoryError};

/// Failure of a lifecycle operation. Gateway failures never show up here; they are
/// reported inside provisioning outcomes.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Intake(#[from] IntakeViolation),
    #[error("student {0} not found")]
    StudentNotFound(StudentId),
    #[error("invoice {0} not found")]
    InvoiceNotFound(InvoiceId),
    #[error("program {0} not found")]
    ProgramNotFound(ProgramId),
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("batch {0} not found")]
    BatchNotFound(BatchId),
    #[error("student {0} has no program")]
    MissingProgram(StudentId),
    #[error("student {0} has no batch; invoices require one")]
    MissingBatch(StudentId),
    #[error("course {course_id} is not part of program {program_id}")]
    CourseOutsideProgram {
        course_id: CourseId,
        program_id: ProgramId,
    },
    #[error("batch {batch_id} does not belong to program {program_id}")]
    BatchOutsideProgram {
        batch_id: BatchId,
        program_id: ProgramId,
    },
    #[error("student {0} has no identifier yet; finish onboarding first")]
    MissingStudentNumber(StudentId),
    #[error("student {student_id} is already registered for course {course_id}")]
    AlreadyRegistered {
        student_id: StudentId,
        course_id: CourseId,
    },
    #[error("no unique identifier found for program {program_code} after {attempts} attempts")]
    IdentifierExhausted { program_code: String, attempts: u32 },
    #[error("cannot {action} invoice {invoice_id} while it is {status}")]
    InvalidTransition {
        invoice_id: InvoiceId,
        action: &'static str,
        status: InvoiceStatus,
    },
    #[error("invoice {0} has no items")]
    MissingInvoiceItem(InvoiceId),
    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),
    #[error(transparent)]
    Repository(RepositoryError),
    #[error(transparent)]
    Grade(#[from] GradeError),
    #[error(transparent)]
    Notification(#[from] NotificationError),
}

impl LifecycleError {
    /// Stable machine-readable tag for API payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Intake(_) => "validation",
            Self::StudentNotFound(_)
            | Self::InvoiceNotFound(_)
            | Self::ProgramNotFound(_)
            | Self::CourseNotFound(_)
            | Self::Repository(RepositoryError::NotFound(_)) => "not_found",
            Self::MissingProgram(_) => "missing_program",
            Self::MissingBatch(_) => "missing_batch",
            Self::CourseOutsideProgram { .. } => "course_outside_program",
            Self::BatchNotFound(_) => "unknown_batch",
            Self::BatchOutsideProgram { .. } => "batch_outside_program",
            Self::MissingStudentNumber(_) => "missing_student_number",
            Self::AlreadyRegistered { .. } => "already_registered",
            Self::IdentifierExhausted { .. } => "identifier_exhausted",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::MissingInvoiceItem(_) => "missing_invoice_item",
            Self::PersistenceConflict(_) => "persistence_conflict",
            Self::Repository(_) => "repository",
            Self::Grade(_) => "grade",
            Self::Notification(_) => "notification",
        }
    }

    pub(crate) fn invalid_decision(
        invoice_id: &InvoiceId,
        decision: InvoiceDecision,
        status: InvoiceStatus,
    ) -> Self {
        Self::InvalidTransition {
            invoice_id: invoice_id.clone(),
            action: decision.label(),
            status,
        }
    }
}

impl From<RepositoryError> for LifecycleError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(detail) => Self::PersistenceConflict(detail),
            other => Self::Repository(other),
        }
    }
}
