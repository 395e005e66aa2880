//! Student lifecycle and invoice approval workflows.
//!
//! Onboarding runs once when a student record is created: identifier allocation, batch
//! placement, catalog enrollment and the welcome notice. The invoice workflow handles
//! payment submission and the approve/deny decisions, including the approval cascade into
//! the grade book and the external academy.

pub mod batch;
pub mod billing;
pub mod domain;
pub mod enrollment;
pub mod error;
pub mod identifier;
pub mod intake;
pub mod invoice;
mod locks;
pub mod memory;
pub mod notifications;
pub mod onboarding;
pub mod provisioning;
pub mod repository;
pub mod router;
pub mod service;

pub use batch::{select_batch, BatchAssignment, BatchResolver};
pub use billing::{CourseBilling, CourseRegistrationReceipt};
pub use domain::*;
pub use enrollment::{EnrollmentEngine, SYSTEM_PROVENANCE};
pub use error::LifecycleError;
pub use identifier::IdentifierAllocator;
pub use intake::{IntakeGuard, IntakeViolation, NewStudent};
pub use invoice::{InvoiceDecisionOutcome, InvoiceWorkflow, NOTIFICATION_FAILED_TEMPLATE};
pub use memory::InMemoryCollegeRepository;
pub use notifications::NotificationEmitter;
pub use onboarding::{OnboardingReport, OnboardingStage, StudentOnboardingWorkflow};
pub use provisioning::{
    AccountProvisioner, ProvisioningReport, ProvisioningStatus, COURSE_MISSING_TEMPLATE,
    PROVISIONING_FAILED_TEMPLATE,
};
pub use repository::{
    AlertError, AlertPublisher, CollegeRepository, GradeBook, GradeError, InvoiceCommit,
    NotificationError, NotificationSink, OperationalAlert, PaymentUpdate, RepositoryError,
};
pub use router::lifecycle_router;
pub use service::{CollegeLifecycleService, LifecycleCollaborators, StudentProfile};

#[cfg(test)]
mod tests;
