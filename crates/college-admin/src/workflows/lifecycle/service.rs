use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, warn};

use super::billing::{CourseBilling, CourseRegistrationReceipt};
use super::domain::{
    CourseId, CourseRegistration, Invoice, InvoiceDecision, InvoiceId, Notification,
    PaymentDetails, ProvisioningRecord, Student, StudentCourse, StudentId,
};
use super::error::LifecycleError;
use super::identifier::IdentifierAllocator;
use super::intake::{IntakeGuard, IntakeViolation, NewStudent};
use super::invoice::{InvoiceDecisionOutcome, InvoiceWorkflow};
use super::notifications::NotificationEmitter;
use super::onboarding::{OnboardingReport, StudentOnboardingWorkflow};
use super::provisioning::{AccountProvisioner, ProvisioningReport};
use super::repository::{
    AlertPublisher, CollegeRepository, GradeBook, NotificationSink, RepositoryError,
};
use crate::config::{AcademyConfig, OnboardingConfig};
use crate::workflows::academy::AcademyGateway;

/// Outbound collaborators the lifecycle drives.
#[derive(Clone)]
pub struct LifecycleCollaborators {
    pub notifications: Arc<dyn NotificationSink>,
    pub grades: Arc<dyn GradeBook>,
    pub academy: Arc<dyn AcademyGateway>,
    pub alerts: Arc<dyn AlertPublisher>,
}

/// Read model returned by the student lookup.
#[derive(Debug, Clone, Serialize)]
pub struct StudentProfile {
    pub student: Student,
    pub courses: Vec<StudentCourse>,
    pub registrations: Vec<CourseRegistration>,
    pub academy_account: Option<ProvisioningRecord>,
}

/// Entry point for the admin action layer: student registration and onboarding,
/// course billing, invoice decisions and academy sync.
pub struct CollegeLifecycleService<R> {
    repository: Arc<R>,
    intake: IntakeGuard,
    onboarding: StudentOnboardingWorkflow<R>,
    billing: CourseBilling<R>,
    invoices: InvoiceWorkflow<R>,
    provisioner: Arc<AccountProvisioner<R>>,
    notifications: NotificationEmitter,
}

impl<R> CollegeLifecycleService<R>
where
    R: CollegeRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        collaborators: LifecycleCollaborators,
        onboarding: &OnboardingConfig,
        academy: &AcademyConfig,
    ) -> Self {
        let allocator = IdentifierAllocator::new(onboarding.identifier_attempts);
        Self::with_allocator(repository, collaborators, allocator, academy)
    }

    pub fn with_allocator(
        repository: Arc<R>,
        collaborators: LifecycleCollaborators,
        allocator: IdentifierAllocator,
        academy: &AcademyConfig,
    ) -> Self {
        let notifications = NotificationEmitter::new(collaborators.notifications);
        let provisioner = Arc::new(AccountProvisioner::new(
            repository.clone(),
            collaborators.academy,
            collaborators.alerts.clone(),
            academy.timeout,
        ));

        Self {
            onboarding: StudentOnboardingWorkflow::new(
                repository.clone(),
                allocator,
                notifications.clone(),
            ),
            billing: CourseBilling::new(repository.clone()),
            invoices: InvoiceWorkflow::new(
                repository.clone(),
                collaborators.grades,
                provisioner.clone(),
                notifications.clone(),
                collaborators.alerts,
            ),
            repository,
            intake: IntakeGuard,
            provisioner,
            notifications,
        }
    }

    /// Validates and stores a new student, then onboards it. A failed onboarding removes
    /// the freshly stored record so the registration can be retried from scratch.
    pub fn register_student(
        &self,
        form: NewStudent,
        today: NaiveDate,
    ) -> Result<OnboardingReport, LifecycleError> {
        let student = self.intake.admit(form, today)?;
        self.check_requested_batch(&student)?;
        let email = student.email.clone();
        // Fresh records carry a new key and no identifier, so the email is the only clash.
        let stored = match self.repository.insert_student(student) {
            Ok(stored) => stored,
            Err(RepositoryError::Conflict(_)) => {
                return Err(IntakeViolation::DuplicateEmail(email).into());
            }
            Err(other) => return Err(other.into()),
        };
        info!(student = %stored.id, "student registered");

        match self.onboarding.run(&stored.id) {
            Ok(report) => Ok(report),
            Err(err) => {
                warn!(student = %stored.id, error = %err, "onboarding failed; rolling back registration");
                if let Err(cleanup) = self.repository.delete_student(&stored.id) {
                    error!(student = %stored.id, error = %cleanup, "failed to roll back student record");
                }
                Err(err)
            }
        }
    }

    /// Runs (or re-runs) onboarding for an existing record. The record is kept on failure.
    pub fn on_student_created(
        &self,
        student_id: &StudentId,
    ) -> Result<OnboardingReport, LifecycleError> {
        self.onboarding.run(student_id)
    }

    pub async fn on_invoice_decision(
        &self,
        invoice_id: &InvoiceId,
        decision: InvoiceDecision,
    ) -> Result<InvoiceDecisionOutcome, LifecycleError> {
        self.invoices.decide(invoice_id, decision).await
    }

    pub async fn resume_approval(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<InvoiceDecisionOutcome, LifecycleError> {
        self.invoices.resume_approval(invoice_id).await
    }

    pub async fn sync_academy_account(
        &self,
        student_id: &StudentId,
    ) -> Result<ProvisioningReport, LifecycleError> {
        self.provisioner.sync_student(student_id).await
    }

    pub fn register_course(
        &self,
        student_id: &StudentId,
        course_id: &CourseId,
        today: NaiveDate,
    ) -> Result<CourseRegistrationReceipt, LifecycleError> {
        self.billing.register_course(student_id, course_id, today)
    }

    pub async fn submit_payment(
        &self,
        invoice_id: &InvoiceId,
        details: PaymentDetails,
    ) -> Result<Invoice, LifecycleError> {
        self.invoices.submit_payment(invoice_id, details).await
    }

    pub async fn mark_incomplete(&self, invoice_id: &InvoiceId) -> Result<Invoice, LifecycleError> {
        self.invoices.mark_incomplete(invoice_id).await
    }

    pub fn student(&self, student_id: &StudentId) -> Result<StudentProfile, LifecycleError> {
        let student = self.load_student(student_id)?;
        Ok(StudentProfile {
            courses: self.repository.student_courses(&student.id)?,
            registrations: self.repository.course_registrations(&student.id)?,
            academy_account: self.repository.fetch_provisioning(&student.id)?,
            student,
        })
    }

    pub fn notifications(&self, student_id: &StudentId) -> Result<Vec<Notification>, LifecycleError> {
        let student = self.load_student(student_id)?;
        Ok(self.notifications.notifications_for(&student.id)?)
    }

    /// A batch picked on the form must exist and be open to the student's program.
    fn check_requested_batch(&self, student: &Student) -> Result<(), LifecycleError> {
        let Some(batch_id) = &student.batch_id else {
            return Ok(());
        };
        let batch = self
            .repository
            .list_batches(None)?
            .into_iter()
            .find(|batch| &batch.id == batch_id)
            .ok_or_else(|| LifecycleError::BatchNotFound(batch_id.clone()))?;
        match (&batch.program_id, &student.program_id) {
            (Some(batch_program), Some(program)) if batch_program != program => {
                Err(LifecycleError::BatchOutsideProgram {
                    batch_id: batch.id,
                    program_id: program.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn load_student(&self, student_id: &StudentId) -> Result<Student, LifecycleError> {
        self.repository
            .fetch_student(student_id)?
            .ok_or_else(|| LifecycleError::StudentNotFound(student_id.clone()))
    }
}
