use std::sync::Arc;

use serde::Serialize;
use tracing::{info, info_span, warn};

use super::batch::{BatchAssignment, BatchResolver};
use super::domain::{Student, StudentCourse, StudentId, StudentNumber};
use super::enrollment::EnrollmentEngine;
use super::error::LifecycleError;
use super::identifier::IdentifierAllocator;
use super::locks::BlockingKeyedLocks;
use super::notifications::NotificationEmitter;
use super::repository::CollegeRepository;

/// Stages of the onboarding pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStage {
    Created,
    IdentifierAllocated,
    BatchAssigned,
    Enrolled,
    Notified,
}

impl OnboardingStage {
    pub const fn label(self) -> &'static str {
        match self {
            OnboardingStage::Created => "created",
            OnboardingStage::IdentifierAllocated => "identifier_allocated",
            OnboardingStage::BatchAssigned => "batch_assigned",
            OnboardingStage::Enrolled => "enrolled",
            OnboardingStage::Notified => "notified",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OnboardingReport {
    pub student: Student,
    pub student_number: StudentNumber,
    pub batch: BatchAssignment,
    pub enrolled: Vec<StudentCourse>,
    /// False when a creation notice already existed from an earlier run.
    pub notified: bool,
}

/// Single forward pass run once a student row exists:
/// identifier, batch, catalog enrollment, welcome notice.
pub struct StudentOnboardingWorkflow<R> {
    repository: Arc<R>,
    allocator: IdentifierAllocator,
    batches: BatchResolver,
    enrollment: EnrollmentEngine,
    notifications: NotificationEmitter,
    locks: BlockingKeyedLocks<StudentId>,
}

impl<R> StudentOnboardingWorkflow<R>
where
    R: CollegeRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        allocator: IdentifierAllocator,
        notifications: NotificationEmitter,
    ) -> Self {
        Self {
            repository,
            allocator,
            batches: BatchResolver,
            enrollment: EnrollmentEngine,
            notifications,
            locks: BlockingKeyedLocks::default(),
        }
    }

    /// Passes for the same student run one at a time.
    pub fn run(&self, student_id: &StudentId) -> Result<OnboardingReport, LifecycleError> {
        self.locks.with(student_id, || self.run_exclusive(student_id))
    }

    fn run_exclusive(&self, student_id: &StudentId) -> Result<OnboardingReport, LifecycleError> {
        let span = info_span!("onboarding", student = %student_id);
        let _entered = span.enter();

        let mut student = self.load(student_id)?;
        info!(stage = OnboardingStage::Created.label(), created_on = %student.created_on);

        let program_id = student
            .program_id
            .clone()
            .ok_or_else(|| LifecycleError::MissingProgram(student.id.clone()))?;
        let program = self
            .repository
            .fetch_program(&program_id)?
            .ok_or(LifecycleError::ProgramNotFound(program_id))?;

        let student_number = self
            .allocator
            .allocate(self.repository.as_ref(), &student, &program)
            .map_err(|err| {
                warn!(error = %err, "identifier allocation failed");
                err
            })?;
        student.student_number = Some(student_number.clone());
        info!(stage = OnboardingStage::IdentifierAllocated.label(), %student_number);

        let batch = self
            .batches
            .resolve(self.repository.as_ref(), &student, student.created_on)?;
        student.batch_id = batch.batch_id().cloned();
        info!(stage = OnboardingStage::BatchAssigned.label(), batch = ?student.batch_id);

        let enrolled = self
            .enrollment
            .enroll_program_courses(self.repository.as_ref(), &student)?;
        info!(stage = OnboardingStage::Enrolled.label(), created = enrolled.len());

        let notified = self.notifications.student_registered(&student)?.is_some();
        info!(stage = OnboardingStage::Notified.label(), notified);

        Ok(OnboardingReport {
            student,
            student_number,
            batch,
            enrolled,
            notified,
        })
    }

    fn load(&self, student_id: &StudentId) -> Result<Student, LifecycleError> {
        self.repository
            .fetch_student(student_id)?
            .ok_or_else(|| LifecycleError::StudentNotFound(student_id.clone()))
    }
}
