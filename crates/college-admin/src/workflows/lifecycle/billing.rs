use std::sync::{Arc, Mutex};

use chrono::{Days, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::domain::{
    next_record_key, CourseId, CourseRegistration, CourseRegistrationId, EnrollmentStatus,
    Invoice, InvoiceId, InvoiceItem, InvoiceStatus, StudentId,
};
use super::enrollment::SYSTEM_PROVENANCE;
use super::error::LifecycleError;
use super::repository::{CollegeRepository, RepositoryError};

const PAYMENT_TERM_DAYS: u64 = 30;
const INVOICE_NUMBER_ATTEMPTS: u32 = 5;

/// Pending registration together with the invoice that pays for it.
#[derive(Debug, Clone, Serialize)]
pub struct CourseRegistrationReceipt {
    pub registration: CourseRegistration,
    pub invoice: Invoice,
}

/// Opens a course registration and bills it.
pub struct CourseBilling<R> {
    repository: Arc<R>,
    rng: Mutex<StdRng>,
}

impl<R> CourseBilling<R>
where
    R: CollegeRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn register_course(
        &self,
        student_id: &StudentId,
        course_id: &CourseId,
        today: NaiveDate,
    ) -> Result<CourseRegistrationReceipt, LifecycleError> {
        let student = self
            .repository
            .fetch_student(student_id)?
            .ok_or_else(|| LifecycleError::StudentNotFound(student_id.clone()))?;
        let program_id = student
            .program_id
            .clone()
            .ok_or_else(|| LifecycleError::MissingProgram(student.id.clone()))?;
        let batch_id = student
            .batch_id
            .clone()
            .ok_or_else(|| LifecycleError::MissingBatch(student.id.clone()))?;
        let course = self
            .repository
            .fetch_course(course_id)?
            .ok_or_else(|| LifecycleError::CourseNotFound(course_id.clone()))?;
        if course.program_id != program_id {
            return Err(LifecycleError::CourseOutsideProgram {
                course_id: course.id,
                program_id,
            });
        }

        let registration = CourseRegistration {
            id: CourseRegistrationId(next_record_key("reg")),
            student_id: student.id.clone(),
            course_id: course.id.clone(),
            course_code: course.code.clone(),
            course_title: course.title.clone(),
            enrollment_status: EnrollmentStatus::Pending,
        };
        let registration = match self.repository.insert_course_registration(registration) {
            Ok(stored) => stored,
            Err(RepositoryError::Conflict(_)) => {
                return Err(LifecycleError::AlreadyRegistered {
                    student_id: student.id,
                    course_id: course.id,
                })
            }
            Err(other) => return Err(other.into()),
        };

        let draft = Invoice {
            id: InvoiceId(next_record_key("inv")),
            invoice_number: String::new(),
            student_id: student.id.clone(),
            program_id,
            batch_id,
            total_price: course.price,
            due_date: today + Days::new(PAYMENT_TERM_DAYS),
            status: InvoiceStatus::Unpaid,
            created_by: SYSTEM_PROVENANCE.to_string(),
            payment_transaction: None,
            items: vec![InvoiceItem {
                course_registration_id: registration.id.clone(),
                price: course.price,
            }],
        };
        let invoice = match self.issue_invoice(draft) {
            Ok(invoice) => invoice,
            Err(err) => {
                // A registration only stands together with its invoice.
                warn!(student = %student.id, course = %course.code, error = %err, "invoice insert failed; dropping registration");
                if let Err(cleanup) = self.repository.delete_course_registration(&registration.id) {
                    error!(registration = %registration.id, error = %cleanup, "failed to drop unbilled registration");
                }
                return Err(err.into());
            }
        };
        info!(
            student = %student.id,
            course = %course.code,
            invoice = %invoice.invoice_number,
            total = invoice.total_price,
            "course registration billed"
        );

        Ok(CourseRegistrationReceipt {
            registration,
            invoice,
        })
    }

    /// Draws a fresh invoice number for each attempt; only number clashes are retried.
    fn issue_invoice(&self, mut draft: Invoice) -> Result<Invoice, RepositoryError> {
        let mut attempt = 1;
        loop {
            draft.invoice_number = self.invoice_number();
            match self.repository.insert_invoice(draft.clone()) {
                Err(RepositoryError::Conflict(detail)) if attempt < INVOICE_NUMBER_ATTEMPTS => {
                    debug!(attempt, %detail, "invoice number taken; drawing another");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn invoice_number(&self) -> String {
        let value: u32 = self.rng.lock().expect("invoice rng mutex poisoned").gen();
        format!("INV-{value:08X}")
    }
}
