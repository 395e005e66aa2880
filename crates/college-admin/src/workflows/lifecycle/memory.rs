use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use super::domain::{
    Batch, BatchId, Course, CourseId, CourseRegistration, CourseRegistrationId, EnrollmentStatus,
    FinanceApprovalStatus, Invoice, InvoiceId, Notification, NotificationDraft, Program, ProgramId,
    ProvisioningRecord, Student, StudentCourse, StudentId, StudentNumber,
};
use super::repository::{
    CollegeRepository, InvoiceCommit, NotificationError, NotificationSink, PaymentUpdate,
    RepositoryError,
};

/// Process-local store backing the API service, the demo and tests. It enforces the same
/// uniqueness rules a relational schema would.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCollegeRepository {
    state: Arc<Mutex<CollegeState>>,
}

#[derive(Debug, Default)]
struct CollegeState {
    students: BTreeMap<StudentId, Student>,
    programs: BTreeMap<ProgramId, Program>,
    courses: BTreeMap<CourseId, Course>,
    batches: BTreeMap<BatchId, Batch>,
    student_courses: Vec<StudentCourse>,
    registrations: BTreeMap<CourseRegistrationId, CourseRegistration>,
    invoices: BTreeMap<InvoiceId, Invoice>,
    provisioning: BTreeMap<StudentId, ProvisioningRecord>,
    notifications: Vec<Notification>,
}

impl InMemoryCollegeRepository {
    pub fn add_program(&self, program: Program) {
        self.lock().programs.insert(program.id.clone(), program);
    }

    pub fn add_course(&self, course: Course) {
        self.lock().courses.insert(course.id.clone(), course);
    }

    pub fn add_batch(&self, batch: Batch) {
        self.lock().batches.insert(batch.id.clone(), batch);
    }

    pub fn students(&self) -> Vec<Student> {
        self.lock().students.values().cloned().collect()
    }

    pub fn invoices_for(&self, student: &StudentId) -> Vec<Invoice> {
        self.lock()
            .invoices
            .values()
            .filter(|invoice| &invoice.student_id == student)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, CollegeState> {
        self.state.lock().expect("college repository mutex poisoned")
    }
}

impl CollegeRepository for InMemoryCollegeRepository {
    fn insert_student(&self, student: Student) -> Result<Student, RepositoryError> {
        let mut state = self.lock();
        if state.students.contains_key(&student.id) {
            return Err(RepositoryError::Conflict(format!("student {}", student.id)));
        }
        if state
            .students
            .values()
            .any(|existing| existing.email.eq_ignore_ascii_case(&student.email))
        {
            return Err(RepositoryError::Conflict(format!("email {}", student.email)));
        }
        if let Some(number) = &student.student_number {
            if state.number_taken(number) {
                return Err(RepositoryError::Conflict(format!("student number {number}")));
            }
        }
        state.students.insert(student.id.clone(), student.clone());
        Ok(student)
    }

    fn fetch_student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        Ok(self.lock().students.get(id).cloned())
    }

    fn delete_student(&self, id: &StudentId) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if state.students.remove(id).is_none() {
            return Err(RepositoryError::NotFound(format!("student {id}")));
        }
        state.student_courses.retain(|record| &record.student_id != id);
        state.registrations.retain(|_, record| &record.student_id != id);
        state.invoices.retain(|_, invoice| &invoice.student_id != id);
        state.provisioning.remove(id);
        state.notifications.retain(|notification| &notification.student_id != id);
        Ok(())
    }

    fn claim_student_number(
        &self,
        id: &StudentId,
        number: &StudentNumber,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.lock();
        let taken = state.number_taken(number);
        let student = state
            .students
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("student {id}")))?;
        if student.student_number.is_some() {
            return Ok(false);
        }
        if taken {
            return Err(RepositoryError::Conflict(format!("student number {number}")));
        }
        student.student_number = Some(number.clone());
        Ok(true)
    }

    fn assign_batch_if_unset(
        &self,
        id: &StudentId,
        batch: &BatchId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.lock();
        let student = state
            .students
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("student {id}")))?;
        if student.batch_id.is_some() {
            return Ok(false);
        }
        student.batch_id = Some(batch.clone());
        Ok(true)
    }

    fn fetch_program(&self, id: &ProgramId) -> Result<Option<Program>, RepositoryError> {
        Ok(self.lock().programs.get(id).cloned())
    }

    fn program_courses(&self, id: &ProgramId) -> Result<Vec<Course>, RepositoryError> {
        Ok(self
            .lock()
            .courses
            .values()
            .filter(|course| &course.program_id == id)
            .cloned()
            .collect())
    }

    fn fetch_course(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError> {
        Ok(self.lock().courses.get(id).cloned())
    }

    fn list_batches(&self, program: Option<&ProgramId>) -> Result<Vec<Batch>, RepositoryError> {
        Ok(self
            .lock()
            .batches
            .values()
            .filter(|batch| program.map_or(true, |id| batch.program_id.as_ref() == Some(id)))
            .cloned()
            .collect())
    }

    fn student_courses(&self, id: &StudentId) -> Result<Vec<StudentCourse>, RepositoryError> {
        Ok(self
            .lock()
            .student_courses
            .iter()
            .filter(|record| &record.student_id == id)
            .cloned()
            .collect())
    }

    fn insert_student_course(
        &self,
        record: StudentCourse,
    ) -> Result<StudentCourse, RepositoryError> {
        let mut state = self.lock();
        if state
            .student_courses
            .iter()
            .any(|existing| existing.student_id == record.student_id && existing.course_id == record.course_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "student course {}/{}",
                record.student_id, record.course_id
            )));
        }
        state.student_courses.push(record.clone());
        Ok(record)
    }

    fn insert_course_registration(
        &self,
        registration: CourseRegistration,
    ) -> Result<CourseRegistration, RepositoryError> {
        let mut state = self.lock();
        if state.registrations.values().any(|existing| {
            existing.student_id == registration.student_id
                && existing.course_id == registration.course_id
        }) {
            return Err(RepositoryError::Conflict(format!(
                "course registration {}/{}",
                registration.student_id, registration.course_id
            )));
        }
        state
            .registrations
            .insert(registration.id.clone(), registration.clone());
        Ok(registration)
    }

    fn delete_course_registration(&self, id: &CourseRegistrationId) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if state.invoices.values().any(|invoice| {
            invoice
                .items
                .iter()
                .any(|item| &item.course_registration_id == id)
        }) {
            return Err(RepositoryError::Conflict(format!(
                "course registration {id} is invoiced"
            )));
        }
        state.registrations.remove(id);
        Ok(())
    }

    fn fetch_course_registration(
        &self,
        id: &CourseRegistrationId,
    ) -> Result<Option<CourseRegistration>, RepositoryError> {
        Ok(self.lock().registrations.get(id).cloned())
    }

    fn course_registrations(
        &self,
        id: &StudentId,
    ) -> Result<Vec<CourseRegistration>, RepositoryError> {
        Ok(self
            .lock()
            .registrations
            .values()
            .filter(|registration| &registration.student_id == id)
            .cloned()
            .collect())
    }

    fn insert_invoice(&self, invoice: Invoice) -> Result<Invoice, RepositoryError> {
        let mut state = self.lock();
        if state.invoices.contains_key(&invoice.id)
            || state
                .invoices
                .values()
                .any(|existing| existing.invoice_number == invoice.invoice_number)
        {
            return Err(RepositoryError::Conflict(format!(
                "invoice {}",
                invoice.invoice_number
            )));
        }
        state.invoices.insert(invoice.id.clone(), invoice.clone());
        Ok(invoice)
    }

    fn fetch_invoice(&self, id: &InvoiceId) -> Result<Option<Invoice>, RepositoryError> {
        Ok(self.lock().invoices.get(id).cloned())
    }

    fn commit_invoice(&self, commit: InvoiceCommit) -> Result<Invoice, RepositoryError> {
        let mut state = self.lock();
        let current = state
            .invoices
            .get(&commit.invoice_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("invoice {}", commit.invoice_id)))?;
        if current.status != commit.expected_status {
            return Err(RepositoryError::Conflict(format!(
                "invoice {} is {}, expected {}",
                commit.invoice_id, current.status, commit.expected_status
            )));
        }
        if let Some(registration_id) = &commit.enroll_registration {
            let registration = state.registrations.get_mut(registration_id).ok_or_else(|| {
                RepositoryError::NotFound(format!("course registration {registration_id}"))
            })?;
            registration.enrollment_status = EnrollmentStatus::Enrolled;
        }

        let invoice = state
            .invoices
            .get_mut(&commit.invoice_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("invoice {}", commit.invoice_id)))?;
        invoice.status = commit.status;
        match commit.payment {
            PaymentUpdate::Keep => {}
            PaymentUpdate::SetFinanceStatus(status) => set_finance_status(invoice, status),
            PaymentUpdate::Replace(transaction) => invoice.payment_transaction = Some(transaction),
        }
        Ok(invoice.clone())
    }

    fn fetch_provisioning(
        &self,
        id: &StudentId,
    ) -> Result<Option<ProvisioningRecord>, RepositoryError> {
        Ok(self.lock().provisioning.get(id).cloned())
    }

    fn save_provisioning(&self, record: ProvisioningRecord) -> Result<(), RepositoryError> {
        self.lock()
            .provisioning
            .insert(record.student_id.clone(), record);
        Ok(())
    }
}

impl NotificationSink for InMemoryCollegeRepository {
    fn emit(&self, draft: NotificationDraft) -> Result<Notification, NotificationError> {
        let notification = Notification::from_draft(draft, Utc::now());
        self.lock().notifications.push(notification.clone());
        Ok(notification)
    }

    fn notifications_for(&self, id: &StudentId) -> Result<Vec<Notification>, NotificationError> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .filter(|notification| &notification.student_id == id)
            .cloned()
            .collect())
    }
}

impl CollegeState {
    fn number_taken(&self, number: &StudentNumber) -> bool {
        self.students
            .values()
            .any(|student| student.student_number.as_ref() == Some(number))
    }
}

fn set_finance_status(invoice: &mut Invoice, status: FinanceApprovalStatus) {
    if let Some(transaction) = invoice.payment_transaction.as_mut() {
        transaction.finance_approval_status = status;
    }
}
