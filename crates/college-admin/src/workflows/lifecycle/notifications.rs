use std::sync::Arc;

use super::domain::{
    Invoice, Notification, NotificationAction, NotificationDraft, NotificationSubject,
    NotificationTone, Student, StudentId,
};
use super::repository::{NotificationError, NotificationSink};

const REGISTERED_MESSAGE: &str =
    "Congratulations! You are successfully registered. Click the 'Enroll' button to enroll in course.";
const APPROVED_MESSAGE: &str = "Thank you for your payment! Your invoice has been approved. You can now access the LMS using the username and password provided below and learn";
const DENIED_MESSAGE: &str =
    "Your payment invoice is not approved. Please transfer to our account and re-submit the slip.";

/// Builds the lifecycle notifications and hands them to the sink.
#[derive(Clone)]
pub struct NotificationEmitter {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationEmitter {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Emits the welcome notice unless the student already received one.
    pub fn student_registered(
        &self,
        student: &Student,
    ) -> Result<Option<Notification>, NotificationError> {
        let subject = NotificationSubject::Student(student.id.clone());
        if self
            .sink
            .has_notification(&student.id, &subject, NotificationAction::Create)?
        {
            return Ok(None);
        }
        self.sink
            .emit(NotificationDraft {
                student_id: student.id.clone(),
                subject,
                status: NotificationTone::Success,
                card_color: NotificationTone::Success,
                action: NotificationAction::Create,
                message: REGISTERED_MESSAGE.to_string(),
            })
            .map(Some)
    }

    /// Emits the approval notice unless this invoice already produced one.
    pub fn invoice_approved(
        &self,
        invoice: &Invoice,
    ) -> Result<Option<Notification>, NotificationError> {
        let subject = NotificationSubject::Invoice(invoice.id.clone());
        if self
            .sink
            .has_notification(&invoice.student_id, &subject, NotificationAction::Approved)?
        {
            return Ok(None);
        }
        self.sink
            .emit(NotificationDraft {
                student_id: invoice.student_id.clone(),
                subject,
                status: NotificationTone::Success,
                card_color: NotificationTone::Success,
                action: NotificationAction::Approved,
                message: APPROVED_MESSAGE.to_string(),
            })
            .map(Some)
    }

    /// Each denial is its own event, so repeated denials after resubmission all notify.
    pub fn invoice_denied(&self, invoice: &Invoice) -> Result<Notification, NotificationError> {
        self.sink.emit(NotificationDraft {
            student_id: invoice.student_id.clone(),
            subject: NotificationSubject::Invoice(invoice.id.clone()),
            status: NotificationTone::Danger,
            card_color: NotificationTone::Danger,
            action: NotificationAction::Pay,
            message: DENIED_MESSAGE.to_string(),
        })
    }

    pub fn notifications_for(
        &self,
        student: &StudentId,
    ) -> Result<Vec<Notification>, NotificationError> {
        self.sink.notifications_for(student)
    }
}

impl std::fmt::Debug for NotificationEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationEmitter").finish_non_exhaustive()
    }
}
