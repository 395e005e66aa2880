use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use super::domain::{
    CourseRegistrationId, FinanceApprovalStatus, Invoice, InvoiceDecision, InvoiceId,
    InvoiceStatus, PaymentDetails, PaymentTransaction,
};
use super::error::LifecycleError;
use super::intake::IntakeViolation;
use super::locks::KeyedLocks;
use super::notifications::NotificationEmitter;
use super::provisioning::{AccountProvisioner, ProvisioningReport};
use super::repository::{
    AlertPublisher, CollegeRepository, GradeBook, InvoiceCommit, NotificationError,
    OperationalAlert, PaymentUpdate, RepositoryError,
};

pub const NOTIFICATION_FAILED_TEMPLATE: &str = "lifecycle_notification_failed";

const APPROVED_NOTICE: &str = "approved";
const APPROVED_PENDING_NOTICE: &str = "approved, but account provisioning is pending retry";
const DENIED_NOTICE: &str = "denied";

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDecisionOutcome {
    pub invoice: Invoice,
    pub decision: InvoiceDecision,
    pub provisioning: ProvisioningReport,
    /// False when the notice was already sent or the sink failed (an alert is raised then).
    pub notified: bool,
    pub notice: String,
}

impl InvoiceDecisionOutcome {
    pub fn is_degraded(&self) -> bool {
        self.provisioning.is_pending()
    }
}

/// Invoice state machine: payment submission, approve/deny decisions and the
/// approval cascade (enrollment, grade sheet, academy account, notice).
pub struct InvoiceWorkflow<R> {
    repository: Arc<R>,
    grades: Arc<dyn GradeBook>,
    provisioner: Arc<AccountProvisioner<R>>,
    notifications: NotificationEmitter,
    alerts: Arc<dyn AlertPublisher>,
    locks: KeyedLocks<InvoiceId>,
}

impl<R> InvoiceWorkflow<R>
where
    R: CollegeRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        grades: Arc<dyn GradeBook>,
        provisioner: Arc<AccountProvisioner<R>>,
        notifications: NotificationEmitter,
        alerts: Arc<dyn AlertPublisher>,
    ) -> Self {
        Self {
            repository,
            grades,
            provisioner,
            notifications,
            alerts,
            locks: KeyedLocks::default(),
        }
    }

    pub async fn decide(
        &self,
        invoice_id: &InvoiceId,
        decision: InvoiceDecision,
    ) -> Result<InvoiceDecisionOutcome, LifecycleError> {
        let span = info_span!("invoice_decision", invoice = %invoice_id, decision = decision.label());
        self.decide_serialized(invoice_id, decision)
            .instrument(span)
            .await
    }

    /// Re-drives grade creation, provisioning and the approval notice for an invoice that is
    /// already approved. Every step is idempotent.
    pub async fn resume_approval(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<InvoiceDecisionOutcome, LifecycleError> {
        let span = info_span!("invoice_resume", invoice = %invoice_id);
        self.resume_serialized(invoice_id).instrument(span).await
    }

    /// Records proof of payment and moves the invoice to pending review.
    pub async fn submit_payment(
        &self,
        invoice_id: &InvoiceId,
        details: PaymentDetails,
    ) -> Result<Invoice, LifecycleError> {
        if details.account_holder_fullname.trim().is_empty() {
            return Err(IntakeViolation::MissingField {
                field: "account_holder_fullname",
            }
            .into());
        }
        if details.transaction_reference.trim().is_empty() {
            return Err(IntakeViolation::MissingField {
                field: "transaction_reference",
            }
            .into());
        }

        let _guard = self.locks.acquire(invoice_id).await;
        let invoice = self.load(invoice_id)?;
        if !invoice.status.accepts_payment() {
            return Err(LifecycleError::InvalidTransition {
                invoice_id: invoice.id,
                action: "pay",
                status: invoice.status,
            });
        }

        let updated = self.repository.commit_invoice(InvoiceCommit {
            invoice_id: invoice.id.clone(),
            expected_status: invoice.status,
            status: InvoiceStatus::Pending,
            payment: PaymentUpdate::Replace(PaymentTransaction {
                finance_approval_status: FinanceApprovalStatus::Pending,
                account_holder_fullname: details.account_holder_fullname.trim().to_string(),
                transaction_reference: details.transaction_reference.trim().to_string(),
            }),
            enroll_registration: None,
        })?;
        info!(invoice = %updated.id, from = %invoice.status, "payment submitted");
        Ok(updated)
    }

    pub async fn mark_incomplete(&self, invoice_id: &InvoiceId) -> Result<Invoice, LifecycleError> {
        let _guard = self.locks.acquire(invoice_id).await;
        let invoice = self.load(invoice_id)?;
        if !invoice.status.can_mark_incomplete() {
            return Err(LifecycleError::InvalidTransition {
                invoice_id: invoice.id,
                action: "mark incomplete",
                status: invoice.status,
            });
        }

        let updated = self.repository.commit_invoice(InvoiceCommit {
            invoice_id: invoice.id.clone(),
            expected_status: invoice.status,
            status: InvoiceStatus::Incomplete,
            payment: PaymentUpdate::Keep,
            enroll_registration: None,
        })?;
        info!(invoice = %updated.id, from = %invoice.status, "invoice marked incomplete");
        Ok(updated)
    }

    async fn decide_serialized(
        &self,
        invoice_id: &InvoiceId,
        decision: InvoiceDecision,
    ) -> Result<InvoiceDecisionOutcome, LifecycleError> {
        let _guard = self.locks.acquire(invoice_id).await;
        match decision {
            InvoiceDecision::Approve => self.approve(invoice_id).await,
            InvoiceDecision::Deny => self.deny(invoice_id),
        }
    }

    async fn resume_serialized(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<InvoiceDecisionOutcome, LifecycleError> {
        let _guard = self.locks.acquire(invoice_id).await;
        let invoice = self.load(invoice_id)?;
        if invoice.status != InvoiceStatus::Approved {
            return Err(LifecycleError::InvalidTransition {
                invoice_id: invoice.id,
                action: "resume",
                status: invoice.status,
            });
        }
        let registration = first_registration(&invoice)?;
        self.complete_approval(invoice, registration).await
    }

    async fn approve(&self, invoice_id: &InvoiceId) -> Result<InvoiceDecisionOutcome, LifecycleError> {
        let invoice = self.load(invoice_id)?;
        if !invoice.status.can_approve() {
            return Err(LifecycleError::invalid_decision(
                &invoice.id,
                InvoiceDecision::Approve,
                invoice.status,
            ));
        }
        let registration = first_registration(&invoice)?;
        if self
            .repository
            .fetch_course_registration(&registration)?
            .is_none()
        {
            return Err(RepositoryError::NotFound(format!("course registration {registration}")).into());
        }

        let approved = self.repository.commit_invoice(InvoiceCommit {
            invoice_id: invoice.id.clone(),
            expected_status: invoice.status,
            status: InvoiceStatus::Approved,
            payment: PaymentUpdate::SetFinanceStatus(FinanceApprovalStatus::Approved),
            enroll_registration: Some(registration.clone()),
        })?;
        info!(registration = %registration, "invoice approved and registration enrolled");

        self.complete_approval(approved, registration).await
    }

    async fn complete_approval(
        &self,
        invoice: Invoice,
        registration: CourseRegistrationId,
    ) -> Result<InvoiceDecisionOutcome, LifecycleError> {
        self.grades.create_grade(&registration).map_err(|err| {
            error!(registration = %registration, error = %err, "grade creation failed");
            err
        })?;

        let provisioning = self.provisioner.sync_student(&invoice.student_id).await?;
        if provisioning.is_pending() {
            warn!(student = %invoice.student_id, "approval committed with provisioning pending retry");
        }

        let notified = match self.notifications.invoice_approved(&invoice) {
            Ok(notice) => notice.is_some(),
            Err(err) => {
                self.notification_failed(&invoice, InvoiceDecision::Approve, err);
                false
            }
        };

        let notice = if provisioning.is_pending() {
            APPROVED_PENDING_NOTICE
        } else {
            APPROVED_NOTICE
        };
        Ok(InvoiceDecisionOutcome {
            invoice,
            decision: InvoiceDecision::Approve,
            provisioning,
            notified,
            notice: notice.to_string(),
        })
    }

    fn deny(&self, invoice_id: &InvoiceId) -> Result<InvoiceDecisionOutcome, LifecycleError> {
        let invoice = self.load(invoice_id)?;
        if !invoice.status.can_deny() {
            return Err(LifecycleError::invalid_decision(
                &invoice.id,
                InvoiceDecision::Deny,
                invoice.status,
            ));
        }

        let denied = self.repository.commit_invoice(InvoiceCommit {
            invoice_id: invoice.id.clone(),
            expected_status: invoice.status,
            status: InvoiceStatus::Denied,
            payment: PaymentUpdate::SetFinanceStatus(FinanceApprovalStatus::Denied),
            enroll_registration: None,
        })?;
        info!(from = %invoice.status, "invoice denied");

        let notified = match self.notifications.invoice_denied(&denied) {
            Ok(_) => true,
            Err(err) => {
                self.notification_failed(&denied, InvoiceDecision::Deny, err);
                false
            }
        };

        Ok(InvoiceDecisionOutcome {
            provisioning: ProvisioningReport::not_required(&denied.student_id),
            invoice: denied,
            decision: InvoiceDecision::Deny,
            notified,
            notice: DENIED_NOTICE.to_string(),
        })
    }

    fn load(&self, invoice_id: &InvoiceId) -> Result<Invoice, LifecycleError> {
        self.repository
            .fetch_invoice(invoice_id)?
            .ok_or_else(|| LifecycleError::InvoiceNotFound(invoice_id.clone()))
    }

    fn notification_failed(&self, invoice: &Invoice, decision: InvoiceDecision, err: NotificationError) {
        warn!(invoice = %invoice.id, error = %err, "decision notice could not be delivered");
        let mut details = BTreeMap::new();
        details.insert("invoice_id".to_string(), invoice.id.to_string());
        details.insert("decision".to_string(), decision.label().to_string());
        details.insert("error".to_string(), err.to_string());
        let alert = OperationalAlert {
            template: NOTIFICATION_FAILED_TEMPLATE.to_string(),
            student_id: invoice.student_id.clone(),
            details,
        };
        if let Err(err) = self.alerts.publish(alert) {
            error!(invoice = %invoice.id, error = %err, "failed to publish operational alert");
        }
    }
}

fn first_registration(invoice: &Invoice) -> Result<CourseRegistrationId, LifecycleError> {
    invoice
        .items
        .first()
        .map(|item| item.course_registration_id.clone())
        .ok_or_else(|| LifecycleError::MissingInvoiceItem(invoice.id.clone()))
}
