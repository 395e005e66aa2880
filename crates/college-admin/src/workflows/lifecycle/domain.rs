use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

static RECORD_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique record key such as `stu-000042`.
pub(crate) fn next_record_key(prefix: &str) -> String {
    let id = RECORD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{id:06}")
}

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

record_id!(
    /// Storage key of a student record. Not the human-readable student identifier.
    StudentId
);
record_id!(ProgramId);
record_id!(CourseId);
record_id!(BatchId);
record_id!(InvoiceId);
record_id!(CourseRegistrationId);
record_id!(NotificationId);
record_id!(
    /// Human-readable student identifier, e.g. `CS/4821/25`.
    StudentNumber
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

impl AccountStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Suspended => "suspended",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub email: String,
    pub date_of_birth: NaiveDate,
    pub program_id: Option<ProgramId>,
    pub batch_id: Option<BatchId>,
    pub account_status: AccountStatus,
    #[serde(rename = "student_id")]
    pub student_number: Option<StudentNumber>,
    /// Password captured at creation, handed to the academy when the account is provisioned.
    #[serde(skip_serializing, default)]
    pub student_password: String,
    pub created_on: NaiveDate,
}

impl Student {
    pub fn full_name(&self) -> String {
        [
            Some(self.first_name.trim()),
            self.middle_name.as_deref().map(str::trim),
            Some(self.last_name.trim()),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    pub fn full_name_with_id(&self) -> String {
        match &self.student_number {
            Some(number) => format!("{} ({number})", self.full_name()),
            None => self.full_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    /// Short code prefixed to generated student identifiers.
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub program_id: ProgramId,
    pub code: String,
    pub title: String,
    pub price: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub title: String,
    /// `None` for batches open to every program.
    pub program_id: Option<ProgramId>,
    pub starting_date: NaiveDate,
    pub ending_date: NaiveDate,
}

impl Batch {
    pub fn covers(&self, day: NaiveDate) -> bool {
        self.starting_date <= day && day <= self.ending_date
    }
}

/// Catalog enrollment materialized from the student's program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentCourse {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub course_title: String,
    pub created_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    #[default]
    Pending,
    Enrolled,
}

impl EnrollmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Enrolled => "enrolled",
        }
    }
}

/// A student's paid seat in a course, activated when its invoice is approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRegistration {
    pub id: CourseRegistrationId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub course_code: String,
    pub course_title: String,
    pub enrollment_status: EnrollmentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    Pending,
    Approved,
    Denied,
    Incomplete,
}

impl InvoiceStatus {
    pub const fn label(self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Approved => "approved",
            InvoiceStatus::Denied => "denied",
            InvoiceStatus::Incomplete => "incomplete",
        }
    }

    pub const fn can_approve(self) -> bool {
        matches!(self, InvoiceStatus::Unpaid | InvoiceStatus::Pending)
    }

    pub const fn can_deny(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Unpaid | InvoiceStatus::Pending | InvoiceStatus::Incomplete
        )
    }

    pub const fn accepts_payment(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Unpaid | InvoiceStatus::Denied | InvoiceStatus::Incomplete
        )
    }

    pub const fn can_mark_incomplete(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Unpaid | InvoiceStatus::Pending | InvoiceStatus::Denied
        )
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinanceApprovalStatus {
    #[default]
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub finance_approval_status: FinanceApprovalStatus,
    pub account_holder_fullname: String,
    pub transaction_reference: String,
}

/// Payer details attached when a student submits proof of payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub account_holder_fullname: String,
    pub transaction_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub course_registration_id: CourseRegistrationId,
    pub price: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub student_id: StudentId,
    pub program_id: ProgramId,
    pub batch_id: BatchId,
    pub total_price: u32,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub created_by: String,
    pub payment_transaction: Option<PaymentTransaction>,
    pub items: Vec<InvoiceItem>,
}

/// Administrative decision on a submitted invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceDecision {
    Approve,
    Deny,
}

impl InvoiceDecision {
    pub const fn label(self) -> &'static str {
        match self {
            InvoiceDecision::Approve => "approve",
            InvoiceDecision::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTone {
    Success,
    Danger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Create,
    Approved,
    Pay,
}

/// Record that triggered a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum NotificationSubject {
    Student(StudentId),
    Invoice(InvoiceId),
}

/// Notification contents before the sink stamps an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationDraft {
    pub student_id: StudentId,
    pub subject: NotificationSubject,
    pub status: NotificationTone,
    pub card_color: NotificationTone,
    pub action: NotificationAction,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub student_id: StudentId,
    pub subject: NotificationSubject,
    pub status: NotificationTone,
    pub card_color: NotificationTone,
    pub action: NotificationAction,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_draft(draft: NotificationDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id: NotificationId(next_record_key("ntf")),
            student_id: draft.student_id,
            subject: draft.subject,
            status: draft.status,
            card_color: draft.card_color,
            action: draft.action,
            message: draft.message,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountOrigin {
    /// The account was created by provisioning.
    Created,
    /// An account with the student's email already existed remotely.
    Adopted,
}

/// Local ledger of what has been pushed to the academy for one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub student_id: StudentId,
    pub remote_user_id: String,
    pub origin: AccountOrigin,
    pub synced_course_codes: std::collections::BTreeSet<String>,
}
