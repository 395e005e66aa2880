use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use super::domain::{AccountOrigin, ProvisioningRecord, Student, StudentId};
use super::error::LifecycleError;
use super::locks::KeyedLocks;
use super::repository::{AlertPublisher, CollegeRepository, OperationalAlert};
use crate::workflows::academy::{AcademyGateway, GatewayError, NewAcademyUser, RemoteUserId};

pub const PROVISIONING_FAILED_TEMPLATE: &str = "academy_provisioning_failed";
pub const COURSE_MISSING_TEMPLATE: &str = "academy_course_missing";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProvisioningStatus {
    /// The decision does not involve the academy.
    NotRequired,
    /// The ledger already covered every registration; no remote calls were made.
    UpToDate,
    Synced,
    /// Local state is committed; the remote side needs another sync.
    PendingRetry { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningReport {
    pub student_id: StudentId,
    pub remote_user_id: Option<String>,
    pub origin: Option<AccountOrigin>,
    pub account_created: bool,
    pub enrolled_courses: Vec<String>,
    /// Course codes with no matching academy course.
    pub unresolved_courses: Vec<String>,
    pub status: ProvisioningStatus,
}

impl ProvisioningReport {
    fn new(student_id: &StudentId) -> Self {
        Self {
            student_id: student_id.clone(),
            remote_user_id: None,
            origin: None,
            account_created: false,
            enrolled_courses: Vec::new(),
            unresolved_courses: Vec::new(),
            status: ProvisioningStatus::UpToDate,
        }
    }

    pub fn not_required(student_id: &StudentId) -> Self {
        Self {
            status: ProvisioningStatus::NotRequired,
            ..Self::new(student_id)
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, ProvisioningStatus::PendingRetry { .. })
    }
}

/// Opening an account fails either remotely (retry later) or on a local record gap.
enum AccountError {
    Gateway(GatewayError),
    Local(LifecycleError),
}

impl From<GatewayError> for AccountError {
    fn from(value: GatewayError) -> Self {
        Self::Gateway(value)
    }
}

/// Mirrors a student's account and course registrations into the academy, tracking
/// progress in the local provisioning ledger so reruns only push what is missing.
pub struct AccountProvisioner<R> {
    repository: Arc<R>,
    gateway: Arc<dyn AcademyGateway>,
    alerts: Arc<dyn AlertPublisher>,
    timeout: Duration,
    locks: KeyedLocks<StudentId>,
}

impl<R> AccountProvisioner<R>
where
    R: CollegeRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        gateway: Arc<dyn AcademyGateway>,
        alerts: Arc<dyn AlertPublisher>,
        timeout: Duration,
    ) -> Self {
        Self {
            repository,
            gateway,
            alerts,
            timeout,
            locks: KeyedLocks::default(),
        }
    }

    /// Local failures are returned as errors; academy failures end up in the report.
    pub async fn sync_student(
        &self,
        student_id: &StudentId,
    ) -> Result<ProvisioningReport, LifecycleError> {
        let _guard = self.locks.acquire(student_id).await;

        let student = self
            .repository
            .fetch_student(student_id)?
            .ok_or_else(|| LifecycleError::StudentNotFound(student_id.clone()))?;
        let mut report = ProvisioningReport::new(student_id);

        let mut ledger = match self.repository.fetch_provisioning(student_id)? {
            Some(record) => record,
            None => match self.open_account(&student).await {
                Ok(record) => {
                    self.repository.save_provisioning(record.clone())?;
                    report.account_created = record.origin == AccountOrigin::Created;
                    record
                }
                Err(AccountError::Gateway(err)) => return Ok(self.pending(report, &student, err)),
                Err(AccountError::Local(err)) => {
                    error!(student = %student.id, error = %err, "academy account cannot be opened");
                    return Err(err);
                }
            },
        };
        report.remote_user_id = Some(ledger.remote_user_id.clone());
        report.origin = Some(ledger.origin);

        let outstanding: BTreeSet<String> = self
            .repository
            .course_registrations(student_id)?
            .into_iter()
            .map(|registration| registration.course_code)
            .filter(|code| !ledger.synced_course_codes.contains(code))
            .collect();

        let remote_user = RemoteUserId(ledger.remote_user_id.clone());
        let mut failure = None;
        for code in outstanding {
            match self.enroll(&remote_user, &code).await {
                Ok(true) => {
                    ledger.synced_course_codes.insert(code.clone());
                    self.repository.save_provisioning(ledger.clone())?;
                    report.enrolled_courses.push(code);
                }
                Ok(false) => report.unresolved_courses.push(code),
                Err(err) => {
                    let retryable = err.is_retryable();
                    warn!(student = %student.id, course = %code, error = %err, "academy enrollment failed");
                    failure.get_or_insert(err);
                    if retryable {
                        break;
                    }
                }
            }
        }

        if !report.unresolved_courses.is_empty() {
            let mut details = BTreeMap::new();
            details.insert("courses".to_string(), report.unresolved_courses.join(","));
            self.alert(COURSE_MISSING_TEMPLATE, &student.id, details);
        }

        if let Some(err) = failure {
            return Ok(self.pending(report, &student, err));
        }

        report.status = if report.account_created
            || !report.enrolled_courses.is_empty()
            || !report.unresolved_courses.is_empty()
        {
            ProvisioningStatus::Synced
        } else {
            ProvisioningStatus::UpToDate
        };
        info!(
            student = %student.id,
            created = report.account_created,
            enrolled = report.enrolled_courses.len(),
            "academy account synced"
        );
        Ok(report)
    }

    async fn open_account(&self, student: &Student) -> Result<ProvisioningRecord, AccountError> {
        let existing = self
            .bounded(
                "find_user_by_email",
                self.gateway.find_user_by_email(&student.email),
            )
            .await?;

        let (remote_user_id, origin) = match existing {
            Some(id) => (id, AccountOrigin::Adopted),
            None => {
                let username = student
                    .student_number
                    .as_ref()
                    .map(|number| number.0.to_lowercase())
                    .ok_or_else(|| {
                        AccountError::Local(LifecycleError::MissingStudentNumber(student.id.clone()))
                    })?;
                let user = NewAcademyUser {
                    username,
                    password: student.student_password.clone(),
                    first_name: student.first_name.clone(),
                    last_name: student.last_name.clone(),
                    email: student.email.clone(),
                };
                let id = self
                    .bounded("create_user", self.gateway.create_user(user))
                    .await?;
                (id, AccountOrigin::Created)
            }
        };

        Ok(ProvisioningRecord {
            student_id: student.id.clone(),
            remote_user_id: remote_user_id.0,
            origin,
            synced_course_codes: BTreeSet::new(),
        })
    }

    /// `Ok(false)` when the academy has no course with this code.
    async fn enroll(&self, user: &RemoteUserId, code: &str) -> Result<bool, GatewayError> {
        let Some(course) = self
            .bounded("find_course_by_code", self.gateway.find_course_by_code(code))
            .await?
        else {
            return Ok(false);
        };
        self.bounded(
            "create_enrollment",
            self.gateway.create_enrollment(user, &course),
        )
        .await?;
        Ok(true)
    }

    async fn bounded<T, F>(&self, call: &str, future: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Unavailable(format!(
                "{call} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    fn pending(
        &self,
        mut report: ProvisioningReport,
        student: &Student,
        err: GatewayError,
    ) -> ProvisioningReport {
        error!(student = %student.id, error = %err, "academy provisioning pending retry");
        let mut details = BTreeMap::new();
        details.insert("error".to_string(), err.to_string());
        details.insert("retryable".to_string(), err.is_retryable().to_string());
        self.alert(PROVISIONING_FAILED_TEMPLATE, &student.id, details);
        report.status = ProvisioningStatus::PendingRetry {
            reason: err.to_string(),
        };
        report
    }

    fn alert(&self, template: &str, student_id: &StudentId, details: BTreeMap<String, String>) {
        let alert = OperationalAlert {
            template: template.to_string(),
            student_id: student_id.clone(),
            details,
        };
        if let Err(err) = self.alerts.publish(alert) {
            error!(student = %student_id, template, error = %err, "failed to publish operational alert");
        }
    }
}
