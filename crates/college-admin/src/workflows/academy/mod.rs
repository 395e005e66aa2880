//! Boundary to the external learning-management system ("academy").

mod memory;
mod moodle;

pub use memory::InMemoryAcademy;
pub use moodle::MoodleClient;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteUserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteCourseId(pub String);

/// Account payload sent when a student is first provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAcademyUser {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Network failure, timeout or a gateway that is not configured. Worth retrying.
    #[error("academy unavailable: {0}")]
    Unavailable(String),
    /// The academy answered with an application-level error.
    #[error("academy rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

#[async_trait]
pub trait AcademyGateway: Debug + Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<RemoteUserId>, GatewayError>;
    async fn create_user(&self, user: NewAcademyUser) -> Result<RemoteUserId, GatewayError>;
    async fn find_course_by_code(&self, code: &str)
        -> Result<Option<RemoteCourseId>, GatewayError>;
    async fn create_enrollment(
        &self,
        user: &RemoteUserId,
        course: &RemoteCourseId,
    ) -> Result<(), GatewayError>;
}

/// Stand-in used when no academy is configured; every call reports the gateway as
/// unavailable so approvals degrade to "provisioning pending".
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineAcademy;

const OFFLINE_REASON: &str = "no academy endpoint configured";

#[async_trait]
impl AcademyGateway for OfflineAcademy {
    async fn find_user_by_email(&self, _email: &str) -> Result<Option<RemoteUserId>, GatewayError> {
        Err(GatewayError::Unavailable(OFFLINE_REASON.to_string()))
    }

    async fn create_user(&self, _user: NewAcademyUser) -> Result<RemoteUserId, GatewayError> {
        Err(GatewayError::Unavailable(OFFLINE_REASON.to_string()))
    }

    async fn find_course_by_code(
        &self,
        _code: &str,
    ) -> Result<Option<RemoteCourseId>, GatewayError> {
        Err(GatewayError::Unavailable(OFFLINE_REASON.to_string()))
    }

    async fn create_enrollment(
        &self,
        _user: &RemoteUserId,
        _course: &RemoteCourseId,
    ) -> Result<(), GatewayError> {
        Err(GatewayError::Unavailable(OFFLINE_REASON.to_string()))
    }
}
