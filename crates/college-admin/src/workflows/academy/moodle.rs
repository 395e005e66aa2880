use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{AcademyGateway, GatewayError, NewAcademyUser, RemoteCourseId, RemoteUserId};
use crate::config::AcademyConfig;

const REST_PATH: &str = "/webservice/rest/server.php";
const STUDENT_ROLE_ID: &str = "5";

/// Moodle web-service client speaking the REST protocol with JSON responses.
pub struct MoodleClient {
    http: Client,
    endpoint: String,
    token: String,
}

impl std::fmt::Debug for MoodleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoodleClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct UserList {
    #[serde(default)]
    users: Vec<RemoteEntity>,
}

#[derive(Debug, Deserialize)]
struct CourseList {
    #[serde(default)]
    courses: Vec<RemoteEntity>,
}

#[derive(Debug, Deserialize)]
struct RemoteEntity {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct RemoteException {
    #[serde(default)]
    errorcode: String,
    #[serde(default)]
    message: String,
}

impl MoodleClient {
    /// Builds a client for `site_url` (the LMS root, without the REST path).
    pub fn new(site_url: &str, token: impl Into<String>, config: &AcademyConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| GatewayError::Unavailable(format!("http client: {err}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}{REST_PATH}", site_url.trim_end_matches('/')),
            token: token.into(),
        })
    }

    /// `None` when the configuration carries no academy URL.
    pub fn from_config(config: &AcademyConfig) -> Result<Option<Self>, GatewayError> {
        match config.base_url.as_deref() {
            Some(url) => Self::new(url, config.token.clone(), config).map(Some),
            None => Ok(None),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        function: &str,
        params: Vec<(String, String)>,
    ) -> Result<T, GatewayError> {
        let mut form = vec![
            ("wstoken".to_string(), self.token.clone()),
            ("wsfunction".to_string(), function.to_string()),
            ("moodlewsrestformat".to_string(), "json".to_string()),
        ];
        form.extend(params);

        debug!(function, "calling academy web service");
        let response = self
            .http
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|err| GatewayError::Unavailable(format!("{function}: {err}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!("{function}: http {status}")));
        }
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                code: status.as_u16().to_string(),
                message: format!("{function} returned http {status}"),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::Unavailable(format!("{function}: {err}")))?;
        decode_response(function, body)
    }
}

/// Moodle reports application errors as a 200 response carrying an `exception` object.
fn decode_response<T: DeserializeOwned>(function: &str, body: Value) -> Result<T, GatewayError> {
    if body.get("exception").is_some() {
        let exception: RemoteException =
            serde_json::from_value(body).unwrap_or(RemoteException {
                errorcode: "unknown".to_string(),
                message: String::new(),
            });
        return Err(GatewayError::Rejected {
            code: exception.errorcode,
            message: exception.message,
        });
    }

    serde_json::from_value(body).map_err(|err| GatewayError::Rejected {
        code: "malformed_response".to_string(),
        message: format!("{function}: {err}"),
    })
}

fn pair(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

#[async_trait]
impl AcademyGateway for MoodleClient {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<RemoteUserId>, GatewayError> {
        let list: UserList = self
            .call(
                "core_user_get_users",
                vec![
                    pair("criteria[0][key]", "email"),
                    pair("criteria[0][value]", email),
                ],
            )
            .await?;
        Ok(list
            .users
            .first()
            .map(|user| RemoteUserId(user.id.to_string())))
    }

    async fn create_user(&self, user: NewAcademyUser) -> Result<RemoteUserId, GatewayError> {
        let created: Vec<RemoteEntity> = self
            .call(
                "core_user_create_users",
                vec![
                    pair("users[0][username]", user.username),
                    pair("users[0][password]", user.password),
                    pair("users[0][firstname]", user.first_name),
                    pair("users[0][lastname]", user.last_name),
                    pair("users[0][email]", user.email),
                ],
            )
            .await?;
        created
            .first()
            .map(|entity| RemoteUserId(entity.id.to_string()))
            .ok_or_else(|| GatewayError::Rejected {
                code: "empty_response".to_string(),
                message: "core_user_create_users returned no user".to_string(),
            })
    }

    async fn find_course_by_code(
        &self,
        code: &str,
    ) -> Result<Option<RemoteCourseId>, GatewayError> {
        let list: CourseList = self
            .call(
                "core_course_get_courses_by_field",
                vec![pair("field", "shortname"), pair("value", code)],
            )
            .await?;
        Ok(list
            .courses
            .first()
            .map(|course| RemoteCourseId(course.id.to_string())))
    }

    async fn create_enrollment(
        &self,
        user: &RemoteUserId,
        course: &RemoteCourseId,
    ) -> Result<(), GatewayError> {
        let _: Value = self
            .call(
                "enrol_manual_enrol_users",
                vec![
                    pair("enrolments[0][roleid]", STUDENT_ROLE_ID),
                    pair("enrolments[0][userid]", user.0.clone()),
                    pair("enrolments[0][courseid]", course.0.clone()),
                ],
            )
            .await?;
        Ok(())
    }
}
