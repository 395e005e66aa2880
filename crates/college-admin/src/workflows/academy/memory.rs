use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{AcademyGateway, GatewayError, NewAcademyUser, RemoteCourseId, RemoteUserId};

/// Academy kept in process memory. Backs the CLI demo and workflow tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAcademy {
    state: Arc<Mutex<AcademyState>>,
}

#[derive(Debug, Default)]
struct AcademyState {
    next_id: u64,
    users: BTreeMap<String, (RemoteUserId, NewAcademyUser)>,
    courses: BTreeMap<String, RemoteCourseId>,
    enrollments: Vec<(RemoteUserId, RemoteCourseId)>,
    created_users: Vec<NewAcademyUser>,
    offline: bool,
    failing_courses: BTreeSet<String>,
}

impl AcademyState {
    fn allocate(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

impl InMemoryAcademy {
    pub fn with_courses<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let academy = Self::default();
        for code in codes {
            academy.add_course(code);
        }
        academy
    }

    pub fn add_course(&self, code: impl Into<String>) -> RemoteCourseId {
        let mut state = self.state.lock().expect("academy mutex poisoned");
        let id = RemoteCourseId(format!("course-{}", state.allocate()));
        state.courses.insert(code.into(), id.clone());
        id
    }

    /// Registers an account that exists before any provisioning runs.
    pub fn add_existing_user(&self, email: &str, username: &str) -> RemoteUserId {
        let mut state = self.state.lock().expect("academy mutex poisoned");
        let id = RemoteUserId(format!("user-{}", state.allocate()));
        let user = NewAcademyUser {
            username: username.to_string(),
            password: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            email: email.to_string(),
        };
        state
            .users
            .insert(email.to_ascii_lowercase(), (id.clone(), user));
        id
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().expect("academy mutex poisoned").offline = offline;
    }

    /// Makes enrollments into `code` fail with a rejection until cleared.
    pub fn fail_enrollments_for(&self, code: &str, failing: bool) {
        let mut state = self.state.lock().expect("academy mutex poisoned");
        if failing {
            state.failing_courses.insert(code.to_string());
        } else {
            state.failing_courses.remove(code);
        }
    }

    /// Accounts created through [`AcademyGateway::create_user`].
    pub fn created_users(&self) -> Vec<NewAcademyUser> {
        self.state
            .lock()
            .expect("academy mutex poisoned")
            .created_users
            .clone()
    }

    pub fn enrollments(&self) -> Vec<(RemoteUserId, RemoteCourseId)> {
        self.state
            .lock()
            .expect("academy mutex poisoned")
            .enrollments
            .clone()
    }

    fn ensure_online(state: &AcademyState) -> Result<(), GatewayError> {
        if state.offline {
            Err(GatewayError::Unavailable("academy offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AcademyGateway for InMemoryAcademy {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<RemoteUserId>, GatewayError> {
        let state = self.state.lock().expect("academy mutex poisoned");
        Self::ensure_online(&state)?;
        Ok(state
            .users
            .get(&email.to_ascii_lowercase())
            .map(|(id, _)| id.clone()))
    }

    async fn create_user(&self, user: NewAcademyUser) -> Result<RemoteUserId, GatewayError> {
        let mut state = self.state.lock().expect("academy mutex poisoned");
        Self::ensure_online(&state)?;
        let key = user.email.to_ascii_lowercase();
        if state.users.contains_key(&key)
            || state
                .users
                .values()
                .any(|(_, existing)| existing.username == user.username)
        {
            return Err(GatewayError::Rejected {
                code: "duplicateuser".to_string(),
                message: format!("user {} already exists", user.username),
            });
        }
        let id = RemoteUserId(format!("user-{}", state.allocate()));
        state.created_users.push(user.clone());
        state.users.insert(key, (id.clone(), user));
        Ok(id)
    }

    async fn find_course_by_code(
        &self,
        code: &str,
    ) -> Result<Option<RemoteCourseId>, GatewayError> {
        let state = self.state.lock().expect("academy mutex poisoned");
        Self::ensure_online(&state)?;
        Ok(state.courses.get(code).cloned())
    }

    async fn create_enrollment(
        &self,
        user: &RemoteUserId,
        course: &RemoteCourseId,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().expect("academy mutex poisoned");
        Self::ensure_online(&state)?;
        let failing = state
            .courses
            .iter()
            .any(|(code, id)| id == course && state.failing_courses.contains(code));
        if failing {
            return Err(GatewayError::Rejected {
                code: "enrolerror".to_string(),
                message: format!("enrollment into {} refused", course.0),
            });
        }
        state.enrollments.push((user.clone(), course.clone()));
        Ok(())
    }
}
