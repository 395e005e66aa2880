use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::{Days, NaiveDate};
use college_admin::workflows::lifecycle::{
    AlertError, AlertPublisher, Batch, BatchId, Course, CourseId, CourseRegistrationId, GradeBook,
    GradeError, InMemoryCollegeRepository, OperationalAlert, Program, ProgramId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Grade book that records which registrations received a grade row.
#[derive(Default, Clone)]
pub(crate) struct InMemoryGradeBook {
    rows: Arc<Mutex<Vec<CourseRegistrationId>>>,
}

impl GradeBook for InMemoryGradeBook {
    fn create_grade(&self, registration: &CourseRegistrationId) -> Result<(), GradeError> {
        let mut guard = self.rows.lock().expect("grade mutex poisoned");
        if !guard.contains(registration) {
            info!(registration = %registration, "grade row created");
            guard.push(registration.clone());
        }
        Ok(())
    }
}

impl InMemoryGradeBook {
    pub(crate) fn rows(&self) -> Vec<CourseRegistrationId> {
        self.rows.lock().expect("grade mutex poisoned").clone()
    }
}

/// Logs operator alerts and keeps them for the demo summary.
#[derive(Default, Clone)]
pub(crate) struct InMemoryAlertPublisher {
    events: Arc<Mutex<Vec<OperationalAlert>>>,
}

impl AlertPublisher for InMemoryAlertPublisher {
    fn publish(&self, alert: OperationalAlert) -> Result<(), AlertError> {
        warn!(
            template = %alert.template,
            student = %alert.student_id,
            details = ?alert.details,
            "operational alert raised"
        );
        let mut guard = self.events.lock().expect("alert mutex poisoned");
        guard.push(alert);
        Ok(())
    }
}

impl InMemoryAlertPublisher {
    pub(crate) fn events(&self) -> Vec<OperationalAlert> {
        self.events.lock().expect("alert mutex poisoned").clone()
    }
}

pub(crate) const DEMO_PROGRAM: &str = "prog-se";
pub(crate) const DEMO_COURSES: [(&str, &str, &str, u32); 2] = [
    ("course-se101", "SE101", "Introduction to Programming", 1_500),
    ("course-se201", "SE201", "Databases", 1_800),
];

/// Program `SE` with two courses and an intake batch running around `today`.
pub(crate) fn seed_catalog(repository: &InMemoryCollegeRepository, today: NaiveDate) {
    repository.add_program(Program {
        id: ProgramId::from(DEMO_PROGRAM),
        name: "Software Engineering".to_string(),
        code: "SE".to_string(),
    });
    for (id, code, title, price) in DEMO_COURSES {
        repository.add_course(Course {
            id: CourseId::from(id),
            program_id: ProgramId::from(DEMO_PROGRAM),
            code: code.to_string(),
            title: title.to_string(),
            price,
        });
    }
    repository.add_batch(Batch {
        id: BatchId::from("batch-current"),
        title: "Current intake".to_string(),
        program_id: Some(ProgramId::from(DEMO_PROGRAM)),
        starting_date: today - Days::new(30),
        ending_date: today + Days::new(150),
    });
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
