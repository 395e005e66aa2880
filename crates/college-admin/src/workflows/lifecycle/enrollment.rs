use std::collections::BTreeSet;

use tracing::debug;

use super::domain::{Student, StudentCourse};
use super::error::LifecycleError;
use super::repository::{CollegeRepository, RepositoryError};

pub const SYSTEM_PROVENANCE: &str = "system";

/// Materializes one catalog enrollment per program course. Re-running never duplicates.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnrollmentEngine;

impl EnrollmentEngine {
    /// Returns only the records created by this call.
    pub fn enroll_program_courses<R>(
        &self,
        repository: &R,
        student: &Student,
    ) -> Result<Vec<StudentCourse>, LifecycleError>
    where
        R: CollegeRepository + ?Sized,
    {
        let Some(program_id) = &student.program_id else {
            return Ok(Vec::new());
        };

        let courses = repository.program_courses(program_id)?;
        if courses.is_empty() {
            return Ok(Vec::new());
        }

        let existing: BTreeSet<_> = repository
            .student_courses(&student.id)?
            .into_iter()
            .map(|record| record.course_id)
            .collect();

        let mut created = Vec::new();
        for course in courses {
            if existing.contains(&course.id) {
                continue;
            }
            let record = StudentCourse {
                student_id: student.id.clone(),
                course_id: course.id.clone(),
                course_title: course.title.clone(),
                created_by: SYSTEM_PROVENANCE.to_string(),
            };
            match repository.insert_student_course(record) {
                Ok(stored) => created.push(stored),
                Err(RepositoryError::Conflict(_)) => {
                    debug!(student = %student.id, course = %course.id, "already enrolled");
                }
                Err(other) => return Err(other.into()),
            }
        }

        Ok(created)
    }
}
