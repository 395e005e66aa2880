use std::sync::Mutex;

use chrono::Datelike;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use super::domain::{Program, Student, StudentNumber};
use super::error::LifecycleError;
use super::repository::{CollegeRepository, RepositoryError};

const NUMBER_RANGE: std::ops::RangeInclusive<u32> = 1000..=10_000;

/// Draws `{program_code}/{number}/{yy}` identifiers and claims them through the
/// repository's uniqueness constraint, retrying a bounded number of times.
#[derive(Debug)]
pub struct IdentifierAllocator {
    max_attempts: u32,
    rng: Mutex<StdRng>,
}

impl IdentifierAllocator {
    pub fn new(max_attempts: u32) -> Self {
        Self::with_rng(max_attempts, StdRng::from_entropy())
    }

    pub fn seeded(max_attempts: u32, seed: u64) -> Self {
        Self::with_rng(max_attempts, StdRng::seed_from_u64(seed))
    }

    fn with_rng(max_attempts: u32, rng: StdRng) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            rng: Mutex::new(rng),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the student's identifier, allocating one if the student has none yet.
    pub fn allocate<R>(
        &self,
        repository: &R,
        student: &Student,
        program: &Program,
    ) -> Result<StudentNumber, LifecycleError>
    where
        R: CollegeRepository + ?Sized,
    {
        if let Some(existing) = &student.student_number {
            return Ok(existing.clone());
        }

        let year = student.created_on.year().rem_euclid(100);
        for attempt in 1..=self.max_attempts {
            let candidate = self.candidate(&program.code, year);
            match repository.claim_student_number(&student.id, &candidate) {
                Ok(true) => {
                    debug!(student = %student.id, %candidate, attempt, "identifier claimed");
                    return Ok(candidate);
                }
                // Another run assigned one first; the stored value wins.
                Ok(false) => {
                    return repository
                        .fetch_student(&student.id)?
                        .and_then(|stored| stored.student_number)
                        .ok_or_else(|| LifecycleError::StudentNotFound(student.id.clone()));
                }
                Err(RepositoryError::Conflict(_)) => {
                    debug!(student = %student.id, %candidate, attempt, "identifier collision");
                }
                Err(other) => return Err(other.into()),
            }
        }

        warn!(
            student = %student.id,
            program = %program.code,
            attempts = self.max_attempts,
            "identifier space exhausted"
        );
        Err(LifecycleError::IdentifierExhausted {
            program_code: program.code.clone(),
            attempts: self.max_attempts,
        })
    }

    fn candidate(&self, program_code: &str, year: i32) -> StudentNumber {
        let number = self
            .rng
            .lock()
            .expect("identifier rng mutex poisoned")
            .gen_range(NUMBER_RANGE);
        StudentNumber(format!("{program_code}/{number}/{year:02}"))
    }
}
