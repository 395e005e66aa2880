use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use super::domain::{Batch, BatchId, Student};
use super::error::LifecycleError;
use super::repository::CollegeRepository;

/// Result of a batch resolution. `Unassigned` is a valid state, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchAssignment {
    AlreadyAssigned { batch_id: BatchId },
    Assigned { batch: Batch },
    Unassigned,
}

impl BatchAssignment {
    pub fn batch_id(&self) -> Option<&BatchId> {
        match self {
            BatchAssignment::AlreadyAssigned { batch_id } => Some(batch_id),
            BatchAssignment::Assigned { batch } => Some(&batch.id),
            BatchAssignment::Unassigned => None,
        }
    }
}

/// Places a student in the cohort whose window contains the given day.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchResolver;

impl BatchResolver {
    pub fn resolve<R>(
        &self,
        repository: &R,
        student: &Student,
        today: NaiveDate,
    ) -> Result<BatchAssignment, LifecycleError>
    where
        R: CollegeRepository + ?Sized,
    {
        if let Some(batch_id) = &student.batch_id {
            return Ok(BatchAssignment::AlreadyAssigned {
                batch_id: batch_id.clone(),
            });
        }

        let mut chosen = None;
        if let Some(program_id) = &student.program_id {
            chosen = select_batch(repository.list_batches(Some(program_id))?, today);
        }
        if chosen.is_none() {
            chosen = select_batch(repository.list_batches(None)?, today);
        }

        let Some(batch) = chosen else {
            debug!(student = %student.id, %today, "no batch covers the creation date");
            return Ok(BatchAssignment::Unassigned);
        };

        if repository.assign_batch_if_unset(&student.id, &batch.id)? {
            Ok(BatchAssignment::Assigned { batch })
        } else {
            // Someone assigned a batch in between; keep theirs.
            let stored = repository
                .fetch_student(&student.id)?
                .and_then(|stored| stored.batch_id)
                .ok_or_else(|| LifecycleError::StudentNotFound(student.id.clone()))?;
            Ok(BatchAssignment::AlreadyAssigned { batch_id: stored })
        }
    }
}

/// Latest-starting batch whose window contains `today`; ties go to the lowest id.
pub fn select_batch<I>(batches: I, today: NaiveDate) -> Option<Batch>
where
    I: IntoIterator<Item = Batch>,
{
    batches
        .into_iter()
        .filter(|batch| batch.covers(today))
        .min_by(|left, right| {
            right
                .starting_date
                .cmp(&left.starting_date)
                .then_with(|| left.id.cmp(&right.id))
        })
}
