use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use super::domain::{next_record_key, AccountStatus, BatchId, ProgramId, Student, StudentId};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 20;
const MAX_AGE_MONTHS: u32 = 100 * 12;

/// Admission form submitted by the administrative layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudent {
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub email: String,
    pub date_of_birth: NaiveDate,
    pub password: String,
    #[serde(default)]
    pub program_id: Option<ProgramId>,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeViolation {
    #[error("{field} is required")]
    MissingField { field: &'static str },
    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
    #[error("date of birth can't be in the future")]
    BirthDateInFuture,
    #[error("date of birth is too far in the past")]
    BirthDateTooOld,
    #[error("password must be between 8 to 20 characters")]
    PasswordLength,
    #[error("password must include at least one lowercase and one uppercase letter")]
    PasswordCase,
    #[error("password must include at least one number")]
    PasswordDigit,
    #[error("a student with email {0} already exists")]
    DuplicateEmail(String),
}

/// Validates admission forms and turns them into student records.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntakeGuard;

impl IntakeGuard {
    pub fn validate(&self, form: &NewStudent, today: NaiveDate) -> Result<(), IntakeViolation> {
        if form.first_name.trim().is_empty() {
            return Err(IntakeViolation::MissingField { field: "first_name" });
        }
        if form.last_name.trim().is_empty() {
            return Err(IntakeViolation::MissingField { field: "last_name" });
        }
        if !is_plausible_email(form.email.trim()) {
            return Err(IntakeViolation::InvalidEmail(form.email.clone()));
        }
        validate_birth_date(form.date_of_birth, today)?;
        validate_password(&form.password)
    }

    /// Validated student record with the password snapshot taken from the form.
    pub fn admit(&self, form: NewStudent, today: NaiveDate) -> Result<Student, IntakeViolation> {
        self.validate(&form, today)?;
        Ok(Student {
            id: StudentId(next_record_key("stu")),
            first_name: form.first_name.trim().to_string(),
            middle_name: form
                .middle_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            last_name: form.last_name.trim().to_string(),
            email: form.email.trim().to_ascii_lowercase(),
            date_of_birth: form.date_of_birth,
            program_id: form.program_id,
            batch_id: form.batch_id,
            account_status: AccountStatus::Active,
            student_number: None,
            student_password: form.password,
            created_on: today,
        })
    }
}

fn is_plausible_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

fn validate_birth_date(date_of_birth: NaiveDate, today: NaiveDate) -> Result<(), IntakeViolation> {
    if date_of_birth > today {
        return Err(IntakeViolation::BirthDateInFuture);
    }
    let earliest = today
        .checked_sub_months(Months::new(MAX_AGE_MONTHS))
        .unwrap_or(NaiveDate::MIN);
    if date_of_birth < earliest {
        return Err(IntakeViolation::BirthDateTooOld);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), IntakeViolation> {
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    if !(has_lower && has_upper) {
        return Err(IntakeViolation::PasswordCase);
    }
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.chars().count()) {
        return Err(IntakeViolation::PasswordLength);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(IntakeViolation::PasswordDigit);
    }
    Ok(())
}
