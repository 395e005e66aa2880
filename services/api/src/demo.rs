use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use clap::Args;
use college_admin::config::{AcademyConfig, OnboardingConfig};
use college_admin::error::AppError;
use college_admin::workflows::academy::InMemoryAcademy;
use college_admin::workflows::lifecycle::{
    CollegeLifecycleService, CourseId, InMemoryCollegeRepository, InvoiceDecision,
    InvoiceDecisionOutcome, LifecycleCollaborators, NewStudent, PaymentDetails, ProgramId,
    ProvisioningStatus,
};

use crate::infra::{
    parse_date, seed_catalog, InMemoryAlertPublisher, InMemoryGradeBook, DEMO_COURSES,
    DEMO_PROGRAM,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Admission date (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Email used for the demo applicant.
    #[arg(long)]
    pub(crate) email: Option<String>,
    /// Start with the academy offline to show a pending provisioning and its retry.
    #[arg(long)]
    pub(crate) academy_offline: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        today,
        email,
        academy_offline,
    } = args;
    let today = today.unwrap_or_else(|| Utc::now().date_naive());
    let email = email.unwrap_or_else(|| "abel.demo@example.edu".to_string());

    let repository = Arc::new(InMemoryCollegeRepository::default());
    seed_catalog(&repository, today);
    let academy = InMemoryAcademy::with_courses(DEMO_COURSES.iter().map(|(_, code, _, _)| *code));
    academy.set_offline(academy_offline);
    let grades = InMemoryGradeBook::default();
    let alerts = InMemoryAlertPublisher::default();
    let service = CollegeLifecycleService::new(
        repository.clone(),
        LifecycleCollaborators {
            notifications: repository.clone(),
            grades: Arc::new(grades.clone()),
            academy: Arc::new(academy.clone()),
            alerts: Arc::new(alerts.clone()),
        },
        &OnboardingConfig::default(),
        &AcademyConfig {
            base_url: None,
            token: String::new(),
            timeout: Duration::from_secs(2),
        },
    );

    println!("Student lifecycle demo ({today})");
    let onboarding = service.register_student(applicant(email, today), today)?;
    let student = onboarding.student;
    println!(
        "- Registered {} as {}",
        student.full_name(),
        onboarding.student_number
    );
    match onboarding.batch.batch_id() {
        Some(batch) => println!("  Batch: {batch}"),
        None => println!("  Batch: none covering {today}"),
    }
    println!(
        "  Catalog enrollments: {} | welcome notice sent: {}",
        onboarding.enrolled.len(),
        onboarding.notified
    );

    let (first_course, first_code, _, _) = DEMO_COURSES[0];
    let receipt = service.register_course(&student.id, &CourseId::from(first_course), today)?;
    println!(
        "\n- Billed {first_code}: invoice {} for {} due {}",
        receipt.invoice.invoice_number, receipt.invoice.total_price, receipt.invoice.due_date
    );

    let invoice = service
        .submit_payment(
            &receipt.invoice.id,
            PaymentDetails {
                account_holder_fullname: student.full_name(),
                transaction_reference: format!("DEMO-{}", receipt.invoice.invoice_number),
            },
        )
        .await?;
    println!("  Payment submitted -> {}", invoice.status.label());

    let outcome = service
        .on_invoice_decision(&invoice.id, InvoiceDecision::Approve)
        .await?;
    print_outcome(&outcome);

    if outcome.provisioning.is_pending() {
        println!("\n- Academy back online, retrying provisioning");
        academy.set_offline(false);
        let report = service.sync_academy_account(&student.id).await?;
        println!(
            "  Sync {}: account created {} | enrolled {:?}",
            status_label(&report.status),
            report.account_created,
            report.enrolled_courses
        );
    }

    let (second_course, second_code, _, _) = DEMO_COURSES[1];
    let second = service.register_course(&student.id, &CourseId::from(second_course), today)?;
    let denied = service
        .on_invoice_decision(&second.invoice.id, InvoiceDecision::Deny)
        .await?;
    println!(
        "\n- Billed {second_code} and denied it without payment: {}",
        denied.notice
    );

    println!("\nNotifications:");
    for notification in service.notifications(&student.id)? {
        println!(
            "  - [{:?}] {}",
            notification.action, notification.message
        );
    }
    println!(
        "Grade rows: {} | academy accounts created: {} | academy enrollments: {}",
        grades.rows().len(),
        academy.created_users().len(),
        academy.enrollments().len()
    );

    let events = alerts.events();
    if events.is_empty() {
        println!("Operator alerts: none raised");
    } else {
        println!("Operator alerts:");
        for alert in events {
            println!("  - template={} -> {}", alert.template, alert.student_id);
        }
    }

    Ok(())
}

fn applicant(email: String, today: NaiveDate) -> NewStudent {
    NewStudent {
        first_name: "Abel".to_string(),
        middle_name: Some("Girma".to_string()),
        last_name: "Tesfaye".to_string(),
        email,
        date_of_birth: NaiveDate::from_ymd_opt(2004, 3, 18).unwrap_or(today),
        password: "Campus2025".to_string(),
        program_id: Some(ProgramId::from(DEMO_PROGRAM)),
        batch_id: None,
    }
}

fn print_outcome(outcome: &InvoiceDecisionOutcome) {
    println!(
        "  Decision: {} -> invoice {}",
        outcome.notice,
        outcome.invoice.status.label()
    );
    println!(
        "  Provisioning {}: remote user {} | enrolled {:?}",
        status_label(&outcome.provisioning.status),
        outcome.provisioning.remote_user_id.as_deref().unwrap_or("-"),
        outcome.provisioning.enrolled_courses
    );
    if let ProvisioningStatus::PendingRetry { reason } = &outcome.provisioning.status {
        println!("  Pending because: {reason}");
    }
}

fn status_label(status: &ProvisioningStatus) -> &'static str {
    match status {
        ProvisioningStatus::NotRequired => "not required",
        ProvisioningStatus::UpToDate => "up to date",
        ProvisioningStatus::Synced => "synced",
        ProvisioningStatus::PendingRetry { .. } => "pending retry",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_runs_with_academy_offline() {
        let args = DemoArgs {
            today: NaiveDate::from_ymd_opt(2025, 9, 10),
            email: Some("offline.demo@example.edu".to_string()),
            academy_offline: true,
        };
        run_demo(args).await.expect("demo completes");
    }

    #[test]
    fn provisioning_labels_are_readable() {
        assert_eq!(status_label(&ProvisioningStatus::Synced), "synced");
        assert_eq!(
            status_label(&ProvisioningStatus::PendingRetry {
                reason: "timeout".to_string()
            }),
            "pending retry"
        );
    }
}
