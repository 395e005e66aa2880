use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::domain::{CourseId, InvoiceDecision, InvoiceId, PaymentDetails, StudentId};
use super::error::LifecycleError;
use super::intake::NewStudent;
use super::repository::{CollegeRepository, RepositoryError};
use super::service::CollegeLifecycleService;

#[derive(Debug, Deserialize)]
pub(crate) struct CourseRegistrationRequest {
    pub course_id: CourseId,
}

/// HTTP surface for the admin action layer.
pub fn lifecycle_router<R>(service: Arc<CollegeLifecycleService<R>>) -> Router
where
    R: CollegeRepository + 'static,
{
    Router::new()
        .route("/api/v1/students", post(register_student_handler::<R>))
        .route("/api/v1/students/:student_id", get(student_handler::<R>))
        .route(
            "/api/v1/students/:student_id/onboarding",
            post(onboarding_handler::<R>),
        )
        .route(
            "/api/v1/students/:student_id/registrations",
            post(register_course_handler::<R>),
        )
        .route(
            "/api/v1/students/:student_id/academy-sync",
            post(academy_sync_handler::<R>),
        )
        .route(
            "/api/v1/students/:student_id/notifications",
            get(notifications_handler::<R>),
        )
        .route(
            "/api/v1/invoices/:invoice_id/payment",
            post(payment_handler::<R>),
        )
        .route(
            "/api/v1/invoices/:invoice_id/approve",
            post(approve_handler::<R>),
        )
        .route("/api/v1/invoices/:invoice_id/deny", post(deny_handler::<R>))
        .route(
            "/api/v1/invoices/:invoice_id/incomplete",
            post(incomplete_handler::<R>),
        )
        .route(
            "/api/v1/invoices/:invoice_id/resume",
            post(resume_handler::<R>),
        )
        .with_state(service)
}

pub(crate) async fn register_student_handler<R>(
    State(service): State<Arc<CollegeLifecycleService<R>>>,
    Json(form): Json<NewStudent>,
) -> Response
where
    R: CollegeRepository + 'static,
{
    match service.register_student(form, today()) {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn student_handler<R>(
    State(service): State<Arc<CollegeLifecycleService<R>>>,
    Path(student_id): Path<String>,
) -> Response
where
    R: CollegeRepository + 'static,
{
    match service.student(&StudentId(student_id)) {
        Ok(profile) => (StatusCode::OK, Json(profile)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn onboarding_handler<R>(
    State(service): State<Arc<CollegeLifecycleService<R>>>,
    Path(student_id): Path<String>,
) -> Response
where
    R: CollegeRepository + 'static,
{
    match service.on_student_created(&StudentId(student_id)) {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn register_course_handler<R>(
    State(service): State<Arc<CollegeLifecycleService<R>>>,
    Path(student_id): Path<String>,
    Json(request): Json<CourseRegistrationRequest>,
) -> Response
where
    R: CollegeRepository + 'static,
{
    match service.register_course(&StudentId(student_id), &request.course_id, today()) {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn academy_sync_handler<R>(
    State(service): State<Arc<CollegeLifecycleService<R>>>,
    Path(student_id): Path<String>,
) -> Response
where
    R: CollegeRepository + 'static,
{
    match service.sync_academy_account(&StudentId(student_id)).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn notifications_handler<R>(
    State(service): State<Arc<CollegeLifecycleService<R>>>,
    Path(student_id): Path<String>,
) -> Response
where
    R: CollegeRepository + 'static,
{
    match service.notifications(&StudentId(student_id)) {
        Ok(notifications) => (StatusCode::OK, Json(notifications)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn payment_handler<R>(
    State(service): State<Arc<CollegeLifecycleService<R>>>,
    Path(invoice_id): Path<String>,
    Json(details): Json<PaymentDetails>,
) -> Response
where
    R: CollegeRepository + 'static,
{
    match service.submit_payment(&InvoiceId(invoice_id), details).await {
        Ok(invoice) => (StatusCode::OK, Json(invoice)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn approve_handler<R>(
    State(service): State<Arc<CollegeLifecycleService<R>>>,
    Path(invoice_id): Path<String>,
) -> Response
where
    R: CollegeRepository + 'static,
{
    decision_response(
        service
            .on_invoice_decision(&InvoiceId(invoice_id), InvoiceDecision::Approve)
            .await,
    )
}

pub(crate) async fn deny_handler<R>(
    State(service): State<Arc<CollegeLifecycleService<R>>>,
    Path(invoice_id): Path<String>,
) -> Response
where
    R: CollegeRepository + 'static,
{
    decision_response(
        service
            .on_invoice_decision(&InvoiceId(invoice_id), InvoiceDecision::Deny)
            .await,
    )
}

pub(crate) async fn incomplete_handler<R>(
    State(service): State<Arc<CollegeLifecycleService<R>>>,
    Path(invoice_id): Path<String>,
) -> Response
where
    R: CollegeRepository + 'static,
{
    match service.mark_incomplete(&InvoiceId(invoice_id)).await {
        Ok(invoice) => (StatusCode::OK, Json(invoice)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn resume_handler<R>(
    State(service): State<Arc<CollegeLifecycleService<R>>>,
    Path(invoice_id): Path<String>,
) -> Response
where
    R: CollegeRepository + 'static,
{
    decision_response(service.resume_approval(&InvoiceId(invoice_id)).await)
}

fn decision_response<T: serde::Serialize>(result: Result<T, LifecycleError>) -> Response {
    match result {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) fn status_for(err: &LifecycleError) -> StatusCode {
    match err {
        LifecycleError::Intake(_)
        | LifecycleError::MissingProgram(_)
        | LifecycleError::MissingBatch(_)
        | LifecycleError::CourseOutsideProgram { .. }
        | LifecycleError::BatchNotFound(_)
        | LifecycleError::BatchOutsideProgram { .. }
        | LifecycleError::MissingStudentNumber(_)
        | LifecycleError::MissingInvoiceItem(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LifecycleError::StudentNotFound(_)
        | LifecycleError::InvoiceNotFound(_)
        | LifecycleError::ProgramNotFound(_)
        | LifecycleError::CourseNotFound(_)
        | LifecycleError::Repository(RepositoryError::NotFound(_)) => StatusCode::NOT_FOUND,
        LifecycleError::InvalidTransition { .. }
        | LifecycleError::AlreadyRegistered { .. }
        | LifecycleError::PersistenceConflict(_) => StatusCode::CONFLICT,
        LifecycleError::IdentifierExhausted { .. }
        | LifecycleError::Repository(_)
        | LifecycleError::Grade(_)
        | LifecycleError::Notification(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: LifecycleError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(kind = err.kind(), error = %err, "lifecycle request failed");
    }
    let payload = json!({
        "error": err.to_string(),
        "kind": err.kind(),
    });
    (status, Json(payload)).into_response()
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}
