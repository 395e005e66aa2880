use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use college_admin::config::{AcademyConfig, AppConfig};
use college_admin::error::AppError;
use college_admin::telemetry;
use college_admin::workflows::academy::{AcademyGateway, MoodleClient, OfflineAcademy};
use college_admin::workflows::lifecycle::{
    CollegeLifecycleService, InMemoryCollegeRepository, LifecycleCollaborators,
};
use tracing::{info, warn};

use crate::cli::ServeArgs;
use crate::infra::{seed_catalog, AppState, InMemoryAlertPublisher, InMemoryGradeBook};
use crate::routes::with_lifecycle_routes;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = Arc::new(InMemoryCollegeRepository::default());
    seed_catalog(&repository, Utc::now().date_naive());
    let collaborators = LifecycleCollaborators {
        notifications: repository.clone(),
        grades: Arc::new(InMemoryGradeBook::default()),
        academy: academy_gateway(&config.academy)?,
        alerts: Arc::new(InMemoryAlertPublisher::default()),
    };
    let service = Arc::new(CollegeLifecycleService::new(
        repository,
        collaborators,
        &config.onboarding,
        &config.academy,
    ));

    let app = with_lifecycle_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "college admin service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn academy_gateway(config: &AcademyConfig) -> Result<Arc<dyn AcademyGateway>, AppError> {
    match MoodleClient::from_config(config)? {
        Some(client) => {
            info!(timeout_ms = config.timeout.as_millis() as u64, "academy gateway configured");
            Ok(Arc::new(client))
        }
        None => {
            warn!("APP_ACADEMY_URL not set; approvals will report provisioning as pending");
            Ok(Arc::new(OfflineAcademy))
        }
    }
}
