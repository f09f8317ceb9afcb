use crate::cli::ServeArgs;
use crate::infra::{AppState, ConfiguredEventStore};
use crate::routes::with_pipeline_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use sales_pipeline::config::AppConfig;
use sales_pipeline::error::AppError;
use sales_pipeline::pipeline::{PipelineService, SystemClock};
use sales_pipeline::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    args.apply_to(&mut config);

    telemetry::init(&config.telemetry)?;

    let store = ConfiguredEventStore::from_path(config.event_log.clone());
    let event_log = store.describe();
    let service = PipelineService::restore(Arc::new(store), Arc::new(SystemClock), config.pipeline)
        .map_err(|source| AppError::event_log(source, config.event_log.clone()))?;
    let service = Arc::new(service);

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        event_log: Arc::from(event_log.as_str()),
    };

    let app = with_pipeline_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, %event_log, "sales pipeline ready");

    axum::serve(listener, app).await?;
    Ok(())
}
