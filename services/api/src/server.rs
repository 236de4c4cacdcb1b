use crate::cli::ServeArgs;
use crate::infra::{file_store, rule_engine, AppState, ReturnsPortal};
use crate::routes::with_returns_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use returns_portal::config::AppConfig;
use returns_portal::error::AppError;
use returns_portal::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

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
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let engine = rule_engine(&config.returns)?;
    info!(
        rules = engine.rules().len(),
        source = ?config.returns.rules_path,
        "eligibility rules loaded"
    );
    let portal = Arc::new(ReturnsPortal::new(file_store(&config.returns), engine));

    let app = with_returns_routes(portal)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        orders = %config.returns.orders_path.display(),
        "returns portal ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
