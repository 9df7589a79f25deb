//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post},
};
use arabica_core::clock::{BusinessTime, Clock, SystemClock};
use arabica_core::config::ArabicaConfig;
use arabica_scheduler::{
    LifecycleEngine, LifecycleRunner, LogSink, NotifyRouter, PenaltyLedger, ReportKind, WebhookSink,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::presence::PresenceCoordinator;

/// Shared state for the gateway server.
pub struct AppState {
    pub shift: Arc<LifecycleEngine>,
    pub envelope: Arc<LifecycleEngine>,
    pub ledger: Arc<PenaltyLedger>,
    pub notifier: Arc<NotifyRouter>,
    /// Live chat connections, presence and typing.
    pub presence: Arc<PresenceCoordinator>,
    pub heartbeat: Duration,
    pub connection_timeout: Duration,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire engines, ledger, notifications and presence over the configured data dir.
    pub fn new(config: &ArabicaConfig, clock: Arc<dyn Clock>) -> arabica_core::Result<Self> {
        Self::with_data_dir(config, &config.data_path(), clock)
    }

    pub fn with_data_dir(
        config: &ArabicaConfig,
        data_dir: &Path,
        clock: Arc<dyn Clock>,
    ) -> arabica_core::Result<Self> {
        let time = BusinessTime::new(config.scheduler.utc_offset_hours)?;

        let mut notifier = NotifyRouter::new().with_sink(Arc::new(LogSink));
        if let Some(url) = config.notify.webhook_url.as_deref().filter(|u| !u.is_empty()) {
            notifier = notifier.with_sink(Arc::new(WebhookSink::new(url)));
        }
        let notifier = Arc::new(notifier);
        let ledger = Arc::new(PenaltyLedger::open(data_dir.join("efficiency-penalties"))?);

        let engine = |kind| -> arabica_core::Result<Arc<LifecycleEngine>> {
            let engine = LifecycleEngine::open(kind, data_dir, ledger.clone(), notifier.clone(), clock.clone(), time)?
                .with_retention_days(config.scheduler.state_retention_days);
            Ok(Arc::new(engine))
        };

        Ok(Self {
            shift: engine(ReportKind::Shift)?,
            envelope: engine(ReportKind::Envelope)?,
            ledger: ledger.clone(),
            notifier: notifier.clone(),
            presence: PresenceCoordinator::new(config.presence.typing_ttl()),
            heartbeat: config.presence.heartbeat(),
            connection_timeout: config.presence.connection_timeout(),
            start_time: std::time::Instant::now(),
        })
    }

    pub fn engine(&self, kind: ReportKind) -> &Arc<LifecycleEngine> {
        match kind {
            ReportKind::Shift => &self.shift,
            ReportKind::Envelope => &self.envelope,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(super::routes::health))
        .route("/api/v1/{kind}/reports", get(super::routes::list_reports))
        .route("/api/v1/{kind}/reports/{id}", get(super::routes::get_report))
        .route("/api/v1/{kind}/reports/{id}/submit", post(super::routes::submit_report))
        .route("/api/v1/{kind}/reports/{id}/approve", post(super::routes::approve_report))
        .route("/api/v1/{kind}/reports/{id}/reject", post(super::routes::reject_report))
        .route("/api/v1/{kind}/tick", post(super::routes::run_tick))
        .route("/api/v1/penalties/{month}", get(super::routes::month_penalties))
        .route("/api/v1/chat/online", get(super::routes::online_users))
        .route("/api/v1/notifications", get(super::routes::notifications))
        .route("/ws/employee-chat", get(super::ws::employee_chat_ws))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

/// Start the gateway and both lifecycle runners; run until Ctrl-C.
pub async fn start(config: ArabicaConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(&config, Arc::new(SystemClock))?);
    tracing::info!("📂 Data directory: {}", config.data_path().display());

    let mut runners = Vec::new();
    if config.scheduler.enabled {
        let interval = Duration::from_secs(config.scheduler.check_interval_secs.max(1));
        runners.push(LifecycleRunner::start(
            state.shift.clone(),
            interval,
            Duration::from_secs(config.scheduler.shift_initial_delay_secs),
        ));
        runners.push(LifecycleRunner::start(
            state.envelope.clone(),
            interval,
            Duration::from_secs(config.scheduler.envelope_initial_delay_secs),
        ));
    } else {
        tracing::warn!("Lifecycle scheduler disabled in config");
    }

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    let presence = state.presence.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("🛑 Shutting down");
        presence.shutdown();
    };
    serve(listener, state, shutdown).await?;

    for runner in runners {
        runner.stop().await;
    }
    Ok(())
}
