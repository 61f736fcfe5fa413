use axum::{
    routing::{get, post},
    Router,
};
use recruitment_automation::services::notification_service::NotificationService;
use recruitment_automation::store::{PgStore, Store};
use recruitment_automation::utils::time::{Clock, SystemClock};
use recruitment_automation::{
    config::{get_config, init_config},
    database::pool::create_pool,
    middleware::rate_limit,
    routes, AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let app_state = AppState::new(store.clone(), clock.clone());

    {
        // Drains due scheduled jobs.
        let automation = app_state.automation.clone();
        let idle = Duration::from_millis(config.scheduler_poll_ms);
        tokio::spawn(async move {
            loop {
                match automation.run_scheduler_once().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(idle).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "scheduler worker error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    {
        // Time-elapsed trigger scan.
        let automation = app_state.automation.clone();
        let every = Duration::from_secs(config.elapsed_scan_secs);
        tokio::spawn(async move {
            loop {
                if let Err(e) = automation.run_elapsed_scan().await {
                    tracing::error!(error = ?e, "elapsed scan error");
                }
                tokio::time::sleep(every).await;
            }
        });
    }

    {
        // Approval escalation scan.
        let automation = app_state.automation.clone();
        let every = Duration::from_secs(config.escalation_scan_secs);
        tokio::spawn(async move {
            loop {
                if let Err(e) = automation.run_escalation_scan().await {
                    tracing::error!(error = ?e, "escalation scan error");
                }
                tokio::time::sleep(every).await;
            }
        });
    }

    {
        // Collaborator outbox delivery.
        let notifications =
            NotificationService::new(store.clone(), clock.clone(), config.webhook_secret.clone());
        tokio::spawn(async move {
            loop {
                match notifications.run_once().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(1000)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "delivery worker error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    let base_routes = Router::new().route("/health", get(routes::health::health));

    let api = Router::new()
        .route(
            "/api/rules",
            get(routes::rules::list_rules).post(routes::rules::create_rule),
        )
        .route(
            "/api/rules/:id",
            get(routes::rules::get_rule)
                .patch(routes::rules::update_rule)
                .delete(routes::rules::delete_rule),
        )
        .route("/api/rules/:id/toggle", post(routes::rules::toggle_rule))
        .route(
            "/api/approval-flows",
            get(routes::approvals::list_flows).post(routes::approvals::create_flow),
        )
        .route(
            "/api/approvals",
            get(routes::approvals::list_pending_approvals).post(routes::approvals::create_approval),
        )
        .route("/api/approvals/:id", get(routes::approvals::get_approval))
        .route(
            "/api/approvals/:id/cancel",
            post(routes::approvals::cancel_approval),
        )
        .route(
            "/api/approvals/:id/steps/:step_id/resolve",
            post(routes::approvals::resolve_step),
        )
        .route("/api/events", post(routes::events::submit_event))
        .route(
            "/api/automation/failures",
            get(routes::events::list_failures),
        )
        .route(
            "/api/candidates",
            post(routes::candidates::register_candidate),
        )
        .route(
            "/api/candidates/:id/status",
            get(routes::candidates::get_candidate_status)
                .post(routes::candidates::update_candidate_status),
        )
        .route(
            "/api/candidates/:id/history",
            get(routes::candidates::get_candidate_history),
        )
        .layer(axum::middleware::from_fn_with_state(
            rate_limit::ApiLimiter::new(config.api_rps),
            rate_limit::rps_middleware,
        ));

    let app = base_routes
        .merge(api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
