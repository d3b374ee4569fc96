pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use oppflow_core::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(app_state: state::AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Configuration
        .route("/api/types", get(routes::types::list_types))
        .route("/api/types/{id}", get(routes::types::get_type))
        .route("/api/risk", get(routes::types::get_thresholds))
        // Opportunities
        .route(
            "/api/opportunities",
            get(routes::opportunities::list_opportunities)
                .post(routes::opportunities::create_opportunity),
        )
        .route(
            "/api/opportunities/{id}",
            get(routes::opportunities::get_opportunity)
                .delete(routes::opportunities::delete_opportunity),
        )
        .route(
            "/api/opportunities/{id}/close",
            post(routes::opportunities::close_opportunity),
        )
        .route(
            "/api/opportunities/{id}/stages",
            get(routes::stages::list_stages),
        )
        .route(
            "/api/opportunities/{id}/pipeline",
            get(routes::opportunities::get_pipeline),
        )
        .route(
            "/api/opportunities/{id}/stats",
            get(routes::opportunities::get_stats),
        )
        .route(
            "/api/opportunities/{id}/history",
            get(routes::opportunities::get_history),
        )
        // Stages
        .route("/api/stages/{id}", get(routes::stages::get_stage))
        .route(
            "/api/stages/{id}/transition",
            post(routes::stages::transition_stage),
        )
        .route(
            "/api/stages/{id}/validate",
            post(routes::stages::validate_stage),
        )
        .route("/api/stages/{id}/risk", get(routes::stages::get_risk))
        .route(
            "/api/stages/{id}/deliverables",
            get(routes::stages::get_deliverables),
        )
        .route(
            "/api/stages/{id}/actions",
            get(routes::stages::list_actions).post(routes::stages::log_action),
        )
        .route(
            "/api/stages/{id}/documents",
            get(routes::documents::list_documents).post(routes::documents::add_document),
        )
        // Documents
        .route("/api/documents/{id}", get(routes::documents::get_document))
        .route(
            "/api/documents/{id}/provide",
            post(routes::documents::provide_document),
        )
        .route(
            "/api/documents/{id}/review",
            post(routes::documents::review_document),
        )
        // Sweep
        .route("/api/sweep", post(routes::sweep::run_sweep))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Re-run the risk sweep every `every` until the task is dropped.
///
/// A failed sweep is logged and retried on the next tick.
pub async fn sweep_loop(engine: Arc<Engine>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let engine = engine.clone();
        let result = tokio::task::spawn_blocking(move || engine.sweep(engine.now())).await;
        match result {
            Ok(Ok(report)) if !report.is_quiet() => tracing::info!(
                critical = report.critical_crossings.len(),
                urgent = report.urgent_crossings.len(),
                overdue = report.overdue_alerts.len(),
                closed = report.pipelines_closed.len(),
                "sweep raised alerts"
            ),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "sweep failed"),
            Err(e) => tracing::error!(error = %e, "sweep task panicked"),
        }
    }
}

/// Serve the API on a pre-bound listener.
///
/// Accepting a bound `TcpListener` lets the caller read the actual port
/// before starting (useful when `port = 0` and the OS picks a free port).
/// The periodic sweep runs alongside the server at the configured interval.
pub async fn serve_on(root: PathBuf, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app_state = state::AppState::open(&root)?;
    let every = Duration::from_secs(app_state.engine.workflow().sweep_interval_secs.max(1));
    let sweeper = tokio::spawn(sweep_loop(app_state.engine.clone(), every));

    tracing::info!("oppflow API listening on http://localhost:{actual_port}");

    let result = axum::serve(listener, build_router(app_state)).await;
    sweeper.abort();
    result?;
    Ok(())
}
