pub mod routes;

use crate::archive::ARCHIVE_ROUTE;
use crate::state::GatewayState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use telemetry::{correlation::make_request_span, CorrelationIdLayer};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Build the gateway router.
///
/// Paths keep the names the mobile client already calls.
pub fn router(state: GatewayState) -> Router {
    let body_limit = state.service().config().max_upload_bytes;
    let archive = ServeDir::new(state.service().archive().dir());

    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Recognition
        .route("/recognize", post(routes::recognize))
        // Violations
        .route("/submit_violation", post(routes::submit_violation))
        .route("/submit_unknown_violation", post(routes::submit_unknown_violation))
        .route("/get_violations", get(routes::get_violations))
        .route("/get_unknown_faces", get(routes::get_unknown_faces))
        .route("/search_violation", post(routes::search_violation))
        .route("/get_search_suggestions", post(routes::get_search_suggestions))
        // Students and roster
        .route("/register_face", post(routes::register_face))
        .route("/known_faces", get(routes::known_faces))
        .route("/known_faces/reload", post(routes::reload_known_faces))
        // Archived unknown-face captures
        .nest_service(ARCHIVE_ROUTE, archive)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<axum::body::Body>))
        .layer(CorrelationIdLayer::new())
        .with_state(state)
}
