use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, StatusCode};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
    ServiceBuilderExt,
};

use crate::handlers::{
    api_info, convert_handler, delete_session, health, session_result, session_status,
    start_session,
};
use crate::state::AppState;

/// Multipart framing allowance on top of the file itself.
const FORM_OVERHEAD: usize = 64 * 1024;

/// Requests still running after `limit` are answered with 408.
fn request_timeout(limit: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, limit)
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Security Headers
    // - X-Content-Type-Options: nosniff
    // - X-Frame-Options: DENY
    let security_headers = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    Router::new()
        .route("/api/health", get(health))
        .route("/api/info", get(api_info))
        .route("/api/convert", post(convert_handler))
        .route(
            "/api/sessions/{id}",
            put(start_session).get(session_status).delete(delete_session),
        )
        .route("/api/sessions/{id}/result", get(session_result))
        .layer(DefaultBodyLimit::max(
            state.config.max_file_size.saturating_add(FORM_OVERHEAD),
        ))
        // Middleware
        .layer(
            ServiceBuilder::new()
                .set_x_request_id(MakeRequestUuid)
                .layer(TraceLayer::new_for_http())
                .layer(request_timeout(Duration::from_secs(
                    state.config.request_timeout_secs,
                )))
                .layer(cors)
                .layer(security_headers),
        )
        .with_state(state)
}
