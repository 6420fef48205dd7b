use axum::{
    body::Body,
    extract::State,
    http::{header::ORIGIN, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::responses::JsonResponse;
use crate::state::AppState;

/// Rejects browser requests from origins outside the allow-list. Requests
/// without an `Origin` header (server-to-server, curl) pass through; the
/// webhook route is never wrapped in this middleware because the billing
/// provider sends no browser-style `Origin` at all.
pub async fn enforce_allowed_origin(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(origin) = req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()) {
        if origin != state.config.frontend_origin {
            warn!(origin, "rejected request from disallowed origin");
            return JsonResponse::forbidden("Origin not allowed").into_response();
        }
    }
    next.run(req).await
}
