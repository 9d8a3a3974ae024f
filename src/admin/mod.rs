use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use url::Url;

use crate::proxy::host::normalize_host;
use crate::stores::Route;
use crate::AppState;

/// The admin JSON API: health check plus route CRUD. Bound to a distinct,
/// loopback-expected address from the data-plane listeners — this router
/// carries no authentication of its own, matching the Non-goals.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/routes", get(list_routes).post(create_route))
        .route("/api/routes/:host", axum::routing::delete(delete_route))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn list_routes(State(state): State<AppState>) -> Json<Vec<Route>> {
    Json(state.routes.list())
}

#[derive(Debug, Deserialize)]
struct CreateRoute {
    host: String,
    target: String,
}

/// Normalizes a raw admin-supplied host the same way for every admin route:
/// the shared `normalize_host` rules plus the `.<suffix>` requirement from
/// §4.8, so `POST` and `DELETE` agree on what counts as a valid host.
fn normalize_route_host(raw: &str, suffix: &str) -> Option<String> {
    normalize_host(raw).filter(|h| h.ends_with(&format!(".{suffix}")))
}

async fn create_route(State(state): State<AppState>, Json(body): Json<CreateRoute>) -> Response {
    let Some(host) = normalize_route_host(&body.host, &state.config.hostname_suffix) else {
        return (StatusCode::BAD_REQUEST, "invalid host").into_response();
    };

    let valid_target = Url::parse(&body.target)
        .map(|url| url.scheme() == "http" && !url.host_str().unwrap_or_default().is_empty())
        .unwrap_or(false);
    if !valid_target {
        return (StatusCode::BAD_REQUEST, "invalid target").into_response();
    }

    state.routes.set(host.clone(), body.target.clone());
    info!(host = %host, target = %body.target, "registered route");
    StatusCode::CREATED.into_response()
}

async fn delete_route(State(state): State<AppState>, Path(raw_host): Path<String>) -> Response {
    let Some(host) = normalize_route_host(&raw_host, &state.config.hostname_suffix) else {
        return (StatusCode::BAD_REQUEST, "invalid host").into_response();
    };

    if !state.routes.delete(&host) {
        return StatusCode::NOT_FOUND.into_response();
    }

    state.cache.drop_host(&host);
    info!(host = %host, "removed route");
    StatusCode::NO_CONTENT.into_response()
}
