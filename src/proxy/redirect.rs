use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::{header, Request, StatusCode};

use crate::proxy::host::normalize_host;
use crate::AppState;

/// Swapped in for the plain HTTP listener's handler when
/// `PROXY_REDIRECT_HTTP_TO_HTTPS` is enabled: redirects every request to
/// its HTTPS equivalent rather than serving it.
pub async fn redirect_to_https(State(state): State<AppState>, req: Request<Body>) -> Response {
    let raw_host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let Some(host) = normalize_host(raw_host) else {
        return (StatusCode::BAD_GATEWAY, "missing host").into_response();
    };

    let port = state.config.external_https_port;
    let port_segment = if port == 443 { String::new() } else { format!(":{port}") };
    let location = format!("https://{host}{port_segment}{}", req.uri());

    (StatusCode::PERMANENT_REDIRECT, [(header::LOCATION, location)]).into_response()
}
