use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::Body;
use axum::extract::{ConnectInfo, Extension, State};
use axum::response::{IntoResponse, Response};
use http::request::Parts;
use http::{header, HeaderValue, Request, StatusCode, Uri};
use tracing::error;

use crate::healer::container_name_from_host;
use crate::proxy::diagnostic::{classify_heal_error, classify_upstream_error, render_html, render_plain, Diagnostic};
use crate::proxy::host::normalize_host;
use crate::proxy::request::{build_forwarded_headers, join_paths, merge_query};
use crate::AppState;

/// Marks whether a given listener terminates TLS; inserted as a layer on
/// the HTTPS router only, absent (defaulting to `false`) on the plain
/// HTTP router.
#[derive(Clone, Copy)]
pub struct Tls(pub bool);

/// The top-level data-plane handler: normalizes the host, looks it up
/// (healing on miss), serves via the cached reverse proxy, and retries
/// once on upstream failure for idempotent methods.
pub async fn dispatch(
    State(state): State<AppState>,
    tls: Option<Extension<Tls>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let tls = tls.map(|Extension(Tls(t))| t).unwrap_or(false);

    let raw_host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let incoming_port = raw_host.rsplit_once(':').and_then(|(_, port)| port.parse::<u16>().ok());

    let host = match normalize_host(&raw_host) {
        Some(h) => h,
        None => return plain_response(StatusCode::BAD_GATEWAY, "missing host"),
    };

    let target = match state.routes.lookup(&host) {
        Some(target) => target,
        None => {
            state.cache.drop_host(&host);
            match state.healer.heal(&host).await {
                Ok(target) => target,
                Err(err) => {
                    let category = classify_heal_error(&err);
                    return diagnostic_response(&state, &host, category, &err.to_string());
                }
            }
        }
    };

    serve(&state, &host, &target, req, remote, tls, incoming_port).await
}

async fn serve(
    state: &AppState,
    host: &str,
    target: &str,
    req: Request<Body>,
    remote: SocketAddr,
    tls: bool,
    incoming_port: Option<u16>,
) -> Response {
    let (parts, body) = req.into_parts();
    let idempotent = matches!(parts.method.as_str(), "GET" | "HEAD" | "OPTIONS" | "TRACE");
    let retried = AtomicBool::new(false);

    match forward_once(state, host, target, &parts, body, remote, tls, incoming_port).await {
        Ok(resp) => resp,
        Err(err) => {
            if idempotent && retried.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                match state.healer.retry_heal(host).await {
                    Ok(new_target) => {
                        match forward_once(state, host, &new_target, &parts, Body::empty(), remote, tls, incoming_port).await {
                            Ok(resp) => resp,
                            Err(retry_err) => {
                                let category = classify_upstream_error(&retry_err);
                                diagnostic_response(state, host, category, &retry_err)
                            }
                        }
                    }
                    Err(heal_err) => {
                        let category = classify_upstream_error(&err);
                        let message = format!("{err} (auto-heal failed: {heal_err})");
                        diagnostic_response(state, host, category, &message)
                    }
                }
            } else {
                let category = classify_upstream_error(&err);
                diagnostic_response(state, host, category, &err)
            }
        }
    }
}

async fn forward_once(
    state: &AppState,
    host: &str,
    target: &str,
    parts: &Parts,
    body: Body,
    remote: SocketAddr,
    tls: bool,
    incoming_port: Option<u16>,
) -> Result<Response, String> {
    let authority = state.cache.get_or_build(host, target).map_err(|e| e.to_string())?;

    let path = join_paths("", parts.uri.path());
    let query = merge_query(None, parts.uri.query());
    let mut uri_string = format!("http://{authority}{path}");
    if let Some(query) = &query {
        uri_string.push('?');
        uri_string.push_str(query);
    }
    let uri: Uri = uri_string.parse().map_err(|e: http::uri::InvalidUri| e.to_string())?;

    let prior_xff = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let forwarded = build_forwarded_headers(
        host,
        incoming_port,
        tls,
        state.config.external_https_port,
        &remote.ip().to_string(),
        prior_xff.as_deref(),
    );

    let mut builder = Request::builder().method(parts.method.clone()).uri(uri);
    let headers = builder.headers_mut().expect("request builder always has a header map before body()");
    *headers = parts.headers.clone();
    headers.insert(header::HOST, HeaderValue::from_str(&forwarded.host).map_err(|e| e.to_string())?);
    headers.insert("x-forwarded-host", HeaderValue::from_str(&forwarded.x_forwarded_host).map_err(|e| e.to_string())?);
    headers.insert("x-forwarded-proto", HeaderValue::from_static(forwarded.x_forwarded_proto));
    headers.insert("x-forwarded-port", HeaderValue::from(forwarded.x_forwarded_port));
    match forwarded.x_forwarded_ssl {
        Some(value) => {
            headers.insert("x-forwarded-ssl", HeaderValue::from_static(value));
        }
        None => {
            headers.remove("x-forwarded-ssl");
        }
    }
    headers.insert("x-forwarded-for", HeaderValue::from_str(&forwarded.x_forwarded_for).map_err(|e| e.to_string())?);

    let request = builder.body(body).map_err(|e| e.to_string())?;

    let response = state.client.request(request).await.map_err(|e| e.to_string())?;
    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}

fn diagnostic_response(state: &AppState, host: &str, category: &str, message: &str) -> Response {
    error!(host = %host, category = %category, message = %message, "proxy request failed");

    if !state.config.diagnostic_html {
        return plain_response(StatusCode::BAD_GATEWAY, render_plain());
    }

    let container_name = container_name_from_host(host, &state.config.hostname_suffix)
        .ok()
        .map(|name| name.to_string());
    let diag = Diagnostic { category, host, message, container_name: container_name.as_deref() };
    let html = render_html(&diag);

    (StatusCode::BAD_GATEWAY, [(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response()
}

fn plain_response(status: StatusCode, message: &str) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], message.to_string()).into_response()
}
