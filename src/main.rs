use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::ConnectInfo;
use axum::BoxError;
use dv_proxy::docker::{DockerInspector, Inspector};
use dv_proxy::{admin_router, http_router, https_router, AppState, Config};
use http::StatusCode;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

/// §5's "Data-plane HTTP(S): only ReadHeaderTimeout is set" — bounds only
/// the time to read request headers, not the body or the whole exchange.
const HTTP_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// §5's "Admin server: conservative read-header/read/write/idle limits" —
/// applied as a single ceiling on the whole request/response exchange via
/// `tower_http::timeout::TimeoutLayer`, since the admin API is JSON-only
/// with no streaming bodies to bound separately.
const ADMIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let inspector: Option<Arc<dyn Inspector>> = DockerInspector::connect(config.docker_socket.as_deref())
        .map(|inspector| Arc::new(inspector) as Arc<dyn Inspector>);
    if inspector.is_none() {
        warn!("docker inspector unavailable; heals will report auto-heal-unavailable until a socket is reachable");
    }

    let state = AppState::new(config.clone(), inspector);

    let mut handles = vec![tokio::spawn(serve_http(state.clone()))];
    if let Some(https_addr) = config.https_addr {
        handles.push(tokio::spawn(serve_https(state.clone(), https_addr)));
    }
    handles.push(tokio::spawn(serve_admin(state.clone())));

    for handle in handles {
        if let Err(err) = handle.await {
            error!(error = %err, "listener task exited abnormally");
        }
    }
}

/// Drives the plain-HTTP data plane off a manual accept loop rather than
/// `axum::serve`, since only `hyper_util`'s connection builder exposes a
/// header-read timeout (`axum::serve` has no hook for it).
async fn serve_http(state: AppState) {
    let addr = state.config.http_addr;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, error = %err, "failed to bind http listener");
            std::process::exit(1);
        }
    };
    info!(%addr, "http listener bound");

    let app = http_router(state);
    let mut shutdown = std::pin::pin!(shutdown_signal());

    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "failed to accept http connection");
                    continue;
                }
            },
        };

        let app = app.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = hyper::service::service_fn(move |mut req: http::Request<hyper::body::Incoming>| {
                req.extensions_mut().insert(ConnectInfo(peer));
                let app = app.clone();
                async move { app.oneshot(req.map(axum::body::Body::new)).await }
            });

            let mut builder = ConnBuilder::new(TokioExecutor::new());
            builder.http1().header_read_timeout(HTTP_HEADER_READ_TIMEOUT);

            if let Err(err) = builder.serve_connection(io, service).await {
                warn!(error = %err, "http connection closed with error");
            }
        });
    }
}

async fn serve_https(state: AppState, addr: SocketAddr) {
    let (Some(cert), Some(key)) = (state.config.tls_cert_file.clone(), state.config.tls_key_file.clone()) else {
        error!("https listener enabled without both PROXY_TLS_CERT_FILE and PROXY_TLS_KEY_FILE");
        std::process::exit(1);
    };

    let tls_config = match axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load tls certificate/key");
            std::process::exit(1);
        }
    };

    info!(%addr, "https listener bound");
    let app = https_router(state);

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    if let Err(err) = axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
    {
        error!(%addr, error = %err, "https listener failed");
        std::process::exit(1);
    }
}

async fn serve_admin(state: AppState) {
    let addr = state.config.api_addr;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, error = %err, "failed to bind admin listener");
            std::process::exit(1);
        }
    };
    info!(%addr, "admin listener bound");

    let app = admin_router(state).layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(admin_timeout_error))
            .layer(TimeoutLayer::new(ADMIN_REQUEST_TIMEOUT)),
    );
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .ok();
}

/// Converts a `TimeoutLayer` elapse into a plain response; any other error
/// reaching this point is itself a bug (axum's own services are
/// `Infallible`), so it is reported as a 500 rather than propagated.
async fn admin_timeout_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("unhandled error: {err}"))
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
