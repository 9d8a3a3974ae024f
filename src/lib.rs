use std::sync::Arc;

use axum::extract::Extension;
use axum::Router;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

pub mod admin;
pub mod config;
pub mod docker;
pub mod errors;
pub mod healer;
pub mod proxy;
pub mod stores;

pub use config::Config;
pub use healer::RouteHealer;
pub use proxy::ProxyCache;
pub use stores::RouteTable;

/// Pooled outbound client shared by every proxied request.
pub type HttpClient = Client<HttpConnector, axum::body::Body>;

/// Everything a request handler needs: the route table, the healer, the
/// per-host reverse-proxy cache, the outbound client, and the resolved
/// configuration. Cheap to clone — every field is itself `Arc`-backed or
/// a lightweight handle.
#[derive(Clone)]
pub struct AppState {
    pub routes: RouteTable,
    pub healer: RouteHealer,
    pub cache: Arc<ProxyCache>,
    pub client: HttpClient,
    pub config: Arc<Config>,
}

/// Proxy cache capacity (§4.4 default).
const DEFAULT_PROXY_CACHE_CAP: usize = 512;

impl AppState {
    pub fn new(config: Arc<Config>, inspector: Option<Arc<dyn docker::Inspector>>) -> Self {
        let routes = RouteTable::new();
        let healer = RouteHealer::new(
            routes.clone(),
            inspector,
            config.hostname_suffix.clone(),
            config.auto_heal_container_port,
            config.auto_heal_timeout,
            config.auto_heal,
        );
        let client: HttpClient = Client::builder(TokioExecutor::new()).build_http();
        Self { routes, healer, cache: Arc::new(ProxyCache::new(DEFAULT_PROXY_CACHE_CAP)), client, config }
    }
}

/// The plain HTTP data-plane router: either the reverse-proxy dispatcher,
/// or — when `PROXY_REDIRECT_HTTP_TO_HTTPS` is set — the redirect
/// handler in its place.
pub fn http_router(state: AppState) -> Router {
    if state.config.redirect_http_to_https {
        Router::new().fallback(proxy::redirect_to_https).with_state(state)
    } else {
        Router::new()
            .fallback(proxy::dispatch)
            .layer(Extension(proxy::Tls(false)))
            .with_state(state)
    }
}

/// The HTTPS data-plane router, only bound when `PROXY_HTTPS_ADDR` is set.
pub fn https_router(state: AppState) -> Router {
    Router::new()
        .fallback(proxy::dispatch)
        .layer(Extension(proxy::Tls(true)))
        .with_state(state)
}

/// The admin JSON API router.
pub fn admin_router(state: AppState) -> Router {
    admin::router(state)
}
