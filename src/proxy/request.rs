/// Joins an upstream base path and the incoming request path using the
/// single-slash rule: drop one slash when both sides have one at the
/// junction, insert one when neither does, otherwise concatenate as-is.
pub fn join_paths(base: &str, req: &str) -> String {
    match (base.ends_with('/'), req.starts_with('/')) {
        (true, true) => format!("{base}{}", &req[1..]),
        (false, false) => format!("{base}/{req}"),
        _ => format!("{base}{req}"),
    }
}

/// Merges two query strings with `&`; falls back to whichever side is
/// non-empty, or `None` if both are.
pub fn merge_query(base: Option<&str>, req: Option<&str>) -> Option<String> {
    let base = base.filter(|q| !q.is_empty());
    let req = req.filter(|q| !q.is_empty());
    match (base, req) {
        (Some(b), Some(r)) => Some(format!("{b}&{r}")),
        (Some(b), None) => Some(b.to_string()),
        (None, Some(r)) => Some(r.to_string()),
        (None, None) => None,
    }
}

/// The external port to advertise in `X-Forwarded-Port`: the incoming
/// port if the request carried one, otherwise the scheme default (443
/// for TLS, 80 otherwise).
pub fn forwarded_port(tls: bool, incoming_port: Option<u16>, external_https_port: u16) -> u16 {
    incoming_port.unwrap_or(if tls { external_https_port } else { 80 })
}

/// The forwarded-header values for a single proxied request, computed
/// independently of any actual HTTP types so they can be unit-tested in
/// isolation from the hyper/axum request plumbing in `dispatch`.
#[derive(Debug, PartialEq, Eq)]
pub struct ForwardedHeaders {
    pub host: String,
    pub x_forwarded_host: String,
    pub x_forwarded_proto: &'static str,
    pub x_forwarded_port: u16,
    pub x_forwarded_ssl: Option<&'static str>,
    pub x_forwarded_for: String,
}

pub fn build_forwarded_headers(
    incoming_host: &str,
    incoming_port: Option<u16>,
    tls: bool,
    external_https_port: u16,
    client_ip: &str,
    prior_xff: Option<&str>,
) -> ForwardedHeaders {
    let host_value = match incoming_port {
        Some(port) => format!("{incoming_host}:{port}"),
        None => incoming_host.to_string(),
    };

    let x_forwarded_for = match prior_xff.filter(|v| !v.is_empty()) {
        Some(prior) => format!("{prior}, {client_ip}"),
        None => client_ip.to_string(),
    };

    ForwardedHeaders {
        host: host_value.clone(),
        x_forwarded_host: host_value,
        x_forwarded_proto: if tls { "https" } else { "http" },
        x_forwarded_port: forwarded_port(tls, incoming_port, external_https_port),
        x_forwarded_ssl: if tls { Some("on") } else { None },
        x_forwarded_for,
    }
}
