use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::HealError;

/// Classifies a stringified upstream transport error into the category
/// shown on the diagnostic page, matched by substring on the lowercased
/// message.
pub fn classify_upstream_error(err: &str) -> &'static str {
    let lowered = err.to_ascii_lowercase();
    if lowered.contains("connection refused") {
        "Upstream connection refused"
    } else if lowered.contains("no route to host") {
        "Upstream route unavailable"
    } else if lowered.contains("i/o timeout") || lowered.contains("context deadline exceeded") || lowered.contains("timed out") {
        "Upstream timeout"
    } else {
        "Upstream unavailable"
    }
}

/// Classifies a heal failure by its identity (not its rendered message),
/// plus the one case the heal path itself never produces: a retry-heal
/// that failed after an already-failed first upstream attempt.
pub fn classify_heal_error(err: &HealError) -> &'static str {
    err.category()
}

/// Monotonic sequence counter feeding the second half of the diagnostic
/// ID, read/written without a mutex.
static DIAGNOSTIC_SEQ: AtomicU64 = AtomicU64::new(0);

/// A unique `<nanos-hex>-<seq-hex>` token for cross-referencing a
/// diagnostic page against the logs.
pub fn diagnostic_id() -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let seq = DIAGNOSTIC_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{nanos:x}-{seq:x}")
}

/// The fields a diagnostic page is built from.
pub struct Diagnostic<'a> {
    pub category: &'a str,
    pub host: &'a str,
    pub message: &'a str,
    pub container_name: Option<&'a str>,
}

/// Renders the plain-text diagnostic body used when HTML diagnostics are
/// disabled: just the fixed message, nothing request-specific.
pub fn render_plain() -> &'static str {
    "proxy request failed"
}

/// Renders a self-contained HTML diagnostic page: category, host, raw
/// error, an RFC3339 timestamp, a unique diagnostic ID, and suggested
/// remediation commands parameterized by the container name when one
/// could be parsed from the host.
pub fn render_html(diag: &Diagnostic<'_>) -> String {
    let timestamp = now_rfc3339();
    let id = diagnostic_id();
    let host = escape_html(diag.host);
    let category = escape_html(diag.category);
    let message = escape_html(diag.message);

    let mut suggestions = String::new();
    if let Some(name) = diag.container_name {
        let name = escape_html(name);
        let _ = write!(suggestions, "<li><code>docker inspect {name}</code></li>");
        let _ = write!(suggestions, "<li><code>docker logs {name}</code></li>");
        let _ = write!(suggestions, "<li><code>docker restart {name}</code></li>");
    } else {
        suggestions.push_str("<li>Check that the host matches a running container's name.</li>");
    }

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>502 Bad Gateway</title>
<style>
body {{ font-family: -apple-system, sans-serif; background: #1c1c1e; color: #e5e5ea; padding: 2rem; }}
.card {{ max-width: 640px; margin: 0 auto; background: #2c2c2e; border-radius: 12px; padding: 1.5rem 2rem; }}
h1 {{ font-size: 1.1rem; color: #ff6961; }}
dl {{ display: grid; grid-template-columns: auto 1fr; gap: 0.25rem 1rem; }}
dt {{ color: #8e8e93; }}
code {{ background: #1c1c1e; padding: 0.1rem 0.3rem; border-radius: 4px; }}
</style>
</head>
<body>
<div class="card">
<h1>502 Bad Gateway &mdash; {category}</h1>
<dl>
<dt>Host</dt><dd>{host}</dd>
<dt>Error</dt><dd>{message}</dd>
<dt>Time</dt><dd>{timestamp}</dd>
<dt>Diagnostic ID</dt><dd>{id}</dd>
</dl>
<p>Suggested next steps:</p>
<ul>{suggestions}</ul>
</div>
</body>
</html>
"#
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_connection_refused() {
        assert_eq!(classify_upstream_error("Connection Refused (os error 111)"), "Upstream connection refused");
    }

    #[test]
    fn classifies_no_route_to_host() {
        assert_eq!(classify_upstream_error("No route to host"), "Upstream route unavailable");
    }

    #[test]
    fn classifies_timeouts() {
        assert_eq!(classify_upstream_error("context deadline exceeded"), "Upstream timeout");
        assert_eq!(classify_upstream_error("i/o timeout"), "Upstream timeout");
    }

    #[test]
    fn falls_back_to_generic_unavailable() {
        assert_eq!(classify_upstream_error("something unexpected"), "Upstream unavailable");
    }

    #[test]
    fn heal_error_categories_match_spec_strings() {
        assert_eq!(classify_heal_error(&HealError::AutoHealDisabled), "Auto-heal disabled");
        assert_eq!(classify_heal_error(&HealError::ContainerNotFound), "Container not found");
        assert_eq!(
            classify_heal_error(&HealError::ContainerNotRunning { status: Some("exited".to_string()) }),
            "Container is not running"
        );
    }

    #[test]
    fn diagnostic_ids_are_unique_across_calls() {
        let a = diagnostic_id();
        let b = diagnostic_id();
        assert_ne!(a, b);
    }

    #[test]
    fn html_page_escapes_the_container_name() {
        let diag = Diagnostic {
            category: "Container not found",
            host: "api.dv.localhost",
            message: "container not found",
            container_name: Some("<script>"),
        };
        let html = render_html(&diag);
        assert!(!html.contains("<script>docker"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn plain_text_is_the_fixed_message() {
        assert_eq!(render_plain(), "proxy request failed");
    }
}
