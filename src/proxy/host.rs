/// Canonicalizes a raw host string the way every entry point into this
/// crate needs it normalized: lowercased, trailing dot trimmed, an
/// `http(s)://` scheme prefix stripped if present, a trailing `:port`
/// dropped, and `/`, `\`, `@` rejected outright. Returns `None` when the
/// result would be empty or contains a rejected character.
///
/// Shared by the admin API, the data-plane dispatcher (via the incoming
/// `Host` header), and the HTTP->HTTPS redirect handler, so the three
/// surfaces agree on exactly what "the same host" means.
pub fn normalize_host(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let without_scheme = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .unwrap_or(trimmed);

    if without_scheme.is_empty() || without_scheme.contains(['/', '\\', '@']) {
        return None;
    }

    let without_port = match without_scheme.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => without_scheme,
    };

    let normalized = without_port.trim().trim_end_matches('.').to_ascii_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}
