use std::net::SocketAddr;
use std::time::Duration;

/// Runtime configuration, loaded once at startup from the `PROXY_*`
/// environment variables enumerated in the specification. This crate does
/// not load a config file — the CLI's layered (figment/HCL) configuration
/// system lives outside the proxy and is out of scope here.
#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: SocketAddr,
    pub https_addr: Option<SocketAddr>,
    pub api_addr: SocketAddr,
    pub tls_cert_file: Option<String>,
    pub tls_key_file: Option<String>,
    pub redirect_http_to_https: bool,
    pub external_https_port: u16,
    pub hostname_suffix: String,
    pub auto_heal: bool,
    pub diagnostic_html: bool,
    pub auto_heal_timeout: Duration,
    pub auto_heal_container_port: u16,
    pub docker_socket: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("{0}")]
    Invalid(String),
}

impl Config {
    /// Loads configuration from the process environment, applying the
    /// defaults from the specification's environment variable table.
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_addr = parse_addr("PROXY_HTTP_ADDR", ":80")?;
        let https_addr_raw = env_var("PROXY_HTTPS_ADDR");
        let api_addr = parse_addr("PROXY_API_ADDR", ":2080")?;

        let tls_cert_file = env_var("PROXY_TLS_CERT_FILE");
        let tls_key_file = env_var("PROXY_TLS_KEY_FILE");
        let redirect_http_to_https = env_bool("PROXY_REDIRECT_HTTP_TO_HTTPS", false);
        let external_https_port = env_u16("PROXY_EXTERNAL_HTTPS_PORT", 443)?;
        let hostname_suffix = env_var("PROXY_HOSTNAME_SUFFIX").unwrap_or_else(|| "dv.localhost".to_string());
        let auto_heal = env_bool("PROXY_AUTO_HEAL", true);
        let diagnostic_html = env_bool("PROXY_DIAGNOSTIC_HTML", true);
        let auto_heal_timeout_ms = env_u64("PROXY_AUTO_HEAL_TIMEOUT_MS", 1500)?;
        let auto_heal_container_port = env_u16("PROXY_AUTO_HEAL_CONTAINER_PORT", 4200)?;
        let docker_socket = env_var("PROXY_DOCKER_SOCKET");

        // Setting any of the three HTTPS-related vars enables HTTPS, not
        // just PROXY_HTTPS_ADDR; fall back to the conventional HTTPS port
        // when the cert/key pair is set but no explicit address is.
        let https_enabled = https_requested(&https_addr_raw, &tls_cert_file, &tls_key_file);
        let https_addr = match (&https_addr_raw, https_enabled) {
            (Some(v), _) => Some(parse_addr_str("PROXY_HTTPS_ADDR", v)?),
            (None, true) => Some(parse_addr_str("PROXY_HTTPS_ADDR", ":443")?),
            (None, false) => None,
        };

        if redirect_http_to_https && !https_enabled {
            return Err(ConfigError::Invalid(
                "PROXY_REDIRECT_HTTP_TO_HTTPS requires PROXY_HTTPS_ADDR (or another HTTPS-enabling var) to be set"
                    .to_string(),
            ));
        }
        if https_enabled && (tls_cert_file.is_none() || tls_key_file.is_none()) {
            return Err(ConfigError::Invalid(
                "HTTPS is enabled but PROXY_TLS_CERT_FILE / PROXY_TLS_KEY_FILE are not both set".to_string(),
            ));
        }

        Ok(Config {
            http_addr,
            https_addr,
            api_addr,
            tls_cert_file,
            tls_key_file,
            redirect_http_to_https,
            external_https_port,
            hostname_suffix,
            auto_heal,
            diagnostic_html,
            auto_heal_timeout: Duration::from_millis(auto_heal_timeout_ms),
            auto_heal_container_port,
            docker_socket,
        })
    }
}

/// True if any of the three HTTPS-enabling vars is set: `PROXY_HTTPS_ADDR`,
/// `PROXY_TLS_CERT_FILE`, `PROXY_TLS_KEY_FILE`.
fn https_requested(https_addr: &Option<String>, tls_cert_file: &Option<String>, tls_key_file: &Option<String>) -> bool {
    https_addr.is_some() || tls_cert_file.is_some() || tls_key_file.is_some()
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Truthy parsing per the spec: case-insensitive `1`, `true`, `yes`, `on`.
/// Any other set value is false; unset falls back to `default`.
fn env_bool(name: &str, default: bool) -> bool {
    match env_var(name) {
        None => default,
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
    }
}

fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env_var(name) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue { name, value: v }),
    }
}

fn env_u16(name: &'static str, default: u16) -> Result<u16, ConfigError> {
    match env_var(name) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue { name, value: v }),
    }
}

fn parse_addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    let raw = env_var(name).unwrap_or_else(|| default.to_string());
    parse_addr_str(name, &raw)
}

/// Accepts both `:PORT` (bind-all-interfaces shorthand) and `HOST:PORT`.
fn parse_addr_str(name: &'static str, raw: &str) -> Result<SocketAddr, ConfigError> {
    let normalized = if let Some(port) = raw.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        raw.to_string()
    };
    normalized
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value: raw.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values_are_case_insensitive() {
        std::env::set_var("DV_PROXY_TEST_BOOL", "YES");
        assert!(env_bool("DV_PROXY_TEST_BOOL", false));
        std::env::set_var("DV_PROXY_TEST_BOOL", "off");
        assert!(!env_bool("DV_PROXY_TEST_BOOL", true));
        std::env::remove_var("DV_PROXY_TEST_BOOL");
        assert!(env_bool("DV_PROXY_TEST_BOOL", true));
    }

    #[test]
    fn any_https_var_enables_https() {
        let set = Some("x".to_string());
        assert!(https_requested(&set, &None, &None));
        assert!(https_requested(&None, &set, &None));
        assert!(https_requested(&None, &None, &set));
        assert!(!https_requested(&None, &None, &None));
    }

    #[test]
    fn bind_all_shorthand_expands_to_zero_address() {
        let addr = parse_addr_str("PROXY_HTTP_ADDR", ":80").unwrap();
        assert_eq!(addr.port(), 80);
        assert_eq!(addr.ip().to_string(), "0.0.0.0");
    }
}
