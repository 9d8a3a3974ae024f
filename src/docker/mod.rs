use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::InspectContainerOptions;
use bollard::Docker;

use crate::errors::HealError;

/// Resolves a container name to its running state and network addresses.
/// The healer depends on this trait rather than on `bollard` directly so
/// tests can substitute a fake Docker Engine without a real socket.
#[async_trait]
pub trait Inspector: Send + Sync {
    async fn inspect(&self, container_name: &str, timeout: Duration) -> Result<InspectPayload, HealError>;
}

/// The subset of the Docker Engine inspect response the healer cares
/// about: whether the container is running, its human-readable status
/// (for diagnostics), and its per-network IP addresses.
#[derive(Debug, Clone, Default)]
pub struct InspectPayload {
    pub running: bool,
    pub status: Option<String>,
    pub networks: HashMap<String, Option<String>>,
}

impl InspectPayload {
    /// The IP of the network whose name sorts smallest, skipping networks
    /// with no address. Deterministic tie-break per §4.3.
    pub fn primary_ip(&self) -> Option<String> {
        let mut names: Vec<&String> = self.networks.keys().collect();
        names.sort();
        names
            .into_iter()
            .find_map(|name| self.networks.get(name).and_then(|ip| ip.clone()).filter(|ip| !ip.is_empty()))
    }
}

/// HTTP client over the Docker Engine's Unix socket, used to resolve a
/// container name to its running state and IP address.
pub struct DockerInspector {
    client: Docker,
}

impl DockerInspector {
    /// Connects to the Docker Engine socket. Returns `None` (rather than
    /// an error) when no usable Unix socket can be resolved, matching
    /// §9's "non-unix Docker hosts" behavior: the proxy still serves
    /// pre-populated routes, it just loses auto-discovery.
    pub fn connect(configured_socket: Option<&str>) -> Option<Self> {
        if let Some(host) = std::env::var("DOCKER_HOST").ok().filter(|h| !h.is_empty()) {
            if !host.starts_with("unix://") {
                return None;
            }
        }

        let socket_path = resolve_socket_path(configured_socket)?;
        let client = Docker::connect_with_unix(&socket_path, 120, bollard::API_DEFAULT_VERSION).ok()?;
        Some(DockerInspector { client })
    }

}

#[async_trait]
impl Inspector for DockerInspector {
    /// Inspects a single container by name, bounded by `timeout`.
    async fn inspect(&self, container_name: &str, timeout: Duration) -> Result<InspectPayload, HealError> {
        let fut = self.client.inspect_container(container_name, None::<InspectContainerOptions>);

        let response = match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(response)) => response,
            Ok(Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. })) => {
                return Err(HealError::ContainerNotFound);
            }
            Ok(Err(bollard::errors::Error::DockerResponseServerError { status_code, message })) => {
                let truncated: String = message.chars().take(1024).collect();
                return Err(HealError::AutoHealUnavailable(format!(
                    "docker responded {status_code}: {truncated}"
                )));
            }
            Ok(Err(err)) => return Err(HealError::AutoHealUnavailable(err.to_string())),
            Err(_elapsed) => return Err(HealError::AutoHealUnavailable("docker inspect timed out".to_string())),
        };

        let running = response.state.as_ref().and_then(|s| s.running).unwrap_or(false);
        let status = response
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|s| s.to_string());

        let networks = response
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default()
            .into_iter()
            .map(|(name, endpoint)| (name, endpoint.ip_address))
            .collect();

        Ok(InspectPayload { running, status, networks })
    }
}

/// Resolves the Docker Engine Unix socket path: the explicitly configured
/// path if given, else the first of the well-known default locations that
/// exists on disk.
fn resolve_socket_path(configured: Option<&str>) -> Option<String> {
    if let Some(path) = configured {
        return Some(path.to_string());
    }

    let candidates = [
        Some("/var/run/docker.sock".to_string()),
        std::env::var("HOME").ok().map(|h| format!("{h}/.docker/run/docker.sock")),
        std::env::var("HOME").ok().map(|h| format!("{h}/.orbstack/run/docker.sock")),
    ];

    for candidate in candidates.into_iter().flatten() {
        if candidate.is_empty() {
            continue;
        }
        if Path::new(&candidate).exists() {
            return Some(candidate);
        }
    }

    None
}
