use thiserror::Error;

/// Errors surfaced while resolving or refreshing a route against Docker.
///
/// Variants are distinguishable by identity (not by message), since the
/// dispatcher classifies a heal failure by matching on the error kind
/// rather than by inspecting its rendered text.
#[derive(Debug, Clone, Error)]
pub enum HealError {
    #[error("auto-heal is disabled")]
    AutoHealDisabled,

    #[error("auto-heal unavailable: {0}")]
    AutoHealUnavailable(String),

    #[error("container not found")]
    ContainerNotFound,

    #[error("container is not running{}", status.as_ref().map(|s| format!(" (status: {s})")).unwrap_or_default())]
    ContainerNotRunning { status: Option<String> },

    #[error("container has no IP address")]
    ContainerNoIP,

    #[error("host does not map to a known container")]
    HostContainerInvalid,
}

impl HealError {
    /// Human-readable category used in diagnostic pages, matching §4.6's
    /// heal-failure classification table.
    pub fn category(&self) -> &'static str {
        match self {
            HealError::AutoHealDisabled => "Auto-heal disabled",
            HealError::AutoHealUnavailable(_) => "Auto-heal unavailable",
            HealError::ContainerNotFound => "Container not found",
            HealError::ContainerNotRunning { .. } => "Container is not running",
            HealError::ContainerNoIP => "Container has no IP address",
            HealError::HostContainerInvalid => "Host does not map to a known container",
        }
    }
}
