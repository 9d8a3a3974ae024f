use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::info;

use crate::docker::Inspector;
use crate::errors::HealError;
use crate::stores::RouteTable;

/// Validated container name: the part of a host before its configured
/// suffix, matching `^[a-z0-9][a-z0-9_.-]*$`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerName(String);

impl ContainerName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContainerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the container name implied by `host` under `suffix`: lowercase
/// and trim a trailing dot, require the `.<suffix>` tail, then validate
/// the remaining prefix against the container-name grammar.
pub fn container_name_from_host(host: &str, suffix: &str) -> Result<ContainerName, HealError> {
    let normalized = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let dotted_suffix = format!(".{suffix}");

    let prefix = normalized
        .strip_suffix(&dotted_suffix)
        .ok_or(HealError::HostContainerInvalid)?;

    if is_valid_container_name(prefix) {
        Ok(ContainerName(prefix.to_string()))
    } else {
        Err(HealError::HostContainerInvalid)
    }
}

fn is_valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else { return false };
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.' || c == '-')
}

type SharedHeal = Shared<BoxFuture<'static, Result<String, HealError>>>;

/// Single-flight, timeout-bounded resolver that turns a host into a live
/// upstream target by inspecting Docker, then publishes the result into
/// the route table.
#[derive(Clone)]
pub struct RouteHealer {
    routes: RouteTable,
    inspector: Option<Arc<dyn Inspector>>,
    suffix: String,
    container_port: u16,
    heal_timeout: Duration,
    auto_heal: bool,
    in_flight: Arc<DashMap<String, SharedHeal>>,
}

impl RouteHealer {
    pub fn new(
        routes: RouteTable,
        inspector: Option<Arc<dyn Inspector>>,
        suffix: String,
        container_port: u16,
        heal_timeout: Duration,
        auto_heal: bool,
    ) -> Self {
        Self {
            routes,
            inspector,
            suffix,
            container_port,
            heal_timeout,
            auto_heal,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Resolves (or refreshes) the route for `host`. Concurrent callers
    /// for the same host share one in-flight resolution and receive the
    /// same result — including a caller whose own request is later
    /// dropped or cancelled, since the underlying work runs detached on
    /// its own task rather than tied to any individual caller's future.
    pub async fn heal(&self, host: &str) -> Result<String, HealError> {
        if !self.auto_heal {
            return Err(HealError::AutoHealDisabled);
        }
        let Some(inspector) = self.inspector.clone() else {
            return Err(HealError::AutoHealUnavailable("docker inspector unavailable".to_string()));
        };

        let shared = self
            .in_flight
            .entry(host.to_string())
            .or_insert_with(|| {
                Self::spawn_heal(inspector, self.routes.clone(), host.to_string(), self.suffix.clone(), self.container_port, self.heal_timeout)
            })
            .clone();

        let result = shared.await;
        // The shared future has resolved for every waiter by this point;
        // removing here (possibly redundantly, across waiters) guarantees
        // the in-flight record is gone before `heal` returns to any of
        // them, satisfying the panic-safety / re-entrancy invariant.
        self.in_flight.remove(host);
        result
    }

    /// Re-resolves `host` for the solo retry-heal after an idempotent-method
    /// upstream failure (§4.6). Unlike `heal`, this does not join the
    /// single-flight in-flight index or detach onto its own task: a retry
    /// has no other waiter to protect from this caller's cancellation, so
    /// it runs directly under the caller's own future and is dropped along
    /// with it, per §5's distinction between the coalesced heal body and
    /// the caller-context retry-heal.
    pub async fn retry_heal(&self, host: &str) -> Result<String, HealError> {
        if !self.auto_heal {
            return Err(HealError::AutoHealDisabled);
        }
        let Some(inspector) = self.inspector.clone() else {
            return Err(HealError::AutoHealUnavailable("docker inspector unavailable".to_string()));
        };

        tokio::time::timeout(
            self.heal_timeout,
            Self::do_heal(inspector, self.routes.clone(), host.to_string(), self.suffix.clone(), self.container_port),
        )
        .await
        .unwrap_or_else(|_elapsed| Err(HealError::AutoHealUnavailable("heal timed out".to_string())))
    }

    fn spawn_heal(
        inspector: Arc<dyn Inspector>,
        routes: RouteTable,
        host: String,
        suffix: String,
        container_port: u16,
        heal_timeout: Duration,
    ) -> SharedHeal {
        let handle = tokio::spawn(async move {
            // Bounded solely by the heal timeout, deliberately not tied
            // to any individual caller's cancellation — this is the
            // detached-context requirement from §5/§9: a waiter that
            // joined after the leader's own request was dropped must
            // still see the result once the timeout-bounded work
            // finishes.
            tokio::time::timeout(heal_timeout, Self::do_heal(inspector, routes, host, suffix, container_port))
                .await
                .unwrap_or_else(|_elapsed| Err(HealError::AutoHealUnavailable("heal timed out".to_string())))
        });

        let fut: Pin<Box<dyn std::future::Future<Output = Result<String, HealError>> + Send>> = Box::pin(async move {
            match handle.await {
                Ok(result) => result,
                // A default error, pre-populated for the panic case: the
                // task's JoinError means the leader never assigned a
                // result, so waiters must still see an error rather than
                // hanging or observing an empty success.
                Err(_join_err) => Err(HealError::AutoHealUnavailable("heal task panicked".to_string())),
            }
        });

        fut.shared()
    }

    async fn do_heal(
        inspector: Arc<dyn Inspector>,
        routes: RouteTable,
        host: String,
        suffix: String,
        container_port: u16,
    ) -> Result<String, HealError> {
        let container = container_name_from_host(&host, &suffix)?;

        let payload = inspector.inspect(container.as_str(), Duration::from_secs(3600)).await?;

        if !payload.running {
            return Err(HealError::ContainerNotRunning { status: payload.status });
        }

        let ip = payload.primary_ip().ok_or(HealError::ContainerNoIP)?;
        let target = format!("http://{ip}:{container_port}");

        routes.set(host.clone(), target.clone());
        info!(host = %host, target = %target, "auto-healed route");

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::testing::FakeInspector;
    use crate::docker::InspectPayload;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    #[test]
    fn container_name_grammar_round_trips() {
        let suffix = "home.arpa";
        let (name, ok) = match container_name_from_host("api-key.home.arpa", suffix) {
            Ok(n) => (n.to_string(), true),
            Err(_) => (String::new(), false),
        };
        assert!(ok);
        assert_eq!(name, "api-key");

        assert!(container_name_from_host("home.arpa", suffix).is_err());
        assert!(container_name_from_host("api/key.home.arpa", suffix).is_err());
    }

    #[test]
    fn rejects_dangerous_characters() {
        let suffix = "dv.localhost";
        for bad in ["a/b.dv.localhost", "a\\b.dv.localhost", "a@b.dv.localhost", "a b.dv.localhost", ".ab.dv.localhost"] {
            assert!(container_name_from_host(bad, suffix).is_err(), "expected rejection for {bad}");
        }
    }

    #[test]
    fn wrong_suffix_is_rejected() {
        assert!(container_name_from_host("api.example.com", "dv.localhost").is_err());
    }

    #[test]
    fn lowercases_and_trims_trailing_dot() {
        let name = container_name_from_host("API-Key.DV.Localhost.", "dv.localhost").unwrap();
        assert_eq!(name.to_string(), "api-key");
    }

    fn running_with_ips() -> Result<InspectPayload, HealError> {
        let mut networks = HashMap::new();
        networks.insert("zz".to_string(), Some("172.17.0.8".to_string()));
        networks.insert("aa".to_string(), Some("172.17.0.7".to_string()));
        Ok(InspectPayload { running: true, status: None, networks })
    }

    fn not_running() -> Result<InspectPayload, HealError> {
        Ok(InspectPayload { running: false, status: Some("exited".to_string()), networks: HashMap::new() })
    }

    #[tokio::test]
    async fn disabled_auto_heal_short_circuits() {
        let routes = RouteTable::new();
        let healer = RouteHealer::new(routes, None, "dv.localhost".to_string(), 4200, Duration::from_millis(100), false);
        let err = healer.heal("api.dv.localhost").await.unwrap_err();
        assert!(matches!(err, HealError::AutoHealDisabled));
    }

    #[tokio::test]
    async fn missing_inspector_is_unavailable() {
        let routes = RouteTable::new();
        let healer = RouteHealer::new(routes, None, "dv.localhost".to_string(), 4200, Duration::from_millis(100), true);
        let err = healer.heal("api.dv.localhost").await.unwrap_err();
        assert!(matches!(err, HealError::AutoHealUnavailable(_)));
    }

    #[tokio::test]
    async fn heal_publishes_the_lexicographically_smallest_network_ip() {
        let routes = RouteTable::new();
        let inspector: Arc<dyn Inspector> = Arc::new(FakeInspector::new(Duration::from_millis(0), running_with_ips));
        let healer = RouteHealer::new(routes.clone(), Some(inspector), "home.arpa".to_string(), 4200, Duration::from_secs(1), true);

        let target = healer.heal("api-key.home.arpa").await.unwrap();
        assert_eq!(target, "http://172.17.0.7:4200");
        assert_eq!(routes.lookup("api-key.home.arpa"), Some("http://172.17.0.7:4200".to_string()));
    }

    #[tokio::test]
    async fn not_running_container_is_reported() {
        let routes = RouteTable::new();
        let inspector: Arc<dyn Inspector> = Arc::new(FakeInspector::new(Duration::from_millis(0), not_running));
        let healer = RouteHealer::new(routes, Some(inspector), "home.arpa".to_string(), 4200, Duration::from_secs(1), true);

        let err = healer.heal("api-key.home.arpa").await.unwrap_err();
        assert!(matches!(err, HealError::ContainerNotRunning { status: Some(ref s) } if s == "exited"));
    }

    #[tokio::test]
    async fn concurrent_heals_for_the_same_host_coalesce_into_one_inspect_call() {
        let routes = RouteTable::new();
        let fake = Arc::new(FakeInspector::new(Duration::from_millis(50), running_with_ips));
        let calls = fake.calls.clone();
        let inspector: Arc<dyn Inspector> = fake;
        let healer = RouteHealer::new(routes, Some(inspector), "home.arpa".to_string(), 4200, Duration::from_secs(5), true);

        let (a, b) = tokio::join!(healer.heal("api-key.home.arpa"), healer.heal("api-key.home.arpa"));

        assert_eq!(a.unwrap(), "http://172.17.0.7:4200");
        assert_eq!(b.unwrap(), "http://172.17.0.7:4200");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leader_cancellation_does_not_abort_a_concurrent_waiter() {
        let routes = RouteTable::new();
        let inspector: Arc<dyn Inspector> = Arc::new(FakeInspector::new(Duration::from_millis(80), running_with_ips));
        let healer = RouteHealer::new(routes, Some(inspector), "home.arpa".to_string(), 4200, Duration::from_secs(5), true);

        // The "leader" call is spawned on its own task and aborted
        // shortly after it starts — simulating the leader's caller
        // dropping its request context once the inspector has been
        // entered. The heal's own work runs detached on `tokio::spawn`
        // inside `heal`, so aborting the *caller's* awaiting task must
        // not stop the shared work underneath it.
        let leader_healer = healer.clone();
        let leader = tokio::spawn(async move { leader_healer.heal("api-key.home.arpa").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        let waiter = healer.heal("api-key.home.arpa").await;
        assert_eq!(waiter.unwrap(), "http://172.17.0.7:4200");
    }

    #[tokio::test]
    async fn retry_heal_runs_under_the_caller_and_skips_the_in_flight_index() {
        let routes = RouteTable::new();
        let fake = Arc::new(FakeInspector::new(Duration::from_millis(10), running_with_ips));
        let calls = fake.calls.clone();
        let inspector: Arc<dyn Inspector> = fake;
        let healer = RouteHealer::new(routes.clone(), Some(inspector), "home.arpa".to_string(), 4200, Duration::from_secs(5), true);

        let target = healer.retry_heal("api-key.home.arpa").await.unwrap();
        assert_eq!(target, "http://172.17.0.7:4200");
        assert_eq!(routes.lookup("api-key.home.arpa"), Some("http://172.17.0.7:4200".to_string()));
        // No in-flight bookkeeping for a retry: it never joins the
        // single-flight index in the first place.
        assert!(healer.in_flight.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_heal_is_dropped_when_the_caller_task_is_aborted() {
        let routes = RouteTable::new();
        let fake = Arc::new(FakeInspector::new(Duration::from_millis(80), running_with_ips));
        let calls = fake.calls.clone();
        let inspector: Arc<dyn Inspector> = fake;
        let healer = RouteHealer::new(routes.clone(), Some(inspector), "home.arpa".to_string(), 4200, Duration::from_secs(5), true);

        let caller = tokio::spawn({
            let healer = healer.clone();
            async move { healer.retry_heal("api-key.home.arpa").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();
        tokio::time::sleep(Duration::from_millis(120)).await;

        // Unlike the coalesced heal body, the retry was tied to the
        // aborted caller's own task and never ran to completion.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(routes.lookup("api-key.home.arpa").is_none());
    }

    #[tokio::test]
    async fn panicking_inspector_still_frees_the_in_flight_slot() {
        let routes = RouteTable::new();
        let inspector: Arc<dyn Inspector> = Arc::new(FakeInspector::panicking(Duration::from_millis(0)));
        let healer = RouteHealer::new(routes, Some(inspector), "home.arpa".to_string(), 4200, Duration::from_secs(1), true);

        let err = healer.heal("api-key.home.arpa").await.unwrap_err();
        assert!(matches!(err, HealError::AutoHealUnavailable(_)));
        assert!(healer.in_flight.is_empty());

        // A subsequent heal on the same host must be accepted rather
        // than hang waiting on a stale in-flight record.
        let err2 = healer.heal("api-key.home.arpa").await.unwrap_err();
        assert!(matches!(err2, HealError::AutoHealUnavailable(_)));
    }
}
