use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A single host-to-upstream mapping, as exposed over the admin API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    pub host: String,
    pub target: String,
}

/// The concurrent host -> upstream-URL map. Reads are lock-free via
/// `dashmap`'s sharded locking; `list` returns an independent snapshot.
#[derive(Clone, Default)]
pub struct RouteTable {
    inner: Arc<DashMap<String, String>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self { inner: Arc::new(DashMap::new()) }
    }

    /// Overwrites any existing entry for `host`.
    pub fn set(&self, host: String, target: String) {
        self.inner.insert(host, target);
    }

    /// Removes the entry for `host`, returning whether one was present.
    pub fn delete(&self, host: &str) -> bool {
        self.inner.remove(host).is_some()
    }

    /// A snapshot of all routes, sorted ascending by host.
    pub fn list(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self
            .inner
            .iter()
            .map(|entry| Route { host: entry.key().clone(), target: entry.value().clone() })
            .collect();
        routes.sort_by(|a, b| a.host.cmp(&b.host));
        routes
    }

    pub fn lookup(&self, host: &str) -> Option<String> {
        self.inner.get(host).map(|v| v.clone())
    }
}
