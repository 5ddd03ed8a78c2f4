//! In-memory store of the last successfully applied snapshot.
//!
//! Guarded by a single read-write lock. Every accessor returns an
//! independent copy, so readers never iterate shared maps while the
//! state loop swaps them, and no lock is held across I/O anywhere.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use relay_core::{ClientSpec, Keyed, RouteRule};

/// Version value meaning "nothing applied yet", so the first fetched
/// snapshot always registers as changed, whatever version it carries.
pub const VERSION_UNSET: i64 = -1;

#[derive(Debug)]
struct Snapshot {
    version: i64,
    clients: HashMap<String, ClientSpec>,
    routes: HashMap<String, RouteRule>,
}

/// Concurrency-safe record of the last applied desired state.
///
/// Mutated only by the state loop, and only after a successful (or
/// no-op) apply; a failed apply leaves it untouched so the next cycle
/// recomputes the same pending diff.
pub struct StateStore {
    inner: RwLock<Snapshot>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Snapshot {
                version: VERSION_UNSET,
                clients: HashMap::new(),
                routes: HashMap::new(),
            }),
        }
    }

    /// True iff `version` matches the stored one and both entity sets
    /// are field-identical to the stored snapshot, in any order.
    pub async fn is_unchanged(
        &self,
        version: i64,
        clients: &[ClientSpec],
        routes: &[RouteRule],
    ) -> bool {
        let inner = self.inner.read().await;
        if version != inner.version {
            return false;
        }
        set_matches(&inner.clients, clients) && set_matches(&inner.routes, routes)
    }

    /// Replace the stored snapshot wholesale. The maps are built before
    /// the write lock is taken, so readers are blocked only for the
    /// pointer swap.
    pub async fn update(&self, version: i64, clients: &[ClientSpec], routes: &[RouteRule]) {
        let clients_map: HashMap<String, ClientSpec> = clients
            .iter()
            .map(|c| (c.email.clone(), c.clone()))
            .collect();
        let routes_map: HashMap<String, RouteRule> =
            routes.iter().map(|r| (r.tag.clone(), r.clone())).collect();

        let mut inner = self.inner.write().await;
        inner.version = version;
        inner.clients = clients_map;
        inner.routes = routes_map;
        debug!(
            version,
            clients = inner.clients.len(),
            routes = inner.routes.len(),
            "snapshot stored"
        );
    }

    /// Copy of the stored clients, keyed by email.
    pub async fn clients_snapshot(&self) -> HashMap<String, ClientSpec> {
        self.inner.read().await.clients.clone()
    }

    /// Copy of the stored routes, keyed by tag.
    pub async fn routes_snapshot(&self) -> HashMap<String, RouteRule> {
        self.inner.read().await.routes.clone()
    }

    /// Emails of all stored clients, in no particular order.
    pub async fn emails(&self) -> Vec<String> {
        self.inner.read().await.clients.keys().cloned().collect()
    }

    pub async fn version(&self) -> i64 {
        self.inner.read().await.version
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Order-independent set equality by identity key and full field
/// equality. List-valued fields inside an entity stay order-sensitive
/// through `PartialEq`.
fn set_matches<T: Keyed + PartialEq>(stored: &HashMap<String, T>, desired: &[T]) -> bool {
    if stored.len() != desired.len() {
        return false;
    }
    desired
        .iter()
        .all(|want| stored.get(want.key()).is_some_and(|cur| cur == want))
}
