//! The routed pool (§4.F): layers a routing table per database on top of one address-keyed
//! `ConnectionPool`, refreshing via the dedicated `ROUTE` message and selecting addresses by
//! role and load. No teacher counterpart (ClickHouse has no routing concept) — grounded on
//! `original_source/neo4j/routing.py`'s `RoutingTable`/driver-refresh shape, expressed in the
//! teacher's async-mutex-guarded-map style.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, warn};
use rand::seq::IteratorRandom;
use tokio::sync::Mutex as AsyncMutex;

use crate::address::Address;
use crate::collaborators::Resolver;
use crate::config::RoutingConfig;
use crate::error::{ErrorClassification, GraphWireError, Result};
use crate::packstream::Value;
use crate::pool::ConnectionPool;
use crate::protocol::{AccessMode, RequestBody};
use crate::routing::RoutingTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSelection {
    Read,
    Write,
}

impl From<AccessMode> for AccessSelection {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Read => AccessSelection::Read,
            AccessMode::Write => AccessSelection::Write,
        }
    }
}

/// Per-database routing tables plus the single underlying pool they select addresses from
/// (§3 "Pool maps resolved address -> deque of Connection"; routing tables name unresolved
/// addresses, resolved lazily by the injected `Resolver`).
pub struct RoutedPool {
    pool: Arc<ConnectionPool>,
    resolver: Arc<dyn Resolver>,
    config: RoutingConfig,
    initial_routers: Vec<Address>,
    default_database: Option<String>,
    tables: AsyncMutex<HashMap<String, RoutingTable>>,
}

impl RoutedPool {
    pub fn new(
        pool: Arc<ConnectionPool>,
        resolver: Arc<dyn Resolver>,
        config: RoutingConfig,
        initial_routers: Vec<Address>,
        default_database: Option<String>,
    ) -> Self {
        Self {
            pool,
            resolver,
            config,
            initial_routers,
            default_database,
            tables: AsyncMutex::new(HashMap::new()),
        }
    }

    fn table_key(&self, database: Option<&str>) -> String {
        database
            .map(str::to_string)
            .or_else(|| self.default_database.clone())
            .unwrap_or_default()
    }

    /// §4.F `ensure_fresh`: fast path under no lock, re-check under the refresh lock, then try
    /// routers in the order step 4 specifies.
    pub async fn ensure_fresh(
        &self,
        database: Option<&str>,
        mode: AccessSelection,
        bookmarks: &[String],
        deadline: Instant,
    ) -> Result<()> {
        let key = self.table_key(database);
        {
            let tables = self.tables.lock().await;
            if tables.get(&key).is_some_and(|t| t.is_fresh(mode == AccessSelection::Read)) {
                return Ok(());
            }
        }

        let mut tables = self.tables.lock().await;
        if tables.get(&key).is_some_and(|t| t.is_fresh(mode == AccessSelection::Read)) {
            return Ok(());
        }

        for router in self.router_attempt_order(&tables, &key) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.fetch_routing_table(&router, database, bookmarks, remaining).await {
                Ok(new_table) if new_table.routers.is_empty() || new_table.readers.is_empty() => {
                    debug!("discarding routing table from {router}: missing routers or readers");
                }
                Ok(new_table) => {
                    let entry = tables
                        .entry(key.clone())
                        .or_insert_with(|| RoutingTable::new(self.initial_routers.clone()));
                    entry.update(new_table);
                    self.purge_stale(&mut tables);
                    return Ok(());
                }
                Err(e) if is_discovery_fatal(&e) => return Err(e),
                Err(e) => {
                    warn!("routing table fetch from {router} failed: {e}");
                    if let Ok(resolved) = self.resolver.resolve(&router).await {
                        for addr in resolved {
                            self.pool.deactivate(&addr).await;
                        }
                    }
                }
            }
        }

        Err(GraphWireError::ServiceUnavailable(format!(
            "unable to refresh routing table for database {key:?}"
        )))
    }

    /// §4.F step 4: (a) the initial router if the current table has no writers, (b) existing
    /// routers minus the initial one, (c) the initial router as last resort.
    fn router_attempt_order(&self, tables: &HashMap<String, RoutingTable>, key: &str) -> Vec<Address> {
        let mut order = Vec::new();
        let current = tables.get(key);
        let has_writers = current.is_some_and(|t| !t.writers.is_empty());
        if !has_writers {
            order.extend(self.initial_routers.iter().cloned());
        }
        if let Some(table) = current {
            for router in table.routers.iter() {
                if !order.contains(router) && !self.initial_routers.contains(router) {
                    order.push(router.clone());
                }
            }
        }
        for router in &self.initial_routers {
            if !order.contains(router) {
                order.push(router.clone());
            }
        }
        order
    }

    fn purge_stale(&self, tables: &mut HashMap<String, RoutingTable>) {
        let default_key = self.default_database.clone().unwrap_or_default();
        tables.retain(|k, t| k == &default_key || !t.should_be_purged(self.config.routing_table_purge_delay));
    }

    async fn fetch_routing_table(
        &self,
        router: &Address,
        database: Option<&str>,
        bookmarks: &[String],
        timeout: Duration,
    ) -> Result<RoutingTable> {
        tokio::time::timeout(timeout, self.fetch_routing_table_inner(router, database, bookmarks))
            .await
            .map_err(|_| GraphWireError::Timeout(format!("fetching routing table from {router}")))?
    }

    async fn fetch_routing_table_inner(
        &self,
        router: &Address,
        database: Option<&str>,
        bookmarks: &[String],
    ) -> Result<RoutingTable> {
        let resolved = self
            .resolver
            .resolve(router)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GraphWireError::ServiceUnavailable(format!("no address for router {router}")))?;
        let mut connection = self.pool.acquire(router.clone(), resolved.clone()).await?;

        if !connection.protocol_version.supports_route_message() {
            self.pool.release(resolved, connection).await;
            return Err(GraphWireError::Protocol(
                "server predates the ROUTE message; pre-4.3 procedure-call discovery is not implemented".to_string(),
            ));
        }

        let mut db_ctx = IndexMap::new();
        if let Some(db) = database {
            db_ctx.insert("db".to_string(), Value::String(db.to_string()));
        }
        let result = connection
            .request(RequestBody::route(IndexMap::new(), bookmarks.to_vec(), db_ctx))
            .await;
        self.pool.release(resolved, connection).await;

        let meta = result?;
        let rt = meta
            .get("rt")
            .ok_or_else(|| GraphWireError::Protocol("ROUTE success missing 'rt'".to_string()))?;
        RoutingTable::parse_routing_info(rt, self.initial_routers.clone())
    }

    /// §4.F address selection: fewest in-use connections among the candidate role, ties broken
    /// at random.
    pub async fn select_address(&self, database: Option<&str>, mode: AccessSelection) -> Result<Address> {
        let key = self.table_key(database);
        let candidates: Vec<Address> = {
            let tables = self.tables.lock().await;
            let table = tables
                .get(&key)
                .ok_or_else(|| GraphWireError::SessionExpired("no routing table for database".to_string()))?;
            match mode {
                AccessSelection::Read => table.readers.iter().cloned().collect(),
                AccessSelection::Write => table.writers.iter().cloned().collect(),
            }
        };
        if candidates.is_empty() {
            return Err(GraphWireError::SessionExpired(format!(
                "no {mode:?} servers available for database {key:?}"
            )));
        }

        let mut loads = Vec::with_capacity(candidates.len());
        for addr in &candidates {
            let resolved = self.resolver.resolve(addr).await?.into_iter().next();
            let count = match resolved {
                Some(r) => self.pool.in_use_count(&r).await,
                None => 0,
            };
            loads.push(count);
        }
        let min_load = *loads.iter().min().expect("candidates is non-empty");
        let tied = candidates.iter().zip(loads.iter()).filter(|(_, &load)| load == min_load).map(|(a, _)| a);
        Ok(tied.choose(&mut rand::rng()).expect("at least one tied candidate").clone())
    }

    /// The `db` the server returned for the home-database resolution (§4.F), if a refresh has
    /// happened and the server supplied one.
    pub async fn resolved_database(&self, database: Option<&str>) -> Option<String> {
        let key = self.table_key(database);
        self.tables.lock().await.get(&key)?.database.clone()
    }

    /// The single per-address pool every role's addresses are drawn from, exposed so a `Session`
    /// can acquire/release connections once it has picked an address.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// §4.F `on_write_failure`: removes `address` from every database's writer set after a
    /// `NotALeader`/`ForbiddenOnReadOnlyDatabase` response, so the next write picks a different
    /// server without waiting for the table to expire. Mirrors `original_source`'s
    /// `AsyncNeo4jPool.on_write_failure`, which also sweeps every database rather than just the
    /// one the failing write targeted.
    pub async fn remove_writer(&self, address: &Address) {
        debug!("removing {address} from the writer set after a leader-switch error");
        let mut tables = self.tables.lock().await;
        for table in tables.values_mut() {
            table.writers.remove(address);
        }
    }
}

fn is_discovery_fatal(error: &GraphWireError) -> bool {
    matches!(error, GraphWireError::Server(e) if matches!(e.classification(), ErrorClassification::ClientError))
}
