//! Routing table (§4.D). Grounded directly on `original_source/neo4j/routing.py`'s
//! `RoutingTable`/`OrderedSet` (`is_fresh`, `update`, `parse_routing_info`), reimplemented with
//! `indexmap` in place of the Python `OrderedDict`-backed set.

use std::time::{Duration, Instant};

use crate::address::Address;
use crate::error::{GraphWireError, Result};
use crate::packstream::Value;
use crate::routing::OrderedSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Route,
    Read,
    Write,
}

impl ServerRole {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ROUTE" => Some(ServerRole::Route),
            "READ" => Some(ServerRole::Read),
            "WRITE" => Some(ServerRole::Write),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    pub routers: OrderedSet<Address>,
    pub readers: OrderedSet<Address>,
    pub writers: OrderedSet<Address>,
    pub last_updated_at: Instant,
    pub ttl: Duration,
    /// Seeded at construction, persisted across `update` for bootstrap fallback (§4.F step 4).
    pub initial_routers: Vec<Address>,
    /// `db` the server returned alongside this table, if any (§4.F "home-database resolution").
    pub database: Option<String>,
}

impl RoutingTable {
    pub fn new(initial_routers: Vec<Address>) -> Self {
        Self {
            routers: OrderedSet::from_iter(initial_routers.iter().cloned()),
            readers: OrderedSet::new(),
            writers: OrderedSet::new(),
            last_updated_at: Instant::now(),
            ttl: Duration::ZERO,
            initial_routers,
            database: None,
        }
    }

    /// `is_fresh(readonly)` per invariant 6: within TTL, at least one router, and at least one
    /// server of the role the caller needs.
    pub fn is_fresh(&self, readonly: bool) -> bool {
        let not_expired = Instant::now() < self.last_updated_at + self.ttl;
        let has_routers = !self.routers.is_empty();
        let has_server_for_mode = if readonly {
            !self.readers.is_empty()
        } else {
            !self.writers.is_empty()
        };
        not_expired && has_routers && has_server_for_mode
    }

    pub fn should_be_purged(&self, purge_delay: Duration) -> bool {
        Instant::now() > self.last_updated_at + self.ttl + purge_delay
    }

    /// Replaces routers/readers/writers in-place and refreshes the timestamp (§4.D).
    pub fn update(&mut self, new_table: RoutingTable) {
        self.routers.replace(new_table.routers.iter().cloned());
        self.readers.replace(new_table.readers.iter().cloned());
        self.writers.replace(new_table.writers.iter().cloned());
        self.ttl = new_table.ttl;
        self.database = new_table.database.or_else(|| self.database.clone());
        self.last_updated_at = Instant::now();
    }

    /// All addresses currently named by any role, used to decide which pool entries survive a
    /// refresh (§4.F step 5).
    pub fn all_servers(&self) -> Vec<Address> {
        let mut all: Vec<Address> = Vec::new();
        for addr in self.routers.iter().chain(self.readers.iter()).chain(self.writers.iter()) {
            if !all.contains(addr) {
                all.push(addr.clone());
            }
        }
        all
    }

    /// Parses a `ROUTE` success payload: `{servers: [{role, addresses}], ttl, db?}` (§4.C, §4.D).
    /// Preserves server order within each role.
    pub fn parse_routing_info(value: &Value, initial_routers: Vec<Address>) -> Result<RoutingTable> {
        let map = value
            .as_map()
            .ok_or_else(|| GraphWireError::Protocol("routing info is not a map".to_string()))?;

        let servers = map
            .get("servers")
            .and_then(Value::as_list)
            .ok_or_else(|| GraphWireError::Protocol("routing info missing 'servers' list".to_string()))?;

        let mut table = RoutingTable::new(initial_routers);
        table.routers = OrderedSet::new();

        for server in servers {
            let server_map = server
                .as_map()
                .ok_or_else(|| GraphWireError::Protocol("routing server entry is not a map".to_string()))?;
            let role_str = server_map
                .get("role")
                .and_then(Value::as_str)
                .ok_or_else(|| GraphWireError::Protocol("routing server entry missing 'role'".to_string()))?;
            let role = ServerRole::parse(role_str)
                .ok_or_else(|| GraphWireError::Protocol(format!("unknown server role '{role_str}'")))?;
            let addresses = server_map
                .get("addresses")
                .and_then(Value::as_list)
                .ok_or_else(|| GraphWireError::Protocol("routing server entry missing 'addresses'".to_string()))?;
            for addr_value in addresses {
                let addr_str = addr_value
                    .as_str()
                    .ok_or_else(|| GraphWireError::Protocol("routing address is not a string".to_string()))?;
                let address = parse_host_port(addr_str)?;
                match role {
                    ServerRole::Route => {
                        table.routers.insert(address);
                    }
                    ServerRole::Read => {
                        table.readers.insert(address);
                    }
                    ServerRole::Write => {
                        table.writers.insert(address);
                    }
                }
            }
        }

        let ttl_seconds = map
            .get("ttl")
            .and_then(Value::as_int)
            .ok_or_else(|| GraphWireError::Protocol("routing info missing 'ttl'".to_string()))?;
        table.ttl = Duration::from_secs(ttl_seconds.max(0) as u64);
        table.database = map.get("db").and_then(Value::as_str).map(str::to_string);

        Ok(table)
    }
}

fn parse_host_port(s: &str) -> Result<Address> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| GraphWireError::Protocol(format!("routing address '{s}' missing port")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| GraphWireError::Protocol(format!("routing address '{s}' has invalid port")))?;
    Ok(Address::new(host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn servers_value(entries: &[(&str, &[&str])], ttl: i64) -> Value {
        let mut map = IndexMap::new();
        let servers: Vec<Value> = entries
            .iter()
            .map(|(role, addrs)| {
                let mut m = IndexMap::new();
                m.insert("role".to_string(), Value::String(role.to_string()));
                m.insert(
                    "addresses".to_string(),
                    Value::List(addrs.iter().map(|a| Value::String(a.to_string())).collect()),
                );
                Value::Map(m)
            })
            .collect();
        map.insert("servers".to_string(), Value::List(servers));
        map.insert("ttl".to_string(), Value::Int(ttl));
        Value::Map(map)
    }

    #[test]
    fn parse_preserves_server_order_per_role() {
        let value = servers_value(
            &[
                ("ROUTE", &["r1:7687", "r2:7687"]),
                ("READ", &["a:7687", "b:7687", "c:7687"]),
                ("WRITE", &["w1:7687"]),
            ],
            300,
        );
        let table = RoutingTable::parse_routing_info(&value, vec![]).unwrap();
        let readers: Vec<_> = table.readers.iter().map(|a| a.host.clone()).collect();
        assert_eq!(readers, vec!["a", "b", "c"]);
        assert_eq!(table.ttl, Duration::from_secs(300));
    }

    #[test]
    fn fresh_requires_routers_and_role_specific_servers() {
        let mut table = RoutingTable::new(vec![]);
        table.ttl = Duration::from_secs(300);
        assert!(!table.is_fresh(true)); // no routers yet
        table.routers.insert(Address::new("r1", 7687));
        assert!(!table.is_fresh(true)); // no readers
        table.readers.insert(Address::new("a", 7687));
        assert!(table.is_fresh(true));
        assert!(!table.is_fresh(false)); // no writers
    }

    #[test]
    fn update_replaces_all_three_sets_and_bumps_timestamp() {
        let mut table = RoutingTable::new(vec![Address::new("seed", 7687)]);
        table.ttl = Duration::from_secs(1);
        let before = table.last_updated_at;

        std::thread::sleep(Duration::from_millis(5));
        let mut new_table = RoutingTable::new(vec![]);
        new_table.routers.insert(Address::new("r2", 7687));
        new_table.readers.insert(Address::new("a2", 7687));
        new_table.writers.insert(Address::new("w2", 7687));
        new_table.ttl = Duration::from_secs(42);

        table.update(new_table);
        assert!(table.last_updated_at > before);
        assert_eq!(table.routers.len(), 1);
        assert_eq!(table.readers.len(), 1);
        assert_eq!(table.writers.len(), 1);
        assert_eq!(table.ttl, Duration::from_secs(42));
    }

    #[test]
    fn should_be_purged_after_ttl_plus_purge_delay() {
        let mut table = RoutingTable::new(vec![]);
        table.ttl = Duration::from_millis(5);
        assert!(!table.should_be_purged(Duration::from_secs(30)));
    }
}
