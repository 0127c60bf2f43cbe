//! The per-address connection pool (§4.E). Grounded on the teacher's connection-lifecycle shape
//! (open lazily, hand out exclusively, return on release) generalized from klickhouse's
//! single-connection `Client` to a pool keyed by `ResolvedAddress`, with the async
//! mutex + condition-variable pattern the design notes call for (§9 "re-entrant locks";
//! `tokio::sync::Notify` stands in for the condition variable, decided in DESIGN.md).

mod routed;

pub use routed::{AccessSelection, RoutedPool};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::address::{Address, ResolvedAddress};
use crate::collaborators::AuthManager;
use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::error::{GraphWireError, Result};
use crate::packstream::Value;
use indexmap::IndexMap;

/// Any duplex byte stream a `Connection` can be built over — a real `TcpStream`, a TLS stream,
/// or (in tests) one end of `tokio::io::duplex`.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type PoolConnection = Connection<Box<dyn AsyncStream>>;

/// Opens the transport-level stream for a resolved address. The injectable seam that lets tests
/// substitute an in-memory duplex pair for a real socket.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &ResolvedAddress, timeout: Duration) -> Result<Box<dyn AsyncStream>>;
}

pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &ResolvedAddress, timeout: Duration) -> Result<Box<dyn AsyncStream>> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address.socket_addr()))
            .await
            .map_err(|_| GraphWireError::Timeout(format!("connecting to {address}")))?
            .map_err(|e| GraphWireError::ServiceUnavailable(format!("connecting to {address}: {e}")))?;
        Ok(Box::new(stream))
    }
}

/// An idle connection sitting in the deque. Once handed out by `acquire`, a connection is no
/// longer represented here — it lives in `PoolState::checked_out` instead, see below.
struct Entry {
    connection: PoolConnection,
    idle_since: Instant,
}

struct PoolState {
    closed: bool,
    connections: HashMap<ResolvedAddress, VecDeque<Entry>>,
    /// Connections currently being dialed for an address, counted against
    /// `max_connection_pool_size` so concurrent acquirers can't both see spare capacity and
    /// both open a connection past the limit.
    reserved: HashMap<ResolvedAddress, usize>,
    /// One stale-flag clone per connection currently checked out to an address. This is the
    /// pool's only record of an in-use connection — `acquire` hands the connection out by value,
    /// so this list (not an idle deque entry) is what keeps it counted against
    /// `max_connection_pool_size` and what `in_use_count`/`deactivate` operate on.
    checked_out: HashMap<ResolvedAddress, Vec<Arc<AtomicBool>>>,
}

/// A per-address pool of connections (§4.E). One instance typically backs one `bolt://` driver;
/// `RoutedPool` layers several addresses and a routing table on top of one of these per role.
pub struct ConnectionPool {
    config: PoolConfig,
    auth: Arc<dyn AuthManager>,
    connector: Arc<dyn Connector>,
    routing_context: Option<IndexMap<String, Value>>,
    state: AsyncMutex<PoolState>,
    notify: Notify,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, auth: Arc<dyn AuthManager>, connector: Arc<dyn Connector>) -> Arc<Self> {
        Self::with_routing_context(config, auth, connector, None)
    }

    pub fn with_routing_context(
        config: PoolConfig,
        auth: Arc<dyn AuthManager>,
        connector: Arc<dyn Connector>,
        routing_context: Option<IndexMap<String, Value>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            auth,
            connector,
            routing_context,
            state: AsyncMutex::new(PoolState {
                closed: false,
                connections: HashMap::new(),
                reserved: HashMap::new(),
                checked_out: HashMap::new(),
            }),
            notify: Notify::new(),
        })
    }

    /// §4.E acquire algorithm: reuse an idle connection, open a fresh one under capacity, or wait
    /// for a release, bounded by `connection_acquisition_timeout`.
    pub async fn acquire(
        self: &Arc<Self>,
        unresolved: Address,
        address: ResolvedAddress,
    ) -> Result<PoolConnection> {
        let deadline = Instant::now() + self.config.connection_acquisition_timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(GraphWireError::ServiceUnavailable("pool is closed".to_string()));
                }
                let deque = state.connections.entry(address.clone()).or_default();
                prune(deque, self.config.max_connection_lifetime);

                if let Some(entry) = deque.pop_front() {
                    let needs_liveness_check = self
                        .config
                        .liveness_check_timeout
                        .is_some_and(|timeout| entry.idle_since.elapsed() >= timeout);
                    drop(state);

                    let mut entry = entry;
                    if needs_liveness_check && entry.connection.reset().await.is_err() {
                        trace!("liveness check failed for {address}, discarding connection");
                        continue;
                    }

                    let mut state = self.state.lock().await;
                    state
                        .checked_out
                        .entry(address.clone())
                        .or_default()
                        .push(entry.connection.stale_flag());
                    drop(state);
                    return Ok(entry.connection);
                }

                let reserved = *state.reserved.get(&address).unwrap_or(&0);
                let deque_len = state.connections.get(&address).map_or(0, VecDeque::len);
                let checked_out = state.checked_out.get(&address).map_or(0, Vec::len);
                let at_capacity = self
                    .config
                    .max_connection_pool_size
                    .is_some_and(|max| deque_len + reserved + checked_out >= max);
                if !at_capacity {
                    // Reserve the slot before releasing the lock so a concurrent acquirer can't
                    // also see spare capacity and both dial past `max_connection_pool_size`.
                    *state.reserved.entry(address.clone()).or_insert(0) += 1;
                    drop(state);

                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let connect_timeout = self.config.connection_timeout.min(remaining);
                    let open_result = self.open_one(&unresolved, &address, connect_timeout).await;

                    let mut state = self.state.lock().await;
                    if let Some(count) = state.reserved.get_mut(&address) {
                        *count = count.saturating_sub(1);
                    }
                    if let Ok(connection) = &open_result {
                        state
                            .checked_out
                            .entry(address.clone())
                            .or_default()
                            .push(connection.stale_flag());
                    }
                    drop(state);

                    return match open_result {
                        Ok(connection) => Ok(connection),
                        Err(e) => {
                            self.deactivate(&address).await;
                            Err(e)
                        }
                    };
                }
            }

            if Instant::now() >= deadline {
                return Err(GraphWireError::Timeout(format!("acquiring connection to {address}")));
            }
            let wait = deadline.saturating_duration_since(Instant::now());
            let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        }
    }

    async fn open_one(&self, unresolved: &Address, address: &ResolvedAddress, timeout: Duration) -> Result<PoolConnection> {
        let stream = self.connector.connect(address, timeout).await?;
        Connection::open(
            stream,
            unresolved.clone(),
            address.clone(),
            &self.config,
            self.auth.as_ref(),
            self.routing_context.clone(),
        )
        .await
    }

    /// §4.E release: drops this connection from `checked_out` first (it's no longer anyone's
    /// outstanding checkout either way), then `RESET`s a failed one before returning it to the
    /// idle deque; discards on reset failure, if the connection is already defunct, or if
    /// `deactivate` marked it stale while it was checked out.
    pub async fn release(&self, address: ResolvedAddress, mut connection: PoolConnection) {
        let mut state = self.state.lock().await;
        if let Some(outstanding) = state.checked_out.get_mut(&address) {
            if let Some(pos) = outstanding.iter().position(|flag| Arc::ptr_eq(flag, &connection.stale_flag())) {
                outstanding.remove(pos);
            }
        }

        if connection.defunct || connection.is_stale() {
            drop(state);
            self.notify.notify_one();
            return;
        }
        if connection.is_failed() {
            drop(state);
            if let Err(e) = connection.reset().await {
                warn!("reset on release failed for {address}, discarding connection: {e}");
                self.notify.notify_one();
                return;
            }
            state = self.state.lock().await;
        }

        if state.closed {
            drop(state);
            self.notify.notify_one();
            return;
        }
        let deque = state.connections.entry(address).or_default();
        deque.push_back(Entry {
            connection,
            idle_since: Instant::now(),
        });
        drop(state);
        self.notify.notify_one();
    }

    /// §4.E `Deactivate(A)`: drop idle connections to `A` now; mark currently checked-out ones
    /// stale so `release` discards them instead of returning them to the idle deque.
    pub async fn deactivate(&self, address: &ResolvedAddress) {
        debug!("deactivating pool entries for {address}");
        let mut state = self.state.lock().await;
        state.connections.remove(address);
        if let Some(outstanding) = state.checked_out.get(address) {
            for flag in outstanding {
                flag.store(true, Ordering::Release);
            }
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// §4.E `Close(pool)`: idle connections are dropped now; in-use ones close on release since
    /// `release` checks `closed` before reinserting.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.connections.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    /// Connections of `address` currently checked out of the pool (§4.F address-load selection).
    pub async fn in_use_count(&self, address: &ResolvedAddress) -> usize {
        let state = self.state.lock().await;
        state.checked_out.get(address).map_or(0, Vec::len)
    }
}

fn prune(deque: &mut VecDeque<Entry>, max_lifetime: Option<Duration>) {
    deque.retain(|e| {
        if e.connection.defunct {
            return false;
        }
        if let Some(max_lifetime) = max_lifetime {
            if e.connection.created_at.elapsed() > max_lifetime {
                return false;
            }
        }
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{AuthManager, AuthToken, StaticAuthManager};
    use crate::framing;
    use crate::packstream::{Decoder, Encoder, Structure, Value as PsValue};
    use crate::protocol::tag;
    use std::net::IpAddr;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn resolved() -> ResolvedAddress {
        ResolvedAddress::new("localhost", IpAddr::from([127, 0, 0, 1]), 7687)
    }

    /// Counts every dial attempt and answers just enough of the handshake/`HELLO` exchange for
    /// `Connection::open` to reach `Ready`, then keeps the stream open until dropped.
    struct CountingConnector {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, _address: &ResolvedAddress, _timeout: Duration) -> Result<Box<dyn AsyncStream>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (client_io, mut server_io) = tokio::io::duplex(4096);
            tokio::spawn(async move {
                let mut handshake = [0u8; 20];
                if server_io.read_exact(&mut handshake).await.is_err() {
                    return;
                }
                if server_io.write_all(&[0x00, 0x00, 0x00, 0x05]).await.is_err() {
                    return;
                }
                let Ok(Some(hello)) = framing::read_message(&mut server_io).await else {
                    return;
                };
                let _ = Decoder::new(&hello).read_value();
                let success = Structure::new(tag::SUCCESS, vec![PsValue::Map(IndexMap::new())]);
                let encoded = Encoder::encode(&PsValue::Structure(success)).unwrap();
                if framing::write_message(&mut server_io, &encoded).await.is_err() {
                    return;
                }
                // Hold the stream open for as long as the test keeps the connection checked out.
                let mut discard = [0u8; 1];
                let _ = server_io.read(&mut discard).await;
            });
            Ok(Box::new(client_io))
        }
    }

    fn test_pool(max_connection_pool_size: usize) -> (Arc<ConnectionPool>, Arc<CountingConnector>) {
        let auth: Arc<dyn AuthManager> = Arc::new(StaticAuthManager(AuthToken(IndexMap::new())));
        let connector = Arc::new(CountingConnector { opened: AtomicUsize::new(0) });
        let config = PoolConfig {
            max_connection_pool_size: Some(max_connection_pool_size),
            connection_acquisition_timeout: Duration::from_millis(200),
            ..PoolConfig::default()
        };
        (ConnectionPool::new(config, auth, connector.clone()), connector)
    }

    /// Regression test for the checkout-tracking gap: with capacity 1, a second `acquire` while
    /// the first connection is still out must block (and time out) rather than dial a second
    /// connection (§8 Pool "in-use count never exceeds k").
    #[tokio::test]
    async fn acquire_blocks_instead_of_exceeding_capacity() {
        let (pool, connector) = test_pool(1);
        let unresolved = Address::new("localhost", 7687);
        let address = resolved();

        let first = pool.acquire(unresolved.clone(), address.clone()).await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.in_use_count(&address).await, 1);

        let second = pool.acquire(unresolved.clone(), address.clone()).await;
        assert!(matches!(second, Err(GraphWireError::Timeout(_))));
        assert_eq!(
            connector.opened.load(Ordering::SeqCst),
            1,
            "capacity of 1 must not open a second connection while the first is checked out"
        );

        pool.release(address.clone(), first).await;
        assert_eq!(pool.in_use_count(&address).await, 0);

        let third = pool.acquire(unresolved, address.clone()).await.unwrap();
        assert_eq!(
            connector.opened.load(Ordering::SeqCst),
            1,
            "the released connection should be reused rather than redialed"
        );
        pool.release(address, third).await;
    }

    /// `deactivate` on a connection that's currently checked out must not be lost: the connection
    /// should be dropped at `release` instead of returning to the idle deque (§4.E `Deactivate`).
    #[tokio::test]
    async fn deactivate_marks_a_checked_out_connection_for_disposal() {
        let (pool, connector) = test_pool(5);
        let unresolved = Address::new("localhost", 7687);
        let address = resolved();

        let connection = pool.acquire(unresolved.clone(), address.clone()).await.unwrap();
        assert_eq!(pool.in_use_count(&address).await, 1);

        pool.deactivate(&address).await;
        pool.release(address.clone(), connection).await;

        let next = pool.acquire(unresolved, address.clone()).await.unwrap();
        assert_eq!(
            connector.opened.load(Ordering::SeqCst),
            2,
            "a deactivated in-use connection must be redialed, not reused"
        );
        pool.release(address, next).await;
    }
}
