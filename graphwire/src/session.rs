//! Sessions (§4.G). Grounded on `original_source/neo4j/_sync/work/session.py`'s `Session` and
//! `workspace.py`'s `Workspace`: bookmark propagation, per-call connection acquisition by access
//! mode and database, and the managed-transaction retry loop (`_run_transaction`), whose
//! "the timer starts only after the first failed attempt" detail this keeps verbatim.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::address::{Address, ResolvedAddress};
use crate::bookmarks::Bookmarks;
use crate::collaborators::{BookmarkManager, Resolver};
use crate::config::{RetryConfig, SessionConfig};
use crate::error::{GraphWireError, Result};
use crate::packstream::Value;
use crate::pool::{AccessSelection, ConnectionPool, PoolConnection, RoutedPool};
use crate::protocol::{AccessMode, RequestBody};
use crate::record::Record;
use crate::result::{RecordStream, Summary};
use crate::retry;
use crate::transaction::Transaction;

/// What a session draws connections from: one fixed address (`bolt://`), or a routing table kept
/// fresh per database (`neo4j://`). No URI parsing lives here (§1 Non-goals) — a caller builds
/// whichever variant its scheme calls for.
pub enum Backend {
    Direct { pool: Arc<ConnectionPool>, address: Address },
    Routed(Arc<RoutedPool>),
}

/// A unit of work against one database, opened lazily on first use and closed explicitly (§4.G).
/// Holds no connection itself between calls — `run`/`begin_transaction` each acquire a dedicated
/// one from the pool, mirroring `Transaction`'s ownership rather than `Session` keeping one
/// around for its whole lifetime (an Open Question decision, recorded in DESIGN.md, made to keep
/// the managed-transaction retry closure free of a borrowed-`Session` lifetime).
pub struct Session {
    backend: Backend,
    resolver: Arc<dyn Resolver>,
    config: SessionConfig,
    retry_config: RetryConfig,
    bookmark_manager: Option<Arc<dyn BookmarkManager>>,
    bookmarks: Arc<AsyncMutex<Bookmarks>>,
    resolved_database: Option<String>,
    open_transaction: Arc<AtomicBool>,
    closed: bool,
}

impl Session {
    pub fn new(
        backend: Backend,
        resolver: Arc<dyn Resolver>,
        config: SessionConfig,
        retry_config: RetryConfig,
        bookmark_manager: Option<Arc<dyn BookmarkManager>>,
    ) -> Self {
        let bookmarks = Bookmarks::new(config.bookmarks.clone());
        Self {
            backend,
            resolver,
            config,
            retry_config,
            bookmark_manager,
            bookmarks: Arc::new(AsyncMutex::new(bookmarks)),
            resolved_database: None,
            open_transaction: Arc::new(AtomicBool::new(false)),
            closed: false,
        }
    }

    pub async fn last_bookmarks(&self) -> Vec<String> {
        self.bookmarks.lock().await.raw_values()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(GraphWireError::Session("session is closed".to_string()));
        }
        Ok(())
    }

    /// §4.G "Bookmarks": union of the session's own bookmarks with whatever an external
    /// `BookmarkManager` supplies, recomputed before every transaction/auto-commit query.
    async fn effective_bookmarks(&self) -> Result<Vec<String>> {
        let mut bookmarks = self.bookmarks.lock().await.clone();
        if let Some(manager) = &self.bookmark_manager {
            bookmarks.merge(manager.get_bookmarks().await?);
        }
        Ok(bookmarks.raw_values())
    }

    /// The `BEGIN`/auto-commit-`RUN` extra map (§4.C): bookmarks, database, impersonation and
    /// access mode. Explicit-transaction `RUN`s don't repeat any of this.
    fn tx_extra(&self, bookmarks: &[String], mode: AccessMode) -> IndexMap<String, Value> {
        let mut extra = IndexMap::new();
        if !bookmarks.is_empty() {
            extra.insert(
                "bookmarks".to_string(),
                Value::List(bookmarks.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(db) = self.config.database.as_ref().or(self.resolved_database.as_ref()) {
            extra.insert("db".to_string(), Value::String(db.clone()));
        }
        if let Some(user) = &self.config.impersonated_user {
            extra.insert("imp_user".to_string(), Value::String(user.clone()));
        }
        if mode == AccessMode::Read {
            extra.insert("mode".to_string(), Value::String("r".to_string()));
        }
        extra
    }

    /// §4.F/§4.G "connect": resolve a routing table if routed, pick an address for `mode`, then
    /// acquire a connection to it from the underlying per-address pool. Returns both the
    /// unresolved address (routing table identity) and its resolved form (pool identity), since
    /// a later write failure needs the former to evict a writer and the latter to deactivate a
    /// pool entry.
    async fn acquire_connection(
        &mut self,
        mode: AccessMode,
    ) -> Result<(Arc<ConnectionPool>, Address, ResolvedAddress, PoolConnection)> {
        self.check_open()?;
        let bookmarks = self.effective_bookmarks().await?;
        let deadline = Instant::now() + self.retry_config.max_transaction_retry_time;
        let (pool, address) = match &self.backend {
            Backend::Direct { pool, address } => (pool.clone(), address.clone()),
            Backend::Routed(routed) => {
                let selection: AccessSelection = mode.into();
                routed
                    .ensure_fresh(self.config.database.as_deref(), selection, &bookmarks, deadline)
                    .await?;
                let address = routed.select_address(self.config.database.as_deref(), selection).await?;
                if let Some(db) = routed.resolved_database(self.config.database.as_deref()).await {
                    self.resolved_database = Some(db);
                }
                (routed.pool().clone(), address)
            }
        };
        let resolved = self
            .resolver
            .resolve(&address)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GraphWireError::ServiceUnavailable(format!("no address resolved for {address}")))?;
        let connection = pool.acquire(address.clone(), resolved.clone()).await?;
        Ok((pool, address, resolved, connection))
    }

    /// §4.C "pool-level side effects" of a server failure. A leader switch evicts the writer
    /// from the routing table so the next attempt picks a different server; an expired
    /// authorization token or an unavailable database/server deactivates the address outright
    /// (idle connections close now, the checked-out one closes on release).
    async fn handle_write_failure(&self, error: &GraphWireError, unresolved: &Address, resolved: &ResolvedAddress) {
        let GraphWireError::Server(server_error) = error else {
            return;
        };

        if server_error.is_leader_switch() {
            if let Backend::Routed(routed) = &self.backend {
                routed.remove_writer(unresolved).await;
            }
        } else if server_error.is_authorization_expired() || server_error.is_database_unavailable() {
            let pool = match &self.backend {
                Backend::Direct { pool, .. } => pool.clone(),
                Backend::Routed(routed) => routed.pool().clone(),
            };
            pool.deactivate(resolved).await;
        }
    }

    /// Runs an auto-commit query: one dedicated connection checkout, released once the result is
    /// fully drained or explicitly `consume`d. Any previous `SessionResult` this session produced
    /// should be drained (or `consume`d) before calling this again — each result owns its own
    /// connection, so nothing here buffers an earlier one for you.
    pub async fn run(&mut self, query: &str, parameters: IndexMap<String, Value>) -> Result<SessionResult> {
        self.check_open()?;
        let mode = self.config.default_access_mode;
        let (pool, _unresolved_address, resolved_address, mut connection) = self.acquire_connection(mode).await?;
        let bookmarks = self.effective_bookmarks().await?;
        let extra = self.tx_extra(&bookmarks, mode);
        let stream = RecordStream::run(&mut connection, query, parameters, extra, self.config.fetch_size).await?;
        Ok(SessionResult {
            stream,
            connection: Some(connection),
            pool,
            resolved_address,
            bookmarks: self.bookmarks.clone(),
        })
    }

    /// Opens an explicit transaction on a dedicated connection (§4.G). §3 "at most one open
    /// transaction per session" is enforced here via `open_transaction`, a latch shared with the
    /// returned `Transaction` that it clears on `commit`/`rollback`/drop — opening a second one
    /// before the first resolves fails rather than silently running two transactions concurrently.
    pub async fn begin_transaction(&mut self) -> Result<Transaction> {
        self.check_open()?;
        if self.open_transaction.swap(true, Ordering::AcqRel) {
            return Err(GraphWireError::Transaction(
                "a transaction is already open for this session".to_string(),
            ));
        }
        let result = self.begin_transaction_inner().await;
        if result.is_err() {
            self.open_transaction.store(false, Ordering::Release);
        }
        result
    }

    async fn begin_transaction_inner(&mut self) -> Result<Transaction> {
        let mode = self.config.default_access_mode;
        let (pool, unresolved_address, resolved_address, mut connection) = self.acquire_connection(mode).await?;
        let bookmarks = self.effective_bookmarks().await?;
        let extra = self.tx_extra(&bookmarks, mode);
        connection.request(RequestBody::begin(extra)).await?;
        Ok(Transaction::new(
            connection,
            pool,
            unresolved_address,
            resolved_address,
            self.bookmarks.clone(),
            self.open_transaction.clone(),
            self.config.fetch_size,
        ))
    }

    /// §4.G managed transactions: retries `work` in a fresh transaction on any retriable error
    /// from either the work itself or the `COMMIT`, backing off between attempts. The deadline
    /// starts only once the first attempt has failed — a first try that runs long still commits.
    async fn execute_managed<T, F>(&mut self, mode: AccessMode, work: F) -> Result<T>
    where
        F: for<'t> Fn(&'t mut Transaction) -> BoxFuture<'t, Result<T>>,
    {
        self.check_open()?;
        let original_mode = self.config.default_access_mode;
        self.config.default_access_mode = mode;
        let mut attempt: u32 = 0;
        let mut deadline: Option<Instant> = None;

        let outcome = loop {
            let mut tx = match self.begin_transaction().await {
                Ok(tx) => tx,
                Err(e) => break Err(e),
            };
            let unresolved_address = tx.unresolved_address().clone();
            let resolved_address = tx.resolved_address().clone();

            let work_result = work(&mut tx).await;
            let round_outcome = match work_result {
                Ok(value) => tx.commit().await.map(|_bookmark| value),
                Err(e) => {
                    let _ = tx.rollback().await;
                    Err(e)
                }
            };

            match round_outcome {
                Ok(value) => break Ok(value),
                Err(e) => {
                    self.handle_write_failure(&e, &unresolved_address, &resolved_address).await;
                    let now = Instant::now();
                    let effective_deadline = *deadline.get_or_insert_with(|| now + self.retry_config.max_transaction_retry_time);
                    if retry::is_retriable(&e, &self.retry_config) && now < effective_deadline {
                        let delay = retry::backoff_delay(&self.retry_config, attempt);
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    break Err(e);
                }
            }
        };

        self.config.default_access_mode = original_mode;
        outcome
    }

    pub async fn execute_write<T, F>(&mut self, work: F) -> Result<T>
    where
        F: for<'t> Fn(&'t mut Transaction) -> BoxFuture<'t, Result<T>>,
    {
        self.execute_managed(AccessMode::Write, work).await
    }

    pub async fn execute_read<T, F>(&mut self, work: F) -> Result<T>
    where
        F: for<'t> Fn(&'t mut Transaction) -> BoxFuture<'t, Result<T>>,
    {
        self.execute_managed(AccessMode::Read, work).await
    }

    /// Marks the session closed; further calls fail with `GraphWireError::Session`. No
    /// connection to release here — every `Transaction`/`SessionResult` this session produced
    /// owns (and releases) its own.
    pub async fn close(&mut self) {
        self.closed = true;
    }
}

/// The result of an auto-commit `Session::run` (§4.G, §4.H). Owns a dedicated connection
/// checkout, released back to the pool once the stream is fully drained or explicitly consumed.
pub struct SessionResult {
    stream: RecordStream,
    connection: Option<PoolConnection>,
    pool: Arc<ConnectionPool>,
    resolved_address: ResolvedAddress,
    bookmarks: Arc<AsyncMutex<Bookmarks>>,
}

impl SessionResult {
    pub fn keys(&self) -> &[String] {
        self.stream.keys()
    }

    fn connection_mut(&mut self) -> Result<&mut PoolConnection> {
        self.connection
            .as_mut()
            .ok_or(GraphWireError::ResultConsumed)
    }

    pub async fn next(&mut self) -> Result<Option<Record>> {
        let record = self.stream.next_record(self.connection_mut()?).await?;
        self.release_if_drained().await;
        Ok(record)
    }

    pub async fn peek(&mut self) -> Result<Option<Record>> {
        self.stream.peek(self.connection_mut()?).await
    }

    pub async fn fetch(&mut self, n: usize) -> Result<Vec<Record>> {
        let records = self.stream.fetch(self.connection_mut()?, n).await?;
        self.release_if_drained().await;
        Ok(records)
    }

    pub async fn single(&mut self, strict: bool) -> Result<Record> {
        let record = self.stream.single(self.connection_mut()?, strict).await;
        self.release().await;
        record
    }

    pub async fn consume(&mut self) -> Result<Summary> {
        let summary = self.stream.consume(self.connection_mut()?).await;
        self.release().await;
        summary
    }

    async fn release_if_drained(&mut self) {
        if self.stream.is_fully_drained() {
            self.release().await;
        }
    }

    async fn release(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Some(summary) = self.stream.summary() {
                self.bookmarks.lock().await.update(summary.bookmark.as_deref());
            }
            self.pool.release(self.resolved_address.clone(), connection).await;
        }
    }
}
