//! Explicit transactions (§4.G). Grounded on `original_source/neo4j/_sync/work/transaction.py`'s
//! `Transaction`: `_begin`/`_run`/`_commit`/`_rollback`/`_close`, and on `session.py`'s
//! `_open_transaction` for what goes in `BEGIN`'s extra map.
//!
//! Unlike `session.py`'s `Transaction`, which borrows its session's single connection, this one
//! owns a dedicated pool checkout acquired at `begin_transaction` and released at `commit`/
//! `rollback` (or, failing that, from a best-effort background task on drop). That trade keeps
//! `Session::execute_read`/`execute_write`'s retried closure free of Rust's borrow checker rather
//! than threading a lifetime through it — recorded as an Open Question decision.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use log::warn;
use tokio::sync::Mutex as AsyncMutex;

use crate::address::{Address, ResolvedAddress};
use crate::bookmarks::Bookmarks;
use crate::error::{GraphWireError, Result};
use crate::packstream::Value;
use crate::pool::{ConnectionPool, PoolConnection};
use crate::protocol::{RequestBody, ServerState};
use crate::record::Record;
use crate::result::{RecordStream, Summary};

/// One open `BEGIN ... COMMIT`/`ROLLBACK` block. §3 "at most one open transaction per session" is
/// enforced by `Session::begin_transaction` via `open_flag`, a session-shared latch this type
/// clears on `commit`/`rollback`/drop rather than by holding a borrow of the session itself.
pub struct Transaction {
    connection: Option<PoolConnection>,
    pool: Arc<ConnectionPool>,
    unresolved_address: Address,
    resolved_address: ResolvedAddress,
    bookmarks: Arc<AsyncMutex<Bookmarks>>,
    open_flag: Arc<AtomicBool>,
    fetch_size: i64,
    open: bool,
}

impl Transaction {
    pub(crate) fn new(
        connection: PoolConnection,
        pool: Arc<ConnectionPool>,
        unresolved_address: Address,
        resolved_address: ResolvedAddress,
        bookmarks: Arc<AsyncMutex<Bookmarks>>,
        open_flag: Arc<AtomicBool>,
        fetch_size: i64,
    ) -> Self {
        Self {
            connection: Some(connection),
            pool,
            unresolved_address,
            resolved_address,
            bookmarks,
            open_flag,
            fetch_size,
            open: true,
        }
    }

    /// The routing-table address this transaction's connection was acquired for (§4.F
    /// `on_write_failure`'s writer-set removal needs the unresolved form; `resolved_address`
    /// needs the resolved one for `ConnectionPool::deactivate`).
    pub fn unresolved_address(&self) -> &Address {
        &self.unresolved_address
    }

    pub fn resolved_address(&self) -> &ResolvedAddress {
        &self.resolved_address
    }

    fn connection_mut(&mut self) -> Result<&mut PoolConnection> {
        self.connection
            .as_mut()
            .ok_or_else(|| GraphWireError::Transaction("transaction connection already released".to_string()))
    }

    /// Runs a query against this transaction's connection. Fails if the transaction has already
    /// been committed or rolled back.
    pub async fn run(&mut self, query: &str, parameters: IndexMap<String, Value>) -> Result<RecordStream> {
        if !self.open {
            return Err(GraphWireError::Transaction("transaction is closed".to_string()));
        }
        let fetch_size = self.fetch_size;
        RecordStream::run(self.connection_mut()?, query, parameters, IndexMap::new(), fetch_size).await
    }

    pub async fn advance(&mut self, stream: &mut RecordStream) -> Result<Option<Record>> {
        stream.next_record(self.connection_mut()?).await
    }

    pub async fn peek(&mut self, stream: &mut RecordStream) -> Result<Option<Record>> {
        stream.peek(self.connection_mut()?).await
    }

    pub async fn fetch(&mut self, stream: &mut RecordStream, n: usize) -> Result<Vec<Record>> {
        stream.fetch(self.connection_mut()?, n).await
    }

    pub async fn single(&mut self, stream: &mut RecordStream, strict: bool) -> Result<Record> {
        stream.single(self.connection_mut()?, strict).await
    }

    pub async fn consume(&mut self, stream: &mut RecordStream) -> Result<Summary> {
        stream.consume(self.connection_mut()?).await
    }

    /// Sends `COMMIT`, folds the returned bookmark into the session's bookmark set, and releases
    /// the connection back to the pool.
    pub async fn commit(mut self) -> Result<Option<String>> {
        self.open = false;
        self.open_flag.store(false, Ordering::Release);
        let mut connection = self
            .connection
            .take()
            .ok_or_else(|| GraphWireError::Transaction("transaction connection already released".to_string()))?;
        let meta = connection.request(RequestBody::commit()).await?;
        let bookmark = meta.get("bookmark").and_then(Value::as_str).map(str::to_string);
        if bookmark.is_some() {
            self.bookmarks.lock().await.update(bookmark.as_deref());
        }
        self.pool.release(self.resolved_address.clone(), connection).await;
        Ok(bookmark)
    }

    /// Sends `ROLLBACK` (best-effort: a failed rollback still releases the connection) and
    /// releases the connection back to the pool.
    pub async fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.open_flag.store(false, Ordering::Release);
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.request(RequestBody::rollback()).await {
                warn!("rollback failed, discarding transaction connection: {e}");
            }
            self.pool.release(self.resolved_address.clone(), connection).await;
        }
        Ok(())
    }
}

impl Drop for Transaction {
    /// A transaction dropped without an explicit `commit`/`rollback` still has an open
    /// `BEGIN` on the server; best-effort `ROLLBACK` it from a spawned task rather than leak the
    /// connection as a permanently half-open transaction (§4.G "closing a session rolls back an
    /// open transaction" generalized to the transaction's own scope, since `Session` no longer
    /// holds the connection itself).
    fn drop(&mut self) {
        self.open_flag.store(false, Ordering::Release);
        let Some(connection) = self.connection.take() else { return };
        warn!("transaction dropped without commit or rollback; rolling back in the background");
        let pool = self.pool.clone();
        let address = self.resolved_address.clone();
        tokio::spawn(async move {
            let mut connection = connection;
            if connection.server_state() != ServerState::Failed {
                let _ = connection.request(RequestBody::rollback()).await;
            }
            pool.release(address, connection).await;
        });
    }
}
