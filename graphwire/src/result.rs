//! Lazy record streaming (§4.H). Grounded on `original_source/neo4j/_sync/work/result.py`'s
//! `Result`: `RUN` opens the stream, `PULL`/`DISCARD` drive it, and `has_more` on the terminal
//! `SUCCESS` says whether another `PULL` would find anything.
//!
//! `RecordStream` does not own the `Connection` it streams over — a `Session` keeps that, since
//! the same connection is shared with `BEGIN`/`COMMIT`/`ROLLBACK` across the life of a
//! transaction. Every method that drives wire I/O takes `&mut PoolConnection` as an explicit
//! argument instead (an external-iterator shape, not a self-contained `Stream`).

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::mpsc;

use crate::connection::ResponseEvent;
use crate::error::{GraphWireError, Result};
use crate::packstream::Value;
use crate::pool::PoolConnection;
use crate::protocol::RequestBody;
use crate::record::Record;

/// Post-hoc metadata a stream accumulates once it is fully consumed (§3 "Session query metadata").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub bookmark: Option<String>,
    pub database: Option<String>,
    pub query_type: Option<String>,
    pub counters: IndexMap<String, Value>,
    pub plan: Option<Value>,
    pub profile: Option<Value>,
    pub notifications: Vec<Value>,
}

impl Summary {
    fn from_meta(meta: &IndexMap<String, Value>) -> Self {
        Self {
            bookmark: meta.get("bookmark").and_then(Value::as_str).map(str::to_string),
            database: meta.get("db").and_then(Value::as_str).map(str::to_string),
            query_type: meta.get("type").and_then(Value::as_str).map(str::to_string),
            counters: meta.get("stats").and_then(Value::as_map).cloned().unwrap_or_default(),
            plan: meta.get("plan").cloned(),
            profile: meta.get("profile").cloned(),
            notifications: meta.get("notifications").and_then(Value::as_list).map(|l| l.to_vec()).unwrap_or_default(),
        }
    }
}

/// A lazily-pulled stream of records from one `RUN` (§4.H). Created by `Session::run` /
/// `Transaction::run`; every call that advances it needs the connection it was opened on.
pub struct RecordStream {
    keys: Arc<Vec<String>>,
    qid: Option<i64>,
    fetch_size: i64,
    record_buffer: VecDeque<Vec<Value>>,
    has_more: bool,
    exhausted: bool,
    consumed: bool,
    summary: Option<Summary>,
}

impl RecordStream {
    /// Sends `RUN` and waits for its (non-streaming) `SUCCESS`, capturing the field names and,
    /// on servers that carry multiple concurrent result streams per transaction, the query id.
    pub async fn run(
        connection: &mut PoolConnection,
        query: &str,
        parameters: IndexMap<String, Value>,
        extra: IndexMap<String, Value>,
        fetch_size: i64,
    ) -> Result<Self> {
        let meta = connection.request(RequestBody::run(query, parameters, extra)).await?;
        let keys = meta
            .get("fields")
            .and_then(Value::as_list)
            .map(|l| l.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let qid = if connection.protocol_version.supports_qid() {
            meta.get("qid").and_then(Value::as_int)
        } else {
            None
        };
        Ok(Self {
            keys: Arc::new(keys),
            qid,
            fetch_size,
            record_buffer: VecDeque::new(),
            has_more: true,
            exhausted: false,
            consumed: false,
            summary: None,
        })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn pull_extra(&self, connection: &PoolConnection, n: i64) -> IndexMap<String, Value> {
        let mut extra = IndexMap::new();
        extra.insert("n".to_string(), Value::Int(n));
        if connection.protocol_version.supports_qid() {
            if let Some(qid) = self.qid {
                extra.insert("qid".to_string(), Value::Int(qid));
            }
        }
        extra
    }

    /// Drains whatever is already sitting in `receiver` without blocking, dispatching more wire
    /// messages as needed until the terminal `SUCCESS`/`FAILURE`/`IGNORED` for this request
    /// arrives (§9 "send now, dispatch later").
    async fn drive(
        &mut self,
        connection: &mut PoolConnection,
        mut receiver: mpsc::UnboundedReceiver<ResponseEvent>,
    ) -> Result<()> {
        loop {
            match receiver.try_recv() {
                Ok(ResponseEvent::Record(fields)) => self.record_buffer.push_back(fields),
                Ok(ResponseEvent::Success(meta)) => {
                    self.has_more = meta.get("has_more").and_then(Value::as_bool).unwrap_or(false);
                    if !self.has_more {
                        self.exhausted = true;
                        self.summary = Some(Summary::from_meta(&meta));
                    }
                    return Ok(());
                }
                Ok(ResponseEvent::Failure(err)) => {
                    self.exhausted = true;
                    return Err(GraphWireError::Server(err));
                }
                Ok(ResponseEvent::Ignored) => {
                    self.exhausted = true;
                    return Err(GraphWireError::Protocol("PULL/DISCARD was ignored".to_string()));
                }
                Err(mpsc::error::TryRecvError::Empty) => {
                    connection.dispatch_one().await?;
                }
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(GraphWireError::Protocol("connection dropped mid-stream".to_string()));
                }
            }
        }
    }

    async fn pull(&mut self, connection: &mut PoolConnection) -> Result<()> {
        let extra = self.pull_extra(connection, self.fetch_size);
        let receiver = connection.enqueue(RequestBody::pull(extra)).await?;
        self.drive(connection, receiver).await
    }

    async fn discard(&mut self, connection: &mut PoolConnection) -> Result<()> {
        let extra = self.pull_extra(connection, -1);
        let receiver = connection.enqueue(RequestBody::discard(extra)).await?;
        self.drive(connection, receiver).await
    }

    /// Pops the next buffered record, pulling another batch from the server if the buffer is dry
    /// and the stream has not reported `has_more: false` yet.
    pub async fn next_record(&mut self, connection: &mut PoolConnection) -> Result<Option<Record>> {
        loop {
            if let Some(values) = self.record_buffer.pop_front() {
                return Ok(Some(Record::new(self.keys.clone(), values)));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.pull(connection).await?;
        }
    }

    /// Looks at the next record without removing it, pulling a batch if none is buffered yet.
    pub async fn peek(&mut self, connection: &mut PoolConnection) -> Result<Option<Record>> {
        if self.record_buffer.is_empty() && !self.exhausted {
            self.pull(connection).await?;
        }
        Ok(self.record_buffer.front().map(|values| Record::new(self.keys.clone(), values.clone())))
    }

    /// Collects up to `n` records, stopping early if the stream exhausts first.
    pub async fn fetch(&mut self, connection: &mut PoolConnection, n: usize) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.next_record(connection).await? {
                Some(record) => out.push(record),
                None => break,
            }
        }
        Ok(out)
    }

    /// Exhausts the stream (discarding any unread records with `DISCARD` rather than `PULL`ing
    /// them) and returns the summary. Idempotent: a second call returns the same summary.
    pub async fn consume(&mut self, connection: &mut PoolConnection) -> Result<Summary> {
        if self.consumed {
            return self
                .summary
                .clone()
                .ok_or_else(|| GraphWireError::Protocol("consumed result has no summary".to_string()));
        }
        self.consumed = true;
        self.record_buffer.clear();
        while !self.exhausted {
            self.discard(connection).await?;
        }
        self.summary
            .clone()
            .ok_or_else(|| GraphWireError::Protocol("stream exhausted without a summary".to_string()))
    }

    /// Expects exactly one record. In non-strict mode a stream with more than one record still
    /// returns the first and discards the rest; `strict` turns that case into an error instead.
    pub async fn single(&mut self, connection: &mut PoolConnection, strict: bool) -> Result<Record> {
        let first = self.next_record(connection).await?;
        let second = self.next_record(connection).await?;
        self.consume(connection).await?;
        match (first, second) {
            (None, _) => Err(GraphWireError::ResultNotSingle("expected one record, got none".to_string())),
            (Some(_), Some(_)) if strict => {
                Err(GraphWireError::ResultNotSingle("expected exactly one record, got more than one".to_string()))
            }
            (Some(record), _) => Ok(record),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// True once no further `PULL` will happen *and* every already-buffered record has been
    /// handed out — the point at which the connection backing this stream can be reused or
    /// released.
    pub fn is_fully_drained(&self) -> bool {
        self.exhausted && self.record_buffer.is_empty()
    }

    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, ResolvedAddress};
    use crate::collaborators::{AuthToken, StaticAuthManager};
    use crate::config::PoolConfig;
    use crate::connection::Connection;
    use crate::packstream::{Decoder, Encoder, Structure};
    use crate::protocol::tag;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn open_test_connection() -> (PoolConnection, tokio::io::DuplexStream) {
        let (client_io, mut server_io): (tokio::io::DuplexStream, tokio::io::DuplexStream) =
            tokio::io::duplex(16 * 1024);
        let server = tokio::spawn(async move {
            let mut handshake = [0u8; 20];
            server_io.read_exact(&mut handshake).await.unwrap();
            server_io.write_all(&[0x00, 0x00, 0x00, 0x05]).await.unwrap();
            let _hello = crate::framing::read_message(&mut server_io).await.unwrap().unwrap();
            let success = Structure::new(tag::SUCCESS, vec![Value::Map(IndexMap::new())]);
            let encoded = Encoder::encode(&Value::Structure(success)).unwrap();
            crate::framing::write_message(&mut server_io, &encoded).await.unwrap();
            server_io
        });

        let config = PoolConfig::default();
        let auth = StaticAuthManager(AuthToken(IndexMap::new()));
        let resolved = ResolvedAddress::new("localhost", "127.0.0.1".parse().unwrap(), 7687);
        let connection: PoolConnection = Connection::open(
            Box::new(client_io),
            Address::new("localhost", 7687),
            resolved,
            &config,
            &auth,
            None,
        )
        .await
        .unwrap();
        let server_io = server.await.unwrap();
        (connection, server_io)
    }

    #[tokio::test]
    async fn fetch_collects_records_and_stops_at_has_more_false() {
        let (mut connection, mut server_io) = open_test_connection().await;

        let driver = tokio::spawn(async move {
            let run = crate::framing::read_message(&mut server_io).await.unwrap().unwrap();
            let decoded = Decoder::new(&run).read_value().unwrap();
            assert!(matches!(decoded, Value::Structure(s) if s.tag == tag::RUN));

            let mut meta = IndexMap::new();
            meta.insert(
                "fields".to_string(),
                Value::List(vec![Value::String("n".to_string())]),
            );
            let success = Structure::new(tag::SUCCESS, vec![Value::Map(meta)]);
            crate::framing::write_message(&mut server_io, &Encoder::encode(&Value::Structure(success)).unwrap())
                .await
                .unwrap();

            let _pull = crate::framing::read_message(&mut server_io).await.unwrap().unwrap();
            for i in 0..2 {
                let record = Structure::new(tag::RECORD, vec![Value::List(vec![Value::Int(i)])]);
                crate::framing::write_message(&mut server_io, &Encoder::encode(&Value::Structure(record)).unwrap())
                    .await
                    .unwrap();
            }
            let mut pull_meta = IndexMap::new();
            pull_meta.insert("has_more".to_string(), Value::Bool(false));
            let pull_success = Structure::new(tag::SUCCESS, vec![Value::Map(pull_meta)]);
            crate::framing::write_message(&mut server_io, &Encoder::encode(&Value::Structure(pull_success)).unwrap())
                .await
                .unwrap();
        });

        let mut stream = RecordStream::run(&mut connection, "RETURN 1 AS n", IndexMap::new(), IndexMap::new(), 1000)
            .await
            .unwrap();
        assert_eq!(stream.keys(), &["n".to_string()]);
        let records = stream.fetch(&mut connection, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("n"), Some(&Value::Int(0)));
        assert!(stream.is_exhausted());
        driver.await.unwrap();
    }
}
