//! The per-connection actor (§4.C). Unlike the teacher's `InnerClient` — which is spawned as its
//! own task behind an `mpsc`-fed handle because a `Client` is cloned and shared across callers —
//! a `Connection` here is owned exclusively by the session that acquired it from the pool
//! (invariant 2), so no spawned task or request channel is needed. What survives from the
//! teacher's shape is the `VecDeque` of pending responses and the match-on-incoming-tag
//! dispatcher (§9 design note); pipelining is "send now, dispatch later" on one async value
//! instead of message-passing into a background task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::address::{Address, ResolvedAddress};
use crate::collaborators::AuthManager;
use crate::config::PoolConfig;
use crate::error::{GraphWireError, Result, ServerError};
use crate::framing;
use crate::packstream::{Decoder, Encoder, Structure, Value};
use crate::protocol::{self, tag, Request, RequestBody, ServerState, Version};

/// One event delivered to whatever issued the request that produced it. `Record` may arrive any
/// number of times before the terminal event.
#[derive(Debug)]
pub enum ResponseEvent {
    Record(Vec<Value>),
    Success(IndexMap<String, Value>),
    Failure(ServerError),
    Ignored,
}

struct PendingResponse {
    request_tag: u8,
    sender: mpsc::UnboundedSender<ResponseEvent>,
}

/// A live connection to one server: socket, codec, framer and the per-connection state machine
/// bundled together (§3 "Connection attributes").
pub struct Connection<S> {
    stream: S,
    pub unresolved_address: Address,
    pub resolved_address: ResolvedAddress,
    pub protocol_version: Version,
    server_state: ServerState,
    pending: VecDeque<PendingResponse>,
    pub most_recent_qid: Option<i64>,
    pub last_database: Option<String>,
    pub configuration_hints: IndexMap<String, Value>,
    pub created_at: Instant,
    /// Set once a transport error is observed; the pool must discard rather than release this
    /// connection (§4.C failure policy, §4.E acquire step a).
    pub defunct: bool,
    /// Shared with the pool for the whole time this connection is checked out, so `deactivate`
    /// can still mark it for disposal even though the pool doesn't hold the value during that
    /// window (§4.E `Deactivate(A)` on an in-use connection).
    stale: Arc<AtomicBool>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Connection<S> {
    /// Performs the 20-byte handshake, `HELLO`, and (on protocol ≥5.1) the separate `LOGON`
    /// (§4.C). `routing_context`, when present, is sent as the `routing` key of the `HELLO`
    /// extra map.
    pub async fn open(
        mut stream: S,
        unresolved_address: Address,
        resolved_address: ResolvedAddress,
        pool_config: &PoolConfig,
        auth: &dyn AuthManager,
        routing_context: Option<IndexMap<String, Value>>,
    ) -> Result<Self> {
        let versions = Version::supported();
        let handshake = protocol::build_handshake(&versions);
        stream.write_all(&handshake).await?;
        stream.flush().await?;

        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).await?;
        let version = protocol::choose_version(reply)?
            .ok_or_else(|| GraphWireError::Protocol("server rejected every proposed version".to_string()))?;
        debug!("negotiated bolt protocol version {version}");

        let mut connection = Connection {
            stream,
            unresolved_address,
            resolved_address,
            protocol_version: version,
            server_state: ServerState::Connected,
            pending: VecDeque::new(),
            most_recent_qid: None,
            last_database: None,
            configuration_hints: IndexMap::new(),
            created_at: Instant::now(),
            defunct: false,
            stale: Arc::new(AtomicBool::new(false)),
        };

        let mut hello_extra = IndexMap::new();
        hello_extra.insert("user_agent".to_string(), Value::String(pool_config.user_agent.clone()));
        if let Some(ctx) = routing_context {
            hello_extra.insert("routing".to_string(), Value::Map(ctx));
        }

        let auth_token = auth.get_auth().await?;
        if !version.supports_auth_state() {
            hello_extra.extend(auth_token.0);
        }

        let hello_meta = connection.request(RequestBody::hello(hello_extra)).await?;
        if let Some(hints) = hello_meta.get("hints").and_then(Value::as_map) {
            connection.configuration_hints = hints.clone();
        }
        connection.server_state = if version.supports_auth_state() {
            ServerState::Authentication
        } else {
            ServerState::Ready
        };

        if version.supports_auth_state() {
            connection.request(RequestBody::logon(auth_token.0)).await?;
            connection.server_state = ServerState::Ready;
        }

        Ok(connection)
    }

    /// Encodes, frames and writes `request`, registering a fresh response channel for it. Does
    /// not wait for any reply — the caller may enqueue several requests before dispatching
    /// (pipelining, §4.C).
    pub async fn enqueue(&mut self, request: Request) -> Result<mpsc::UnboundedReceiver<ResponseEvent>> {
        if !self.server_state.may_send(request.tag) {
            return Err(GraphWireError::Protocol(format!(
                "cannot send message {:#x} while connection is in a failed state",
                request.tag
            )));
        }
        let tag = request.tag;
        let encoded = Encoder::encode(&request.into_value()).map_err(|e| GraphWireError::Encode(e.to_string()))?;
        let write_result = framing::write_message(&mut self.stream, &encoded).await;
        if write_result.is_err() {
            self.defunct = true;
        }
        write_result?;

        let (sender, receiver) = mpsc::unbounded_channel();
        self.pending.push_back(PendingResponse { request_tag: tag, sender });
        Ok(receiver)
    }

    /// Reads exactly one wire message and dispatches it to the pending response at the front of
    /// the queue (§9 "dispatcher is a match over incoming tag plus queue head").
    pub async fn dispatch_one(&mut self) -> Result<()> {
        let message = match framing::read_message(&mut self.stream).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.defunct = true;
                return Err(GraphWireError::ServiceUnavailable(
                    "connection closed by peer".to_string(),
                ));
            }
            Err(e) => {
                self.defunct = true;
                return Err(e);
            }
        };

        let value = Decoder::new(&message).read_value().map_err(|e| GraphWireError::Decode(e.to_string()))?;
        let structure = match value {
            Value::Structure(s) => s,
            other => {
                self.defunct = true;
                return Err(GraphWireError::Protocol(format!("expected a structure, got {other:?}")));
            }
        };
        trace!("response received: tag={:#x}", structure.tag);
        self.handle_structure(structure)
    }

    fn handle_structure(&mut self, structure: Structure) -> Result<()> {
        match structure.tag {
            tag::RECORD => {
                let fields = structure
                    .fields
                    .into_iter()
                    .next()
                    .and_then(|v| if let Value::List(l) = v { Some(l) } else { None })
                    .ok_or_else(|| GraphWireError::Protocol("RECORD missing field list".to_string()))?;
                if let Some(pending) = self.pending.front() {
                    let _ = pending.sender.send(ResponseEvent::Record(fields));
                }
                Ok(())
            }
            tag::SUCCESS => {
                let meta = structure_meta(structure)?;
                let pending = self
                    .pending
                    .pop_front()
                    .ok_or_else(|| GraphWireError::Protocol("SUCCESS with no pending request".to_string()))?;
                let has_more = meta.get("has_more").and_then(Value::as_bool).unwrap_or(false);
                self.server_state = self
                    .server_state
                    .on_success(pending.request_tag, has_more)
                    .ok_or_else(|| GraphWireError::Protocol("illegal state transition on SUCCESS".to_string()))?;
                let _ = pending.sender.send(ResponseEvent::Success(meta));
                Ok(())
            }
            tag::FAILURE => {
                let meta = structure_meta(structure)?;
                let pending = self
                    .pending
                    .pop_front()
                    .ok_or_else(|| GraphWireError::Protocol("FAILURE with no pending request".to_string()))?;
                let code = meta.get("code").and_then(Value::as_str).unwrap_or("Unknown.Unknown").to_string();
                let message = meta.get("message").and_then(Value::as_str).unwrap_or_default().to_string();
                let server_error = ServerError::new(code, message);
                match self.server_state.on_failure(pending.request_tag) {
                    Some(next) => self.server_state = next,
                    None => self.defunct = true,
                }
                let _ = pending.sender.send(ResponseEvent::Failure(server_error));
                Ok(())
            }
            tag::IGNORED => {
                let pending = self
                    .pending
                    .pop_front()
                    .ok_or_else(|| GraphWireError::Protocol("IGNORED with no pending request".to_string()))?;
                let _ = pending.sender.send(ResponseEvent::Ignored);
                Ok(())
            }
            other => {
                self.defunct = true;
                Err(GraphWireError::Protocol(format!("unexpected message tag {other:#x}")))
            }
        }
    }

    /// Sends a request expecting exactly one terminal reply (no `RECORD`s), dispatching until it
    /// arrives. Used for `HELLO`/`LOGON`/`LOGOFF`/`GOODBYE`/`RESET`/`BEGIN`/`COMMIT`/`ROLLBACK`/
    /// `ROUTE`/`TELEMETRY`.
    pub async fn request(&mut self, request: Request) -> Result<IndexMap<String, Value>> {
        let mut receiver = self.enqueue(request).await?;
        loop {
            if let Ok(event) = receiver.try_recv() {
                return match event {
                    ResponseEvent::Success(meta) => Ok(meta),
                    ResponseEvent::Failure(err) => Err(GraphWireError::Server(err)),
                    ResponseEvent::Ignored => Err(GraphWireError::Protocol("request was ignored".to_string())),
                    ResponseEvent::Record(_) => Err(GraphWireError::Protocol(
                        "unexpected RECORD for a non-streaming request".to_string(),
                    )),
                };
            }
            self.dispatch_one().await?;
        }
    }

    /// Runs a `RESET` round-trip, used by the pool's liveness check and by release-time cleanup
    /// (§4.E).
    pub async fn reset(&mut self) -> Result<()> {
        self.request(RequestBody::reset()).await?;
        Ok(())
    }

    /// Sends `GOODBYE` without awaiting a reply — the server closes the socket on receipt.
    pub async fn goodbye(&mut self) {
        if self.enqueue(RequestBody::goodbye()).await.is_err() {
            self.defunct = true;
        }
    }

    pub fn server_state(&self) -> ServerState {
        self.server_state
    }

    pub fn is_failed(&self) -> bool {
        self.server_state == ServerState::Failed
    }

    /// Whether the pool marked this connection for disposal while it was checked out.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// The pool's handle onto this connection's staleness, cloned once per checkout and kept in
    /// `PoolState::checked_out` so `deactivate` can reach connections it no longer owns.
    pub(crate) fn stale_flag(&self) -> Arc<AtomicBool> {
        self.stale.clone()
    }
}

fn structure_meta(structure: Structure) -> Result<IndexMap<String, Value>> {
    match structure.fields.into_iter().next() {
        Some(Value::Map(map)) => Ok(map),
        _ => Err(GraphWireError::Protocol("expected a metadata map field".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{AuthToken, StaticAuthManager};

    fn empty_auth() -> StaticAuthManager {
        StaticAuthManager(AuthToken(IndexMap::new()))
    }

    /// Drives one `tokio::io::duplex` end as a minimal scripted fake server (§4.L) answering the
    /// handshake plus a single `HELLO`, in the style of the teacher's integration tests.
    #[tokio::test]
    async fn open_negotiates_version_and_reaches_ready() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let mut handshake = [0u8; 20];
            server_io.read_exact(&mut handshake).await.unwrap();
            server_io.write_all(&[0x00, 0x00, 0x00, 0x05]).await.unwrap();

            let hello = framing::read_message(&mut server_io).await.unwrap().unwrap();
            let decoded = Decoder::new(&hello).read_value().unwrap();
            assert!(matches!(decoded, Value::Structure(s) if s.tag == tag::HELLO));

            let mut success_meta = IndexMap::new();
            success_meta.insert("server".to_string(), Value::String("graphwire-test/1.0".to_string()));
            let success = Structure::new(tag::SUCCESS, vec![Value::Map(success_meta)]);
            let encoded = Encoder::encode(&Value::Structure(success)).unwrap();
            framing::write_message(&mut server_io, &encoded).await.unwrap();
        });

        let config = PoolConfig::default();
        let auth = empty_auth();
        let resolved = ResolvedAddress::new("localhost", "127.0.0.1".parse().unwrap(), 7687);
        let connection = Connection::open(
            client_io,
            Address::new("localhost", 7687),
            resolved,
            &config,
            &auth,
            None,
        )
        .await
        .unwrap();

        assert_eq!(connection.protocol_version, Version::new(5, 0));
        assert_eq!(connection.server_state(), ServerState::Ready);
        server.await.unwrap();
    }
}
