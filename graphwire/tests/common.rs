//! Shared scaffolding for the integration tests: a `Connector` that hands each acquired
//! connection to a scripted fake server over a `tokio::io::duplex` pair, plus the tiny chunk
//! framing and structure encode/decode helpers a script needs to speak Bolt. `framing` itself is
//! private to the crate, so scripts reimplement the handful of lines the format takes rather than
//! depend on it — these tests exercise the driver as a real peer would, from the wire up.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Mutex;

use graphwire::address::ResolvedAddress;
use graphwire::packstream::{Decoder, Encoder, Structure, Value};
use graphwire::pool::{AsyncStream, Connector};
use graphwire::protocol::{negotiate_version, tag, ProtocolVersion, Version};
use graphwire::Result;

pub type ServerScript = Box<dyn FnOnce(DuplexStream) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Hands out one `tokio::io::duplex` pair per `connect`, backed by the next script in the queue.
/// Mirrors `ConnectionPool`'s real dial path exactly except for the transport.
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<ServerScript>>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<ServerScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
        })
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _address: &ResolvedAddress, _timeout: Duration) -> Result<Box<dyn AsyncStream>> {
        let (client_io, server_io) = tokio::io::duplex(1 << 20);
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .expect("test opened more connections than it scripted");
        tokio::spawn(script(server_io));
        Ok(Box::new(client_io))
    }
}

/// Reads the 20-byte handshake and replies binding protocol 5.0.
pub async fn handshake(server: &mut DuplexStream) {
    let mut buf = [0u8; 20];
    server.read_exact(&mut buf).await.unwrap();
    let offered: [u8; 16] = buf[4..20].try_into().unwrap();
    let version = negotiate_version(&offered, &[Version::new(5, 0)]).expect("test client always offers 5.0");
    let reply = ProtocolVersion {
        major: version.major,
        top_minor: version.minor,
        range: 0,
    };
    server.write_all(&reply.to_bytes()).await.unwrap();
}

pub async fn write_chunked(server: &mut DuplexStream, payload: &[u8]) {
    server.write_u16(payload.len() as u16).await.unwrap();
    server.write_all(payload).await.unwrap();
    server.write_u16(0).await.unwrap();
    server.flush().await.unwrap();
}

pub async fn read_message(server: &mut DuplexStream) -> Vec<u8> {
    let mut message = Vec::new();
    loop {
        let len = server.read_u16().await.unwrap();
        if len == 0 {
            return message;
        }
        let mut buf = vec![0u8; len as usize];
        server.read_exact(&mut buf).await.unwrap();
        message.extend_from_slice(&buf);
    }
}

/// Reads one request and returns its structure tag plus decoded fields.
pub async fn read_request(server: &mut DuplexStream) -> Structure {
    let message = read_message(server).await;
    match Decoder::new(&message).read_value().unwrap() {
        Value::Structure(s) => s,
        other => panic!("expected a structure, got {other:?}"),
    }
}

pub async fn write_structure(server: &mut DuplexStream, structure: Structure) {
    let encoded = Encoder::encode(&Value::Structure(structure)).unwrap();
    write_chunked(server, &encoded).await;
}

pub async fn write_success(server: &mut DuplexStream, meta: IndexMap<String, Value>) {
    write_structure(server, Structure::new(tag::SUCCESS, vec![Value::Map(meta)])).await;
}

pub async fn write_failure(server: &mut DuplexStream, code: &str, message: &str) {
    let mut meta = IndexMap::new();
    meta.insert("code".to_string(), Value::String(code.to_string()));
    meta.insert("message".to_string(), Value::String(message.to_string()));
    write_structure(server, Structure::new(tag::FAILURE, vec![Value::Map(meta)])).await;
}

pub async fn write_record(server: &mut DuplexStream, values: Vec<Value>) {
    write_structure(server, Structure::new(tag::RECORD, vec![Value::List(values)])).await;
}

/// Reads the `HELLO` (and, on protocol >= 5.1, `LOGON`) exchange every fake server sees right
/// after the handshake, answering both with an empty-metadata `SUCCESS`.
pub async fn accept_hello(server: &mut DuplexStream) {
    let hello = read_request(server).await;
    assert_eq!(hello.tag, tag::HELLO);
    write_success(server, IndexMap::new()).await;
}
