//! A Bolt protocol driver core (§1): packstream codec, chunk framing, the per-connection state
//! machine, a routing-aware connection pool, and sessions/transactions/lazy result streaming on
//! top. URI parsing, TLS certificate plumbing and metrics are out of scope (§1 Non-goals) — a
//! caller assembles a `Session` from the pieces here.

mod framing;
mod io;
mod retry;

pub mod address;
pub mod bookmarks;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod error;
pub mod packstream;
pub mod pool;
pub mod protocol;
pub mod record;
pub mod result;
pub mod routing;
pub mod session;
pub mod transaction;

pub use address::{Address, IpFamily, ResolvedAddress};
pub use bookmarks::Bookmarks;
pub use collaborators::{
    AuthManager, AuthToken, BookmarkManager, ClientCertificateProvider, DefaultResolver, Logger, NullLogger,
    Resolver, StaticAuthManager,
};
pub use config::{PoolConfig, RetryConfig, RoutingConfig, SessionConfig};
pub use connection::{Connection, ResponseEvent};
pub use error::{ErrorClassification, GraphWireError, Result, ServerError};
pub use packstream::{Structure, Value};
pub use pool::{AccessSelection, ConnectionPool, Connector, PoolConnection, RoutedPool, TcpConnector};
pub use protocol::{AccessMode, ClientState, ServerState, Version};
pub use record::{
    Date, IsoDuration, LocalDateTime, LocalTime, Node, OffsetDateTime, OffsetTime, Path, PathSegment, Point2D,
    Point3D, Record, Relationship, UnboundRelationship, ZonedDateTime,
};
pub use result::{RecordStream, Summary};
pub use routing::{OrderedSet, RoutingTable, ServerRole};
pub use session::{Backend, Session, SessionResult};
pub use transaction::Transaction;
