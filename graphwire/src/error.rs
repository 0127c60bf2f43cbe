//! Error taxonomy (§7). Grounded on the teacher's `thiserror` dependency rather than the
//! `anyhow` usage visible in its older `io.rs`/`lib.rs` snapshot.

use std::fmt;

/// Top-level error type for the driver core.
#[derive(thiserror::Error, Debug)]
pub enum GraphWireError {
    /// Bad URI, conflicting TLS options, invalid access mode, etc. Raised synchronously at
    /// construction time, never mid-session.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// TCP/TLS/read/write/timeout failure. Direct pools surface this as-is; routed pools
    /// translate it to `SessionExpired` at the session boundary.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The routed-pool equivalent of `ServiceUnavailable`: the session's connection or routing
    /// table became unusable mid-session and a fresh session should be opened.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// Handshake failure, unexpected message, malformed chunk framing. Always fatal to the
    /// connection that raised it.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `read_var`/marker decode failure in the packstream layer.
    #[error("decode error: {0}")]
    Decode(String),

    /// Encode-time overflow (int out of range, length >= 2^32, structure with >15 fields).
    #[error("encode error: {0}")]
    Encode(String),

    /// The server responded with a `FAILURE` message.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// A `COMMIT` was in flight when the connection died; the transaction's outcome is unknown.
    #[error("incomplete commit: outcome of the transaction is unknown")]
    IncompleteCommit,

    /// A `Result`'s records were already fully consumed or it went out of scope.
    #[error("result already consumed")]
    ResultConsumed,

    /// `single()` called against a result that did not yield exactly one record.
    #[error("result does not contain exactly one record: {0}")]
    ResultNotSingle(String),

    /// Double `begin_transaction`, use of a closed transaction, etc.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Concurrent use of a session, or other session-lifecycle violation.
    #[error("session error: {0}")]
    Session(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid utf-8 in packstream string: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("operation timed out: {0}")]
    Timeout(String),
}

pub type Result<T, E = GraphWireError> = std::result::Result<T, E>;

/// A structured `category.subcategory.name` error code the server attached to a `FAILURE`
/// message, plus the classification used by the retry layer (§7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: String,
    pub message: String,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// The three server-error subclasses named in §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Syntax, constraint, authorization. Not retriable by default.
    ClientError,
    /// Deadlock, terminated. Retriable except a configuration-driven denylist.
    TransientError,
    /// Not retriable.
    DatabaseError,
    /// Anything outside the three well-known `category` prefixes.
    Unknown,
}

impl ServerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// `category` is the first dot-separated component of the code, e.g. `Neo.TransientError.Transaction.Deadlock`.
    pub fn classification(&self) -> ErrorClassification {
        let mut parts = self.code.split('.');
        let _vendor = parts.next();
        match parts.next() {
            Some("ClientError") => ErrorClassification::ClientError,
            Some("TransientError") => ErrorClassification::TransientError,
            Some("DatabaseError") => ErrorClassification::DatabaseError,
            _ => ErrorClassification::Unknown,
        }
    }

    /// True for codes that should flip the connection to `Failed` but are expected protocol
    /// noise rather than a caller-visible failure (none at the core level today; kept as the
    /// seam the connection dispatcher calls before `GraphWireError::Server` conversion).
    pub fn is_fatal_to_connection(&self) -> bool {
        !matches!(self.classification(), ErrorClassification::TransientError)
            || self.code.ends_with("LockClientStopped")
    }

    /// `ClientError`s the original driver retries anyway, despite the classification: a leader
    /// switch or a write sent to a read-only member is routing noise, not a caller mistake.
    pub fn is_retriable_client_error(&self) -> bool {
        self.is_leader_switch() || self.is_authorization_expired()
    }

    /// `Neo.ClientError.Cluster.NotALeader` / `Neo.ClientError.General.ForbiddenOnReadOnlyDatabase`:
    /// the write landed on a server that can't take it. The routing table's writer set should
    /// drop this address so the next attempt picks a different one (§4.F `on_write_failure`).
    pub fn is_leader_switch(&self) -> bool {
        matches!(
            self.code.as_str(),
            "Neo.ClientError.Cluster.NotALeader" | "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase"
        )
    }

    pub fn is_authorization_expired(&self) -> bool {
        self.code == "Neo.ClientError.Security.AuthorizationExpired"
    }

    /// The server itself (or the database on it) is going away; the pool should deactivate the
    /// address rather than keep handing out connections to it.
    pub fn is_database_unavailable(&self) -> bool {
        matches!(
            self.code.as_str(),
            "Neo.TransientError.General.DatabaseUnavailable" | "Neo.ClientError.General.ServiceUnavailable"
        )
    }
}
