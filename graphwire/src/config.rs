//! Typed, defaulted configuration structs (§4.K, §6). Grounded on the teacher's `ClientOptions`:
//! one struct per concern, plain fields, a `Default` impl carrying the spec's enumerated
//! defaults, constructed by a caller outside this crate (URI/DSN parsing is out of scope, §1).

use std::time::Duration;

use crate::protocol::AccessMode;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Negative/`None` = unbounded.
    pub max_connection_pool_size: Option<usize>,
    pub connection_acquisition_timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connection_lifetime: Option<Duration>,
    pub keep_alive: bool,
    pub liveness_check_timeout: Option<Duration>,
    pub encrypted: bool,
    pub user_agent: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connection_pool_size: Some(100),
            connection_acquisition_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(30),
            max_connection_lifetime: Some(Duration::from_secs(3600)),
            keep_alive: true,
            liveness_check_timeout: None,
            encrypted: false,
            user_agent: format!("graphwire/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub default_access_mode: AccessMode,
    pub database: Option<String>,
    pub fetch_size: i64,
    pub bookmarks: Vec<String>,
    pub impersonated_user: Option<String>,
    pub notifications_min_severity: Option<String>,
    pub notifications_disabled_classifications: Option<Vec<String>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_access_mode: AccessMode::Write,
            database: None,
            fetch_size: 1000,
            bookmarks: Vec::new(),
            impersonated_user: None,
            notifications_min_severity: None,
            notifications_disabled_classifications: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_retry_delay: Duration,
    pub retry_delay_multiplier: f64,
    pub retry_delay_jitter_factor: f64,
    pub max_transaction_retry_time: Duration,
    /// Server error codes that are `TransientError` by category but should not be retried
    /// anyway (§7's "denylist"; decided configuration-driven in DESIGN.md).
    pub non_retriable_codes: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_retry_delay: Duration::from_secs(1),
            retry_delay_multiplier: 2.0,
            retry_delay_jitter_factor: 0.2,
            max_transaction_retry_time: Duration::from_secs(30),
            non_retriable_codes: vec![
                "Neo.ClientError.Transaction.TransactionTerminated".to_string(),
                "Neo.TransientError.Transaction.LockClientStopped".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub routing_table_purge_delay: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            routing_table_purge_delay: Duration::from_secs(30),
        }
    }
}
