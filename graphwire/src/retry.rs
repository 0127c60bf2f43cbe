//! Retry back-off and retriability classification (§4.G, §7). Grounded on the teacher's
//! `lock.rs` retry-loop shape (attempt counter + sleep between tries), generalized to the
//! exponential-backoff-with-jitter schedule §4.G specifies.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{ErrorClassification, GraphWireError};

/// Whether `error` should trigger another attempt of a managed transaction (§4.G, §7).
pub fn is_retriable(error: &GraphWireError, config: &RetryConfig) -> bool {
    match error {
        GraphWireError::ServiceUnavailable(_) | GraphWireError::SessionExpired(_) => true,
        GraphWireError::Server(server_error) => {
            if config.non_retriable_codes.iter().any(|code| code == &server_error.code) {
                return false;
            }
            matches!(server_error.classification(), ErrorClassification::TransientError)
                || server_error.is_retriable_client_error()
        }
        _ => false,
    }
}

/// `initial * multiplier^attempt * (1 ± jitter)`, the schedule §4.G names. `attempt` is
/// zero-based; the first attempt (§4.G "does not count toward the deadline") never calls this.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_retry_delay.as_secs_f64() * config.retry_delay_multiplier.powi(attempt as i32);
    let jitter_span = base * config.retry_delay_jitter_factor;
    let jitter = rand::rng().random_range(-jitter_span..=jitter_span);
    Duration::from_secs_f64((base + jitter).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;

    #[test]
    fn transient_error_is_retriable_unless_denylisted() {
        let config = RetryConfig::default();
        let deadlock = GraphWireError::Server(ServerError::new(
            "Neo.TransientError.Transaction.Deadlock",
            "deadlocked",
        ));
        assert!(is_retriable(&deadlock, &config));

        let terminated = GraphWireError::Server(ServerError::new(
            "Neo.ClientError.Transaction.TransactionTerminated",
            "terminated",
        ));
        assert!(!is_retriable(&terminated, &config));
    }

    #[test]
    fn client_and_database_errors_are_not_retriable() {
        let config = RetryConfig::default();
        let syntax = GraphWireError::Server(ServerError::new("Neo.ClientError.Statement.SyntaxError", "bad"));
        assert!(!is_retriable(&syntax, &config));
    }

    #[test]
    fn leader_switch_and_authorization_expired_are_retriable_despite_client_classification() {
        let config = RetryConfig::default();
        let not_a_leader = GraphWireError::Server(ServerError::new("Neo.ClientError.Cluster.NotALeader", "not a leader"));
        assert!(is_retriable(&not_a_leader, &config));

        let forbidden = GraphWireError::Server(ServerError::new(
            "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase",
            "read-only",
        ));
        assert!(is_retriable(&forbidden, &config));

        let auth_expired = GraphWireError::Server(ServerError::new(
            "Neo.ClientError.Security.AuthorizationExpired",
            "expired",
        ));
        assert!(is_retriable(&auth_expired, &config));
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter_bounds() {
        let config = RetryConfig::default();
        let d0 = backoff_delay(&config, 0).as_secs_f64();
        let d1 = backoff_delay(&config, 1).as_secs_f64();
        assert!((0.8..=1.2).contains(&d0));
        assert!((1.6..=2.4).contains(&d1));
    }
}
