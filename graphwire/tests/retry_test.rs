use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use graphwire::address::{Address, ResolvedAddress};
use graphwire::collaborators::{AuthToken, Resolver, StaticAuthManager};
use graphwire::config::{PoolConfig, RetryConfig, SessionConfig};
use graphwire::error::Result;
use graphwire::packstream::Value;
use graphwire::pool::ConnectionPool;
use graphwire::session::{Backend, Session};
use graphwire::transaction::Transaction;

use crate::common::{self, ScriptedConnector};

struct FixedResolver(ResolvedAddress);

#[async_trait::async_trait]
impl Resolver for FixedResolver {
    async fn resolve(&self, _address: &Address) -> Result<Vec<ResolvedAddress>> {
        Ok(vec![self.0.clone()])
    }
}

fn test_session(connector: Arc<ScriptedConnector>) -> Session {
    let auth: Arc<dyn graphwire::collaborators::AuthManager> =
        Arc::new(StaticAuthManager(AuthToken(IndexMap::new())));
    let pool = ConnectionPool::new(PoolConfig::default(), auth, connector);
    let resolved = ResolvedAddress::new("testhost", "127.0.0.1".parse::<IpAddr>().unwrap(), 7687);
    let resolver: Arc<dyn Resolver> = Arc::new(FixedResolver(resolved));
    let backend = Backend::Direct {
        pool,
        address: Address::new("testhost", 7687),
    };
    let retry_config = RetryConfig {
        initial_retry_delay: Duration::from_millis(1),
        max_transaction_retry_time: Duration::from_secs(5),
        ..RetryConfig::default()
    };
    Session::new(backend, resolver, SessionConfig::default(), retry_config, None)
}

/// One attempt's work succeeds but its `COMMIT` comes back with a transient server error;
/// `execute_write` opens a fresh transaction and retries, this time committing cleanly and
/// folding the returned bookmark back into the session (§4.G retry loop).
async fn run_one_round(server: &mut tokio::io::DuplexStream, commit_failure: Option<(&str, &str)>) {
    let begin = common::read_request(server).await;
    assert_eq!(begin.tag, graphwire::protocol::tag::BEGIN);
    common::write_success(server, IndexMap::new()).await;

    let run = common::read_request(server).await;
    assert_eq!(run.tag, graphwire::protocol::tag::RUN);
    let mut run_meta = IndexMap::new();
    run_meta.insert("fields".to_string(), Value::List(vec![]));
    common::write_success(server, run_meta).await;

    let discard = common::read_request(server).await;
    assert_eq!(discard.tag, graphwire::protocol::tag::DISCARD);
    let mut discard_meta = IndexMap::new();
    discard_meta.insert("has_more".to_string(), Value::Bool(false));
    common::write_success(server, discard_meta).await;

    let commit = common::read_request(server).await;
    assert_eq!(commit.tag, graphwire::protocol::tag::COMMIT);
    match commit_failure {
        Some((code, message)) => common::write_failure(server, code, message).await,
        None => {
            let mut commit_meta = IndexMap::new();
            commit_meta.insert("bookmark".to_string(), Value::String("bm:retry".to_string()));
            common::write_success(server, commit_meta).await;
        }
    }
}

#[tokio::test]
async fn execute_write_retries_a_transient_commit_failure_then_succeeds() {
    fn failing_script() -> common::ServerScript {
        Box::new(|mut server| {
            Box::pin(async move {
                common::handshake(&mut server).await;
                common::accept_hello(&mut server).await;
                run_one_round(&mut server, Some(("Neo.TransientError.Transaction.Deadlock", "deadlocked"))).await;
            })
        })
    }
    let succeeding: common::ServerScript = Box::new(|mut server| {
        Box::pin(async move {
            common::handshake(&mut server).await;
            common::accept_hello(&mut server).await;
            run_one_round(&mut server, None).await;
        })
    });

    // Two transient `COMMIT` failures, then a clean commit on the third attempt (§8 "execute_write
    // where f raises a retriable error twice and succeeds on the third call").
    let connector = ScriptedConnector::new(vec![failing_script(), failing_script(), succeeding]);
    let mut session = test_session(connector);

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_for_closure = attempts.clone();
    let outcome = session
        .execute_write(move |tx: &mut Transaction| {
            let attempts = attempts_for_closure.clone();
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                let mut stream = tx.run("CREATE (n) RETURN n", IndexMap::new()).await?;
                tx.consume(&mut stream).await?;
                Ok(42)
            })
        })
        .await
        .unwrap();

    assert_eq!(outcome, 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(session.last_bookmarks().await, vec!["bm:retry".to_string()]);
}
