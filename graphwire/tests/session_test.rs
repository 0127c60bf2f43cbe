use std::net::IpAddr;
use std::sync::Arc;

use indexmap::IndexMap;

use graphwire::address::{Address, ResolvedAddress};
use graphwire::collaborators::{AuthToken, Resolver, StaticAuthManager};
use graphwire::config::{PoolConfig, RetryConfig, SessionConfig};
use graphwire::error::Result;
use graphwire::packstream::Value;
use graphwire::pool::ConnectionPool;
use graphwire::session::{Backend, Session};

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
    Session::new(backend, resolver, SessionConfig::default(), RetryConfig::default(), None)
}

/// An auto-commit `Session::run` streams records across a `PULL` and folds the bookmark the
/// server returns into `Session::last_bookmarks` once the result is fully drained.
#[tokio::test]
async fn auto_commit_run_streams_records_and_collects_bookmark() {
    let script: common::ServerScript = Box::new(|mut server| {
        Box::pin(async move {
            common::handshake(&mut server).await;
            common::accept_hello(&mut server).await;

            let run = common::read_request(&mut server).await;
            assert_eq!(run.tag, graphwire::protocol::tag::RUN);
            let mut run_meta = IndexMap::new();
            run_meta.insert("fields".to_string(), Value::List(vec![Value::String("n".to_string())]));
            common::write_success(&mut server, run_meta).await;

            let pull = common::read_request(&mut server).await;
            assert_eq!(pull.tag, graphwire::protocol::tag::PULL);
            common::write_record(&mut server, vec![Value::Int(1)]).await;
            common::write_record(&mut server, vec![Value::Int(2)]).await;
            let mut pull_meta = IndexMap::new();
            pull_meta.insert("has_more".to_string(), Value::Bool(false));
            pull_meta.insert("bookmark".to_string(), Value::String("bm:1".to_string()));
            common::write_success(&mut server, pull_meta).await;
        })
    });

    let connector = ScriptedConnector::new(vec![script]);
    let mut session = test_session(connector);

    let mut result = session.run("RETURN 1 AS n", IndexMap::new()).await.unwrap();
    assert_eq!(result.keys(), &["n".to_string()]);

    let records = result.fetch(10).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get_index(0), Some(&Value::Int(1)));
    assert_eq!(records[1].get_index(0), Some(&Value::Int(2)));

    assert_eq!(session.last_bookmarks().await, vec!["bm:1".to_string()]);
}
