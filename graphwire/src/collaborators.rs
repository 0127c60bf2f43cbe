//! Pluggable collaborator traits (§6): the seams the core calls out to but never implements
//! itself. Grounded on the teacher's block-compression/connection-manager trait seams, generalized
//! to the five collaborators §6 enumerates.

use async_trait::async_trait;

use crate::address::{Address, ResolvedAddress};
use crate::error::{GraphWireError, Result};

/// Host-name expansion; the identity resolver (one address in, same address out) is the default
/// a caller gets if it registers none.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, address: &Address) -> Result<Vec<ResolvedAddress>>;
}

/// Resolves a single `(host, port)` via the OS resolver and reuses the original host name for
/// TLS SNI on every IP it returns. Not a collaborator override — the fallback the pool uses when
/// no `Resolver` is registered.
pub struct DefaultResolver;

#[async_trait]
impl Resolver for DefaultResolver {
    async fn resolve(&self, address: &Address) -> Result<Vec<ResolvedAddress>> {
        let host_port = format!("{}:{}", address.host, address.port);
        let ips = tokio::net::lookup_host(&host_port)
            .await
            .map_err(|e| GraphWireError::ServiceUnavailable(format!("resolving {host_port}: {e}")))?;
        let resolved: Vec<ResolvedAddress> = ips
            .map(|socket_addr| ResolvedAddress::new(address.host.clone(), socket_addr.ip(), address.port))
            .collect();
        if resolved.is_empty() {
            return Err(GraphWireError::ServiceUnavailable(format!(
                "no addresses returned resolving {host_port}"
            )));
        }
        Ok(resolved)
    }
}

/// An authentication token as handed to `HELLO`/`LOGON`, opaque to the core beyond its wire
/// shape (a packstream map, §3 "Protocol message").
#[derive(Debug, Clone)]
pub struct AuthToken(pub indexmap::IndexMap<String, crate::packstream::Value>);

/// Lazy credential provider, invoked per connection init and again on token-expired failures
/// (§6, §4.C failure policy).
#[async_trait]
pub trait AuthManager: Send + Sync {
    async fn get_auth(&self) -> Result<AuthToken>;
    async fn on_auth_expired(&self, error: &GraphWireError);
}

/// Static single-token auth manager; `on_auth_expired` is a no-op since the token never
/// refreshes itself.
pub struct StaticAuthManager(pub AuthToken);

#[async_trait]
impl AuthManager for StaticAuthManager {
    async fn get_auth(&self) -> Result<AuthToken> {
        Ok(self.0.clone())
    }

    async fn on_auth_expired(&self, _error: &GraphWireError) {}
}

/// mTLS client certificate provider. Returning `None` keeps whatever certificate is already
/// loaded (§6).
#[async_trait]
pub trait ClientCertificateProvider: Send + Sync {
    async fn get_certificate(&self) -> Result<Option<Vec<u8>>>;
}

/// Optional cross-session causal chaining (§4.G "Bookmarks"). `update_bookmarks` receives both
/// the bookmarks the session started a transaction with and the ones it ended with.
#[async_trait]
pub trait BookmarkManager: Send + Sync {
    async fn get_bookmarks(&self) -> Result<Vec<String>>;
    async fn update_bookmarks(&self, previous: &[String], new: &[String]) -> Result<()>;
}

/// Structured domain event sink, orthogonal to the `log` facade the core calls directly
/// (§4.J). Never required; a no-op default satisfies callers who register nothing.
pub trait Logger: Send + Sync {
    fn on_event(&self, message: &str);
}

pub struct NullLogger;

impl Logger for NullLogger {
    fn on_event(&self, _message: &str) {}
}
