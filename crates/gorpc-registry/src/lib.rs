//! gorpc registry
//!
//! A lightweight registry tracking cluster membership by heartbeat. Servers
//! `POST` their address periodically; clients `GET` the alive list back as a
//! comma-separated response header. Entries whose last heartbeat is older
//! than the registry timeout are pruned on read.
//!
//! State is in-memory only: after a restart the picture rebuilds within one
//! heartbeat period.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use gorpc_common::protocol::{
    DEFAULT_REGISTRY_PATH, REGISTRY_SERVERS_HEADER, REGISTRY_SERVER_HEADER,
};
use gorpc_common::{Result, RpcError};

/// Default liveness window for registered members.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// In-memory member registry with TTL-based liveness.
pub struct Registry {
    timeout: Duration,
    servers: StdMutex<HashMap<String, Instant>>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new(DEFAULT_TIMEOUT)
    }
}

impl Registry {
    /// A zero `timeout` means entries never expire.
    pub fn new(timeout: Duration) -> Registry {
        Registry {
            timeout,
            servers: StdMutex::new(HashMap::new()),
        }
    }

    /// Upserts a member with a fresh heartbeat timestamp.
    pub fn put_server(&self, addr: &str) {
        let mut servers = self.servers.lock().unwrap();
        servers.insert(addr.to_string(), Instant::now());
    }

    /// Returns the sorted alive list, pruning expired entries as it goes.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        if !self.timeout.is_zero() {
            servers.retain(|_, heartbeat| heartbeat.elapsed() <= self.timeout);
        }
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// Serves the registry endpoint at `path` until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, path: impl Into<String>) -> Result<()> {
        let path: Arc<str> = Arc::from(path.into());
        info!("rpc registry: serving at {path}");
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let registry = Arc::clone(&self);
            let path = Arc::clone(&path);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let registry = Arc::clone(&registry);
                    let path = Arc::clone(&path);
                    async move { Ok::<_, Infallible>(registry.handle(req, &path)) }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("rpc registry: connection error: {e}");
                }
            });
        }
    }

    fn handle(&self, req: Request<Incoming>, path: &str) -> Response<Full<Bytes>> {
        if req.uri().path() != path {
            return status_response(StatusCode::NOT_FOUND);
        }

        let method = req.method();
        if method == Method::GET {
            let alive = self.alive_servers().join(",");
            match Response::builder()
                .header(REGISTRY_SERVERS_HEADER, alive)
                .body(Full::new(Bytes::new()))
            {
                Ok(response) => response,
                Err(e) => {
                    error!("rpc registry: response build error: {e}");
                    status_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        } else if method == Method::POST {
            let addr = req
                .headers()
                .get(REGISTRY_SERVER_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();
            if addr.is_empty() {
                warn!("rpc registry: heartbeat without {REGISTRY_SERVER_HEADER} header");
                return status_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
            self.put_server(addr);
            status_response(StatusCode::OK)
        } else {
            status_response(StatusCode::METHOD_NOT_ALLOWED)
        }
    }
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Keeps `addr` registered at `registry`: posts one heartbeat immediately,
/// then one every `period` until a post fails.
///
/// A zero `period` defaults to the registry timeout minus a minute, so a
/// member refreshes before its entry can expire.
pub fn heartbeat(registry: String, addr: String, period: Duration) -> JoinHandle<()> {
    let period = if period.is_zero() {
        DEFAULT_TIMEOUT - Duration::from_secs(60)
    } else {
        period
    };
    tokio::spawn(async move {
        let http = reqwest::Client::new();
        if let Err(e) = send_heartbeat(&http, &registry, &addr).await {
            warn!("rpc server: heartbeat error: {e}");
            return;
        }
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately and we have already posted.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = send_heartbeat(&http, &registry, &addr).await {
                warn!("rpc server: heartbeat error: {e}");
                return;
            }
        }
    })
}

async fn send_heartbeat(http: &reqwest::Client, registry: &str, addr: &str) -> Result<()> {
    debug!("{addr} send heartbeat to registry {registry}");
    let response = http
        .post(registry)
        .header(REGISTRY_SERVER_HEADER, addr)
        .send()
        .await
        .map_err(|e| RpcError::Registry(e.to_string()))?;
    if !response.status().is_success() {
        return Err(RpcError::Registry(format!(
            "heartbeat rejected: {}",
            response.status()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_lists_are_sorted() {
        let registry = Registry::new(DEFAULT_TIMEOUT);
        registry.put_server("tcp@host-b:1");
        registry.put_server("tcp@host-a:1");
        registry.put_server("tcp@host-c:1");
        assert_eq!(
            registry.alive_servers(),
            vec!["tcp@host-a:1", "tcp@host-b:1", "tcp@host-c:1"]
        );
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_on_read() {
        let registry = Registry::new(Duration::from_millis(100));
        registry.put_server("tcp@host-a:1");
        assert_eq!(registry.alive_servers(), vec!["tcp@host-a:1"]);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(registry.alive_servers().is_empty());
        // The read deleted the entry, not just filtered it.
        assert!(registry.servers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn heartbeat_renews_liveness() {
        let registry = Registry::new(Duration::from_millis(200));
        registry.put_server("tcp@host-a:1");
        tokio::time::sleep(Duration::from_millis(120)).await;
        registry.put_server("tcp@host-a:1");
        tokio::time::sleep(Duration::from_millis(120)).await;
        // 240ms after the first beat but only 120ms after the second.
        assert_eq!(registry.alive_servers(), vec!["tcp@host-a:1"]);
    }

    #[tokio::test]
    async fn zero_timeout_never_expires() {
        let registry = Registry::new(Duration::ZERO);
        registry.put_server("tcp@host-a:1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.alive_servers(), vec!["tcp@host-a:1"]);
    }
}
