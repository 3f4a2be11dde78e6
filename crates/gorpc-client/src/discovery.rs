//! Server-list discovery and selection.
//!
//! [`MultiServers`] holds a hand-maintained list; [`RegistryDiscovery`]
//! keeps the list synchronized with a registry, refreshing lazily when the
//! stored list is older than its TTL.

use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use gorpc_common::protocol::REGISTRY_SERVERS_HEADER;
use gorpc_common::{Result, RpcError};

/// How a single server is picked out of the current list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    Random,
    RoundRobin,
}

/// An abstraction over a changing set of server addresses plus a selection
/// policy. Addresses use the `protocol@host:port` syntax.
pub trait Discovery: Send + Sync + 'static {
    /// Re-fetches the server list from its source, when there is one.
    fn refresh(&self) -> impl Future<Output = Result<()>> + Send;

    /// Replaces the server list.
    fn update(&self, servers: Vec<String>) -> impl Future<Output = Result<()>> + Send;

    /// Picks one server per `mode`.
    fn get(&self, mode: SelectMode) -> impl Future<Output = Result<String>> + Send;

    /// Snapshot of every known server.
    fn get_all(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}

struct Servers {
    list: Vec<String>,
    index: usize,
}

/// Static discovery over a hand-maintained server list.
///
/// The round-robin index starts at a random offset so a fleet of clients
/// booted together does not hammer the same server in lockstep.
pub struct MultiServers {
    inner: StdMutex<Servers>,
}

impl MultiServers {
    pub fn new(servers: Vec<String>) -> MultiServers {
        MultiServers {
            inner: StdMutex::new(Servers {
                list: servers,
                index: rand::thread_rng().gen_range(0..u32::MAX as usize),
            }),
        }
    }

    fn select(&self, mode: SelectMode) -> Result<String> {
        let mut servers = self.inner.lock().unwrap();
        let n = servers.list.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServers);
        }
        match mode {
            SelectMode::Random => Ok(servers.list[rand::thread_rng().gen_range(0..n)].clone()),
            SelectMode::RoundRobin => {
                let picked = servers.list[servers.index % n].clone();
                servers.index = (servers.index + 1) % n;
                Ok(picked)
            }
        }
    }
}

impl Discovery for MultiServers {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.inner.lock().unwrap().list = servers;
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.select(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().unwrap().list.clone())
    }
}

/// Default staleness bound before a registry-backed list is re-fetched.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(10);

/// Discovery backed by a registry endpoint.
///
/// `get`/`get_all` refresh lazily when the stored list is older than the
/// TTL. Concurrent callers may each trigger a refresh; the registry GET is
/// idempotent so the races are harmless.
pub struct RegistryDiscovery {
    servers: MultiServers,
    registry: String,
    refresh_ttl: Duration,
    last_update: StdMutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    /// `registry` is the full endpoint URL, e.g.
    /// `http://127.0.0.1:9999/mygorpc/registry`.
    pub fn new(registry: impl Into<String>, refresh_ttl: Option<Duration>) -> RegistryDiscovery {
        RegistryDiscovery {
            servers: MultiServers::new(Vec::new()),
            registry: registry.into(),
            refresh_ttl: refresh_ttl.unwrap_or(DEFAULT_REFRESH_TTL),
            last_update: StdMutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    fn is_fresh(&self) -> bool {
        self.last_update
            .lock()
            .unwrap()
            .is_some_and(|at| at.elapsed() < self.refresh_ttl)
    }

    async fn ensure_fresh(&self) -> Result<()> {
        if self.is_fresh() {
            return Ok(());
        }
        self.refresh_now().await
    }

    async fn refresh_now(&self) -> Result<()> {
        debug!("rpc discovery: refresh servers from registry {}", self.registry);
        let response = self
            .http
            .get(&self.registry)
            .send()
            .await
            .map_err(|e| RpcError::Registry(e.to_string()))?;
        let listed = response
            .headers()
            .get(REGISTRY_SERVERS_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let servers: Vec<String> = listed
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(String::from)
            .collect();

        self.servers.update(servers).await?;
        *self.last_update.lock().unwrap() = Some(Instant::now());
        Ok(())
    }
}

impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        self.refresh_now().await
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.servers.update(servers).await?;
        *self.last_update.lock().unwrap() = Some(Instant::now());
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.ensure_fresh().await?;
        self.servers.get(mode).await
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        self.ensure_fresh().await?;
        self.servers.get_all().await
    }
}
