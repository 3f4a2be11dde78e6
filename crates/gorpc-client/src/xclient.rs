//! Load-balanced multi-server client.
//!
//! Pools one [`Client`] per server address, asks the discovery which server
//! to talk to, and keeps the pool healthy by evicting clients that went
//! unavailable. Addresses carry a scheme prefix (`tcp@host:port` or
//! `http@host:port`) selecting the dial path.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::debug;

use gorpc_common::{ConnectOptions, Result, RpcError};

use crate::client::Client;
use crate::discovery::{Discovery, SelectMode};

type Pool = Arc<Mutex<HashMap<String, Arc<Client>>>>;

enum Scheme {
    Tcp,
    Http,
}

fn parse_rpc_addr(rpc_addr: &str) -> Result<(Scheme, &str)> {
    match rpc_addr.split_once('@') {
        Some(("tcp", addr)) => Ok((Scheme::Tcp, addr)),
        Some(("http", addr)) => Ok((Scheme::Http, addr)),
        _ => Err(RpcError::InvalidAddress(rpc_addr.to_string())),
    }
}

/// Returns the pooled client for `rpc_addr`, dialing a fresh one when the
/// cache is empty or holds a client that is no longer available.
async fn dial_pooled(pool: &Pool, options: &ConnectOptions, rpc_addr: &str) -> Result<Arc<Client>> {
    let mut clients = pool.lock().await;
    if let Some(client) = clients.get(rpc_addr) {
        if client.is_available() {
            return Ok(Arc::clone(client));
        }
        debug!("rpc client: evicting dead connection to {rpc_addr}");
        let _ = client.close();
        clients.remove(rpc_addr);
    }

    let (scheme, addr) = parse_rpc_addr(rpc_addr)?;
    let client = match scheme {
        Scheme::Tcp => Client::dial(addr, options.clone()).await?,
        Scheme::Http => Client::dial_http(addr, options.clone()).await?,
    };
    let client = Arc::new(client);
    clients.insert(rpc_addr.to_string(), Arc::clone(&client));
    Ok(client)
}

/// A client that load-balances across every server the discovery knows.
pub struct XClient<D: Discovery> {
    discovery: D,
    mode: SelectMode,
    options: ConnectOptions,
    clients: Pool,
}

impl<D: Discovery> XClient<D> {
    pub fn new(discovery: D, mode: SelectMode, options: ConnectOptions) -> XClient<D> {
        XClient {
            discovery,
            mode,
            options,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn discovery(&self) -> &D {
        &self.discovery
    }

    /// Closes every pooled client and clears the pool.
    pub async fn close(&self) {
        let mut clients = self.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close();
        }
    }

    /// Calls `service.method` on one server chosen by the selection policy.
    pub async fn call<A, R>(&self, service: &str, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let rpc_addr = self.discovery.get(self.mode).await?;
        self.call_addr(&rpc_addr, service, method, args).await
    }

    /// Calls `service.method` on a specific server.
    pub async fn call_addr<A, R>(
        &self,
        rpc_addr: &str,
        service: &str,
        method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let client = dial_pooled(&self.clients, &self.options, rpc_addr).await?;
        client.call(service, method, args).await
    }

    /// Invokes `service.method` on every known server concurrently.
    ///
    /// Each sibling decodes into its own fresh reply value, so concurrent
    /// completions never share a container. The first failure is recorded
    /// and aborts the remaining siblings (detaching their pending calls);
    /// the first success is kept and later successes are ignored. Dropping
    /// the returned future, as a caller deadline does, aborts all in-flight
    /// siblings the same way.
    pub async fn broadcast<A, R>(&self, service: &str, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let servers = self.discovery.get_all().await?;
        if servers.is_empty() {
            return Err(RpcError::NoAvailableServers);
        }
        let args = serde_json::to_value(args)?;

        let mut calls: JoinSet<Result<R>> = JoinSet::new();
        for rpc_addr in servers {
            let pool = Arc::clone(&self.clients);
            let options = self.options.clone();
            let service = service.to_string();
            let method = method.to_string();
            let args = args.clone();
            calls.spawn(async move {
                let client = dial_pooled(&pool, &options, &rpc_addr).await?;
                client.call::<Value, R>(&service, &method, &args).await
            });
        }

        let mut first_error: Option<RpcError> = None;
        let mut reply: Option<R> = None;
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok(Ok(r)) => {
                    if reply.is_none() {
                        reply = Some(r);
                    }
                }
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                        calls.abort_all();
                    }
                }
                Err(join_error) => {
                    // Aborted siblings surface here; anything else is a
                    // sibling task failure and counts as an error.
                    if !join_error.is_cancelled() && first_error.is_none() {
                        first_error = Some(RpcError::Disconnected(join_error.to_string()));
                        calls.abort_all();
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => reply.ok_or(RpcError::NoAvailableServers),
        }
    }
}
