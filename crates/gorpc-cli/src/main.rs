//! # gorpc CLI entry point
//!
//! Main binary for the gorpc RPC framework. Runs a registry, runs a demo
//! server, and makes calls through the load-balanced client.
//!
//! ## Usage
//!
//! ```bash
//! # Start a registry
//! gorpc registry -b 0.0.0.0:9999
//!
//! # Start a demo server that heartbeats to the registry
//! gorpc server --registry http://127.0.0.1:9999/mygorpc/registry
//!
//! # Call Arith.Sum on one server picked by the balancer
//! gorpc call Arith Sum -a '{"num1":2,"num2":3}' \
//!     --registry http://127.0.0.1:9999/mygorpc/registry
//!
//! # Or without a registry, against explicit servers
//! gorpc call Arith Sum -a '{"num1":2,"num2":3}' -s tcp@127.0.0.1:9001
//!
//! # Fan the call out to every known server
//! gorpc broadcast Arith Sum -a '{"num1":2,"num2":3}' -s tcp@127.0.0.1:9001
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::info;

use gorpc_client::{MultiServers, RegistryDiscovery, SelectMode, XClient};
use gorpc_common::ConnectOptions;
use gorpc_registry::{Registry, DEFAULT_REGISTRY_PATH};
use gorpc_server::{Server, Service};

/// gorpc - a load-balanced RPC framework
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available subcommands: long-running registry/server processes plus
/// one-shot call and broadcast clients.
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Registry(RegistryArgs),
    Server(ServerArgs),
    Call(CallArgs),
    Broadcast(BroadcastArgs),
}

/// start a registry
#[derive(FromArgs)]
#[argh(subcommand, name = "registry")]
struct RegistryArgs {
    /// address to bind the registry's HTTP endpoint to
    #[argh(option, short = 'b', default = "\"0.0.0.0:9999\".into()")]
    bind: String,

    /// member liveness window in seconds; 0 means entries never expire
    #[argh(option, long = "timeout-secs", default = "300")]
    timeout_secs: u64,
}

/// start a demo server exposing the Arith service
#[derive(FromArgs)]
#[argh(subcommand, name = "server")]
struct ServerArgs {
    /// address to bind the RPC listener to
    #[argh(option, short = 'b', default = "\"127.0.0.1:0\".into()")]
    bind: String,

    /// registry endpoint URL to heartbeat to
    ///
    /// When set, the server registers itself and refreshes its entry
    /// periodically so balanced clients can discover it.
    #[argh(option, long = "registry")]
    registry: Option<String>,

    /// serve over the HTTP CONNECT transport instead of plain TCP
    #[argh(switch, long = "http")]
    http: bool,
}

/// call a method on one server picked by the balancer
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
struct CallArgs {
    /// service name, e.g. Arith
    #[argh(positional)]
    service: String,

    /// method name, e.g. Sum
    #[argh(positional)]
    method: String,

    /// JSON string with the call arguments
    #[argh(option, short = 'a', long = "args", default = "\"{}\".into()")]
    args: String,

    /// registry endpoint URL to discover servers from
    #[argh(option, long = "registry")]
    registry: Option<String>,

    /// explicit server address (protocol@host:port); repeatable
    #[argh(option, short = 's', long = "server")]
    servers: Vec<String>,

    /// selection mode: random or roundrobin
    #[argh(option, short = 'm', long = "mode", default = "\"random\".into()")]
    mode: String,
}

/// invoke a method on every known server, keeping the first success
#[derive(FromArgs)]
#[argh(subcommand, name = "broadcast")]
struct BroadcastArgs {
    /// service name, e.g. Arith
    #[argh(positional)]
    service: String,

    /// method name, e.g. Sum
    #[argh(positional)]
    method: String,

    /// JSON string with the call arguments
    #[argh(option, short = 'a', long = "args", default = "\"{}\".into()")]
    args: String,

    /// registry endpoint URL to discover servers from
    #[argh(option, long = "registry")]
    registry: Option<String>,

    /// explicit server address (protocol@host:port); repeatable
    #[argh(option, short = 's', long = "server")]
    servers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Args {
    num1: i64,
    num2: i64,
}

/// The demo service from the examples: `Sum` adds, `Sleep` waits `num1`
/// seconds first.
fn arith_service() -> gorpc_common::Result<Service> {
    let mut arith = Service::new("Arith")?;
    arith.register("Sum", |args: Args| async move {
        Ok::<i64, String>(args.num1 + args.num2)
    })?;
    arith.register("Sleep", |args: Args| async move {
        tokio::time::sleep(Duration::from_secs(args.num1.max(0) as u64)).await;
        Ok::<i64, String>(args.num1 + args.num2)
    })?;
    Ok(arith)
}

fn parse_mode(mode: &str) -> Result<SelectMode> {
    match mode {
        "random" => Ok(SelectMode::Random),
        "roundrobin" | "round-robin" => Ok(SelectMode::RoundRobin),
        other => Err(anyhow::anyhow!(
            "unknown selection mode '{other}', expected random or roundrobin"
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep call/broadcast output clean for unix tool usage (piping to jq):
    // only the long-running commands get log output.
    if matches!(cli.command, Commands::Registry(_) | Commands::Server(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Registry(args) => run_registry(args).await,
        Commands::Server(args) => run_server(args).await,
        Commands::Call(args) => {
            let mode = parse_mode(&args.mode)?;
            run_call(
                args.service,
                args.method,
                args.args,
                args.registry,
                args.servers,
                mode,
                false,
            )
            .await
        }
        Commands::Broadcast(args) => {
            run_call(
                args.service,
                args.method,
                args.args,
                args.registry,
                args.servers,
                SelectMode::Random,
                true,
            )
            .await
        }
    }
}

async fn run_registry(args: RegistryArgs) -> Result<()> {
    let registry = Arc::new(Registry::new(Duration::from_secs(args.timeout_secs)));
    let listener = TcpListener::bind(&args.bind).await?;
    info!("rpc registry listening on {}", listener.local_addr()?);
    registry.serve(listener, DEFAULT_REGISTRY_PATH).await?;
    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let server = Arc::new(Server::new());
    server.register(arith_service()?).await?;

    let listener = TcpListener::bind(&args.bind).await?;
    let addr = listener.local_addr()?;
    let scheme = if args.http { "http" } else { "tcp" };
    info!("rpc server listening on {scheme}@{addr}");

    if let Some(registry) = args.registry {
        gorpc_registry::heartbeat(registry, format!("{scheme}@{addr}"), Duration::ZERO);
    }

    if args.http {
        server.serve_http(listener).await;
    } else {
        server.accept(listener).await;
    }
    Ok(())
}

async fn run_call(
    service: String,
    method: String,
    args: String,
    registry: Option<String>,
    servers: Vec<String>,
    mode: SelectMode,
    broadcast: bool,
) -> Result<()> {
    let args: Value =
        serde_json::from_str(&args).map_err(|e| anyhow::anyhow!("invalid JSON in args: {e}"))?;

    let reply: Value = if let Some(registry) = registry {
        let discovery = RegistryDiscovery::new(registry, None);
        let xclient = XClient::new(discovery, mode, ConnectOptions::default());
        if broadcast {
            xclient.broadcast(&service, &method, &args).await?
        } else {
            xclient.call(&service, &method, &args).await?
        }
    } else if !servers.is_empty() {
        let discovery = MultiServers::new(servers);
        let xclient = XClient::new(discovery, mode, ConnectOptions::default());
        if broadcast {
            xclient.broadcast(&service, &method, &args).await?
        } else {
            xclient.call(&service, &method, &args).await?
        }
    } else {
        return Err(anyhow::anyhow!(
            "either --registry or --server is required"
        ));
    };

    println!("{}", serde_json::to_string(&reply)?);
    Ok(())
}
