//! Shared fixtures: an Arith service over real ephemeral listeners.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use gorpc_server::{Server, Service};

#[derive(Debug, Serialize, Deserialize)]
pub struct Args {
    pub num1: i64,
    pub num2: i64,
}

/// `Sum` adds; `Sleep` waits `num1` milliseconds first.
pub fn arith_service() -> Service {
    let mut arith = Service::new("Arith").unwrap();
    arith
        .register("Sum", |args: Args| async move {
            Ok::<i64, String>(args.num1 + args.num2)
        })
        .unwrap();
    arith
        .register("Sleep", |args: Args| async move {
            tokio::time::sleep(Duration::from_millis(args.num1.max(0) as u64)).await;
            Ok::<i64, String>(args.num1 + args.num2)
        })
        .unwrap();
    arith
}

pub async fn start_server_with(service: Service) -> String {
    let server = Arc::new(Server::new());
    server.register(service).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.accept(listener));
    addr.to_string()
}

/// Plain TCP server exposing Arith; returns `host:port`.
pub async fn start_tcp_server() -> String {
    start_server_with(arith_service()).await
}

/// HTTP-mounted server exposing Arith; returns `host:port`.
pub async fn start_http_server() -> String {
    let server = Arc::new(Server::new());
    server.register(arith_service()).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve_http(listener));
    addr.to_string()
}
