//! gorpc server
//!
//! Exposes in-memory procedures to remote callers over the gorpc wire
//! protocol:
//!
//! - [`Service`] groups named procedures registered as typed async closures.
//! - [`Server`] accepts connections, performs the handshake, executes
//!   requests concurrently over each connection, and serializes responses.
//! - The HTTP mount ([`Server::serve_http`]) tunnels the same protocol
//!   through an HTTP `CONNECT` and serves a small debug page.
//!
//! # Example
//!
//! ```no_run
//! use gorpc_server::{Server, Service};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args {
//!     num1: i64,
//!     num2: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> gorpc_common::Result<()> {
//!     let mut arith = Service::new("Arith")?;
//!     arith.register("Sum", |args: Args| async move {
//!         Ok::<i64, String>(args.num1 + args.num2)
//!     })?;
//!
//!     let server = Arc::new(Server::new());
//!     server.register(arith).await?;
//!
//!     let listener = TcpListener::bind("127.0.0.1:0").await?;
//!     server.accept(listener).await;
//!     Ok(())
//! }
//! ```

pub mod http;
pub mod server;
pub mod service;

pub use http::{DEFAULT_DEBUG_PATH, DEFAULT_RPC_PATH};
pub use server::Server;
pub use service::{Method, Service};
