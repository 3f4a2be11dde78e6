//! gorpc client
//!
//! Three layers, lowest first:
//!
//! - [`Client`] multiplexes many concurrent calls over one connection: a
//!   background receive task correlates responses to callers by sequence
//!   number, and dropping an in-flight call detaches it without disturbing
//!   the connection.
//! - [`Discovery`] abstracts over a changing set of server addresses with a
//!   selection policy: a static list ([`MultiServers`]) or a registry-backed
//!   list refreshed by TTL ([`RegistryDiscovery`]).
//! - [`XClient`] pools one `Client` per server and routes calls through the
//!   discovery: `call` picks one server, `broadcast` fans out to all of them
//!   and cancels the rest on the first failure.
//!
//! # Example
//!
//! ```no_run
//! use gorpc_client::{MultiServers, SelectMode, XClient};
//! use gorpc_common::ConnectOptions;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args {
//!     num1: i64,
//!     num2: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> gorpc_common::Result<()> {
//!     let discovery = MultiServers::new(vec!["tcp@127.0.0.1:9999".to_string()]);
//!     let xclient = XClient::new(discovery, SelectMode::Random, ConnectOptions::default());
//!     let sum: i64 = xclient
//!         .call("Arith", "Sum", &Args { num1: 2, num2: 3 })
//!         .await?;
//!     assert_eq!(sum, 5);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod discovery;
pub mod xclient;

pub use client::Client;
pub use discovery::{Discovery, MultiServers, RegistryDiscovery, SelectMode};
pub use xclient::XClient;
