//! Core protocol records.
//!
//! Every request and every response is framed as a [`Header`] followed by an
//! opaque body value. A connection is prefixed by exactly one
//! [`ConnectOptions`] handshake document, always encoded as JSON so the codec
//! type is known before codec-specific decoding begins.

pub mod error;

use serde::{Deserialize, Serialize};

use crate::codec::JSON_TYPE;

/// Sentinel identifying a gorpc connection. A handshake carrying any other
/// value is rejected before any frame is exchanged.
pub const MAGIC: i32 = 0x0312ff;

/// Default bound on dial + handshake, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Path targeted by the HTTP transport's `CONNECT` request.
pub const DEFAULT_RPC_PATH: &str = "/_gorpc_";

/// Status line acknowledging a `CONNECT`; fixed by the wire protocol, which
/// is why the HTTP mount writes it to the socket directly.
pub const HTTP_CONNECTED_LINE: &str = "HTTP/1.0 200 Connected to GoRPC";

/// Registry endpoint path.
pub const DEFAULT_REGISTRY_PATH: &str = "/mygorpc/registry";

/// Response header carrying the comma-separated alive-server list.
pub const REGISTRY_SERVERS_HEADER: &str = "GoRPC-Servers";

/// Request header naming the member posting a heartbeat.
pub const REGISTRY_SERVER_HEADER: &str = "GoRPC-Server";

/// Frame header, sent ahead of every request and response body.
///
/// `error` is empty on requests and on successful responses. A non-empty
/// `error` marks a failed response; the body that follows is a placeholder
/// and must be ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub service: String,
    pub method: String,
    pub seq: u64,
    #[serde(default)]
    pub error: String,
}

impl Header {
    pub fn request(service: impl Into<String>, method: impl Into<String>, seq: u64) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            seq,
            error: String::new(),
        }
    }
}

/// Handshake record, sent once per connection by the client.
///
/// Only `magic` and `codec_type` are meaningful on the wire; the timeouts
/// configure local behavior (the client bounds its dial with
/// `connect_timeout_ms`, the server bounds each handler with
/// `handle_timeout_ms`). Zero means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub magic: i32,
    pub codec_type: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub handle_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            codec_type: JSON_TYPE.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            handle_timeout_ms: 0,
        }
    }
}

impl ConnectOptions {
    /// Bound the server-side handling of each request, in milliseconds.
    pub fn with_handle_timeout(mut self, ms: u64) -> Self {
        self.handle_timeout_ms = ms;
        self
    }

    /// Bound dial + handshake, in milliseconds. Zero disables the bound.
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }
}
