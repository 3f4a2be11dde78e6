//! gorpc common types and frame codec
//!
//! This crate provides the protocol definitions and the wire codec shared by
//! every gorpc component:
//!
//! - **Protocol layer**: the [`Header`] exchanged on every frame, the
//!   [`ConnectOptions`] handshake record, and the [`RpcError`] error type.
//! - **Codec layer**: frame-level encode/decode of a header record plus an
//!   opaque body value over a duplex byte stream.
//!
//! # Wire protocol
//!
//! A connection starts with a single JSON handshake document
//! ([`ConnectOptions`]) identifying the protocol (magic number) and the codec
//! to use for everything that follows. After the handshake both sides
//! exchange `(Header, body)` frame pairs in the negotiated codec.

pub mod codec;
pub mod protocol;

pub use protocol::error::{Result, RpcError};
pub use protocol::{ConnectOptions, Header, MAGIC};
