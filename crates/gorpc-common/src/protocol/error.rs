use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    /// Clean end-of-stream on a frame boundary.
    #[error("connection closed")]
    Eof,

    #[error("rpc server: invalid magic number {0:#x}")]
    InvalidMagic(i32),

    #[error("rpc: invalid codec type {0}")]
    InvalidCodec(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection is closing or has already shut down; no new calls are
    /// admitted and outstanding calls are failed with this error.
    #[error("rpc client: connection is shut down")]
    Shutdown,

    #[error("rpc client: already closed")]
    AlreadyClosed,

    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// An error reported by the remote side in `Header::error`.
    #[error("{0}")]
    Remote(String),

    /// The transport failed mid-conversation; carries the underlying cause as
    /// text so it can fan out to every pending call.
    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("rpc discovery: no available servers")]
    NoAvailableServers,

    #[error("rpc registry: {0}")]
    Registry(String),

    #[error("rpc client: wrong address format {0:?}, expect protocol@addr")]
    InvalidAddress(String),

    #[error("rpc client: unexpected HTTP CONNECT response: {0}")]
    HttpConnect(String),

    #[error("rpc server: service already defined: {0}")]
    DuplicateService(String),

    #[error("rpc server: {0} is not a valid service name")]
    InvalidServiceName(String),

    #[error("rpc server: method already defined: {0}")]
    DuplicateMethod(String),

    #[error("rpc server: {0} is not a valid method name")]
    InvalidMethodName(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;
