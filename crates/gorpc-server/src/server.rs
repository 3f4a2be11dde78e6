//! Connection dispatcher.
//!
//! Each accepted connection runs a two-phase protocol: one JSON handshake
//! document, then a stream of `(Header, body)` request frames. Requests on a
//! connection execute concurrently on spawned tasks while body decoding stays
//! strictly sequential; a connection-scoped mutex serializes response writes
//! so frames never interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use gorpc_common::codec::{
    new_codec, read_options, BoxedRead, BoxedWrite, CodecKind, FrameReader, FrameWriter,
};
use gorpc_common::{ConnectOptions, Header, Result, RpcError, MAGIC};

use crate::service::{Method, Service};

/// In-band error message sent when a handler misses its deadline.
pub const REQUEST_TIMEOUT_ERROR: &str = "rpc server: request handle timeout";

/// RPC server: a set of registered services plus the accept/dispatch loops.
#[derive(Default)]
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Server {
    pub fn new() -> Server {
        Server::default()
    }

    /// Adds a service to the dispatch map, rejecting duplicates.
    pub async fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().await;
        if services.contains_key(service.name()) {
            return Err(RpcError::DuplicateService(service.name().to_string()));
        }
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    pub(crate) async fn services_snapshot(&self) -> Vec<Arc<Service>> {
        let services = self.services.read().await;
        let mut snapshot: Vec<_> = services.values().cloned().collect();
        snapshot.sort_by(|a, b| a.name().cmp(b.name()));
        snapshot
    }

    /// Accepts connections until the listener fails, serving each on its own
    /// task. A fatal accept error ends the loop.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("rpc server: connection from {peer}");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.serve_conn(stream).await });
                }
                Err(e) => {
                    error!("rpc server: accept error: {e}");
                    return;
                }
            }
        }
    }

    /// Serves one connection: handshake, then the request loop. The
    /// connection closes when this returns.
    pub async fn serve_conn<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let reader = BufReader::new(Box::new(read) as BoxedRead);
        self.serve_io(reader, Box::new(write)).await;
    }

    /// Handshake + request loop over already-split halves. The HTTP mount
    /// enters here after hijacking a `CONNECT` request.
    pub(crate) async fn serve_io(
        self: Arc<Self>,
        mut reader: BufReader<BoxedRead>,
        writer: BoxedWrite,
    ) {
        let options = match read_options(&mut reader).await {
            Ok(options) => options,
            Err(e) => {
                warn!("rpc server: options decode error: {e}");
                return;
            }
        };
        if options.magic != MAGIC {
            warn!("rpc server: invalid magic number {:#x}", options.magic);
            return;
        }
        let Some(kind) = CodecKind::from_type(&options.codec_type) else {
            warn!("rpc server: invalid codec type {}", options.codec_type);
            return;
        };

        let (frame_reader, frame_writer) = new_codec(kind, reader, writer);
        self.serve_codec(frame_reader, frame_writer, &options).await;
    }

    async fn serve_codec(
        &self,
        mut reader: FrameReader,
        writer: FrameWriter,
        options: &ConnectOptions,
    ) {
        let writer = Arc::new(Mutex::new(writer));
        let handle_timeout = Duration::from_millis(options.handle_timeout_ms);
        let mut handlers = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(RpcError::Eof) => break,
                Err(e) => {
                    warn!("rpc server: read header error: {e}");
                    break;
                }
            };

            // Resolve before the body read so addressing errors are known,
            // but always consume the body: the loop may never advance past an
            // unread frame, and an in-band error must leave the stream usable.
            let resolved = self.find_method(&header.service, &header.method).await;
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("rpc server: read body error: {e}");
                    break;
                }
            };

            match resolved {
                Ok(method) => {
                    handlers.spawn(handle_request(
                        method,
                        header,
                        body,
                        Arc::clone(&writer),
                        handle_timeout,
                    ));
                }
                Err(message) => {
                    let mut header = header;
                    header.error = message;
                    send_response(&writer, &header, &Value::Null).await;
                }
            }
        }

        // Let in-flight handlers finish sending before the connection drops.
        while handlers.join_next().await.is_some() {}
    }

    async fn find_method(
        &self,
        service: &str,
        method: &str,
    ) -> std::result::Result<Arc<Method>, String> {
        if service.is_empty() || method.is_empty() {
            return Err(format!(
                "rpc server: service/method request ill-formed: {service}.{method}"
            ));
        }
        let services = self.services.read().await;
        let Some(svc) = services.get(service) else {
            return Err(format!("rpc server: can't find service {service}"));
        };
        svc.method(method)
            .ok_or_else(|| format!("rpc server: can't find method {service}.{method}"))
    }
}

/// Runs one request to completion, racing the handle timeout when one is set.
///
/// The procedure runs on its own task so a stuck handler cannot hold the
/// deadline hostage. When the deadline wins, the timeout response is sent and
/// the orphaned task's late completion signal is dropped on send; no response
/// is ever written for it.
async fn handle_request(
    method: Arc<Method>,
    mut header: Header,
    body: Value,
    writer: Arc<Mutex<FrameWriter>>,
    timeout: Duration,
) {
    if timeout.is_zero() {
        let result = method.call(body).await;
        send_result(&writer, header, result).await;
        return;
    }

    let (called_tx, called_rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = method.call(body).await;
        let _ = called_tx.send(result);
    });

    match tokio::time::timeout(timeout, called_rx).await {
        Ok(Ok(result)) => send_result(&writer, header, result).await,
        Ok(Err(_)) => {
            header.error = "rpc server: handler aborted before completion".to_string();
            send_response(&writer, &header, &Value::Null).await;
        }
        Err(_) => {
            header.error = REQUEST_TIMEOUT_ERROR.to_string();
            send_response(&writer, &header, &Value::Null).await;
        }
    }
}

async fn send_result(
    writer: &Mutex<FrameWriter>,
    mut header: Header,
    result: std::result::Result<Value, String>,
) {
    let body = match result {
        Ok(reply) => reply,
        Err(message) => {
            header.error = message;
            Value::Null
        }
    };
    send_response(writer, &header, &body).await;
}

async fn send_response(writer: &Mutex<FrameWriter>, header: &Header, body: &Value) {
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write(header, body).await {
        error!("rpc server: write response error: {e}");
    }
}
