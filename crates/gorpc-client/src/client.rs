//! Single-connection call multiplexer.
//!
//! One background receive task demultiplexes responses by sequence number;
//! any number of caller tasks issue calls concurrently. Outbound writes are
//! serialized by the `sending` mutex, pending-call bookkeeping by the state
//! mutex; when both are needed the state mutex is taken first.
//!
//! Cancellation is caller-local: dropping a call future removes its pending
//! entry, and the receive task silently discards the late reply. The remote
//! procedure is never aborted and the connection stays healthy.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use gorpc_common::codec::{
    new_codec, write_options, BoxedRead, BoxedWrite, CodecKind, FrameReader, FrameWriter,
};
use gorpc_common::protocol::{DEFAULT_RPC_PATH, HTTP_CONNECTED_LINE};
use gorpc_common::{ConnectOptions, Header, Result, RpcError};

struct PendingCall {
    service: String,
    method: String,
    done: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct ClientState {
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    /// The user asked to close; no new calls are admitted.
    closing: bool,
    /// The peer or the transport failed; set by the receive task.
    shutdown: bool,
}

/// An RPC client bound to one connection.
pub struct Client {
    writer: Arc<Mutex<FrameWriter>>,
    state: Arc<StdMutex<ClientState>>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Performs the handshake over `stream` and spawns the receive task.
    pub async fn new<S>(stream: S, options: ConnectOptions) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let reader = BufReader::new(Box::new(read) as BoxedRead);
        Client::new_io(reader, Box::new(write), &options).await
    }

    async fn new_io(
        reader: BufReader<BoxedRead>,
        mut writer: BoxedWrite,
        options: &ConnectOptions,
    ) -> Result<Client> {
        let Some(kind) = CodecKind::from_type(&options.codec_type) else {
            return Err(RpcError::InvalidCodec(options.codec_type.clone()));
        };
        write_options(&mut writer, options).await?;

        let (frame_reader, frame_writer) = new_codec(kind, reader, writer);
        let state = Arc::new(StdMutex::new(ClientState {
            seq: 1,
            ..ClientState::default()
        }));
        let pump = tokio::spawn(receive(frame_reader, Arc::clone(&state)));
        Ok(Client {
            writer: Arc::new(Mutex::new(frame_writer)),
            state,
            pump: StdMutex::new(Some(pump)),
        })
    }

    /// Dials `addr` over TCP. `connect_timeout_ms` bounds connect plus
    /// handshake; zero disables the bound.
    pub async fn dial(addr: &str, options: ConnectOptions) -> Result<Client> {
        let timeout_ms = options.connect_timeout_ms;
        bounded_dial(timeout_ms, async move {
            let stream = TcpStream::connect(addr).await?;
            Client::new(stream, options).await
        })
        .await
    }

    /// Dials `addr` and tunnels through an HTTP `CONNECT` before handing the
    /// hijacked stream to the regular construction path.
    pub async fn dial_http(addr: &str, options: ConnectOptions) -> Result<Client> {
        let timeout_ms = options.connect_timeout_ms;
        bounded_dial(timeout_ms, async move {
            let stream = TcpStream::connect(addr).await?;
            let (read, write) = tokio::io::split(stream);
            let mut reader = BufReader::new(Box::new(read) as BoxedRead);
            let mut writer: BoxedWrite = Box::new(write);

            writer
                .write_all(format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\r\n\r\n").as_bytes())
                .await?;
            writer.flush().await?;

            let mut status = String::new();
            reader.read_line(&mut status).await?;
            let status = status.trim_end();
            if status != HTTP_CONNECTED_LINE {
                return Err(RpcError::HttpConnect(status.to_string()));
            }
            // Consume the rest of the response head up to the blank line.
            loop {
                let mut line = String::new();
                let n = reader.read_line(&mut line).await?;
                if n == 0 || line.trim_end().is_empty() {
                    break;
                }
            }
            Client::new_io(reader, writer, &options).await
        })
        .await
    }

    /// Issues one call and awaits its reply.
    ///
    /// The returned future is also the asynchronous handle: dropping it
    /// before completion detaches the call, after which a late reply for its
    /// sequence number is discarded by the receive task.
    pub async fn call<A, R>(&self, service: &str, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = serde_json::to_value(args)?;
        let (done_tx, done_rx) = oneshot::channel();

        let seq = {
            let mut state = self.state.lock().unwrap();
            if state.closing || state.shutdown {
                return Err(RpcError::Shutdown);
            }
            let seq = state.seq;
            state.seq += 1;
            state.pending.insert(
                seq,
                PendingCall {
                    service: service.to_string(),
                    method: method.to_string(),
                    done: done_tx,
                },
            );
            seq
        };
        let guard = Unregister {
            state: &self.state,
            seq: Some(seq),
        };

        self.spawn_send(Header::request(service, method, seq), body);

        let result = done_rx.await;
        guard.disarm();
        match result {
            Ok(Ok(reply)) => Ok(serde_json::from_value(reply)?),
            Ok(Err(e)) => Err(e),
            // The sender can only vanish without firing if the receive task
            // was torn down mid-flight.
            Err(_) => Err(RpcError::Shutdown),
        }
    }

    /// [`Client::call`] bounded by `timeout`; expiry detaches the call and
    /// reports [`RpcError::Timeout`].
    pub async fn call_timeout<A, R>(
        &self,
        service: &str,
        method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        match tokio::time::timeout(timeout, self.call(service, method, args)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Hands the frame to a detached task so caller cancellation can never
    /// tear a partially written frame. A write failure fails only this call;
    /// the connection itself was already shut down by the codec.
    fn spawn_send(&self, header: Header, body: Value) {
        let writer = Arc::clone(&self.writer);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.write(&header, &body).await {
                drop(writer);
                let call = state.lock().unwrap().pending.remove(&header.seq);
                if let Some(call) = call {
                    let _ = call.done.send(Err(e));
                }
            }
        });
    }

    /// True until the user closes the client or the transport fails.
    pub fn is_available(&self) -> bool {
        let state = self.state.lock().unwrap();
        !state.closing && !state.shutdown
    }

    /// Closes the client: rejects new calls, fails every outstanding call
    /// with a shutdown error, and stops the receive task. A second close
    /// reports [`RpcError::AlreadyClosed`].
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.closing {
                return Err(RpcError::AlreadyClosed);
            }
            state.closing = true;
            for (_, call) in state.pending.drain() {
                let _ = call.done.send(Err(RpcError::Shutdown));
            }
        }
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(pump) = pump.take() {
                pump.abort();
            }
        }
    }
}

/// Removes the pending entry when a call future is dropped before its reply
/// arrives. Disarmed once the call completes through the normal path.
struct Unregister<'a> {
    state: &'a StdMutex<ClientState>,
    seq: Option<u64>,
}

impl Unregister<'_> {
    fn disarm(mut self) {
        self.seq = None;
    }
}

impl Drop for Unregister<'_> {
    fn drop(&mut self) {
        if let Some(seq) = self.seq.take() {
            let _ = self.state.lock().unwrap().pending.remove(&seq);
        }
    }
}

async fn bounded_dial<F>(timeout_ms: u64, dial: F) -> Result<Client>
where
    F: Future<Output = Result<Client>>,
{
    if timeout_ms == 0 {
        return dial.await;
    }
    match tokio::time::timeout(Duration::from_millis(timeout_ms), dial).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(timeout_ms)),
    }
}

/// Receive pump: correlates responses to pending calls by sequence number.
/// Each pending entry is removed exactly when its done signal fires. A read
/// error terminates the connection and fails every remaining call.
async fn receive(mut reader: FrameReader, state: Arc<StdMutex<ClientState>>) {
    let err = loop {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(e) => break e,
        };
        let call = state.lock().unwrap().pending.remove(&header.seq);
        match call {
            // Nobody is waiting: the caller cancelled or timed out. Consume
            // the body to stay in frame and move on.
            None => {
                if let Err(e) = reader.read_body().await {
                    break e;
                }
            }
            Some(call) => {
                if !header.error.is_empty() {
                    let body = reader.read_body().await;
                    let _ = call.done.send(Err(RpcError::Remote(header.error)));
                    if let Err(e) = body {
                        break e;
                    }
                } else {
                    match reader.read_body().await {
                        Ok(reply) => {
                            let _ = call.done.send(Ok(reply));
                        }
                        Err(e) => {
                            debug!(
                                "rpc client: body decode error for {}.{}: {e}",
                                call.service, call.method
                            );
                            let _ = call.done.send(Err(RpcError::Disconnected(e.to_string())));
                            break e;
                        }
                    }
                }
            }
        }
    };
    terminate(&state, err);
}

fn terminate(state: &StdMutex<ClientState>, err: RpcError) {
    let mut state = state.lock().unwrap();
    state.shutdown = true;
    if !state.pending.is_empty() {
        debug!(
            "rpc client: connection lost ({err}), failing {} pending calls",
            state.pending.len()
        );
    }
    let message = err.to_string();
    for (_, call) in state.pending.drain() {
        let _ = call.done.send(Err(RpcError::Disconnected(message.clone())));
    }
}
