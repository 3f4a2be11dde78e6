//! HTTP transport mount and debug page.
//!
//! A client tunnels into the RPC protocol by sending `CONNECT /_gorpc_`; the
//! server answers with the fixed `200 Connected to GoRPC` status line and
//! then speaks the raw RPC protocol on the hijacked connection. The status
//! line is part of the wire protocol, so this endpoint handles the socket
//! directly instead of going through an HTTP library that would rewrite it.
//!
//! `GET /debug/gorpc` renders a small HTML table of registered services,
//! their methods, and per-method call counts.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

use gorpc_common::codec::{BoxedRead, BoxedWrite};
pub use gorpc_common::protocol::{DEFAULT_RPC_PATH, HTTP_CONNECTED_LINE};

use crate::server::Server;

/// Path of the HTML debug page.
pub const DEFAULT_DEBUG_PATH: &str = "/debug/gorpc";

impl Server {
    /// Serves the RPC protocol over HTTP `CONNECT`, plus the debug page.
    ///
    /// Anything that is neither a `CONNECT` to the RPC path nor a `GET` of
    /// the debug page is answered with `405 Method Not Allowed`.
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("rpc server: http connection from {peer}");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.serve_http_conn(stream).await });
                }
                Err(e) => {
                    error!("rpc server: accept error: {e}");
                    return;
                }
            }
        }
    }

    async fn serve_http_conn(self: Arc<Self>, stream: TcpStream) {
        let (read, write) = stream.into_split();
        let mut reader = BufReader::new(Box::new(read) as BoxedRead);
        let mut writer: BoxedWrite = Box::new(write);

        let request_line = match read_line(&mut reader).await {
            Ok(line) if !line.is_empty() => line,
            Ok(_) => return,
            Err(e) => {
                warn!("rpc server: http read error: {e}");
                return;
            }
        };
        // Drain the remaining request headers up to the blank line.
        loop {
            match read_line(&mut reader).await {
                Ok(line) if line.is_empty() => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("rpc server: http read error: {e}");
                    return;
                }
            }
        }

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();

        match (method, path) {
            ("CONNECT", DEFAULT_RPC_PATH) => {
                if writer
                    .write_all(format!("{HTTP_CONNECTED_LINE}\n\n").as_bytes())
                    .await
                    .is_err()
                {
                    return;
                }
                let _ = writer.flush().await;
                // Hijacked: from here on this is a plain RPC connection.
                self.serve_io(reader, writer).await;
            }
            ("GET", DEFAULT_DEBUG_PATH) => {
                let body = self.debug_html().await;
                let _ = write_http_response(&mut writer, "200 OK", "text/html", &body).await;
            }
            _ => {
                let _ = write_http_response(
                    &mut writer,
                    "405 Method Not Allowed",
                    "text/plain",
                    "405 must CONNECT\n",
                )
                .await;
            }
        }
    }

    async fn debug_html(&self) -> String {
        let mut html = String::from("<html>\n<body>\n<title>GoRPC Services</title>\n");
        for service in self.services_snapshot().await {
            html.push_str(&format!(
                "<hr>\nService {}\n<hr>\n<table>\n\
                 <tr><th align=center>Method</th><th align=center>Calls</th></tr>\n",
                service.name()
            ));
            let mut methods: Vec<_> = service.methods().collect();
            methods.sort_by_key(|method| method.name().to_string());
            for method in methods {
                html.push_str(&format!(
                    "<tr>\n<td align=left font=fixed>{}({}, {}) error</td>\n\
                     <td align=center>{}</td>\n</tr>\n",
                    method.name(),
                    method.arg_type(),
                    method.reply_type(),
                    method.num_calls()
                ));
            }
            html.push_str("</table>\n");
        }
        html.push_str("</body>\n</html>");
        html
    }
}

async fn read_line(reader: &mut BufReader<BoxedRead>) -> std::io::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(line.trim_end().to_string())
}

async fn write_http_response(
    writer: &mut BoxedWrite,
    status: &str,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.0 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}
