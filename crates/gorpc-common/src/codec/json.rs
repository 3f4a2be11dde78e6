//! JSON Lines codec.
//!
//! Each value is a single `serde_json` document terminated by `\n`. JSON
//! string escaping guarantees an encoded document contains no raw newline, so
//! the decoder consumes exactly one value per line with no length prefix.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::error;

use crate::codec::{BoxedRead, BoxedWrite};
use crate::protocol::error::{Result, RpcError};
use crate::protocol::Header;

pub struct JsonFrameReader {
    reader: BufReader<BoxedRead>,
    line: String,
}

impl JsonFrameReader {
    pub(crate) fn new(reader: BufReader<BoxedRead>) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }

    pub async fn read_header(&mut self) -> Result<Header> {
        self.read_value().await
    }

    pub async fn read_body(&mut self) -> Result<Value> {
        self.read_value().await
    }

    async fn read_value<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line).await?;
        if n == 0 {
            return Err(RpcError::Eof);
        }
        Ok(serde_json::from_str(self.line.trim_end())?)
    }
}

pub struct JsonFrameWriter {
    writer: BoxedWrite,
    buf: Vec<u8>,
}

impl JsonFrameWriter {
    pub(crate) fn new(writer: BoxedWrite) -> Self {
        Self {
            writer,
            buf: Vec::new(),
        }
    }

    /// Encodes header and body into one buffer and writes them as a single
    /// flushed unit. A write failure shuts the stream down before returning,
    /// since a partially written frame leaves the peer unable to resync.
    pub async fn write(&mut self, header: &Header, body: &Value) -> Result<()> {
        self.buf.clear();
        serde_json::to_writer(&mut self.buf, header)?;
        self.buf.push(b'\n');
        serde_json::to_writer(&mut self.buf, body)?;
        self.buf.push(b'\n');

        if let Err(e) = self.flush_buf().await {
            error!("rpc codec: error writing frame: {e}");
            let _ = self.writer.shutdown().await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn flush_buf(&mut self) -> std::io::Result<()> {
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await
    }
}
