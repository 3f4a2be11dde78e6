//! Frame-level encode/decode over a duplex byte stream.
//!
//! A codec wraps the two halves of a connection and exchanges frames: one
//! [`Header`](crate::protocol::Header) record followed by one opaque body
//! value. Bodies travel as [`serde_json::Value`] at this layer; typed
//! conversion happens at the dispatch/call boundary.
//!
//! The reader and writer are split so a single reader task and many writer
//! tasks (serialized by a mutex above this layer) can share one connection.
//! `read_body` must be called exactly once after each successful
//! `read_header`; skipping it desynchronizes the stream.
//!
//! Codec selection is dynamic: the handshake names a codec type and
//! [`CodecKind::from_type`] resolves it, so unknown types are rejected before
//! any frame is decoded.

pub mod json;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::{ConnectOptions, Header};

/// JSON Lines codec: each value is one JSON document terminated by `\n`.
pub const JSON_TYPE: &str = "application/json";
/// Declared for forward compatibility; no codec ships for it yet.
pub const MSGPACK_TYPE: &str = "application/msgpack";

pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// The set of implemented codecs, resolved from the handshake's codec type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Json,
}

impl CodecKind {
    pub fn from_type(codec_type: &str) -> Option<CodecKind> {
        match codec_type {
            JSON_TYPE => Some(CodecKind::Json),
            _ => None,
        }
    }

    pub fn as_type(&self) -> &'static str {
        match self {
            CodecKind::Json => JSON_TYPE,
        }
    }
}

/// Builds the reader/writer pair for `kind` over an already-split stream.
///
/// The read side takes the `BufReader` used for the handshake so bytes the
/// handshake may have buffered are not lost.
pub fn new_codec(
    kind: CodecKind,
    reader: BufReader<BoxedRead>,
    writer: BoxedWrite,
) -> (FrameReader, FrameWriter) {
    match kind {
        CodecKind::Json => (
            FrameReader::Json(json::JsonFrameReader::new(reader)),
            FrameWriter::Json(json::JsonFrameWriter::new(writer)),
        ),
    }
}

/// Decoding half of a codec.
pub enum FrameReader {
    Json(json::JsonFrameReader),
}

impl FrameReader {
    /// Reads the next frame header. Clean end-of-stream surfaces as
    /// [`RpcError::Eof`].
    pub async fn read_header(&mut self) -> Result<Header> {
        match self {
            FrameReader::Json(reader) => reader.read_header().await,
        }
    }

    /// Reads the body following the last header.
    pub async fn read_body(&mut self) -> Result<Value> {
        match self {
            FrameReader::Json(reader) => reader.read_body().await,
        }
    }
}

/// Encoding half of a codec.
pub enum FrameWriter {
    Json(json::JsonFrameWriter),
}

impl FrameWriter {
    /// Writes one `(header, body)` frame as a single flushed unit.
    pub async fn write(&mut self, header: &Header, body: &Value) -> Result<()> {
        match self {
            FrameWriter::Json(writer) => writer.write(header, body).await,
        }
    }
}

/// Reads the one-shot JSON handshake document from the connection.
pub async fn read_options(reader: &mut BufReader<BoxedRead>) -> Result<ConnectOptions> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(RpcError::Eof);
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Writes the one-shot JSON handshake document.
pub async fn write_options(writer: &mut BoxedWrite, options: &ConnectOptions) -> Result<()> {
    let mut buf = serde_json::to_vec(options)?;
    buf.push(b'\n');
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// One-directional codec pair: frames written to the writer come out of
    /// the reader.
    fn one_way() -> (FrameWriter, FrameReader) {
        let (near, far) = tokio::io::duplex(4096);
        let (_, near_write) = tokio::io::split(near);
        let (far_read, _) = tokio::io::split(far);
        let (_, writer) = new_codec(
            CodecKind::Json,
            BufReader::new(Box::new(tokio::io::empty()) as BoxedRead),
            Box::new(near_write),
        );
        let (reader, _) = new_codec(
            CodecKind::Json,
            BufReader::new(Box::new(far_read) as BoxedRead),
            Box::new(tokio::io::sink()),
        );
        (writer, reader)
    }

    #[test]
    fn codec_kind_resolution() {
        assert_eq!(CodecKind::from_type(JSON_TYPE), Some(CodecKind::Json));
        assert_eq!(CodecKind::from_type(MSGPACK_TYPE), None);
        assert_eq!(CodecKind::from_type("application/gob"), None);
        assert_eq!(CodecKind::Json.as_type(), JSON_TYPE);
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut writer, mut reader) = one_way();

        let header = Header::request("Arith", "Sum", 1);
        let body = json!({"num1": 2, "num2": 3});
        writer.write(&header, &body).await.unwrap();

        assert_eq!(reader.read_header().await.unwrap(), header);
        assert_eq!(reader.read_body().await.unwrap(), body);
    }

    #[tokio::test]
    async fn several_frames_in_sequence() {
        let (mut writer, mut reader) = one_way();

        for seq in 1..=3u64 {
            let header = Header::request("Echo", "Ping", seq);
            writer.write(&header, &json!(seq)).await.unwrap();
        }
        for seq in 1..=3u64 {
            let header = reader.read_header().await.unwrap();
            assert_eq!(header.seq, seq);
            assert_eq!(reader.read_body().await.unwrap(), json!(seq));
        }
    }

    #[tokio::test]
    async fn string_bodies_with_newlines_stay_framed() {
        let (mut writer, mut reader) = one_way();

        let body = json!("line one\nline two\n");
        writer.write(&Header::request("Echo", "Ping", 9), &body).await.unwrap();
        writer.write(&Header::request("Echo", "Ping", 10), &json!(null)).await.unwrap();

        assert_eq!(reader.read_header().await.unwrap().seq, 9);
        assert_eq!(reader.read_body().await.unwrap(), body);
        assert_eq!(reader.read_header().await.unwrap().seq, 10);
    }

    #[tokio::test]
    async fn end_of_stream_is_distinguished() {
        let (writer, mut reader) = one_way();

        // Dropping the writer closes the peer; the reader must see a clean
        // EOF rather than a generic IO error.
        drop(writer);
        match reader.read_header().await {
            Err(RpcError::Eof) => {}
            other => panic!("expected Eof, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handshake_round_trip() {
        let (near, far) = tokio::io::duplex(1024);
        let (_, near_write) = tokio::io::split(near);
        let (far_read, _) = tokio::io::split(far);

        let mut writer: BoxedWrite = Box::new(near_write);
        write_options(&mut writer, &ConnectOptions::default()).await.unwrap();

        let mut reader = BufReader::new(Box::new(far_read) as BoxedRead);
        let opts = read_options(&mut reader).await.unwrap();
        assert_eq!(opts.magic, crate::protocol::MAGIC);
        assert_eq!(opts.codec_type, JSON_TYPE);
    }
}
