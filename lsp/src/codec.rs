//! `Content-Length` framing for JSON-RPC messages on a byte stream.
//!
//! Each message is a header block terminated by an empty line, followed by a
//! UTF-8 JSON body whose byte length is given by `Content-Length`:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"jsonrpc":"2.0","method":"initialized","params":{}}
//! ```

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Largest message body accepted from a server (4 MiB).
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

/// Parse one header line. Only `Content-Length` is interpreted; other headers
/// (e.g. `Content-Type`) yield `Ok(None)`.
fn parse_content_length(line: &str) -> Result<Option<usize>> {
    let Some((name, value)) = line.split_once(':') else {
        bail!("malformed header line: {line:?}");
    };
    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }
    let length = value
        .trim()
        .parse()
        .with_context(|| format!("invalid {CONTENT_LENGTH} value {:?}", value.trim()))?;
    Ok(Some(length))
}

/// Reads framed JSON-RPC messages from an async byte stream.
pub struct MessageReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next message.
    ///
    /// `Ok(None)` means the stream ended cleanly between messages. EOF inside
    /// a header block or body is an error.
    pub async fn read_message(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(length) = self.read_header_block().await? else {
            return Ok(None);
        };
        if length > MAX_MESSAGE_BYTES {
            bail!("message of {length} bytes exceeds limit of {MAX_MESSAGE_BYTES}");
        }

        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading message body")?;
        let value = serde_json::from_slice(&body).context("decoding message body as JSON")?;
        Ok(Some(value))
    }

    async fn read_header_block(&mut self) -> Result<Option<usize>> {
        let mut length = None;
        let mut started = false;
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .await
                .context("reading header line")?;
            if read == 0 {
                if started {
                    bail!("stream ended inside a header block");
                }
                return Ok(None);
            }
            started = true;

            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                return length
                    .map(Some)
                    .ok_or_else(|| anyhow!("header block without {CONTENT_LENGTH}"));
            }
            if let Some(parsed) = parse_content_length(line)? {
                length = Some(parsed);
            }
        }
    }
}

/// Writes framed JSON-RPC messages to an async byte stream.
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `message`, prefix it with its byte length, and flush.
    pub async fn write_message(&mut self, message: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(message).context("encoding message body")?;
        let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing message header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing message body")?;
        self.writer.flush().await.context("flushing message")?;
        Ok(())
    }
}
