use std::fmt;
use std::io::{Read, Write};
use std::pin::Pin;

use bytes::Bytes;
use futures_executor::block_on;
use futures_util::{Stream, StreamExt};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, Error};
use crate::request::ExecutionMode;
use crate::util::content_type_charset;

const COPY_BUFFER_SIZE: usize = 81920;
const CHUNK_SIZE: usize = 8192;

type BoxResponseStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// Response content exposed as a pull-based byte stream.
///
/// Bodies produced by the blocking path are either already in memory or
/// backed by the connection's blocking reader, so [`Read::read`] completes
/// without ever yielding to a scheduler. Bodies produced by the async path
/// are read with [`ResponseBody::chunk`].
pub struct ResponseBody {
    source: ContentSource,
}

enum ContentSource {
    Buffered { bytes: Bytes, position: usize },
    Connection(Box<dyn Read + Send>),
    Streaming {
        stream: BoxResponseStream,
        pending: Bytes,
    },
    Released,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self::buffered(Bytes::new())
    }

    pub fn buffered(bytes: impl Into<Bytes>) -> Self {
        Self {
            source: ContentSource::Buffered {
                bytes: bytes.into(),
                position: 0,
            },
        }
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            source: ContentSource::Connection(Box::new(reader)),
        }
    }

    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let stream = stream.map(|item: Result<Bytes, E>| -> Result<Bytes, BoxError> {
            item.map_err(Into::into)
        });
        Self {
            source: ContentSource::Streaming {
                stream: Box::pin(stream),
                pending: Bytes::new(),
            },
        }
    }

    /// `true` when reads never have to drive an asynchronous stream.
    pub fn is_blocking(&self) -> bool {
        !matches!(self.source, ContentSource::Streaming { .. })
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.source, ContentSource::Buffered { .. })
    }

    pub fn is_released(&self) -> bool {
        matches!(self.source, ContentSource::Released)
    }

    /// Next chunk of content, or `None` at the end.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match &mut self.source {
            ContentSource::Buffered { bytes, position } => {
                if *position >= bytes.len() {
                    return Ok(None);
                }
                let chunk = bytes.slice(*position..);
                *position = bytes.len();
                Ok(Some(chunk))
            }
            ContentSource::Connection(reader) => {
                let mut chunk = vec![0_u8; CHUNK_SIZE];
                let read = reader.read(&mut chunk).map_err(Error::read_body)?;
                if read == 0 {
                    return Ok(None);
                }
                chunk.truncate(read);
                Ok(Some(Bytes::from(chunk)))
            }
            ContentSource::Streaming { stream, pending } => {
                if !pending.is_empty() {
                    return Ok(Some(std::mem::take(pending)));
                }
                match stream.next().await {
                    Some(chunk) => chunk.map(Some).map_err(Error::read_body),
                    None => Ok(None),
                }
            }
            ContentSource::Released => Ok(None),
        }
    }

    /// Releases the underlying connection or stream. Later calls are no-ops.
    pub fn release(&mut self) {
        self.source = ContentSource::Released;
    }

    /// Reads the remaining content into memory so the connection is freed.
    pub(crate) fn buffer(&mut self) -> Result<(), Error> {
        if self.is_buffered() || self.is_released() {
            return Ok(());
        }
        let mut collected = Vec::new();
        self.read_to_end(&mut collected).map_err(Error::read_body)?;
        self.source = ContentSource::Buffered {
            bytes: Bytes::from(collected),
            position: 0,
        };
        Ok(())
    }

    pub(crate) async fn buffer_async(&mut self) -> Result<(), Error> {
        if self.is_buffered() || self.is_released() {
            return Ok(());
        }
        let mut collected = Vec::new();
        while let Some(chunk) = self.chunk().await? {
            collected.extend_from_slice(&chunk);
        }
        self.source = ContentSource::Buffered {
            bytes: Bytes::from(collected),
            position: 0,
        };
        Ok(())
    }

    /// Reads and discards the rest of the content, then releases it.
    pub(crate) fn drain(&mut self) -> Result<(), Error> {
        std::io::copy(self, &mut std::io::sink()).map_err(Error::read_body)?;
        self.release();
        Ok(())
    }

    pub(crate) async fn drain_async(&mut self) -> Result<(), Error> {
        while self.chunk().await?.is_some() {}
        self.release();
        Ok(())
    }

    fn read_remaining(&mut self) -> Result<Bytes, Error> {
        self.buffer()?;
        let bytes = match &mut self.source {
            ContentSource::Buffered { bytes, position } => bytes.slice((*position).min(bytes.len())..),
            ContentSource::Released
            | ContentSource::Connection(_)
            | ContentSource::Streaming { .. } => Bytes::new(),
        };
        self.release();
        Ok(bytes)
    }
}

fn stream_read_error(error: BoxError) -> std::io::Error {
    match error.downcast::<std::io::Error>() {
        Ok(io_error) => *io_error,
        Err(other) => std::io::Error::other(other),
    }
}

impl Read for ResponseBody {
    fn read(&mut self, target: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.source {
            ContentSource::Buffered { bytes, position } => {
                let remaining = &bytes[(*position).min(bytes.len())..];
                let count = remaining.len().min(target.len());
                target[..count].copy_from_slice(&remaining[..count]);
                *position += count;
                Ok(count)
            }
            ContentSource::Connection(reader) => reader.read(target),
            // No runtime is driving this thread, so the stream is polled in
            // place. Streams handed to a blocking caller must not depend on
            // a reactor running elsewhere.
            ContentSource::Streaming { stream, pending } => {
                while pending.is_empty() {
                    match block_on(stream.next()) {
                        Some(Ok(chunk)) => *pending = chunk,
                        Some(Err(error)) => return Err(stream_read_error(error)),
                        None => return Ok(0),
                    }
                }
                let count = pending.len().min(target.len());
                target[..count].copy_from_slice(&pending[..count]);
                bytes::Buf::advance(pending, count);
                Ok(count)
            }
            ContentSource::Released => Ok(0),
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            ContentSource::Buffered { .. } => "buffered",
            ContentSource::Connection(_) => "connection",
            ContentSource::Streaming { .. } => "streaming",
            ContentSource::Released => "released",
        };
        formatter.debug_tuple("ResponseBody").field(&kind).finish()
    }
}

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    body: ResponseBody,
    mode: ExecutionMode,
    method: Method,
    path: String,
}

impl Response {
    pub(crate) fn new(
        status: StatusCode,
        reason: Option<String>,
        headers: HeaderMap,
        body: ResponseBody,
        mode: ExecutionMode,
        method: Method,
        path: String,
    ) -> Self {
        Self {
            status,
            reason,
            headers,
            body,
            mode,
            method,
            path,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase sent by the server, or the canonical one for the status.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn request_method(&self) -> &Method {
        &self.method
    }

    /// Target of the originating request, without query or credentials.
    pub fn request_path(&self) -> &str {
        &self.path
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    pub fn bytes(mut self) -> Result<Bytes, Error> {
        self.body.read_remaining()
    }

    pub fn text(self) -> Result<String, Error> {
        let charset = content_type_charset(&self.headers);
        let bytes = self.bytes()?;
        decode_text(&bytes, charset.as_deref())
    }

    pub fn json<T>(self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let bytes = self.bytes()?;
        serde_json::from_slice(&bytes).map_err(|source| Error::Deserialize { source })
    }

    pub async fn bytes_async(mut self) -> Result<Bytes, Error> {
        self.body.buffer_async().await?;
        self.body.read_remaining()
    }

    pub async fn text_async(self) -> Result<String, Error> {
        let charset = content_type_charset(&self.headers);
        let bytes = self.bytes_async().await?;
        decode_text(&bytes, charset.as_deref())
    }

    /// Copies the body into `target` with blocking reads, stopping early
    /// when `cancellation` fires. Returns the number of bytes copied.
    pub fn copy_to<W: Write>(
        &mut self,
        target: &mut W,
        cancellation: &CancellationToken,
    ) -> Result<u64, Error> {
        let mut buffer = vec![0_u8; COPY_BUFFER_SIZE];
        let mut copied = 0_u64;
        while !cancellation.is_cancelled() {
            let read = self.body.read(&mut buffer).map_err(Error::read_body)?;
            if read == 0 || cancellation.is_cancelled() {
                break;
            }
            target
                .write_all(&buffer[..read])
                .map_err(Error::read_body)?;
            copied += read as u64;
        }
        self.body.release();
        if cancellation.is_cancelled() {
            return Err(Error::Cancelled {
                method: self.method.clone(),
                uri: self.path.clone(),
            });
        }
        Ok(copied)
    }

    /// Drains and releases the body before the response is dropped.
    pub(crate) fn discard(mut self) -> Result<(), Error> {
        self.body.drain()
    }

    pub(crate) async fn discard_async(mut self) -> Result<(), Error> {
        self.body.drain_async().await
    }
}

fn decode_text(bytes: &[u8], charset: Option<&str>) -> Result<String, Error> {
    match charset {
        None | Some("utf-8" | "utf8" | "us-ascii" | "ascii") => {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
        Some("iso-8859-1" | "latin1" | "latin-1") => {
            Ok(bytes.iter().map(|&byte| char::from(byte)).collect())
        }
        Some(other) => Err(Error::UnsupportedCharset {
            charset: other.to_owned(),
        }),
    }
}
