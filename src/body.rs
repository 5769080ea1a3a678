use std::fmt;
use std::io::Read;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::{BoxError, Error};

pub(crate) type BoxByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send + Sync>>;

/// Request content that can be consumed exactly once.
///
/// A body is either fully buffered, backed by a blocking reader, or backed
/// by an asynchronous byte stream. The length is known up front only when
/// the caller declared it or the content is already in memory.
pub struct Body {
    source: BodySource,
    length: Option<u64>,
}

pub(crate) enum BodySource {
    Buffered(Bytes),
    Reader(Box<dyn Read + Send + Sync>),
    Stream(BoxByteStream),
}

impl Body {
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            length: Some(bytes.len() as u64),
            source: BodySource::Buffered(bytes),
        }
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + Sync + 'static,
    {
        Self {
            source: BodySource::Reader(Box::new(reader)),
            length: None,
        }
    }

    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        let stream = stream.map(|item: Result<Bytes, E>| -> Result<Bytes, BoxError> {
            item.map_err(Into::into)
        });
        Self {
            source: BodySource::Stream(Box::pin(stream)),
            length: None,
        }
    }

    /// Declares the content length of a reader or stream body.
    pub fn with_length(mut self, length: u64) -> Self {
        if !matches!(self.source, BodySource::Buffered(_)) {
            self.length = Some(length);
        }
        self
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.source, BodySource::Buffered(_))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.source, BodySource::Stream(_))
    }

    pub(crate) fn into_source(self) -> BodySource {
        self.source
    }

    /// Reads the whole body into memory using blocking reads only.
    pub(crate) fn read_all(self) -> Result<Bytes, Error> {
        match self.source {
            BodySource::Buffered(bytes) => Ok(bytes),
            BodySource::Reader(mut reader) => {
                let mut collected = Vec::with_capacity(capacity_hint(self.length));
                reader
                    .read_to_end(&mut collected)
                    .map_err(Error::read_body)?;
                Ok(Bytes::from(collected))
            }
            BodySource::Stream(_) => Err(Error::invalid_request(
                "a streaming request body requires asynchronous execution",
            )),
        }
    }

    pub(crate) async fn read_all_async(self) -> Result<Bytes, Error> {
        match self.source {
            BodySource::Buffered(bytes) => Ok(bytes),
            BodySource::Reader(mut reader) => {
                let length = self.length;
                tokio::task::spawn_blocking(move || {
                    let mut collected = Vec::with_capacity(capacity_hint(length));
                    reader
                        .read_to_end(&mut collected)
                        .map(|_| Bytes::from(collected))
                        .map_err(Error::read_body)
                })
                .await
                .map_err(Error::read_body)?
            }
            BodySource::Stream(mut stream) => {
                let mut collected = Vec::with_capacity(capacity_hint(self.length));
                while let Some(chunk) = stream.next().await {
                    collected.extend_from_slice(&chunk.map_err(Error::read_body)?);
                }
                Ok(Bytes::from(collected))
            }
        }
    }
}

fn capacity_hint(length: Option<u64>) -> usize {
    const MAX_PREALLOCATION: u64 = 1024 * 1024;
    length.unwrap_or(0).min(MAX_PREALLOCATION) as usize
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::from_bytes(text.into_bytes())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            BodySource::Buffered(_) => "buffered",
            BodySource::Reader(_) => "reader",
            BodySource::Stream(_) => "stream",
        };
        formatter
            .debug_struct("Body")
            .field("kind", &kind)
            .field("length", &self.length)
            .finish()
    }
}
