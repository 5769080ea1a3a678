use std::io::{Read, Write};

use bytes::Bytes;

use crate::body::Body;
use crate::error::Error;

/// In-memory copy of a one-shot request body so it can be sent again.
///
/// The original body is read exactly once, on first use, and released as
/// soon as its bytes are buffered. Every later read starts from the cursor,
/// which [`ReplayableBody::reset`] rewinds to zero.
#[derive(Debug)]
pub struct ReplayableBody {
    original: Option<Body>,
    buffer: Option<Bytes>,
    position: usize,
}

impl ReplayableBody {
    pub fn new(original: Body) -> Self {
        Self {
            original: Some(original),
            buffer: None,
            position: 0,
        }
    }

    pub fn is_populated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Buffers the original body using blocking reads. No-op once populated.
    ///
    /// A streaming original is rejected and stays wrapped, so
    /// [`into_original`](Self::into_original) still hands it back.
    pub fn populate(&mut self) -> Result<(), Error> {
        if self.buffer.is_some() {
            return Ok(());
        }
        if self.original.as_ref().is_some_and(Body::is_stream) {
            return Err(Error::invalid_request(
                "a streaming request body requires asynchronous execution",
            ));
        }
        let original = self.take_original()?;
        self.store(original.read_all()?);
        Ok(())
    }

    pub async fn populate_async(&mut self) -> Result<(), Error> {
        if self.buffer.is_some() {
            return Ok(());
        }
        let original = self.take_original()?;
        self.store(original.read_all_async().await?);
        Ok(())
    }

    /// Rewinds to the first byte. Does nothing before population.
    pub fn reset(&mut self) {
        if self.buffer.is_some() {
            self.position = 0;
        }
    }

    /// Buffered length; unknown until the body has been populated.
    pub fn length(&self) -> Option<u64> {
        self.buffer.as_ref().map(|buffer| buffer.len() as u64)
    }

    /// Writes the complete buffered content, populating first if needed.
    pub fn serialize<W: Write>(&mut self, target: &mut W) -> Result<(), Error> {
        self.populate()?;
        if let Some(buffer) = &self.buffer {
            target.write_all(buffer).map_err(Error::read_body)?;
        }
        Ok(())
    }

    /// Hands out the remaining buffered bytes as a fresh [`Body`] and moves
    /// the cursor to the end, so the next attempt needs a [`reset`](Self::reset).
    pub(crate) fn attempt_body(&mut self) -> Result<Body, Error> {
        self.populate()?;
        let buffer = self.buffer.as_ref().cloned().unwrap_or_default();
        let start = self.position.min(buffer.len());
        self.position = buffer.len();
        Ok(Body::from_bytes(buffer.slice(start..)))
    }

    /// Gives back a body equivalent to the one that was wrapped.
    ///
    /// Once populated, the original stream is gone; the buffered bytes take
    /// its place.
    pub fn into_original(mut self) -> Option<Body> {
        match self.buffer.take() {
            Some(buffer) => Some(Body::from_bytes(buffer)),
            None => self.original.take(),
        }
    }

    /// Drops both the buffer and any unread original body. Idempotent.
    pub fn release(&mut self) {
        self.buffer = None;
        self.original = None;
        self.position = 0;
    }

    fn take_original(&mut self) -> Result<Body, Error> {
        self.original
            .take()
            .ok_or_else(|| Error::invalid_request("replayable body was already released"))
    }

    fn store(&mut self, bytes: Bytes) {
        self.buffer = Some(bytes);
        self.position = 0;
    }
}

impl Read for ReplayableBody {
    fn read(&mut self, target: &mut [u8]) -> std::io::Result<usize> {
        self.populate().map_err(std::io::Error::other)?;
        let Some(buffer) = &self.buffer else {
            return Ok(0);
        };
        let remaining = &buffer[self.position.min(buffer.len())..];
        let count = remaining.len().min(target.len());
        target[..count].copy_from_slice(&remaining[..count]);
        self.position += count;
        Ok(count)
    }
}
