//! Interface to the network transport beneath the delivery paths.
//!
//! The transport owns DNS, TLS, sockets and pooling. Delivery paths hand it a
//! fully prepared [`OutgoingRequest`] and get back an [`IncomingResponse`] or
//! a [`TransportFailure`].

use std::fmt;
use std::io::Read;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::body::BoxByteStream;
use crate::error::Error;
use crate::request::Identity;
use crate::response::ResponseBody;

mod blocking;
mod hyper_client;

pub use blocking::UreqTransport;
pub use hyper_client::HyperTransport;

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_CLIENT_NAME: &str = "syncwire";

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub client_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
        }
    }
}

/// Request content as handed to the transport.
pub enum OutgoingBody {
    Empty,
    /// Content whose length was fixed before sending; `Content-Length` is set.
    Sized(Bytes),
    /// Content uploaded incrementally with chunked transfer encoding.
    Chunked(Box<dyn Read + Send + Sync>),
    /// Asynchronous byte stream, only accepted by asynchronous transports.
    Stream(BoxByteStream),
}

impl fmt::Debug for OutgoingBody {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => formatter.write_str("Empty"),
            Self::Sized(bytes) => formatter.debug_tuple("Sized").field(&bytes.len()).finish(),
            Self::Chunked(_) => formatter.write_str("Chunked"),
            Self::Stream(_) => formatter.write_str("Stream"),
        }
    }
}

#[derive(Debug)]
pub struct OutgoingRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: OutgoingBody,
}

#[derive(Debug)]
pub struct IncomingResponse {
    pub status: StatusCode,
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl IncomingResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            reason: None,
            headers,
            body,
        }
    }
}

/// A failed exchange. Some transports report non-success statuses as
/// failures; those carry the response that was actually received.
#[derive(Debug)]
pub struct TransportFailure {
    pub error: Error,
    pub response: Option<IncomingResponse>,
}

impl TransportFailure {
    pub fn with_response(error: Error, response: IncomingResponse) -> Self {
        Self {
            error,
            response: Some(response),
        }
    }
}

impl From<Error> for TransportFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            response: None,
        }
    }
}

/// Blocking send primitive. Every call runs to completion on the calling thread.
pub trait BlockingTransport: Send + Sync {
    /// `identity` is applied while the connection and request stream are
    /// acquired and must not be retained past the call.
    fn send(
        &self,
        request: OutgoingRequest,
        identity: Option<&Identity>,
    ) -> Result<IncomingResponse, TransportFailure>;
}

/// Suspending send primitive driven by the tokio runtime.
pub trait AsyncTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: OutgoingRequest,
        identity: Option<&'a Identity>,
    ) -> BoxFuture<'a, Result<IncomingResponse, TransportFailure>>;
}
