use std::io::Cursor;
use std::sync::Arc;

use http::HeaderMap;

use crate::body::{Body, BodySource};
use crate::error::Error;
use crate::request::{CompletionOption, ExecutionMode, Identity, Request};
use crate::response::Response;
use crate::transport::{BlockingTransport, OutgoingBody, OutgoingRequest};
use crate::util::path_for_logs;

use super::{
    BlockingDelivery, accept_carried_response, finish_response, log_request_start, sized_body,
};

/// Runs a whole exchange with blocking operations only.
///
/// Nothing here awaits or parks on a runtime. Every step runs on the calling
/// thread, so a synchronous send never waits on async machinery that needs
/// that same thread.
#[derive(Clone)]
pub struct SynchronousBridge {
    transport: Arc<dyn BlockingTransport>,
    default_identity: Option<Identity>,
}

impl SynchronousBridge {
    pub fn new(transport: Arc<dyn BlockingTransport>) -> Self {
        Self {
            transport,
            default_identity: None,
        }
    }

    /// Credentials used when a request carries none of its own.
    pub fn default_identity(mut self, identity: Identity) -> Self {
        self.default_identity = Some(identity);
        self
    }

    /// Wire body for `request`. Framing headers go into `headers`, a copy
    /// owned by the outgoing request; the caller's headers are left alone.
    fn outgoing_body(
        request: &mut Request,
        headers: &mut HeaderMap,
    ) -> Result<OutgoingBody, Error> {
        let chunked = request.is_chunked();
        let Some(body) = request.take_body() else {
            return sized_body(headers, bytes::Bytes::new());
        };
        if chunked {
            return chunked_body(body);
        }
        sized_body(headers, body.read_all()?)
    }
}

fn chunked_body(body: Body) -> Result<OutgoingBody, Error> {
    match body.into_source() {
        BodySource::Buffered(bytes) => Ok(OutgoingBody::Chunked(Box::new(Cursor::new(bytes)))),
        BodySource::Reader(reader) => Ok(OutgoingBody::Chunked(reader)),
        BodySource::Stream(_) => Err(Error::invalid_request(
            "a streaming request body requires asynchronous execution",
        )),
    }
}

impl std::fmt::Debug for SynchronousBridge {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SynchronousBridge")
            .field("default_identity", &self.default_identity)
            .finish_non_exhaustive()
    }
}

impl BlockingDelivery for SynchronousBridge {
    fn deliver(&self, request: &mut Request) -> Result<Response, Error> {
        if !request.is_synchronous() {
            return Err(Error::invalid_request(
                "synchronous delivery requires a request marked synchronous",
            ));
        }
        let mode = ExecutionMode::Synchronous;
        let method = request.method().clone();
        let path = path_for_logs(request.uri());
        log_request_start(mode, &method, &path);

        let mut headers = request.headers().clone();
        let body = Self::outgoing_body(request, &mut headers)?;
        let outgoing = OutgoingRequest {
            method: method.clone(),
            uri: request.uri().clone(),
            headers,
            body,
        };

        // Captured before the connection opens, dropped as soon as the
        // transport has the request stream.
        let identity = request
            .identity_ref()
            .cloned()
            .or_else(|| self.default_identity.clone());
        let result = self.transport.send(outgoing, identity.as_ref());
        drop(identity);

        let mut incoming = accept_carried_response(result, mode)?;
        if request.completion_option() == CompletionOption::ResponseContentRead {
            incoming.body.buffer()?;
        }
        Ok(finish_response(incoming, mode, method, path))
    }
}
