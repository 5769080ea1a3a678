use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::HeaderMap;
use http::header::{CONTENT_LENGTH, HeaderValue};

use crate::body::BodySource;
use crate::error::Error;
use crate::request::{CompletionOption, ExecutionMode, Identity, Request};
use crate::response::Response;
use crate::transport::{AsyncTransport, OutgoingBody, OutgoingRequest};
use crate::util::path_for_logs;

use super::{
    AsyncDelivery, accept_carried_response, finish_response, log_request_start, sized_body,
};

/// Suspending delivery over an [`AsyncTransport`].
///
/// The send races the request's cancellation token, so a cancelled request
/// stops waiting on the connection immediately.
#[derive(Clone)]
pub struct AsyncPath {
    transport: Arc<dyn AsyncTransport>,
    default_identity: Option<Identity>,
}

impl AsyncPath {
    pub fn new(transport: Arc<dyn AsyncTransport>) -> Self {
        Self {
            transport,
            default_identity: None,
        }
    }

    pub fn default_identity(mut self, identity: Identity) -> Self {
        self.default_identity = Some(identity);
        self
    }

    /// Framing headers land in `headers`, never on the caller's request.
    async fn outgoing_body(
        request: &mut Request,
        headers: &mut HeaderMap,
    ) -> Result<OutgoingBody, Error> {
        let Some(body) = request.take_body() else {
            return sized_body(headers, Bytes::new());
        };
        if !body.is_stream() {
            let bytes = body.read_all_async().await?;
            return sized_body(headers, bytes);
        }
        let declared = body.length();
        let BodySource::Stream(stream) = body.into_source() else {
            return Err(Error::invalid_request("expected a streaming request body"));
        };
        if let Some(length) = declared {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }
        Ok(OutgoingBody::Stream(stream))
    }

    async fn execute(&self, request: &mut Request) -> Result<Response, Error> {
        let mode = ExecutionMode::Asynchronous;
        let method = request.method().clone();
        let path = path_for_logs(request.uri());
        log_request_start(mode, &method, &path);

        let mut headers = request.headers().clone();
        let body = Self::outgoing_body(request, &mut headers).await?;
        let outgoing = OutgoingRequest {
            method: method.clone(),
            uri: request.uri().clone(),
            headers,
            body,
        };
        let identity = request
            .identity_ref()
            .cloned()
            .or_else(|| self.default_identity.clone());
        let cancellation = request.cancellation_token().clone();

        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(request.cancelled_error()),
            result = self.transport.send(outgoing, identity.as_ref()) => result,
        };
        drop(identity);

        let mut incoming = accept_carried_response(result, mode)?;
        if request.completion_option() == CompletionOption::ResponseContentRead {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(request.cancelled_error()),
                buffered = incoming.body.buffer_async() => buffered?,
            }
        }
        Ok(finish_response(incoming, mode, method, path))
    }
}

impl std::fmt::Debug for AsyncPath {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AsyncPath")
            .field("default_identity", &self.default_identity)
            .finish_non_exhaustive()
    }
}

impl AsyncDelivery for AsyncPath {
    fn deliver_async<'a>(
        &'a self,
        request: &'a mut Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(self.execute(request))
    }
}
