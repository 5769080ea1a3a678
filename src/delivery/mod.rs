//! Delivery strategies: one request/response exchange, blocking or suspending.
//!
//! Both paths sit behind the same shape of interface so the retry middleware
//! can wrap either without knowing how the exchange is carried out.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::header::{CONTENT_LENGTH, HeaderValue, TRANSFER_ENCODING};
use http::{HeaderMap, Method};
use tracing::debug;

use crate::error::Error;
use crate::request::{ExecutionMode, Request};
use crate::response::Response;
use crate::transport::{IncomingResponse, OutgoingBody, TransportFailure};
use crate::util::declared_content_length;

mod async_path;
mod sync_bridge;

pub use async_path::AsyncPath;
pub use sync_bridge::SynchronousBridge;

/// Blocking delivery: returns only after the exchange has completed.
pub trait BlockingDelivery: Send + Sync {
    fn deliver(&self, request: &mut Request) -> Result<Response, Error>;
}

/// Suspending delivery, resumed by the tokio scheduler.
pub trait AsyncDelivery: Send + Sync {
    fn deliver_async<'a>(&'a self, request: &'a mut Request)
    -> BoxFuture<'a, Result<Response, Error>>;
}

impl<T: BlockingDelivery + ?Sized> BlockingDelivery for std::sync::Arc<T> {
    fn deliver(&self, request: &mut Request) -> Result<Response, Error> {
        (**self).deliver(request)
    }
}

impl<T: AsyncDelivery + ?Sized> AsyncDelivery for std::sync::Arc<T> {
    fn deliver_async<'a>(
        &'a self,
        request: &'a mut Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        (**self).deliver_async(request)
    }
}

/// Fixes the length of buffered content before anything is written.
///
/// A declared `Content-Length` must match the measured content.
pub(crate) fn sized_body(headers: &mut HeaderMap, bytes: Bytes) -> Result<OutgoingBody, Error> {
    let measured = bytes.len() as u64;
    if let Some(declared) = declared_content_length(headers)?
        && declared != measured
    {
        return Err(Error::invalid_request(format!(
            "declared content-length {declared} does not match body length {measured}"
        )));
    }
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(measured));
    if bytes.is_empty() {
        Ok(OutgoingBody::Empty)
    } else {
        Ok(OutgoingBody::Sized(bytes))
    }
}

/// A failure that still carries a response is a valid exchange, not a fault.
pub(crate) fn accept_carried_response(
    result: Result<IncomingResponse, TransportFailure>,
    mode: ExecutionMode,
) -> Result<IncomingResponse, Error> {
    match result {
        Ok(response) => Ok(response),
        Err(TransportFailure {
            error,
            response: Some(response),
        }) => {
            debug!(
                mode = mode.as_str(),
                status = response.status.as_u16(),
                error = %error,
                "transport reported status as failure; using carried response"
            );
            Ok(response)
        }
        Err(TransportFailure { error, .. }) => Err(error),
    }
}

pub(crate) fn log_request_start(mode: ExecutionMode, method: &Method, path: &str) {
    debug!(mode = mode.as_str(), method = %method, path, "request-start");
}

pub(crate) fn finish_response(
    incoming: IncomingResponse,
    mode: ExecutionMode,
    method: Method,
    path: String,
) -> Response {
    let response = Response::new(
        incoming.status,
        incoming.reason,
        incoming.headers,
        incoming.body,
        mode,
        method,
        path,
    );
    debug!(
        mode = mode.as_str(),
        method = %response.request_method(),
        path = response.request_path(),
        status = response.status().as_u16(),
        reason = response.reason(),
        "request-end"
    );
    response
}
