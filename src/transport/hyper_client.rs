use std::convert::Infallible;
use std::error::Error as StdError;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use http::Request;
use http::header::{HeaderValue, USER_AGENT};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;

use crate::error::{BoxError, Error, TransportErrorKind, is_socket_error_kind};
use crate::request::Identity;
use crate::response::ResponseBody;
use crate::util::{parse_header_value, path_for_logs};

use super::{
    AsyncTransport, IncomingResponse, OutgoingBody, OutgoingRequest, TransportConfig,
    TransportFailure,
};

type ReqBody = BoxBody<Bytes, BoxError>;

/// Asynchronous transport on the `hyper-util` pooled client with rustls.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, ReqBody>,
    request_timeout: Duration,
    user_agent: HeaderValue,
}

impl HyperTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(config.connect_timeout));
        let https = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|source| Error::TlsInit {
                message: source.to_string(),
            })?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);
        let client = Client::builder(TokioExecutor::new()).build(https);
        Ok(Self {
            client,
            request_timeout: config.request_timeout,
            user_agent: parse_header_value(USER_AGENT.as_str(), &config.client_name)?,
        })
    }

    async fn execute(
        &self,
        request: OutgoingRequest,
        identity: Option<&Identity>,
    ) -> Result<IncomingResponse, TransportFailure> {
        let OutgoingRequest {
            method,
            uri,
            mut headers,
            body,
        } = request;
        if let Some(identity) = identity {
            identity.apply_to(&mut headers);
        }
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, self.user_agent.clone());
        }
        let log_uri = path_for_logs(&uri);

        let body = match body {
            OutgoingBody::Empty => buffered_req_body(Bytes::new()),
            OutgoingBody::Sized(bytes) => buffered_req_body(bytes),
            OutgoingBody::Stream(stream) => {
                BodyExt::boxed(StreamBody::new(stream.map(|item| item.map(Frame::data))))
            }
            OutgoingBody::Chunked(_) => {
                return Err(Error::invalid_request(
                    "asynchronous transport cannot upload from a blocking reader",
                )
                .into());
            }
        };

        let mut builder = Request::builder().method(method.clone()).uri(uri);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(body)
            .map_err(|source| Error::RequestBuild { source })?;

        let response = match timeout(self.request_timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                return Err(Error::Transport {
                    kind: classify_transport_error(&source),
                    method,
                    uri: log_uri,
                    source: Box::new(source),
                }
                .into());
            }
            Err(_) => {
                return Err(Error::Timeout {
                    timeout_ms: self.request_timeout.as_millis(),
                    method,
                    uri: log_uri,
                }
                .into());
            }
        };

        let (parts, incoming) = response.into_parts();
        let reason = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .map(|reason| String::from_utf8_lossy(reason.as_bytes()).into_owned());
        Ok(IncomingResponse {
            status: parts.status,
            reason,
            headers: parts.headers,
            body: ResponseBody::from_stream(incoming.into_data_stream()),
        })
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl AsyncTransport for HyperTransport {
    fn send<'a>(
        &'a self,
        request: OutgoingRequest,
        identity: Option<&'a Identity>,
    ) -> BoxFuture<'a, Result<IncomingResponse, TransportFailure>> {
        Box::pin(self.execute(request, identity))
    }
}

fn map_infallible_to_box_error(never: Infallible) -> BoxError {
    match never {}
}

fn buffered_req_body(body: Bytes) -> ReqBody {
    Full::new(body).map_err(map_infallible_to_box_error).boxed()
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(current) = source {
        if let Some(io_error) = current.downcast_ref::<std::io::Error>()
            && is_socket_error_kind(io_error.kind())
        {
            return if error.is_connect() {
                TransportErrorKind::Connect
            } else {
                TransportErrorKind::Read
            };
        }
        source = current.source();
    }

    let text = error.to_string().to_ascii_lowercase();
    if error.is_connect() {
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }
    if text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
        || text.contains("connection closed")
    {
        return TransportErrorKind::Read;
    }
    TransportErrorKind::Other
}

