use std::time::Duration;

use http::Method;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};

use crate::error::{Error, TransportErrorKind};
use crate::request::Identity;
use crate::response::ResponseBody;
use crate::util::path_for_logs;

use super::{
    BlockingTransport, IncomingResponse, OutgoingBody, OutgoingRequest, TransportConfig,
    TransportFailure,
};

/// Blocking transport on a pooled [`ureq::Agent`].
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    request_timeout: Duration,
}

impl UreqTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .user_agent(config.client_name.as_str())
            .timeout_connect(Some(config.connect_timeout))
            .timeout_global(Some(config.request_timeout))
            .build();
        Self {
            agent: agent_config.new_agent(),
            request_timeout: config.request_timeout,
        }
    }

    fn run<S: ureq::AsSendBody>(
        &self,
        request: ureq::http::Request<S>,
        method: &Method,
        uri: &str,
    ) -> Result<IncomingResponse, TransportFailure> {
        let response = self.agent.run(request).map_err(|source| match source {
            ureq::Error::Timeout(_) => Error::Timeout {
                timeout_ms: self.request_timeout.as_millis(),
                method: method.clone(),
                uri: uri.to_owned(),
            },
            other => Error::Transport {
                kind: classify_ureq_transport_error(&other),
                method: method.clone(),
                uri: uri.to_owned(),
                source: Box::new(other),
            },
        })?;

        let (parts, body) = response.into_parts();
        Ok(IncomingResponse::new(
            parts.status,
            parts.headers,
            ResponseBody::from_reader(body.into_reader()),
        ))
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UreqTransport")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl BlockingTransport for UreqTransport {
    fn send(
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
        // ureq frames the body itself from the body kind.
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);

        let uri_text = uri.to_string();
        let log_uri = path_for_logs(&uri);
        let mut builder = ureq::http::Request::builder()
            .method(method.clone())
            .uri(uri_text.as_str());
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }

        match body {
            OutgoingBody::Empty => {
                let request = builder
                    .body(())
                    .map_err(|source| Error::RequestBuild { source })?;
                self.run(request, &method, &log_uri)
            }
            OutgoingBody::Sized(bytes) => {
                let request = builder
                    .body(bytes.to_vec())
                    .map_err(|source| Error::RequestBuild { source })?;
                self.run(request, &method, &log_uri)
            }
            OutgoingBody::Chunked(reader) => {
                let request = builder
                    .body(ureq::SendBody::from_owned_reader(reader))
                    .map_err(|source| Error::RequestBuild { source })?;
                self.run(request, &method, &log_uri)
            }
            OutgoingBody::Stream(_) => Err(Error::invalid_request(
                "blocking transport cannot send an asynchronous body stream",
            )
            .into()),
        }
    }
}

pub(crate) fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(source) => match source.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportErrorKind::Read
            }
            std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
            _ => TransportErrorKind::Other,
        },
        _ => TransportErrorKind::Other,
    }
}
