use std::error::Error as StdError;
use std::io::ErrorKind;

use http::Method;
use thiserror::Error;

pub(crate) type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl TransportErrorKind {
    /// Kinds that originate in the socket layer rather than in protocol or TLS handling.
    pub const fn is_network(self) -> bool {
        matches!(self, Self::Dns | Self::Connect | Self::Read)
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    InvalidRequest,
    InvalidHeaderName,
    InvalidHeaderValue,
    SerializeJson,
    RequestBuild,
    Transport,
    Timeout,
    ReadBody,
    UnsupportedCharset,
    Deserialize,
    TlsInit,
    Cancelled,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::InvalidRequest => "invalid_request",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::SerializeJson => "serialize_json",
            Self::RequestBuild => "request_build",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::ReadBody => "read_body",
            Self::UnsupportedCharset => "unsupported_charset",
            Self::Deserialize => "deserialize",
            Self::TlsInit => "tls_init",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("failed to read body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("unsupported response charset: {charset}")]
    UnsupportedCharset { charset: String },
    #[error("failed to decode response json: {source}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to initialize tls: {message}")]
    TlsInit { message: String },
    #[error("request was cancelled: {method} {uri}")]
    Cancelled { method: Method, uri: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Serialize { .. } => ErrorCode::SerializeJson,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::UnsupportedCharset { .. } => ErrorCode::UnsupportedCharset,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::TlsInit { .. } => ErrorCode::TlsInit,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` when this error, or any error in its source chain, is a
    /// socket-level fault.
    ///
    /// Wrapping does not hide the fault: a `ReadBody` error whose source is a
    /// reset connection still counts.
    pub fn is_network_error(&self) -> bool {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(error) = current {
            if is_network_link(error) {
                return true;
            }
            current = error.source();
        }
        false
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub(crate) fn read_body(source: impl Into<BoxError>) -> Self {
        Self::ReadBody {
            source: source.into(),
        }
    }
}

fn is_network_link(error: &(dyn StdError + 'static)) -> bool {
    if let Some(Error::Transport { kind, .. }) = error.downcast_ref::<Error>() {
        return kind.is_network();
    }
    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        return is_socket_error_kind(io_error.kind());
    }
    false
}

pub(crate) fn is_socket_error_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrNotAvailable
            | ErrorKind::AddrInUse
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}
