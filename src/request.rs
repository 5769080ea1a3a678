use std::fmt;
use std::io::Read;

use bytes::Bytes;
use http::header::{
    AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue, PROXY_AUTHORIZATION, TRANSFER_ENCODING,
};
use http::{HeaderMap, Method, Uri};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::body::Body;
use crate::error::Error;
use crate::util::{parse_header_name, parse_header_value};

/// Which delivery path a request is routed to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    #[default]
    Asynchronous,
    Synchronous,
}

impl ExecutionMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asynchronous => "async",
            Self::Synchronous => "sync",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// When a send is considered complete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompletionOption {
    /// The whole response body is read before the response is returned.
    #[default]
    ResponseContentRead,
    /// The response is returned once headers arrive; the body stays on the connection.
    ResponseHeadersRead,
}

/// Credentials applied while the connection and request stream are acquired.
#[derive(Clone, Default)]
pub struct Identity {
    authorization: Option<HeaderValue>,
    proxy_authorization: Option<HeaderValue>,
}

impl Identity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bearer(token: &str) -> Result<Self, Error> {
        let value = parse_header_value(AUTHORIZATION.as_str(), &format!("Bearer {token}"))?;
        Ok(Self::new().authorization(value))
    }

    pub fn authorization(mut self, mut value: HeaderValue) -> Self {
        value.set_sensitive(true);
        self.authorization = Some(value);
        self
    }

    pub fn proxy_authorization(mut self, mut value: HeaderValue) -> Self {
        value.set_sensitive(true);
        self.proxy_authorization = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.authorization.is_none() && self.proxy_authorization.is_none()
    }

    /// Adds the credentials to `headers` without overriding values the request set itself.
    pub(crate) fn apply_to(&self, headers: &mut HeaderMap) {
        if let Some(value) = &self.authorization
            && !headers.contains_key(AUTHORIZATION)
        {
            headers.insert(AUTHORIZATION, value.clone());
        }
        if let Some(value) = &self.proxy_authorization
            && !headers.contains_key(PROXY_AUTHORIZATION)
        {
            headers.insert(PROXY_AUTHORIZATION, value.clone());
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Identity")
            .field("authorization", &self.authorization.is_some())
            .field("proxy_authorization", &self.proxy_authorization.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Option<Body>,
    mode: ExecutionMode,
    mode_locked: bool,
    completion: CompletionOption,
    cancellation: CancellationToken,
    identity: Option<Identity>,
}

impl Request {
    /// Creates a request for an absolute `http`/`https` URI.
    pub fn new(method: Method, uri: &str) -> Result<Self, Error> {
        let parsed: Uri = uri.parse().map_err(|_| Error::InvalidUri {
            uri: uri.to_owned(),
        })?;
        let scheme_supported = parsed
            .scheme_str()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"));
        if !scheme_supported || parsed.authority().is_none() {
            return Err(Error::InvalidUri {
                uri: uri.to_owned(),
            });
        }
        Ok(Self {
            method,
            uri: parsed,
            headers: HeaderMap::new(),
            body: None,
            mode: ExecutionMode::default(),
            mode_locked: false,
            completion: CompletionOption::default(),
            cancellation: CancellationToken::new(),
            identity: None,
        })
    }

    pub fn get(uri: &str) -> Result<Self, Error> {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Result<Self, Error> {
        Self::new(Method::POST, uri)
    }

    pub fn put(uri: &str) -> Result<Self, Error> {
        Self::new(Method::PUT, uri)
    }

    pub fn delete(uri: &str) -> Result<Self, Error> {
        Self::new(Method::DELETE, uri)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self, Error> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn body_reader<R>(self, reader: R) -> Self
    where
        R: Read + Send + Sync + 'static,
    {
        self.body(Body::from_reader(reader))
    }

    pub fn json<T>(mut self, value: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_vec(value).map_err(|source| Error::Serialize { source })?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Body::from_bytes(Bytes::from(encoded)));
        Ok(self)
    }

    /// Requests chunked transfer so the body is uploaded incrementally.
    pub fn chunked(mut self) -> Self {
        self.headers
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        self
    }

    pub fn completion(mut self, completion: CompletionOption) -> Self {
        self.completion = completion;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Marks the request for the blocking delivery path.
    pub fn synchronous(mut self) -> Self {
        self.mode = ExecutionMode::Synchronous;
        self
    }

    /// Changes the execution mode. Fails while a delivery sequence is running.
    pub fn set_execution_mode(&mut self, mode: ExecutionMode) -> Result<(), Error> {
        if self.mode_locked && self.mode != mode {
            return Err(Error::invalid_request(
                "execution mode cannot change during delivery",
            ));
        }
        self.mode = mode;
        Ok(())
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn is_synchronous(&self) -> bool {
        self.mode == ExecutionMode::Synchronous
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_ref(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    pub fn set_body(&mut self, body: Option<Body>) {
        self.body = body;
    }

    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    pub fn completion_option(&self) -> CompletionOption {
        self.completion
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn identity_ref(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub(crate) fn lock_execution_mode(&mut self) {
        self.mode_locked = true;
    }

    pub(crate) fn unlock_execution_mode(&mut self) {
        self.mode_locked = false;
    }

    pub(crate) fn cancelled_error(&self) -> Error {
        Error::Cancelled {
            method: self.method.clone(),
            uri: crate::util::path_for_logs(&self.uri),
        }
    }
}
