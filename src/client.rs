use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::Result;
use crate::delivery::{AsyncDelivery, AsyncPath, BlockingDelivery, SynchronousBridge};
use crate::error::Error;
use crate::request::{ExecutionMode, Identity, Request};
use crate::response::Response;
use crate::retry::{RetryMiddleware, RetryPolicy};
use crate::transport::{
    AsyncTransport, BlockingTransport, DEFAULT_CLIENT_NAME, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT, HyperTransport, TransportConfig, UreqTransport,
};

pub struct HttpClientBuilder {
    retry_policy: RetryPolicy,
    connect_timeout: Duration,
    request_timeout: Duration,
    client_name: String,
    default_identity: Option<Identity>,
    blocking_transport: Option<Arc<dyn BlockingTransport>>,
    async_transport: Option<Arc<dyn AsyncTransport>>,
}

impl HttpClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            default_identity: None,
            blocking_transport: None,
            async_transport: None,
        }
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Status retries after the first attempt; keeps the other policy values.
    pub fn retry_count(mut self, retry_count: usize) -> Self {
        self.retry_policy = self.retry_policy.max_retries(retry_count);
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    /// Sent as `User-Agent` by the built-in transports.
    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    /// Credentials applied to requests that carry no [`Identity`] of their own.
    pub fn default_identity(mut self, identity: Identity) -> Self {
        self.default_identity = Some(identity);
        self
    }

    pub fn blocking_transport(mut self, transport: Arc<dyn BlockingTransport>) -> Self {
        self.blocking_transport = Some(transport);
        self
    }

    pub fn async_transport(mut self, transport: Arc<dyn AsyncTransport>) -> Self {
        self.async_transport = Some(transport);
        self
    }

    pub fn try_build(self) -> Result<HttpClient> {
        let config = TransportConfig {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            client_name: self.client_name,
        };
        let blocking_transport = match self.blocking_transport {
            Some(transport) => transport,
            None => Arc::new(UreqTransport::new(&config)),
        };
        let async_transport = match self.async_transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(&config)?),
        };

        let mut bridge = SynchronousBridge::new(blocking_transport);
        let mut async_path = AsyncPath::new(async_transport);
        if let Some(identity) = self.default_identity {
            bridge = bridge.default_identity(identity.clone());
            async_path = async_path.default_identity(identity);
        }
        debug!(
            client_name = %config.client_name,
            max_retries = self.retry_policy.configured_max_retries(),
            "http client built"
        );

        Ok(HttpClient {
            blocking: Arc::new(RetryMiddleware::new(bridge, self.retry_policy.clone())),
            suspending: Arc::new(RetryMiddleware::new(async_path, self.retry_policy)),
        })
    }

    pub fn build(self) -> HttpClient {
        self.try_build()
            .unwrap_or_else(|error| panic!("failed to build syncwire http client: {error}"))
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HttpClientBuilder {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpClientBuilder")
            .field("retry_policy", &self.retry_policy)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("client_name", &self.client_name)
            .field("default_identity", &self.default_identity)
            .finish_non_exhaustive()
    }
}

/// Entry point for sending requests, blocking or suspending.
///
/// Both entry points run through the same retry rules; the execution mode
/// of the request selects which delivery path carries each attempt. The
/// request is borrowed so it comes back with its original body once the
/// sequence ends.
#[derive(Clone)]
pub struct HttpClient {
    blocking: Arc<RetryMiddleware<SynchronousBridge>>,
    suspending: Arc<RetryMiddleware<AsyncPath>>,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.blocking.policy()
    }

    /// Sends `request` on the calling thread and blocks until a final
    /// outcome, including any retry delays.
    ///
    /// The request is marked synchronous first. Safe to call from code that
    /// must not depend on an async scheduler making progress.
    pub fn send(&self, request: &mut Request) -> Result<Response> {
        request.set_execution_mode(ExecutionMode::Synchronous)?;
        self.blocking.deliver(request)
    }

    /// Sends `request` on the tokio runtime, suspending between attempts.
    pub async fn send_async(&self, request: &mut Request) -> Result<Response> {
        if request.is_synchronous() {
            return Err(Error::invalid_request(
                "request is marked synchronous; send it with HttpClient::send",
            ));
        }
        self.suspending.deliver_async(request).await
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpClient")
            .field("retry_policy", self.retry_policy())
            .finish_non_exhaustive()
    }
}
