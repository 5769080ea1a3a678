use std::thread;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use http::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::delivery::{AsyncDelivery, BlockingDelivery};
use crate::error::Error;
use crate::replay::ReplayableBody;
use crate::request::Request;
use crate::response::Response;
use crate::util::path_for_logs;

const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_UNAVAILABLE_DELAY: Duration = Duration::from_millis(5000);
const DEFAULT_TOO_MANY_REQUESTS_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_NETWORK_ERROR_DELAY: Duration = Duration::from_millis(2000);
const DELAY_TICK: Duration = Duration::from_millis(10);

/// Fixed-delay retry rules.
///
/// Status retries (503, 429) draw from a bounded budget. Network faults do
/// not touch that budget; they are retried until the request is cancelled,
/// unless [`RetryPolicy::max_network_retries`] sets a separate bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: usize,
    unavailable_delay: Duration,
    too_many_requests_delay: Duration,
    network_error_delay: Duration,
    max_network_retries: Option<usize>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            unavailable_delay: DEFAULT_UNAVAILABLE_DELAY,
            too_many_requests_delay: DEFAULT_TOO_MANY_REQUESTS_DELAY,
            network_error_delay: DEFAULT_NETWORK_ERROR_DELAY,
            max_network_retries: None,
        }
    }
}

impl RetryPolicy {
    /// No status retries. Network faults are still retried.
    pub fn disabled() -> Self {
        Self::default().max_retries(0)
    }

    /// Retries after the first attempt for 503/429 responses.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn unavailable_delay(mut self, delay: Duration) -> Self {
        self.unavailable_delay = delay;
        self
    }

    pub fn too_many_requests_delay(mut self, delay: Duration) -> Self {
        self.too_many_requests_delay = delay;
        self
    }

    pub fn network_error_delay(mut self, delay: Duration) -> Self {
        self.network_error_delay = delay;
        self
    }

    pub fn max_network_retries(mut self, max_network_retries: usize) -> Self {
        self.max_network_retries = Some(max_network_retries);
        self
    }

    pub fn configured_max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn configured_max_network_retries(&self) -> Option<usize> {
        self.max_network_retries
    }

    fn delay_for(&self, outcome: RetryOutcome) -> Option<Duration> {
        match outcome {
            RetryOutcome::ServiceUnavailable => Some(self.unavailable_delay),
            RetryOutcome::TooManyRequests => Some(self.too_many_requests_delay),
            RetryOutcome::NetworkFault => Some(self.network_error_delay),
            RetryOutcome::Terminal | RetryOutcome::Fault => None,
        }
    }
}

/// Classification of one attempt's outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetryOutcome {
    /// A response that is returned as-is.
    Terminal,
    ServiceUnavailable,
    TooManyRequests,
    /// A fault whose source chain reaches a socket-level failure.
    NetworkFault,
    /// Any other fault; returned to the caller unchanged.
    Fault,
}

impl RetryOutcome {
    pub fn classify(result: &Result<Response, Error>) -> Self {
        match result {
            Ok(response) => Self::of_status(response.status()),
            Err(error) if error.is_network_error() => Self::NetworkFault,
            Err(_) => Self::Fault,
        }
    }

    pub fn of_status(status: StatusCode) -> Self {
        match status {
            StatusCode::SERVICE_UNAVAILABLE => Self::ServiceUnavailable,
            StatusCode::TOO_MANY_REQUESTS => Self::TooManyRequests,
            _ => Self::Terminal,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::ServiceUnavailable => "service_unavailable",
            Self::TooManyRequests => "too_many_requests",
            Self::NetworkFault => "network_error",
            Self::Fault => "fault",
        }
    }
}

enum Step {
    Finish(Result<Response, Error>),
    Retry {
        discard: Option<Response>,
        delay: Duration,
    },
}

struct RetryState<'a> {
    policy: &'a RetryPolicy,
    method: Method,
    path: String,
    remaining: usize,
    network_retries: usize,
}

impl<'a> RetryState<'a> {
    fn new(policy: &'a RetryPolicy, request: &Request) -> Self {
        Self {
            policy,
            method: request.method().clone(),
            path: path_for_logs(request.uri()),
            remaining: policy.max_retries,
            network_retries: 0,
        }
    }

    fn next_step(&mut self, result: Result<Response, Error>) -> Step {
        let outcome = RetryOutcome::classify(&result);
        match result {
            Ok(response) => self.after_response(response, outcome),
            Err(error) => self.after_fault(error, outcome),
        }
    }

    fn after_response(&mut self, response: Response, outcome: RetryOutcome) -> Step {
        if self.remaining == 0 {
            if !response.is_success() {
                error!(
                    method = %self.method,
                    path = %self.path,
                    status = response.status().as_u16(),
                    reason = response.reason(),
                    "final-failure"
                );
            }
            return Step::Finish(Ok(response));
        }
        let Some(delay) = self.policy.delay_for(outcome) else {
            return Step::Finish(Ok(response));
        };
        self.remaining -= 1;
        let delay_ms = delay_millis(delay);
        if outcome == RetryOutcome::TooManyRequests {
            info!(
                reason = outcome.as_str(),
                method = %self.method,
                path = %self.path,
                remaining_attempts = self.remaining,
                delay_ms,
                "retry-wait"
            );
        } else {
            warn!(
                reason = outcome.as_str(),
                method = %self.method,
                path = %self.path,
                remaining_attempts = self.remaining,
                delay_ms,
                "retry-wait"
            );
        }
        Step::Retry {
            discard: Some(response),
            delay,
        }
    }

    fn after_fault(&mut self, fault: Error, outcome: RetryOutcome) -> Step {
        let Some(delay) = self.policy.delay_for(outcome) else {
            return Step::Finish(Err(fault));
        };
        if let Some(limit) = self.policy.max_network_retries
            && self.network_retries >= limit
        {
            error!(
                method = %self.method,
                path = %self.path,
                network_retries = self.network_retries,
                error = %fault,
                "final-failure"
            );
            return Step::Finish(Err(fault));
        }
        self.network_retries += 1;
        warn!(
            reason = outcome.as_str(),
            method = %self.method,
            path = %self.path,
            remaining_attempts = self.remaining,
            delay_ms = delay_millis(delay),
            error = %fault,
            "retry-wait"
        );
        Step::Retry {
            discard: None,
            delay,
        }
    }
}

/// Wraps a delivery path with classified, fixed-delay retries.
///
/// The request body is buffered once up front and replayed byte-for-byte on
/// every attempt. Whatever the exit path, the request gets its body back and
/// its execution mode unlocked.
#[derive(Clone, Debug)]
pub struct RetryMiddleware<D> {
    inner: D,
    policy: RetryPolicy,
}

impl<D> RetryMiddleware<D> {
    pub fn new(inner: D, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

/// Whole milliseconds for log fields, saturating at `u64::MAX`.
fn delay_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn begin(request: &mut Request) -> Option<ReplayableBody> {
    request.lock_execution_mode();
    request.take_body().map(ReplayableBody::new)
}

fn finish(request: &mut Request, replay: Option<ReplayableBody>) {
    if let Some(replay) = replay {
        request.set_body(replay.into_original());
    }
    request.unlock_execution_mode();
}

fn load_attempt_body(
    request: &mut Request,
    replay: &mut Option<ReplayableBody>,
) -> Result<(), Error> {
    if let Some(replay) = replay.as_mut() {
        request.set_body(Some(replay.attempt_body()?));
    }
    Ok(())
}

/// Blocks the calling thread for `delay`, polling `token` every tick.
/// Returns `false` when cancelled first.
fn blocking_delay(delay: Duration, token: &CancellationToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(DELAY_TICK));
    }
}

async fn suspending_delay(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

impl<D: BlockingDelivery> RetryMiddleware<D> {
    fn run_blocking(
        &self,
        request: &mut Request,
        replay: &mut Option<ReplayableBody>,
    ) -> Result<Response, Error> {
        if let Some(replay) = replay.as_mut() {
            replay.populate()?;
        }
        let mut state = RetryState::new(&self.policy, request);
        loop {
            if request.cancellation_token().is_cancelled() {
                return Err(request.cancelled_error());
            }
            load_attempt_body(request, replay)?;
            let result = self.inner.deliver(request);
            request.take_body();
            if request.cancellation_token().is_cancelled() {
                if let Ok(response) = result {
                    discard_blocking(response);
                }
                return Err(request.cancelled_error());
            }

            match state.next_step(result) {
                Step::Finish(result) => return result,
                Step::Retry { discard, delay } => {
                    if let Some(response) = discard {
                        discard_blocking(response);
                    }
                    if !blocking_delay(delay, request.cancellation_token()) {
                        return Err(request.cancelled_error());
                    }
                    if let Some(replay) = replay.as_mut() {
                        replay.reset();
                    }
                }
            }
        }
    }
}

impl<D: AsyncDelivery> RetryMiddleware<D> {
    async fn run_async(
        &self,
        request: &mut Request,
        replay: &mut Option<ReplayableBody>,
    ) -> Result<Response, Error> {
        if let Some(replay) = replay.as_mut() {
            replay.populate_async().await?;
        }
        let mut state = RetryState::new(&self.policy, request);
        loop {
            if request.cancellation_token().is_cancelled() {
                return Err(request.cancelled_error());
            }
            load_attempt_body(request, replay)?;
            let result = self.inner.deliver_async(request).await;
            request.take_body();
            if request.cancellation_token().is_cancelled() {
                if let Ok(response) = result {
                    discard_async(response).await;
                }
                return Err(request.cancelled_error());
            }

            match state.next_step(result) {
                Step::Finish(result) => return result,
                Step::Retry { discard, delay } => {
                    if let Some(response) = discard {
                        discard_async(response).await;
                    }
                    let token = request.cancellation_token().clone();
                    if !suspending_delay(delay, &token).await {
                        return Err(request.cancelled_error());
                    }
                    if let Some(replay) = replay.as_mut() {
                        replay.reset();
                    }
                }
            }
        }
    }
}

fn discard_blocking(response: Response) {
    let status = response.status().as_u16();
    if let Err(error) = response.discard() {
        debug!(status, error = %error, "failed to drain discarded response");
    }
}

async fn discard_async(response: Response) {
    let status = response.status().as_u16();
    if let Err(error) = response.discard_async().await {
        debug!(status, error = %error, "failed to drain discarded response");
    }
}

impl<D: BlockingDelivery> BlockingDelivery for RetryMiddleware<D> {
    fn deliver(&self, request: &mut Request) -> Result<Response, Error> {
        let mut replay = begin(request);
        let result = self.run_blocking(request, &mut replay);
        finish(request, replay);
        result
    }
}

impl<D: AsyncDelivery> AsyncDelivery for RetryMiddleware<D> {
    fn deliver_async<'a>(
        &'a self,
        request: &'a mut Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            let mut replay = begin(request);
            let result = self.run_async(request, &mut replay).await;
            finish(request, replay);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures_util::future::BoxFuture;
    use http::{HeaderMap, Method, StatusCode};
    use tokio_util::sync::CancellationToken;

    use super::{RetryMiddleware, RetryOutcome, RetryPolicy, delay_millis};
    use crate::body::Body;
    use crate::delivery::{AsyncDelivery, BlockingDelivery};
    use crate::error::{Error, TransportErrorKind};
    use crate::request::{ExecutionMode, Request};
    use crate::response::{Response, ResponseBody};

    #[derive(Clone, Copy)]
    enum Reply {
        Status(u16),
        SocketFault,
        WrappedSocketFault,
        Invalid,
    }

    /// Replays a script of outcomes; the last entry repeats once exhausted.
    struct ScriptedDelivery {
        script: Mutex<VecDeque<Reply>>,
        bodies: Mutex<Vec<Vec<u8>>>,
        cancel_on_attempt: Option<(usize, CancellationToken)>,
    }

    impl ScriptedDelivery {
        fn new(script: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                bodies: Mutex::new(Vec::new()),
                cancel_on_attempt: None,
            }
        }

        fn cancel_on_attempt(mut self, attempt: usize, token: CancellationToken) -> Self {
            self.cancel_on_attempt = Some((attempt, token));
            self
        }

        fn attempts(&self) -> usize {
            self.bodies.lock().expect("lock bodies").len()
        }

        fn bodies(&self) -> Vec<Vec<u8>> {
            self.bodies.lock().expect("lock bodies").clone()
        }

        fn attempt(&self, request: &mut Request) -> Result<Response, Error> {
            let body = match request.take_body() {
                Some(body) => body.read_all().expect("read attempt body").to_vec(),
                None => Vec::new(),
            };
            let attempt = {
                let mut bodies = self.bodies.lock().expect("lock bodies");
                bodies.push(body);
                bodies.len()
            };
            if let Some((cancel_at, token)) = &self.cancel_on_attempt
                && *cancel_at == attempt
            {
                token.cancel();
            }

            let reply = {
                let mut script = self.script.lock().expect("lock script");
                if script.len() > 1 {
                    script.pop_front().expect("script entry")
                } else {
                    *script.front().expect("script entry")
                }
            };
            match reply {
                Reply::Status(status) => Ok(Response::new(
                    StatusCode::from_u16(status).expect("valid status"),
                    None,
                    HeaderMap::new(),
                    ResponseBody::buffered("payload"),
                    request.execution_mode(),
                    request.method().clone(),
                    "/resource".to_owned(),
                )),
                Reply::SocketFault => Err(Error::Transport {
                    kind: TransportErrorKind::Connect,
                    method: Method::GET,
                    uri: "/resource".to_owned(),
                    source: Box::new(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)),
                }),
                Reply::WrappedSocketFault => Err(Error::read_body(std::io::Error::from(
                    std::io::ErrorKind::ConnectionReset,
                ))),
                Reply::Invalid => Err(Error::invalid_request("rejected by delivery")),
            }
        }
    }

    impl BlockingDelivery for ScriptedDelivery {
        fn deliver(&self, request: &mut Request) -> Result<Response, Error> {
            self.attempt(request)
        }
    }

    impl AsyncDelivery for ScriptedDelivery {
        fn deliver_async<'a>(
            &'a self,
            request: &'a mut Request,
        ) -> BoxFuture<'a, Result<Response, Error>> {
            Box::pin(async move { self.attempt(request) })
        }
    }

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::default()
            .max_retries(max_retries)
            .unavailable_delay(Duration::from_millis(1))
            .too_many_requests_delay(Duration::from_millis(1))
            .network_error_delay(Duration::from_millis(1))
    }

    fn sync_request() -> Request {
        Request::post("http://127.0.0.1/resource")
            .expect("request")
            .synchronous()
    }

    #[test]
    fn default_policy_matches_fixed_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.configured_max_retries(), 3);
        assert_eq!(policy.unavailable_delay, Duration::from_millis(5000));
        assert_eq!(policy.too_many_requests_delay, Duration::from_millis(1000));
        assert_eq!(policy.network_error_delay, Duration::from_millis(2000));
        assert_eq!(policy.configured_max_network_retries(), None);
    }

    #[test]
    fn outcome_classification_walks_fault_sources() {
        assert_eq!(
            RetryOutcome::of_status(StatusCode::SERVICE_UNAVAILABLE),
            RetryOutcome::ServiceUnavailable
        );
        assert_eq!(
            RetryOutcome::of_status(StatusCode::TOO_MANY_REQUESTS),
            RetryOutcome::TooManyRequests
        );
        assert_eq!(
            RetryOutcome::of_status(StatusCode::INTERNAL_SERVER_ERROR),
            RetryOutcome::Terminal
        );
        let wrapped = Err(Error::read_body(std::io::Error::from(
            std::io::ErrorKind::BrokenPipe,
        )));
        assert_eq!(RetryOutcome::classify(&wrapped), RetryOutcome::NetworkFault);
        let invalid = Err(Error::invalid_request("bad"));
        assert_eq!(RetryOutcome::classify(&invalid), RetryOutcome::Fault);
    }

    #[test]
    fn logged_delay_saturates_instead_of_wrapping() {
        assert_eq!(delay_millis(Duration::from_millis(5000)), 5000);
        assert_eq!(delay_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn rejected_stream_body_is_left_on_the_request() {
        let delivery = Arc::new(ScriptedDelivery::new([Reply::Status(200)]));
        let middleware = RetryMiddleware::new(delivery.clone(), fast_policy(0));
        let chunks = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(
            bytes::Bytes::from_static(b"chunk"),
        )]);
        let mut request = sync_request().body(Body::from_stream(chunks));

        let error = middleware
            .deliver(&mut request)
            .expect_err("stream body needs async execution");
        assert_eq!(error.code().as_str(), "invalid_request");
        assert!(request.body_ref().is_some_and(Body::is_stream));
        assert_eq!(delivery.attempts(), 0);
    }

    #[test]
    fn unavailable_is_retried_until_budget_is_spent_then_returned() {
        let delivery = Arc::new(ScriptedDelivery::new([Reply::Status(503)]));
        let middleware = RetryMiddleware::new(delivery.clone(), fast_policy(2));
        let mut request = sync_request();

        let response = middleware.deliver(&mut request).expect("final response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(delivery.attempts(), 3);
    }

    #[test]
    fn network_faults_do_not_consume_status_budget() {
        let delivery = Arc::new(ScriptedDelivery::new([
            Reply::SocketFault,
            Reply::WrappedSocketFault,
            Reply::SocketFault,
            Reply::SocketFault,
            Reply::SocketFault,
            Reply::Status(200),
        ]));
        let middleware = RetryMiddleware::new(delivery.clone(), fast_policy(1));
        let mut request = sync_request();

        let response = middleware.deliver(&mut request).expect("success");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(delivery.attempts(), 6);
    }

    #[test]
    fn other_statuses_return_on_first_attempt() {
        let delivery = Arc::new(ScriptedDelivery::new([Reply::Status(404)]));
        let middleware = RetryMiddleware::new(delivery.clone(), fast_policy(3));
        let mut request = sync_request();

        let response = middleware.deliver(&mut request).expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(delivery.attempts(), 1);
    }

    #[test]
    fn non_network_fault_propagates_without_retry() {
        let delivery = Arc::new(ScriptedDelivery::new([Reply::Invalid]));
        let middleware = RetryMiddleware::new(delivery.clone(), fast_policy(3));
        let mut request = sync_request();

        let error = middleware.deliver(&mut request).expect_err("fault");
        assert_eq!(error.code().as_str(), "invalid_request");
        assert_eq!(delivery.attempts(), 1);
    }

    #[test]
    fn network_retry_bound_stops_persistent_faults() {
        let delivery = Arc::new(ScriptedDelivery::new([Reply::SocketFault]));
        let middleware =
            RetryMiddleware::new(delivery.clone(), fast_policy(3).max_network_retries(2));
        let mut request = sync_request();

        let error = middleware.deliver(&mut request).expect_err("fault");
        assert!(error.is_network_error());
        assert_eq!(delivery.attempts(), 3);
    }

    #[test]
    fn body_is_replayed_identically_and_restored_afterwards() {
        let payload: Vec<u8> = (0..10 * 1024).map(|index| (index % 251) as u8).collect();
        let delivery = Arc::new(ScriptedDelivery::new([
            Reply::Status(503),
            Reply::Status(429),
            Reply::Status(200),
        ]));
        let middleware = RetryMiddleware::new(delivery.clone(), fast_policy(2));
        let mut request = sync_request().body_reader(std::io::Cursor::new(payload.clone()));

        let response = middleware.deliver(&mut request).expect("success");
        assert_eq!(response.status(), StatusCode::OK);
        let bodies = delivery.bodies();
        assert_eq!(bodies.len(), 3);
        assert!(bodies.iter().all(|body| *body == payload));

        let restored = request.take_body().expect("body restored");
        assert_eq!(restored.length(), Some(payload.len() as u64));
        assert_eq!(restored.read_all().expect("restored content"), payload);
    }

    #[test]
    fn execution_mode_is_locked_only_while_delivering() {
        struct ModeRecorder;
        impl BlockingDelivery for ModeRecorder {
            fn deliver(&self, request: &mut Request) -> Result<Response, Error> {
                let error = request
                    .set_execution_mode(ExecutionMode::Asynchronous)
                    .expect_err("mode is locked mid-sequence");
                Err(error)
            }
        }

        let middleware = RetryMiddleware::new(ModeRecorder, fast_policy(0));
        let mut request = sync_request();
        middleware.deliver(&mut request).expect_err("recorder fails");
        request
            .set_execution_mode(ExecutionMode::Asynchronous)
            .expect("unlocked afterwards");
    }

    #[test]
    fn blocking_delay_returns_early_on_cancellation() {
        let delivery = Arc::new(ScriptedDelivery::new([Reply::SocketFault]));
        let policy = fast_policy(0).network_error_delay(Duration::from_secs(30));
        let middleware = RetryMiddleware::new(delivery.clone(), policy);
        let token = CancellationToken::new();
        let mut request = sync_request().cancellation(token.clone());

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        });
        let started = std::time::Instant::now();
        let error = middleware.deliver(&mut request).expect_err("cancelled");
        canceller.join().expect("canceller thread");

        assert!(error.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(delivery.attempts(), 1);
    }

    #[test]
    fn cancelled_request_never_reaches_delivery() {
        let delivery = Arc::new(ScriptedDelivery::new([Reply::Status(200)]));
        let middleware = RetryMiddleware::new(delivery.clone(), fast_policy(3));
        let token = CancellationToken::new();
        token.cancel();
        let mut request = sync_request().cancellation(token);

        let error = middleware.deliver(&mut request).expect_err("cancelled");
        assert!(error.is_cancelled());
        assert_eq!(delivery.attempts(), 0);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock logs").extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn exhausted_budget_logs_final_failure() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let delivery = Arc::new(ScriptedDelivery::new([Reply::Status(429)]));
        let middleware = RetryMiddleware::new(delivery, fast_policy(1));
        let mut request = sync_request();
        let response = tracing::subscriber::with_default(subscriber, || {
            middleware.deliver(&mut request).expect("final response")
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let output = String::from_utf8(logs.0.lock().expect("lock logs").clone())
            .expect("utf-8 logs");
        assert!(output.contains("retry-wait"));
        assert!(output.contains("reason=\"too_many_requests\""));
        assert!(output.contains("ERROR"));
        assert!(output.contains("final-failure"));
        assert!(output.contains("status=429"));
    }

    #[tokio::test(start_paused = true)]
    async fn async_sequence_waits_fixed_delays_between_statuses() {
        let delivery = Arc::new(ScriptedDelivery::new([
            Reply::Status(503),
            Reply::Status(429),
            Reply::Status(200),
        ]));
        let middleware =
            RetryMiddleware::new(delivery.clone(), RetryPolicy::default().max_retries(2));
        let mut request = Request::post("http://127.0.0.1/resource")
            .expect("request")
            .body(vec![7_u8; 10 * 1024]);

        let started = tokio::time::Instant::now();
        let response = middleware
            .deliver_async(&mut request)
            .await
            .expect("success");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(delivery.attempts(), 3);
        assert!(delivery.bodies().iter().all(|body| *body == vec![7_u8; 10 * 1024]));
        assert!(started.elapsed() >= Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn async_socket_faults_retry_until_cancelled() {
        let token = CancellationToken::new();
        let delivery = Arc::new(
            ScriptedDelivery::new([Reply::SocketFault]).cancel_on_attempt(5, token.clone()),
        );
        let middleware = RetryMiddleware::new(delivery.clone(), RetryPolicy::default());
        let mut request = Request::get("http://127.0.0.1/resource")
            .expect("request")
            .cancellation(token);

        let started = tokio::time::Instant::now();
        let error = middleware
            .deliver_async(&mut request)
            .await
            .expect_err("cancelled");
        assert!(error.is_cancelled());
        assert_eq!(delivery.attempts(), 5);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(4 * 2000));
        assert!(elapsed < Duration::from_millis(5 * 2000));
    }

    #[tokio::test(start_paused = true)]
    async fn async_cancellation_during_delay_is_prompt() {
        let delivery = Arc::new(ScriptedDelivery::new([Reply::Status(503)]));
        let middleware = RetryMiddleware::new(delivery.clone(), RetryPolicy::default());
        let token = CancellationToken::new();
        let mut request = Request::get("http://127.0.0.1/resource")
            .expect("request")
            .cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
        let started = tokio::time::Instant::now();
        let error = middleware
            .deliver_async(&mut request)
            .await
            .expect_err("cancelled");
        canceller.await.expect("canceller task");

        assert!(error.is_cancelled());
        assert!(started.elapsed() < Duration::from_millis(5000));
        assert_eq!(delivery.attempts(), 1);
    }
}
