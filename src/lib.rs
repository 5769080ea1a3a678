//! `syncwire` delivers HTTP requests either on the calling thread or on the
//! tokio runtime, with replayable request bodies and bounded retries.
//!
//! A blocking [`HttpClient::send`] never waits on async machinery: the whole
//! exchange, including retry delays and response body reads, runs with
//! blocking primitives on the caller's thread.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use syncwire::prelude::{HttpClient, Request, RetryPolicy};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::builder()
//!         .client_name("my-sdk")
//!         .request_timeout(Duration::from_secs(10))
//!         .retry_policy(RetryPolicy::default().max_retries(2))
//!         .try_build()?;
//!
//!     let mut request = Request::post("https://api.example.com/v1/items")?
//!         .json(&serde_json::json!({ "name": "demo" }))?;
//!     let response = client.send(&mut request)?;
//!     println!("status={} body={}", response.status(), response.text()?);
//!     Ok(())
//! }
//! ```
//!
//! # Retry Rules
//!
//! - `503` waits 5 s and `429` waits 1 s; both spend the status retry budget.
//! - Network faults wait 2 s and are retried until the request's
//!   cancellation token fires, unless `max_network_retries` is set.
//! - Every other status or fault is returned on the spot.

mod body;
mod client;
mod delivery;
mod error;
mod replay;
mod request;
mod response;
mod retry;
pub mod transport;
mod util;

pub use crate::body::Body;
pub use crate::client::{HttpClient, HttpClientBuilder};
pub use crate::delivery::{AsyncDelivery, AsyncPath, BlockingDelivery, SynchronousBridge};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::replay::ReplayableBody;
pub use crate::request::{CompletionOption, ExecutionMode, Identity, Request};
pub use crate::response::{Response, ResponseBody};
pub use crate::retry::{RetryMiddleware, RetryOutcome, RetryPolicy};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Body, CancellationToken, CompletionOption, Error, ErrorCode, ExecutionMode, HttpClient,
        Identity, Request, Response, Result, RetryPolicy, TransportErrorKind,
    };
}
