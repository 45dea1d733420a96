//! reqflow is a request orchestrator: it drives one logical HTTP request
//! across however many transport attempts it takes, with per-attempt
//! timeouts, delayed retries, an overall deadline, and exactly-once
//! completion reporting. The wire itself is out of scope; callers plug in a
//! [`Transport`] and reqflow supplies the lifecycle around it.
//!
//! ```no_run
//! use reqflow::{Client, RequestConfig, Transport};
//!
//! # fn demo(transport: impl Transport + 'static) {
//! let client = Client::new(transport);
//! let config = RequestConfig::builder("https://api.example.test/v1/items")
//!     .method("POST")
//!     .json(&serde_json::json!({ "name": "demo" }))
//!     .build();
//! client.request(config, |outcome| match outcome {
//!     Ok(response) => println!("{}", response.status()),
//!     Err(error) => eprintln!("{error}"),
//! });
//! # }
//! ```
//!
//! Retry decisions distinguish transport errors from completed-but-bad
//! responses: a retriable transport error may consume every configured
//! retry, while a response with a "bad" status (configurable per request)
//! retries only while more than one retry remains. A response that is not
//! retried is delivered unchanged, bad status and all; errors are only ever
//! synthesized from transport failures, aborts, or invalid configuration.

mod attempt;
mod classify;
mod config;
mod error;
mod lifecycle;
mod response;
mod sink;
mod transport;
mod util;

pub use classify::{Classification, classify};
pub use config::{Payload, RequestConfig, RequestConfigBuilder};
pub use error::{Error, ErrorCode, TransportErrorCode};
pub use lifecycle::{Client, RequestHandle};
pub use response::Response;
pub use sink::{BodySink, FileSink, MemorySink};
pub use transport::{
    RawOptionValue, Transport, TransportEvent, TransportHandle, TransportRequest,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;
