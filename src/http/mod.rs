//! The HTTP module which provides the REST requests the realtime engine depends on.
//!
//! An important function of the REST API is ratelimiting. Requests to endpoints are ratelimited to
//! prevent spam, and once ratelimited Discord will stop performing requests. The library
//! implements protection to pre-emptively ratelimit, to ensure that no wasted requests are made.
//!
//! The only endpoint used by the library itself is the gateway discovery; [`Http::request`] is
//! available for anything else a bot may want to call through the same ratelimiter.

mod client;
mod error;
pub mod ratelimiting;

pub use reqwest::{Method, StatusCode};

pub use self::client::Http;
pub use self::error::Error as HttpError;
pub use self::ratelimiting::{Bucket, Ratelimiter};
