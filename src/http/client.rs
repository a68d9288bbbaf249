use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, DATE, USER_AGENT};
use reqwest::{Client, ClientBuilder, Method, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use super::ratelimiting::{parse_seconds, Ratelimiter};
use super::HttpError;
use crate::constants;
use crate::internal::prelude::*;
use crate::json;
use crate::model::gateway::BotGateway;

/// How far the `Date` of a response may drift from the local clock before it is reported.
const MAX_CLOCK_SKEW: Duration = Duration::from_secs(1);

/// A client for the few REST endpoints the realtime engine needs.
///
/// Every request goes through the [`Ratelimiter`]: it waits for a ticket on its route, is sent,
/// and its response headers are fed back into the route's bucket. A 429 response is retried after
/// the `retry-after` the server declared.
pub struct Http {
    client: Client,
    ratelimiter: Ratelimiter,
    token: SecretString,
    api_base: String,
    skew_reported: AtomicBool,
}

impl fmt::Debug for Http {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http")
            .field("ratelimiter", &self.ratelimiter)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl Http {
    /// Creates a client authenticating as the bot with the given `token`.
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self::with_api_base(token, constants::API_BASE)
    }

    /// Creates a client sending its requests to `api_base` instead of Discord's API.
    #[must_use]
    pub fn with_api_base(token: &str, api_base: &str) -> Self {
        let token = token.trim();
        let token = token.strip_prefix("Bot ").unwrap_or(token);

        let client = configure_client_backend(Client::builder()).build().unwrap_or_else(|why| {
            warn!("Falling back to the default HTTP client: {}", why);
            Client::new()
        });

        Self {
            client,
            ratelimiter: Ratelimiter::new(),
            token: SecretString::new(format!("Bot {token}")),
            api_base: api_base.trim_end_matches('/').to_owned(),
            skew_reported: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn ratelimiter(&self) -> &Ratelimiter {
        &self.ratelimiter
    }

    /// Gets the gateway URL to connect to, along with the recommended shard count.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is not the expected JSON.
    #[cfg_attr(feature = "tracing_instrument", tracing::instrument(skip(self)))]
    pub async fn get_gateway(&self) -> Result<BotGateway> {
        let response = self.request(Method::GET, "/gateway/bot").await?;
        let bytes = response.bytes().await?;

        json::from_slice(&bytes)
    }

    /// Performs a ratelimited request against `path`, relative to the API base.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::UnsuccessfulRequest`] for any status other than a success or a 429,
    /// and [`HttpError::Request`] if the request could not be sent.
    pub async fn request(&self, method: Method, path: &str) -> Result<Response> {
        let key = format!("{method} {path}");
        let url = format!("{}{}", self.api_base, path);

        loop {
            self.ratelimiter.wait(&key).await;

            let response = self
                .client
                .request(method.clone(), &url)
                .headers(self.headers()?)
                .send()
                .await?;

            self.check_clock_skew(response.headers());
            self.ratelimiter.update(&key, response.headers()).await?;

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = parse_seconds(response.headers(), "retry-after")?
                    .unwrap_or(Duration::from_secs(1));
                debug!("Ratelimited on {} for {:?}, retrying", key, retry_after);
                sleep(retry_after).await;
                continue;
            }

            if status.is_success() {
                return Ok(response);
            }

            trace!("Unsuccessful response: {:?}", response);
            let body = response.text().await.unwrap_or_default();

            return Err(HttpError::UnsuccessfulRequest {
                status,
                body,
            }
            .into());
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(2);
        headers.insert(USER_AGENT, HeaderValue::from_static(constants::USER_AGENT));

        let mut authorization = HeaderValue::from_str(self.token.expose_secret())
            .map_err(|_| HttpError::InvalidHeader("authorization"))?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);

        Ok(headers)
    }

    /// Warns once if the server's clock disagrees with ours, which makes reset times unreliable.
    fn check_clock_skew(&self, headers: &HeaderMap) {
        let Some(skew) = clock_skew(headers, Utc::now()) else { return };

        if skew > MAX_CLOCK_SKEW && !self.skew_reported.swap(true, Ordering::Relaxed) {
            warn!(
                "Local clock differs from Discord's by {:?}; ratelimit resets may be inaccurate",
                skew
            );
        }
    }
}

/// The absolute difference between the `Date` header and `now`.
fn clock_skew(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let date = headers.get(DATE)?.to_str().ok()?;
    let date = DateTime::parse_from_rfc2822(date).ok()?;

    (now - date.with_timezone(&Utc)).abs().to_std().ok()
}

#[cfg(not(feature = "native_tls_backend"))]
fn configure_client_backend(builder: ClientBuilder) -> ClientBuilder {
    builder.use_rustls_tls()
}

#[cfg(feature = "native_tls_backend")]
fn configure_client_backend(builder: ClientBuilder) -> ClientBuilder {
    builder.use_native_tls()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn dated(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(DATE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn skew_is_measured_in_both_directions() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let behind = dated("Mon, 01 Jan 2024 11:59:57 GMT");
        assert_eq!(clock_skew(&behind, now), Some(Duration::from_secs(3)));

        let ahead = dated("Mon, 01 Jan 2024 12:00:02 GMT");
        assert_eq!(clock_skew(&ahead, now), Some(Duration::from_secs(2)));
    }

    #[test]
    fn missing_or_garbled_date_is_ignored() {
        let now = Utc::now();

        assert_eq!(clock_skew(&HeaderMap::new(), now), None);
        assert_eq!(clock_skew(&dated("yesterday"), now), None);
    }

    #[test]
    fn token_gets_a_single_bot_prefix() {
        let http = Http::new("Bot abc.def");
        assert_eq!(http.token.expose_secret(), "Bot abc.def");

        let http = Http::new(" abc.def ");
        assert_eq!(http.token.expose_secret(), "Bot abc.def");
    }

    #[test]
    fn api_base_drops_trailing_slash() {
        let http = Http::with_api_base("t", "http://127.0.0.1:1/api/");
        assert_eq!(http.api_base, "http://127.0.0.1:1/api");
    }
}
