//! Pre-emptive ratelimiting for requests to the Discord API.
//!
//! Every response from Discord carries the state of the bucket its route belongs to: how many
//! requests the bucket allows per window (`x-ratelimit-limit`), how many are left
//! (`x-ratelimit-remaining`) and when the window ends (`x-ratelimit-reset-after`, or the absolute
//! `x-ratelimit-reset`). The [`Ratelimiter`] remembers that state per route key, and
//! [`Ratelimiter::wait`] holds a request back until the bucket has a ticket to spare.
//!
//! Occasionally for very high traffic bots, a global ratelimit may be reached which blocks all
//! future requests until the global ratelimit is over, regardless of route. Such a response
//! carries `x-ratelimit-global`, after which every caller waits on the global bucket instead of
//! its route's bucket.
//!
//! [Discord docs]: https://discord.com/developers/docs/topics/rate-limits

use std::fmt;
use std::str::{self, FromStr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use reqwest::header::HeaderMap;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use super::HttpError;
use crate::internal::prelude::*;

/// The ratelimit state of one route, or of the whole API while globally limited.
///
/// A bucket starts disabled, which lets every request through, and is enabled by the first
/// response carrying ratelimit headers.
#[derive(Clone, Debug, Default)]
pub struct Bucket {
    enabled: bool,
    limit: u32,
    remaining: u32,
    reset: Option<Instant>,
    reset_after: Option<Duration>,
}

impl Bucket {
    /// Whether requests on this bucket are being throttled at all.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// The total number of requests that can be made in a period of time.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// The number of requests remaining in the period of time.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }

    /// When the current period ends.
    #[must_use]
    pub const fn reset(&self) -> Option<Instant> {
        self.reset
    }

    fn refill(&mut self, now: Instant) {
        self.remaining = self.limit;
        self.reset = self.reset_after.and_then(|after| now.checked_add(after));
    }

    /// Takes one ticket, sleeping until the period ends if none is left.
    async fn take(&mut self, key: &str) {
        if !self.enabled {
            return;
        }

        let now = Instant::now();
        if self.reset.is_some_and(|reset| reset <= now) {
            self.refill(now);
        }

        if self.remaining == 0 {
            match self.reset {
                Some(reset) => {
                    debug!(
                        "Pre-emptive ratelimit on route {} for {}ms",
                        key,
                        reset.saturating_duration_since(now).as_millis()
                    );
                    sleep_until(reset).await;
                    self.refill(reset);
                },
                // Nothing says when the period ends, so there is nothing to wait for.
                None => self.remaining = self.limit,
            }
        }

        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Applies the ratelimit headers of a response.
    fn apply(&mut self, headers: &HeaderMap) -> Result<()> {
        let limit = parse_header::<u32>(headers, "x-ratelimit-limit")?;
        let remaining = parse_header::<u32>(headers, "x-ratelimit-remaining")?;
        let reset_after = parse_seconds(headers, "x-ratelimit-reset-after")?;
        let reset = parse_seconds(headers, "x-ratelimit-reset")?;

        if limit.is_none() && remaining.is_none() && reset_after.is_none() && reset.is_none() {
            self.enabled = false;
            return Ok(());
        }

        let now = Instant::now();
        let next_reset = if let Some(reset_after) = reset_after {
            Some(deadline(now, reset_after, "x-ratelimit-reset-after")?)
        } else if let Some(reset) = reset {
            let epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
            Some(deadline(now, reset.saturating_sub(epoch), "x-ratelimit-reset")?)
        } else {
            None
        };

        self.enabled = true;

        if let Some(limit) = limit {
            self.limit = limit;
        }

        if let Some(remaining) = remaining {
            self.remaining = remaining;
        }

        if reset_after.is_some() {
            self.reset_after = reset_after;
        }

        if next_reset.is_some() {
            self.reset = next_reset;
        }

        Ok(())
    }
}

/// Ratelimiter for requests to the Discord API.
///
/// This keeps track of a [`Bucket`] per route key: how many tickets are remaining until the user
/// needs to wait for the known reset time, and the limit of requests that can be made within that
/// time. When no tickets are available, [`Self::wait`] sleeps until that time passes. The
/// mechanism is known as "pre-emptive ratelimiting".
///
/// The REST layer calls [`Self::wait`] before and [`Self::update`] after every request; a 429
/// response is retried by the caller after its `retry-after`.
#[derive(Default)]
pub struct Ratelimiter {
    global: Arc<Mutex<Bucket>>,
    routes: DashMap<String, Arc<Mutex<Bucket>>>,
}

impl fmt::Debug for Ratelimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ratelimiter")
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl Ratelimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.routes.get(key) {
            return Arc::clone(&bucket);
        }

        Arc::clone(&self.routes.entry(key.to_owned()).or_default())
    }

    /// A copy of the current state of the bucket for `key`.
    pub async fn route(&self, key: &str) -> Option<Bucket> {
        let bucket = self.routes.get(key).map(|bucket| Arc::clone(&bucket))?;
        let bucket = bucket.lock().await.clone();
        Some(bucket)
    }

    /// A copy of the current state of the global bucket.
    pub async fn global(&self) -> Bucket {
        self.global.lock().await.clone()
    }

    /// Waits until a request on `key` may be sent, and takes its ticket.
    ///
    /// While the global ratelimit is in effect, every key waits on the global bucket instead.
    pub async fn wait(&self, key: &str) {
        let global = self.global.lock().await.enabled;

        let bucket = if global { Arc::clone(&self.global) } else { self.bucket(key) };

        // The lock is held until the ticket is taken, so two callers never share the last one.
        let mut bucket = bucket.lock().await;
        bucket.take(key).await;
    }

    /// Updates the bucket of `key`, or the global bucket, from a response's headers.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidHeader`] if a ratelimit header is not a number, or a time
    /// too far ahead to wait for.
    pub async fn update(&self, key: &str, headers: &HeaderMap) -> Result<()> {
        if headers.contains_key("x-ratelimit-global") {
            let retry_after = parse_seconds(headers, "retry-after")?.unwrap_or_default();
            let reset = deadline(Instant::now(), retry_after, "retry-after")?;
            debug!("Global ratelimit hit on route {} for {:?}", key, retry_after);

            let mut global = self.global.lock().await;
            global.enabled = true;
            global.limit = 1;
            global.remaining = 0;
            global.reset_after = None;
            global.reset = Some(reset);
            return Ok(());
        }

        {
            let mut global = self.global.lock().await;
            if global.enabled {
                debug!("Global ratelimit lifted");
                *global = Bucket::default();
            }
        }

        let bucket = self.bucket(key);
        let mut bucket = bucket.lock().await;
        bucket.apply(headers)
    }
}

/// Parses a numeric header.
pub(super) fn parse_header<T: FromStr>(
    headers: &HeaderMap,
    header: &'static str,
) -> Result<Option<T>> {
    let Some(value) = headers.get(header) else { return Ok(None) };

    let unicode =
        str::from_utf8(value.as_bytes()).map_err(|_| Error::from(HttpError::InvalidHeader(header)))?;

    let num = unicode.trim().parse().map_err(|_| Error::from(HttpError::InvalidHeader(header)))?;

    Ok(Some(num))
}

/// Parses a header holding a number of seconds; negative values count as zero.
pub(super) fn parse_seconds(headers: &HeaderMap, header: &'static str) -> Result<Option<Duration>> {
    let Some(secs) = parse_header::<f64>(headers, header)? else { return Ok(None) };

    if secs.is_nan() {
        return Err(HttpError::InvalidHeader(header).into());
    }

    Duration::try_from_secs_f64(secs.max(0.0))
        .map(Some)
        .map_err(|_| HttpError::InvalidHeader(header).into())
}

fn deadline(now: Instant, after: Duration, header: &'static str) -> Result<Instant> {
    now.checked_add(after).ok_or_else(|| HttpError::InvalidHeader(header).into())
}

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;
    use std::result::Result as StdResult;

    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

    use super::*;

    type TestResult<T> = StdResult<T, Box<dyn StdError>>;

    fn headers() -> HeaderMap {
        let pairs = &[
            (HeaderName::from_static("x-ratelimit-limit"), HeaderValue::from_static("5")),
            (HeaderName::from_static("x-ratelimit-remaining"), HeaderValue::from_static("4")),
            (
                HeaderName::from_static("x-ratelimit-reset"),
                HeaderValue::from_static("1560704880.423"),
            ),
            (HeaderName::from_static("x-bad-num"), HeaderValue::from_static("abc")),
            (
                HeaderName::from_static("x-bad-unicode"),
                HeaderValue::from_bytes(&[255, 255, 255, 255]).unwrap(),
            ),
        ];

        let mut map = HeaderMap::with_capacity(pairs.len());

        for (name, val) in pairs {
            map.insert(name, val.clone());
        }

        map
    }

    fn limited(limit: &'static str, remaining: &'static str, reset_after: &'static str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("x-ratelimit-limit", HeaderValue::from_static(limit));
        map.insert("x-ratelimit-remaining", HeaderValue::from_static(remaining));
        map.insert("x-ratelimit-reset-after", HeaderValue::from_static(reset_after));
        map
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_parse_header_good() -> TestResult<()> {
        let headers = headers();

        assert_eq!(parse_header::<i64>(&headers, "x-ratelimit-limit")?.unwrap(), 5);
        assert_eq!(parse_header::<i64>(&headers, "x-ratelimit-remaining")?.unwrap(), 4,);
        assert_eq!(parse_header::<f64>(&headers, "x-ratelimit-reset")?.unwrap(), 1_560_704_880.423);
        assert!(parse_header::<i64>(&headers, "x-missing")?.is_none());

        Ok(())
    }

    #[test]
    fn test_parse_header_errors() {
        let headers = headers();

        assert!(matches!(
            parse_header::<i64>(&headers, "x-bad-num").unwrap_err(),
            Error::Http(HttpError::InvalidHeader("x-bad-num"))
        ));
        assert!(matches!(
            parse_header::<i64>(&headers, "x-bad-unicode").unwrap_err(),
            Error::Http(HttpError::InvalidHeader("x-bad-unicode"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_routes_are_unthrottled() {
        let ratelimiter = Ratelimiter::new();
        let start = Instant::now();

        for _ in 0..100 {
            ratelimiter.wait("GET /gateway/bot").await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_request_waits_for_the_reset() {
        let ratelimiter = Ratelimiter::new();
        ratelimiter.update("route", &limited("5", "5", "2")).await.unwrap();
        let start = Instant::now();

        for _ in 0..5 {
            ratelimiter.wait("route").await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(ratelimiter.route("route").await.unwrap().remaining(), 0);

        ratelimiter.wait("route").await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));

        let bucket = ratelimiter.route("route").await.unwrap();
        assert_eq!(bucket.limit(), 5);
        assert_eq!(bucket.remaining(), 4);

        // The cycle repeats with the next window.
        for _ in 0..4 {
            ratelimiter.wait("route").await;
        }
        assert_eq!(start.elapsed(), Duration::from_secs(2));

        ratelimiter.wait("route").await;
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_the_tickets() {
        let ratelimiter = Arc::new(Ratelimiter::new());
        ratelimiter.update("route", &limited("3", "3", "1")).await.unwrap();
        let start = Instant::now();

        let waiters = (0..7)
            .map(|_| {
                let ratelimiter = Arc::clone(&ratelimiter);
                tokio::spawn(async move {
                    ratelimiter.wait("route").await;
                    Instant::now()
                })
            })
            .collect::<Vec<_>>();

        let mut finished = Vec::new();
        for waiter in waiters {
            finished.push(waiter.await.unwrap() - start);
        }
        finished.sort();

        let expected = [0, 0, 0, 1, 1, 1, 2].map(Duration::from_secs);
        assert_eq!(finished, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_headers_disable_the_bucket() {
        let ratelimiter = Ratelimiter::new();
        ratelimiter.update("route", &limited("1", "0", "30")).await.unwrap();
        assert!(ratelimiter.route("route").await.unwrap().enabled());

        ratelimiter.update("route", &HeaderMap::new()).await.unwrap();
        assert!(!ratelimiter.route("route").await.unwrap().enabled());

        let start = Instant::now();
        ratelimiter.wait("route").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn global_limit_applies_to_every_route() {
        let ratelimiter = Ratelimiter::new();

        let mut global = HeaderMap::new();
        global.insert("x-ratelimit-global", HeaderValue::from_static("true"));
        global.insert("retry-after", HeaderValue::from_static("3"));
        ratelimiter.update("a", &global).await.unwrap();
        assert!(ratelimiter.global().await.enabled());

        let start = Instant::now();
        ratelimiter.wait("b").await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        // A regular response on any route lifts the global limit again.
        ratelimiter.update("b", &limited("5", "4", "1")).await.unwrap();
        assert!(!ratelimiter.global().await.enabled());
        assert_eq!(ratelimiter.route("b").await.unwrap().remaining(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_reset_times_are_rejected() {
        let ratelimiter = Ratelimiter::new();
        ratelimiter.update("route", &limited("5", "5", "2")).await.unwrap();

        for reset_after in ["inf", "1e20", "NaN"] {
            let result = ratelimiter.update("route", &limited("1", "0", reset_after)).await;
            assert!(matches!(
                result,
                Err(Error::Http(HttpError::InvalidHeader("x-ratelimit-reset-after")))
            ));
        }

        // The bucket keeps its last valid state.
        let bucket = ratelimiter.route("route").await.unwrap();
        assert_eq!(bucket.limit(), 5);
        assert_eq!(bucket.remaining(), 5);

        let mut global = HeaderMap::new();
        global.insert("x-ratelimit-global", HeaderValue::from_static("true"));
        global.insert("retry-after", HeaderValue::from_static("inf"));
        assert!(matches!(
            ratelimiter.update("route", &global).await,
            Err(Error::Http(HttpError::InvalidHeader("retry-after")))
        ));
        assert!(!ratelimiter.global().await.enabled());
    }

    #[test]
    fn negative_seconds_count_as_zero() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("-4.5"));

        assert_eq!(parse_seconds(&headers, "retry-after").unwrap(), Some(Duration::ZERO));
        assert_eq!(parse_seconds(&headers, "x-missing").unwrap(), None);
    }
}
