use std::fmt;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::backoff::Backoff;
use crate::client::HandlerPolicy;
use crate::constants::LARGE_THRESHOLD;
use crate::model::gateway::{GatewayIntents, PresenceData, ShardInfo};

/// The settings a [`Shard`] connects with.
///
/// A configuration is cloned into the shard when it is created and never changes afterwards;
/// presence changes made at runtime are sent to the gateway without being written back here.
///
/// [`Shard`]: super::Shard
#[derive(Clone)]
#[must_use]
pub struct ShardConfig {
    pub(crate) token: SecretString,
    pub(crate) intents: GatewayIntents,
    pub(crate) shard: ShardInfo,
    pub(crate) large_threshold: u8,
    pub(crate) presence: Option<PresenceData>,
    pub(crate) compress: bool,
    pub(crate) gateway_url: Option<Url>,
    pub(crate) handshake_timeout: Duration,
    pub(crate) backoff: Backoff,
    pub(crate) handler_policy: HandlerPolicy,
}

impl ShardConfig {
    /// Creates a configuration for a single-shard bot.
    ///
    /// A leading `Bot ` on the token is stripped.
    pub fn new(token: impl AsRef<str>, intents: GatewayIntents) -> Self {
        let token = token.as_ref().trim();
        let token = token.strip_prefix("Bot ").unwrap_or(token);

        Self {
            token: SecretString::new(token.to_string()),
            intents,
            shard: ShardInfo::default(),
            large_threshold: LARGE_THRESHOLD,
            presence: None,
            compress: false,
            gateway_url: None,
            handshake_timeout: Duration::from_secs(10),
            backoff: Backoff::default(),
            handler_policy: HandlerPolicy::default(),
        }
    }

    /// Sets which shard of how many this session is.
    pub fn shard(mut self, shard: ShardInfo) -> Self {
        self.shard = shard;
        self
    }

    /// Sets the member count above which a guild arrives without its offline members.
    ///
    /// Discord accepts values between 50 and 250.
    pub fn large_threshold(mut self, threshold: u8) -> Self {
        self.large_threshold = threshold.clamp(50, 250);
        self
    }

    /// Sets the presence sent along with every IDENTIFY.
    pub fn presence(mut self, presence: PresenceData) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Requests a `zlib-stream` compressed transport.
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Connects to this URL instead of asking the REST API for one.
    pub fn gateway_url(mut self, url: Url) -> Self {
        self.gateway_url = Some(url);
        self
    }

    /// Sets how long each step of the handshake may take.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the delays between reconnection attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets how event handler tasks are spawned.
    pub fn handler_policy(mut self, policy: HandlerPolicy) -> Self {
        self.handler_policy = policy;
        self
    }

    #[must_use]
    pub fn intents(&self) -> GatewayIntents {
        self.intents
    }

    #[must_use]
    pub fn shard_info(&self) -> ShardInfo {
        self.shard
    }

    pub(crate) fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

impl fmt::Debug for ShardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardConfig")
            .field("intents", &self.intents)
            .field("shard", &self.shard)
            .field("large_threshold", &self.large_threshold)
            .field("presence", &self.presence)
            .field("compress", &self.compress)
            .field("gateway_url", &self.gateway_url)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("backoff", &self.backoff)
            .field("handler_policy", &self.handler_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bot_prefix() {
        let config = ShardConfig::new("Bot abc.def", GatewayIntents::GUILDS);
        assert_eq!(config.token(), "abc.def");

        let config = ShardConfig::new("  abc.def ", GatewayIntents::GUILDS);
        assert_eq!(config.token(), "abc.def");
    }

    #[test]
    fn debug_hides_token() {
        let config = ShardConfig::new("supersecret", GatewayIntents::empty());
        assert!(!format!("{config:?}").contains("supersecret"));
    }

    #[test]
    fn large_threshold_is_clamped() {
        let config = ShardConfig::new("t", GatewayIntents::empty()).large_threshold(10);
        assert_eq!(config.large_threshold, 50);
    }
}
