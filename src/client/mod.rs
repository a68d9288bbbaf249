//! The [`Client`] wires a gateway [`Shard`], a [`Cache`], the voice [`Manager`] and your
//! [`EventHandler`]s together.
//!
//! [`Cache`]: crate::cache::Cache
//! [`Manager`]: crate::voice::Manager
//! [`Shard`]: crate::gateway::Shard

mod context;
mod dispatch;
mod event_handler;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use url::Url;

pub use self::context::Context;
pub(crate) use self::dispatch::HandlerRegistry;
pub use self::dispatch::HandlerPolicy;
pub use self::event_handler::EventHandler;
use crate::backoff::Backoff;
use crate::cache::Cache;
use crate::gateway::{ErrorCallback, Shard, ShardConfig};
use crate::http::Http;
use crate::internal::prelude::*;
use crate::model::gateway::{ActivityData, GatewayIntents, OnlineStatus, PresenceData, ShardInfo};
use crate::voice::{self, Manager};

/// A builder for a [`Client`].
#[must_use]
pub struct ClientBuilder {
    config: ShardConfig,
    presence: PresenceData,
    cache: bool,
    voice_config: voice::Config,
    event_handlers: Vec<Arc<dyn EventHandler>>,
    on_error: Option<ErrorCallback>,
}

impl ClientBuilder {
    /// Construct a new builder to call methods on for the client construction.
    ///
    /// A leading `Bot ` on the token is stripped.
    pub fn new(token: impl AsRef<str>, intents: GatewayIntents) -> Self {
        Self {
            config: ShardConfig::new(token, intents),
            presence: PresenceData::default(),
            cache: true,
            voice_config: voice::Config::default(),
            event_handlers: Vec::new(),
            on_error: None,
        }
    }

    /// Adds an event handler with multiple methods for each possible event.
    pub fn event_handler<H>(mut self, event_handler: impl Into<Arc<H>>) -> Self
    where
        H: EventHandler + 'static,
    {
        self.event_handlers.push(event_handler.into());
        self
    }

    /// Sets the callback receiving the errors which end a gateway connection.
    pub fn on_error(mut self, callback: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Whether dispatched events are mirrored into a [`Cache`]. Enabled by default.
    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    /// Sets the settings voice calls are made with.
    pub fn voice_config(mut self, config: voice::Config) -> Self {
        self.voice_config = config;
        self
    }

    /// Sets the initial activity.
    pub fn activity(mut self, activity: ActivityData) -> Self {
        self.presence.activity = Some(activity);
        self
    }

    /// Sets the initial status.
    pub fn status(mut self, status: OnlineStatus) -> Self {
        self.presence.status = status;
        self
    }

    /// Sets which shard of how many the client runs.
    pub fn shard(mut self, shard: ShardInfo) -> Self {
        self.config = self.config.shard(shard);
        self
    }

    /// Requests a `zlib-stream` compressed gateway transport.
    pub fn compress(mut self, compress: bool) -> Self {
        self.config = self.config.compress(compress);
        self
    }

    /// Connects to this gateway URL instead of asking the REST API for one.
    pub fn gateway_url(mut self, url: Url) -> Self {
        self.config = self.config.gateway_url(url);
        self
    }

    /// Sets how long each step of the gateway handshake may take.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.handshake_timeout(timeout);
        self
    }

    /// Sets the delays between gateway reconnection attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config = self.config.backoff(backoff);
        self
    }

    /// Sets how event handler tasks are spawned.
    pub fn handler_policy(mut self, policy: HandlerPolicy) -> Self {
        self.config = self.config.handler_policy(policy);
        self
    }

    /// Builds the client. Nothing connects until [`Client::start`].
    #[must_use]
    pub fn build(self) -> Client {
        let mut config = self.config;
        if self.presence != PresenceData::default() {
            config = config.presence(self.presence);
        }

        let http = Arc::new(Http::new(config.token()));
        let shard = Shard::with_http(config, Arc::clone(&http));

        let cache = self.cache.then(|| Arc::new(Cache::new()));
        if let Some(cache) = &cache {
            shard.set_cache(Arc::clone(cache) as _);
        }

        let voice = Arc::new(Manager::new(shard.messenger(), self.voice_config));
        shard.set_voice_manager(Arc::clone(&voice) as _);

        for handler in self.event_handlers {
            shard.add_event_handler(handler);
        }

        if let Some(callback) = self.on_error {
            shard.on_error(move |why| callback(why));
        }

        Client {
            http,
            shard,
            cache,
            voice,
        }
    }
}

/// The Client is the way to be able to start sending authenticated requests over the REST API,
/// as well as initializing a WebSocket connection through a [`Shard`].
///
/// # Event Handlers
///
/// Event handlers can be configured. For example, the event handler [`EventHandler::message`]
/// will be dispatched to whenever a [`Event::MessageCreate`] is received over the connection.
///
/// ```rust,no_run
/// use sonority::model::prelude::*;
/// use sonority::prelude::*;
/// use sonority::Client;
///
/// struct Handler;
///
/// #[sonority::async_trait]
/// impl EventHandler for Handler {
///     async fn message(&self, ctx: Context, msg: &Message) {
///         if msg.content == "!presence" {
///             let activity = ActivityData::watching("the logs");
///             let _ = ctx.set_presence(Some(activity), OnlineStatus::Online).await;
///         }
///     }
/// }
///
/// # async fn run() -> sonority::Result<()> {
/// let intents = GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
/// let client = Client::builder("token", intents).event_handler(Handler).build();
///
/// client.start().await?;
/// # Ok(())
/// # }
/// ```
///
/// [`Event::MessageCreate`]: crate::model::event::Event::MessageCreate
pub struct Client {
    http: Arc<Http>,
    shard: Shard,
    cache: Option<Arc<Cache>>,
    voice: Arc<Manager>,
}

impl Client {
    pub fn builder(token: impl AsRef<str>, intents: GatewayIntents) -> ClientBuilder {
        ClientBuilder::new(token, intents)
    }

    /// Connects the shard, returning once its session is established.
    ///
    /// The shard keeps itself connected from then on, until [`Self::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns any error of the initial connection, such as an invalid token.
    pub async fn start(&self) -> Result<()> {
        info!("Starting shard {}", self.shard.shard_info());
        self.shard.connect().await
    }

    /// Leaves every voice call, then disconnects the shard.
    pub async fn shutdown(&self) {
        self.voice.leave_all().await;
        self.shard.disconnect().await;
    }

    #[must_use]
    pub fn http(&self) -> &Arc<Http> {
        &self.http
    }

    #[must_use]
    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    /// The cache, unless it was disabled on the builder.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.as_ref()
    }

    #[must_use]
    pub fn voice(&self) -> &Arc<Manager> {
        &self.voice
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("shard", &self.shard).finish_non_exhaustive()
    }
}
