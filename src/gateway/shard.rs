use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::runner::{self, Connection};
use super::{
    ChunkGuildFilter,
    ConnectionStage,
    GatewayError,
    SessionState,
    ShardConfig,
    VoiceGatewayManager,
};
use crate::cache::CacheUpdate;
use crate::client::{EventHandler, HandlerRegistry};
use crate::constants::{Opcode, GATEWAY_VERSION};
use crate::heartbeat::HeartbeatTracker;
use crate::http::Http;
use crate::internal::prelude::*;
use crate::internal::tokio::spawn_named;
use crate::model::gateway::{CurrentUser, PresenceData, Ready, ShardInfo};
use crate::model::id::{ChannelId, GuildId};
use crate::ws::{self, Compression, Frame, Payload, WsReader, WsWriter};

/// A callback receiving the errors which end a connection.
///
/// It is called once for the error that precedes every reconnect, and once for an error which
/// ends the session for good.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

#[derive(Clone, Default)]
pub(super) struct Hooks {
    pub cache: Option<Arc<dyn CacheUpdate>>,
    pub voice: Option<Arc<dyn VoiceGatewayManager>>,
    pub on_error: Option<ErrorCallback>,
}

struct Lifecycle {
    shutdown: CancellationToken,
    supervisor: JoinHandle<()>,
}

pub(super) struct ShardInner {
    pub config: ShardConfig,
    pub state: Mutex<SessionState>,
    pub heartbeat: HeartbeatTracker,
    pub writer: RwLock<Option<Arc<WsWriter>>>,
    pub handlers: HandlerRegistry,
    http: Arc<Http>,
    url: tokio::sync::Mutex<Option<Url>>,
    hooks: RwLock<Hooks>,
    lifecycle: tokio::sync::Mutex<Option<Lifecycle>>,
}

/// A Shard is a higher-level handler for a websocket connection to Discord's gateway.
///
/// The shard keeps one session alive: it heartbeats, dispatches events to the registered
/// [`EventHandler`]s, and reconnects on its own when the connection drops, resuming the session
/// where Discord allows it. Cloning a `Shard` gives another handle to the same session.
///
/// # Examples
///
/// ```rust,no_run
/// use sonority::gateway::{Shard, ShardConfig};
/// use sonority::model::gateway::GatewayIntents;
///
/// # async fn run() -> sonority::Result<()> {
/// let token = std::env::var("DISCORD_TOKEN").unwrap_or_default();
/// let shard = Shard::new(ShardConfig::new(&token, GatewayIntents::GUILDS));
///
/// shard.connect().await?;
/// println!("connected as session {:?}", shard.session_id());
///
/// shard.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Shard {
    inner: Arc<ShardInner>,
}

impl Shard {
    /// Creates a shard which discovers its gateway URL through its own [`Http`] client.
    #[must_use]
    pub fn new(config: ShardConfig) -> Self {
        let http = Arc::new(Http::new(config.token()));
        Self::with_http(config, http)
    }

    /// Creates a shard which discovers its gateway URL through `http`.
    #[must_use]
    pub fn with_http(config: ShardConfig, http: Arc<Http>) -> Self {
        let handlers = HandlerRegistry::new(config.handler_policy);

        Self {
            inner: Arc::new(ShardInner {
                config,
                state: Mutex::new(SessionState::new()),
                heartbeat: HeartbeatTracker::new(),
                writer: RwLock::new(None),
                handlers,
                http,
                url: tokio::sync::Mutex::new(None),
                hooks: RwLock::new(Hooks::default()),
                lifecycle: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Registers a handler for dispatched events.
    ///
    /// Handlers may be added at any time, but one added after [`Self::connect`] misses the events
    /// dispatched before it.
    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.inner.handlers.add(handler);
    }

    /// Sets the cache which every dispatch updates before handlers see it.
    pub fn set_cache(&self, cache: Arc<dyn CacheUpdate>) {
        self.inner.hooks.write().cache = Some(cache);
    }

    /// Sets the voice manager receiving voice state and server updates.
    pub fn set_voice_manager(&self, manager: Arc<dyn VoiceGatewayManager>) {
        self.inner.hooks.write().voice = Some(manager);
    }

    /// Sets the callback receiving the errors which end a connection.
    pub fn on_error(&self, callback: impl Fn(&Error) + Send + Sync + 'static) {
        self.inner.hooks.write().on_error = Some(Arc::new(callback));
    }

    /// Connects and performs the handshake, returning once the session is usable.
    ///
    /// A session left by an earlier connection is resumed; after [`Self::disconnect`] a new one
    /// is identified.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AlreadyConnected`] if the shard is running, and otherwise any
    /// error from the handshake. A failed handshake is not retried.
    #[cfg_attr(feature = "tracing_instrument", tracing::instrument(skip(self)))]
    pub async fn connect(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        if let Some(running) = lifecycle.take() {
            if self.stage() != ConnectionStage::Disconnected {
                *lifecycle = Some(running);
                return Err(GatewayError::AlreadyConnected.into());
            }

            // The supervisor gave up on its own and is on its way out.
            if let Err(why) = running.supervisor.await {
                warn!("[Shard {}] Supervisor panicked: {:?}", self.shard_info(), why);
            }
        }

        self.inner.state.lock().advance(ConnectionStage::Connecting).map_err(|why| {
            debug!("[Shard {}] {}", self.shard_info(), why);
            GatewayError::AlreadyConnected
        })?;

        let connection = match self.inner.open().await {
            Ok(connection) => connection,
            Err(why) => {
                self.inner.state.lock().mark_disconnected();
                return Err(why);
            },
        };

        let shutdown = CancellationToken::new();
        let supervisor = spawn_named(
            "shard::supervisor",
            runner::supervise(Arc::clone(&self.inner), connection, shutdown.clone()),
        );

        *lifecycle = Some(Lifecycle {
            shutdown,
            supervisor,
        });

        Ok(())
    }

    /// Closes the connection and forgets the session, so the next [`Self::connect`] identifies.
    ///
    /// Does nothing if the shard is not running. A reconnect in progress is cancelled.
    pub async fn disconnect(&self) {
        let Some(lifecycle) = self.inner.lifecycle.lock().await.take() else {
            return;
        };

        lifecycle.shutdown.cancel();

        if let Err(why) = lifecycle.supervisor.await {
            warn!("[Shard {}] Supervisor panicked: {:?}", self.shard_info(), why);
        }

        self.inner.state.lock().reset();
        self.inner.heartbeat.reset();

        info!("[Shard {}] Disconnected", self.shard_info());
    }

    #[must_use]
    pub fn stage(&self) -> ConnectionStage {
        self.inner.state.lock().stage()
    }

    /// The ID of the current session, if one was identified.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session_id().map(ToOwned::to_owned)
    }

    /// The sequence of the last dispatch received; `0` before any.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.inner.state.lock().sequence()
    }

    /// The user the session is logged in as.
    #[must_use]
    pub fn current_user(&self) -> Option<CurrentUser> {
        self.inner.state.lock().user().cloned()
    }

    /// The round trip of the last acknowledged heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.inner.heartbeat.latency()
    }

    #[must_use]
    pub fn shard_info(&self) -> ShardInfo {
        self.inner.config.shard
    }

    #[must_use]
    pub fn config(&self) -> &ShardConfig {
        &self.inner.config
    }

    /// A handle for sending commands, which does not keep the shard alive.
    #[must_use]
    pub fn messenger(&self) -> ShardMessenger {
        ShardMessenger::new(&self.inner)
    }

    /// Updates the presence of the current user.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if no connection is open.
    pub async fn set_presence(&self, presence: &PresenceData) -> Result<()> {
        self.messenger().set_presence(presence).await
    }

    /// Requests member chunks of a guild; they arrive as `GUILD_MEMBERS_CHUNK` dispatches.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if no connection is open.
    pub async fn chunk_guild(
        &self,
        guild_id: GuildId,
        limit: Option<u16>,
        filter: ChunkGuildFilter,
        nonce: Option<&str>,
    ) -> Result<()> {
        self.messenger().chunk_guild(guild_id, limit, filter, nonce).await
    }

    /// Joins, moves between or (with `None`) leaves voice channels.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if no connection is open.
    pub async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()> {
        self.messenger().update_voice_state(guild_id, channel_id, self_mute, self_deaf).await
    }

    /// Sends a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if no connection is open.
    pub async fn send(&self, payload: &Payload) -> Result<()> {
        self.messenger().send(payload).await
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("config", &self.inner.config)
            .field("stage", &self.stage())
            .finish_non_exhaustive()
    }
}

impl ShardInner {
    pub fn hooks(&self) -> Hooks {
        self.hooks.read().clone()
    }

    /// Logs an error which ended a connection and hands it to the error callback.
    pub fn report_error(&self, why: &Error) {
        error!("[Shard {}] Connection lost: {}", self.config.shard, why);

        if let Some(callback) = self.hooks().on_error {
            callback(why);
        }
    }

    async fn gateway_url(&self) -> Result<Url> {
        let mut cached = self.url.lock().await;

        if let Some(url) = cached.as_ref() {
            return Ok(url.clone());
        }

        let url = match &self.config.gateway_url {
            Some(url) => url.clone(),
            None => Url::parse(&self.http.get_gateway().await?.url)?,
        };

        debug!("[Shard {}] Using gateway {}", self.config.shard, url);
        *cached = Some(url.clone());
        Ok(url)
    }

    /// Opens a connection and completes the handshake.
    ///
    /// The stage must be [`ConnectionStage::Connecting`]; on success it is `Connected`.
    pub async fn open(&self) -> Result<Connection> {
        let shard = self.config.shard;
        let resume = {
            let state = self.state.lock();
            state.can_resume().then(|| {
                (
                    state.session_id().map(ToOwned::to_owned).unwrap_or_default(),
                    state.sequence(),
                    state.resume_url().cloned(),
                )
            })
        };

        let base = match resume.as_ref().and_then(|(_, _, url)| url.clone()) {
            Some(url) => url,
            None => self.gateway_url().await?,
        };
        let url = connection_url(&base, self.config.compress);
        let compression =
            if self.config.compress { Compression::Stream } else { Compression::Payload };

        debug!("[Shard {}] Connecting to {}", shard, url);

        let (mut reader, writer) =
            timeout(self.config.handshake_timeout, ws::connect(&url, compression))
                .await
                .map_err(|_| GatewayError::HandshakeTimeout)??;
        let writer = Arc::new(writer);

        let deadline = Instant::now() + self.config.handshake_timeout;
        let hello = match timeout_at(deadline, reader.recv())
            .await
            .map_err(|_| GatewayError::HandshakeTimeout)??
        {
            Frame::Payload(payload) if Opcode::from(payload.op) == Opcode::Hello => {
                payload.data::<Hello>()?
            },
            Frame::Payload(payload) => {
                warn!("[Shard {}] Expected Hello, got op {}", shard, payload.op);
                return Err(GatewayError::ExpectedHello.into());
            },
            Frame::Close(frame) => return Err(GatewayError::from_close(frame).into()),
        };

        if hello.heartbeat_interval == 0 {
            warn!("[Shard {}] Hello carried no heartbeat interval", shard);
            return Err(GatewayError::InvalidHandshake.into());
        }

        self.heartbeat.reset();
        let interval = Duration::from_millis(hello.heartbeat_interval);

        let backlog = match resume {
            Some((session_id, seq, _)) => {
                self.resume(&mut reader, &writer, &session_id, seq).await?
            },
            None => self.identify(&mut reader, &writer).await?,
        };

        self.state.lock().advance(ConnectionStage::Connected)?;
        info!("[Shard {}] Connected", shard);

        Ok(Connection {
            reader,
            writer,
            interval,
            backlog,
        })
    }

    async fn identify(&self, reader: &mut WsReader, writer: &WsWriter) -> Result<Vec<Payload>> {
        let shard = self.config.shard;
        self.state.lock().advance(ConnectionStage::Identifying)?;

        writer
            .send_identify(
                shard,
                self.config.token(),
                self.config.intents,
                self.config.large_threshold,
                self.config.presence.as_ref(),
            )
            .await?;

        let deadline = Instant::now() + self.config.handshake_timeout;
        let mut backlog = Vec::new();

        loop {
            let payload = self.handshake_payload(reader, writer, deadline).await?;

            match Opcode::from(payload.op) {
                Opcode::Dispatch if payload.t.as_deref() == Some("READY") => {
                    let ready: Ready = payload.data()?;
                    let resume_url = ready.resume_gateway_url.as_deref().and_then(|url| {
                        Url::parse(url)
                            .map_err(|why| warn!("[Shard {}] Bad resume URL {}: {}", shard, url, why))
                            .ok()
                    });

                    info!("[Shard {}] Identified as {}", shard, ready.user.username);
                    self.state.lock().start_session(
                        ready.session_id,
                        payload.s.unwrap_or(0),
                        resume_url,
                        ready.user,
                    );

                    backlog.push(payload);
                    return Ok(backlog);
                },
                Opcode::Dispatch => backlog.push(payload),
                Opcode::InvalidSession => return Err(GatewayError::InvalidHandshake.into()),
                other => debug!("[Shard {}] Ignoring {:?} while identifying", shard, other),
            }
        }
    }

    async fn resume(
        &self,
        reader: &mut WsReader,
        writer: &WsWriter,
        session_id: &str,
        seq: u64,
    ) -> Result<Vec<Payload>> {
        let shard = self.config.shard;
        self.state.lock().advance(ConnectionStage::Resuming)?;

        writer.send_resume(shard, session_id, seq, self.config.token()).await?;

        let deadline = Instant::now() + self.config.handshake_timeout;
        let mut backlog = Vec::new();

        loop {
            let payload = self.handshake_payload(reader, writer, deadline).await?;

            match Opcode::from(payload.op) {
                Opcode::Dispatch if payload.t.as_deref() == Some("RESUMED") => {
                    info!("[Shard {}] Resumed after {} replayed events", shard, backlog.len());
                    backlog.push(payload);
                    return Ok(backlog);
                },
                Opcode::Dispatch => backlog.push(payload),
                Opcode::InvalidSession => {
                    if payload.data::<Option<bool>>()?.unwrap_or(false) {
                        return Err(GatewayError::InvalidHandshake.into());
                    }

                    info!("[Shard {}] Session invalidated, identifying", shard);
                    self.state.lock().clear_session();
                    sleep(invalid_session_delay()).await;

                    return self.identify(reader, writer).await;
                },
                other => debug!("[Shard {}] Ignoring {:?} while resuming", shard, other),
            }
        }
    }

    /// Waits for the next handshake payload, answering heartbeat traffic in the meantime.
    async fn handshake_payload(
        &self,
        reader: &mut WsReader,
        writer: &WsWriter,
        deadline: Instant,
    ) -> Result<Payload> {
        loop {
            let frame = timeout_at(deadline, reader.recv())
                .await
                .map_err(|_| GatewayError::HandshakeTimeout)??;

            let payload = match frame {
                Frame::Payload(payload) => payload,
                Frame::Close(frame) => return Err(GatewayError::from_close(frame).into()),
            };

            match Opcode::from(payload.op) {
                Opcode::Heartbeat => {
                    let seq = self.state.lock().last_sequence();
                    writer.send_heartbeat(self.config.shard, seq).await?;
                },
                Opcode::HeartbeatAck => self.heartbeat.record_ack(),
                _ => return Ok(payload),
            }
        }
    }
}

/// The delay Discord asks for between an invalidated session and the next IDENTIFY.
pub(super) fn invalid_session_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(1000..=5000))
}

fn connection_url(base: &Url, compress: bool) -> Url {
    let mut url = base.clone();

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("v", &GATEWAY_VERSION.to_string());
        query.append_pair("encoding", "json");

        if compress {
            query.append_pair("compress", "zlib-stream");
        }
    }

    url
}

/// A handle to a [`Shard`] for sending commands.
///
/// It does not keep the shard alive; once the shard is dropped every command fails with
/// [`GatewayError::NotConnected`].
#[derive(Clone)]
pub struct ShardMessenger {
    inner: Weak<ShardInner>,
    shard: ShardInfo,
}

impl ShardMessenger {
    pub(super) fn new(inner: &Arc<ShardInner>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
            shard: inner.config.shard,
        }
    }

    #[must_use]
    pub fn shard_info(&self) -> ShardInfo {
        self.shard
    }

    fn writer(&self) -> Result<Arc<WsWriter>> {
        self.inner
            .upgrade()
            .and_then(|inner| inner.writer.read().clone())
            .ok_or(Error::Gateway(GatewayError::NotConnected))
    }

    /// Updates the presence of the current user.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use sonority::gateway::ShardMessenger;
    /// # async fn run(messenger: ShardMessenger) -> sonority::Result<()> {
    /// use sonority::model::gateway::{ActivityData, OnlineStatus, PresenceData};
    ///
    /// let presence = PresenceData {
    ///     activity: Some(ActivityData::listening("the radio")),
    ///     status: OnlineStatus::Idle,
    /// };
    /// messenger.set_presence(&presence).await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if no connection is open.
    pub async fn set_presence(&self, presence: &PresenceData) -> Result<()> {
        self.writer()?.send_presence_update(self.shard, presence).await
    }

    /// Requests that a guild's members be sent as `GUILD_MEMBERS_CHUNK` dispatches.
    ///
    /// Chunk a single guild, limiting to 20 members whose names start with `"do"`, tagged with a
    /// nonce of `"request"`:
    ///
    /// ```rust,no_run
    /// # use sonority::gateway::{ChunkGuildFilter, ShardMessenger};
    /// # async fn run(messenger: ShardMessenger) -> sonority::Result<()> {
    /// use sonority::model::id::GuildId;
    ///
    /// messenger
    ///     .chunk_guild(
    ///         GuildId::new(81384788765712384),
    ///         Some(20),
    ///         ChunkGuildFilter::Query("do".to_owned()),
    ///         Some("request"),
    ///     )
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if no connection is open.
    pub async fn chunk_guild(
        &self,
        guild_id: GuildId,
        limit: Option<u16>,
        filter: ChunkGuildFilter,
        nonce: Option<&str>,
    ) -> Result<()> {
        self.writer()?.send_chunk_guild(self.shard, guild_id, limit, filter, nonce).await
    }

    /// Joins, moves between or (with `None`) leaves voice channels.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if no connection is open.
    pub async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()> {
        self.writer()?
            .send_voice_state(self.shard, guild_id, channel_id, self_mute, self_deaf)
            .await
    }

    /// Sends a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if no connection is open.
    pub async fn send(&self, payload: &Payload) -> Result<()> {
        self.writer()?.send(payload).await
    }
}

impl fmt::Debug for ShardMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardMessenger").field("shard", &self.shard).finish_non_exhaustive()
    }
}
