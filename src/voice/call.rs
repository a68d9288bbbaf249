use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::Transport;
use super::events::VoiceEvent;
use super::info::{ConnectionInfo, ConnectionProgress, Progress};
use super::payload::Speaking;
use super::rtp::AudioPacket;
use super::tasks;
use super::{Config, VoiceError, VoiceOpcode, VoiceUpdate};
use crate::heartbeat::HeartbeatTracker;
use crate::internal::prelude::*;
use crate::internal::tokio::spawn_named;
use crate::model::id::{ChannelId, GuildId, UserId};
use crate::ws::WsWriter;

/// The stage of a call's connection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum VoiceStage {
    /// Not connected, and not trying to.
    Disconnected,
    /// Waiting for the gateway to deliver the voice state and voice server.
    SignalingWait,
    /// Opening the voice websocket.
    WsConnecting,
    /// Identified, waiting for Ready.
    Identifying,
    /// Sent a Resume, waiting for Resumed.
    Resuming,
    /// Discovering the external UDP address.
    UdpDiscovery,
    /// Selecting the UDP protocol and encryption mode.
    SelectProtocol,
    /// Waiting for the secret key.
    SessionDescription,
    /// Audio flows in both directions.
    Connected,
    /// Waiting before the next connection attempt.
    Reconnecting,
    /// The call was closed and cannot be used anymore.
    Closed,
}

impl fmt::Display for VoiceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::SignalingWait => "waiting for signaling",
            Self::WsConnecting => "connecting",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::UdpDiscovery => "discovering address",
            Self::SelectProtocol => "selecting protocol",
            Self::SessionDescription => "waiting for session description",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };

        f.write_str(name)
    }
}

struct CallState {
    stage: VoiceStage,
    channel_id: Option<ChannelId>,
    progress: ConnectionProgress,
    joined: Option<oneshot::Sender<Result<ConnectionInfo, VoiceError>>>,
}

/// The state shared between a [`Call`] handle and its tasks.
pub(super) struct CallInner {
    pub guild_id: GuildId,
    pub config: Config,
    gateway: Arc<dyn VoiceUpdate>,
    state: Mutex<CallState>,
    speaking: AsyncMutex<bool>,
    /// The websocket of the live connection.
    pub writer: RwLock<Option<Arc<WsWriter>>>,
    /// The UDP transport and key, kept between connections for resumes.
    pub transport: RwLock<Option<Arc<Transport>>>,
    pub ws_heartbeat: HeartbeatTracker,
    pub udp_heartbeat: HeartbeatTracker,
    pub outbound: flume::Receiver<Vec<u8>>,
    outbound_tx: flume::Sender<Vec<u8>>,
    inbound_tx: Mutex<Option<flume::Sender<AudioPacket>>>,
    inbound_rx: flume::Receiver<AudioPacket>,
    events_tx: Mutex<Option<flume::Sender<VoiceEvent>>>,
    events_rx: flume::Receiver<VoiceEvent>,
    /// Wakes the supervisor when Discord moved the call to another server or session.
    pub failover: Notify,
    /// Cancelled once, when the call closes.
    pub closing: CancellationToken,
    supervisor: AsyncMutex<Option<JoinHandle<()>>>,
}

impl CallInner {
    pub fn stage(&self) -> VoiceStage {
        self.state.lock().stage
    }

    /// Moves to `stage`, unless the call was closed.
    pub fn set_stage(&self, stage: VoiceStage) -> bool {
        let mut state = self.state.lock();
        if state.stage == VoiceStage::Closed {
            return false;
        }

        if state.stage != stage {
            debug!("[Voice {}] {} -> {}", self.guild_id, state.stage, stage);
            state.stage = stage;
        }

        true
    }

    pub fn info(&self) -> Option<ConnectionInfo> {
        self.state.lock().progress.info().cloned()
    }

    pub fn inbound(&self) -> Option<flume::Sender<AudioPacket>> {
        self.inbound_tx.lock().clone()
    }

    /// Publishes an event, dropping it if nobody keeps up.
    pub fn emit(&self, event: VoiceEvent) {
        let events = self.events_tx.lock();
        let Some(events) = events.as_ref() else { return };

        if let Err(why) = events.try_send(event) {
            debug!("[Voice {}] Dropped event: {:?}", self.guild_id, why.into_inner());
        }
    }

    /// Waits for room in the event queue, unless the call closes first.
    pub async fn emit_reliably(&self, event: VoiceEvent) {
        let events = self.events_tx.lock().clone();
        let Some(events) = events else { return };

        tokio::select! {
            () = self.closing.cancelled() => {},
            result = events.send_async(event) => {
                if let Err(why) = result {
                    debug!("[Voice {}] Dropped event: {:?}", self.guild_id, why.into_inner());
                }
            },
        }
    }

    /// Hands an error which ended a connection to the error callback.
    pub fn report_error(&self, why: &Error) {
        if let Some(callback) = &self.config.on_error {
            callback(why);
        }
    }

    /// Sends the speaking indicator if it differs from the current one.
    ///
    /// The cached state is rolled back if the send fails.
    pub async fn set_speaking(&self, speaking: bool) -> Result<()> {
        let mut current = self.speaking.lock().await;
        if *current == speaking {
            return Ok(());
        }

        let writer = self.writer.read().clone().ok_or(VoiceError::NotConnected)?;
        let ssrc = self.transport.read().as_ref().map(|t| t.ssrc).ok_or(VoiceError::NotConnected)?;

        *current = speaking;

        let payload = Speaking {
            speaking: u8::from(speaking),
            delay: 0,
            ssrc,
        };

        if let Err(why) = writer.send_json(VoiceOpcode::Speaking, &payload).await {
            *current = !speaking;
            return Err(why);
        }

        Ok(())
    }

    /// Forgets the speaking state; a new SSRC starts out silent.
    pub async fn reset_speaking(&self) {
        *self.speaking.lock().await = false;
    }

    fn begin_join(&self) -> oneshot::Receiver<Result<ConnectionInfo, VoiceError>> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        state.stage = VoiceStage::SignalingWait;
        state.joined = Some(tx);
        rx
    }

    fn finish_join(&self, result: Result<ConnectionInfo, VoiceError>) {
        let waiter = self.state.lock().joined.take();

        match waiter {
            Some(waiter) => {
                // The joining task may have timed out already.
                let _ = waiter.send(result);
            },
            None => {
                if let Err(why) = result {
                    warn!("[Voice {}] {}", self.guild_id, why);
                }
            },
        }
    }

    pub(super) fn apply_state_update(&self, session_id: String, channel_id: Option<ChannelId>) {
        let progress = {
            let mut state = self.state.lock();
            if channel_id.is_some() {
                state.channel_id = channel_id;
            }
            state.progress.apply_state_update(session_id)
        };

        self.apply_progress(progress);
    }

    pub(super) fn apply_server_update(&self, endpoint: String, token: String) {
        let progress = self.state.lock().progress.apply_server_update(endpoint, token);

        self.apply_progress(progress);
    }

    fn apply_progress(&self, progress: Result<Progress, VoiceError>) {
        match progress {
            Ok(Progress::Ready(info)) => self.finish_join(Ok(info)),
            Ok(Progress::Changed(info)) => {
                info!("[Voice {}] Moved to {}, reconnecting", self.guild_id, info.endpoint);
                self.failover.notify_one();
            },
            Ok(Progress::Pending | Progress::Unchanged) => {},
            Err(why) => self.finish_join(Err(why)),
        }
    }

    /// Signals the gateway, waits for the voice state and server, then connects.
    async fn join(self: &Arc<Self>, channel_id: ChannelId) -> Result<()> {
        let joined = self.begin_join();

        self.gateway
            .update_voice_state(self.guild_id, Some(channel_id), self.config.self_mute, self.config.self_deaf)
            .await
            .map_err(|why| {
                debug!("[Voice {}] Voice state update failed: {}", self.guild_id, why);
                VoiceError::GatewayUnavailable
            })?;

        let info = tokio::select! {
            () = self.closing.cancelled() => return Err(VoiceError::NotConnected.into()),
            result = timeout(self.config.join_timeout, joined) => match result {
                Err(_) => return Err(VoiceError::JoinTimeout.into()),
                Ok(Err(_)) => return Err(VoiceError::NotConnected.into()),
                Ok(Ok(info)) => info?,
            },
        };

        let connection = tokio::select! {
            () = self.closing.cancelled() => return Err(VoiceError::NotConnected.into()),
            connection = self.identify(&info) => connection?,
        };

        let (running, failures) = tasks::establish(self, connection).await?;

        let supervisor = spawn_named(
            "voice::supervisor",
            tasks::supervise(Arc::clone(self), running, failures),
        );
        *self.supervisor.lock().await = Some(supervisor);

        info!("[Voice {}] Connected to {}", self.guild_id, info.endpoint);
        Ok(())
    }
}

/// A handle to the voice connection of one guild.
///
/// Clones refer to the same call. Created by [`Manager::join`].
///
/// [`Manager::join`]: super::Manager::join
#[derive(Clone)]
pub struct Call {
    pub(super) inner: Arc<CallInner>,
}

impl Call {
    pub(super) fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        gateway: Arc<dyn VoiceUpdate>,
        config: Config,
    ) -> Self {
        let (outbound_tx, outbound) = flume::bounded(config.outbound_queue_capacity);
        let (inbound_tx, inbound_rx) = flume::bounded(config.inbound_queue_capacity);
        let (events_tx, events_rx) = flume::bounded(config.inbound_queue_capacity);

        let inner = CallInner {
            guild_id,
            config,
            gateway,
            state: Mutex::new(CallState {
                stage: VoiceStage::Disconnected,
                channel_id: Some(channel_id),
                progress: ConnectionProgress::new(guild_id, user_id),
                joined: None,
            }),
            speaking: AsyncMutex::new(false),
            writer: RwLock::new(None),
            transport: RwLock::new(None),
            ws_heartbeat: HeartbeatTracker::new(),
            udp_heartbeat: HeartbeatTracker::new(),
            outbound,
            outbound_tx,
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx,
            events_tx: Mutex::new(Some(events_tx)),
            events_rx,
            failover: Notify::new(),
            closing: CancellationToken::new(),
            supervisor: AsyncMutex::new(None),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub(super) async fn join(&self, channel_id: ChannelId) -> Result<()> {
        self.inner.join(channel_id).await
    }

    /// Moves an established call to another channel of the same guild.
    pub(super) async fn switch_to(&self, channel_id: ChannelId) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.stage == VoiceStage::SignalingWait {
                return Err(VoiceError::AlreadyJoining.into());
            }
            if state.channel_id == Some(channel_id) {
                return Ok(());
            }
            state.channel_id = Some(channel_id);
        }

        let config = &self.inner.config;
        self.inner
            .gateway
            .update_voice_state(self.inner.guild_id, Some(channel_id), config.self_mute, config.self_deaf)
            .await
    }

    pub(super) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn guild_id(&self) -> GuildId {
        self.inner.guild_id
    }

    /// The channel the call was last asked to join.
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.inner.state.lock().channel_id
    }

    #[must_use]
    pub fn stage(&self) -> VoiceStage {
        self.inner.stage()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stage() == VoiceStage::Closed
    }

    /// The SSRC Discord assigned to the bot's audio, once connected.
    #[must_use]
    pub fn ssrc(&self) -> Option<u32> {
        self.inner.transport.read().as_ref().map(|transport| transport.ssrc)
    }

    /// Sets the speaking indicator shown to other users.
    ///
    /// Does nothing if the indicator is already in that state.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::NotConnected`] while the call has no live connection, and the send
    /// error if the indicator could not be sent; the indicator is then left unchanged.
    pub async fn speaking(&self, speaking: bool) -> Result<()> {
        self.inner.set_speaking(speaking).await
    }

    /// A sender for Opus frames, each holding 20ms of 48kHz stereo audio.
    ///
    /// One frame is sent every 20ms. While the queue is empty nothing is sent; frames queued while
    /// the call reconnects are sent once it is back.
    #[must_use]
    pub fn audio_sender(&self) -> flume::Sender<Vec<u8>> {
        self.inner.outbound_tx.clone()
    }

    /// Queues one Opus frame, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::NotConnected`] if the call was closed.
    pub async fn send_audio(&self, opus: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            return Err(VoiceError::NotConnected.into());
        }

        tokio::select! {
            () = self.inner.closing.cancelled() => Err(VoiceError::NotConnected.into()),
            result = self.inner.outbound_tx.send_async(opus) => {
                result.map_err(|_| Error::from(VoiceError::NotConnected))
            },
        }
    }

    /// The queue of decrypted audio received from other users.
    ///
    /// Packets are dropped while the queue is full. Receivers are disconnected once the call is
    /// closed and its tasks have stopped. Clones share the same queue.
    #[must_use]
    pub fn receiver(&self) -> flume::Receiver<AudioPacket> {
        self.inner.inbound_rx.clone()
    }

    /// The queue of [`VoiceEvent`]s of this call.
    ///
    /// Events are dropped while the queue is full, except [`VoiceEvent::Disconnected`], which
    /// waits for room.
    #[must_use]
    pub fn events(&self) -> flume::Receiver<VoiceEvent> {
        self.inner.events_rx.clone()
    }

    /// Leaves the voice channel and stops every task of the call.
    ///
    /// Calling this more than once does nothing.
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.stage == VoiceStage::Closed {
                return;
            }
            state.stage = VoiceStage::Closed;
            state.joined = None;
        }

        let inner = &self.inner;

        if let Err(why) = inner.gateway.update_voice_state(inner.guild_id, None, false, false).await {
            debug!("[Voice {}] Could not signal leaving: {}", inner.guild_id, why);
        }

        inner.closing.cancel();

        let supervisor = inner.supervisor.lock().await.take();
        if let Some(supervisor) = supervisor {
            if let Err(why) = supervisor.await {
                warn!("[Voice {}] Supervisor panicked: {:?}", inner.guild_id, why);
            }
        }

        inner.writer.write().take();
        inner.transport.write().take();
        inner.inbound_tx.lock().take();
        inner.events_tx.lock().take();

        info!("[Voice {}] Closed", inner.guild_id);
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("guild_id", &self.inner.guild_id)
            .field("stage", &self.stage())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;

    struct Recorder(mpsc::UnboundedSender<Option<ChannelId>>);

    #[async_trait]
    impl VoiceUpdate for Recorder {
        async fn update_voice_state(
            &self,
            _: GuildId,
            channel_id: Option<ChannelId>,
            _: bool,
            _: bool,
        ) -> Result<()> {
            let _ = self.0.send(channel_id);
            Ok(())
        }
    }

    fn call() -> (Call, mpsc::UnboundedReceiver<Option<ChannelId>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let call = Call::new(
            GuildId::new(1),
            ChannelId::new(2),
            UserId::new(3),
            Arc::new(Recorder(tx)),
            Config::default(),
        );
        (call, rx)
    }

    #[tokio::test]
    async fn speaking_requires_a_connection_and_keeps_state() {
        let (call, _updates) = call();

        assert!(matches!(
            call.speaking(true).await,
            Err(Error::Voice(VoiceError::NotConnected))
        ));
        assert!(!*call.inner.speaking.lock().await);

        // Already in the requested state, so nothing has to be sent.
        assert!(call.speaking(false).await.is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_disconnects_queues() {
        let (call, mut updates) = call();
        let receiver = call.receiver();
        let events = call.events();

        call.close().await;
        call.close().await;

        assert_eq!(call.stage(), VoiceStage::Closed);
        assert_eq!(updates.recv().await, Some(None));
        assert!(updates.try_recv().is_err());

        assert!(receiver.recv_async().await.is_err());
        assert!(events.recv_async().await.is_err());
        assert!(matches!(
            call.send_audio(vec![1, 2, 3]).await,
            Err(Error::Voice(VoiceError::NotConnected))
        ));
        assert!(!call.inner.set_stage(VoiceStage::Connected));
    }

    #[tokio::test]
    async fn stage_display() {
        assert_eq!(VoiceStage::SignalingWait.to_string(), "waiting for signaling");
        assert_eq!(VoiceStage::Connected.to_string(), "connected");
    }
}
