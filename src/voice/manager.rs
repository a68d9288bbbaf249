use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{Call, Config, VoiceError};
use crate::gateway::{ShardMessenger, VoiceGatewayManager};
use crate::internal::prelude::*;
use crate::internal::tokio::spawn_named;
use crate::model::gateway::ShardInfo;
use crate::model::id::{ChannelId, GuildId, UserId};
use crate::model::voice::VoiceState;

/// The gateway command voice calls need: telling Discord which channel the bot is in.
#[async_trait]
pub trait VoiceUpdate: Send + Sync {
    /// Sends a voice state update; `None` leaves the guild's voice channel.
    async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()>;
}

#[async_trait]
impl VoiceUpdate for ShardMessenger {
    async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()> {
        ShardMessenger::update_voice_state(self, guild_id, channel_id, self_mute, self_deaf).await
    }
}

/// Owns the [`Call`] of every guild the bot is in a voice channel of.
///
/// Register it with [`Shard::set_voice_manager`] so that it receives the voice state and voice
/// server of each call; the [`Client`] does so itself.
///
/// [`Shard::set_voice_manager`]: crate::gateway::Shard::set_voice_manager
/// [`Client`]: crate::Client
pub struct Manager {
    calls: DashMap<GuildId, Call>,
    user_id: RwLock<Option<UserId>>,
    gateway: Arc<dyn VoiceUpdate>,
    config: Config,
}

impl Manager {
    pub fn new(gateway: impl VoiceUpdate + 'static, config: Config) -> Self {
        Self {
            calls: DashMap::new(),
            user_id: RwLock::new(None),
            gateway: Arc::new(gateway),
            config,
        }
    }

    /// Joins a voice channel, or moves the guild's call to it.
    ///
    /// Resolves once the call is connected. A call which is already connected is moved to
    /// `channel_id` and returned right away.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::GatewayUnavailable`] before the shard is ready,
    /// [`VoiceError::AlreadyJoining`] while a join of the guild is in progress,
    /// [`VoiceError::JoinTimeout`] if Discord does not answer, and any handshake error. A failed
    /// join leaves the channel again.
    #[cfg_attr(feature = "tracing_instrument", tracing::instrument(skip(self)))]
    pub async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Call> {
        let user_id = (*self.user_id.read()).ok_or(VoiceError::GatewayUnavailable)?;

        let (call, existing) = match self.calls.entry(guild_id) {
            Entry::Occupied(entry) if !entry.get().is_closed() => (entry.get().clone(), true),
            entry => {
                let call = Call::new(
                    guild_id,
                    channel_id,
                    user_id,
                    Arc::clone(&self.gateway),
                    self.config.clone(),
                );
                entry.insert(call.clone());
                (call, false)
            },
        };

        if existing {
            call.switch_to(channel_id).await?;
            return Ok(call);
        }

        if let Err(why) = call.join(channel_id).await {
            debug!("[Voice {}] Join failed: {}", guild_id, why);
            self.calls.remove_if(&guild_id, |_, stored| stored.ptr_eq(&call));
            call.close().await;
            return Err(why);
        }

        Ok(call)
    }

    /// Leaves the voice channel of a guild and closes its call.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::NotConnected`] if the guild has no call.
    pub async fn leave(&self, guild_id: GuildId) -> Result<()> {
        let (_, call) = self.calls.remove(&guild_id).ok_or(VoiceError::NotConnected)?;
        call.close().await;
        Ok(())
    }

    /// The open call of a guild.
    #[must_use]
    pub fn get(&self, guild_id: GuildId) -> Option<Call> {
        self.calls.get(&guild_id).map(|call| call.clone()).filter(|call| !call.is_closed())
    }

    /// Closes every call.
    pub async fn leave_all(&self) {
        let calls: Vec<Call> = self.calls.iter().map(|call| call.value().clone()).collect();
        self.calls.clear();

        future::join_all(calls.iter().map(Call::close)).await;
    }

    fn is_own(&self, user_id: UserId) -> bool {
        *self.user_id.read() == Some(user_id)
    }
}

#[async_trait]
impl VoiceGatewayManager for Manager {
    async fn initialise(&self, shard: ShardInfo, user_id: UserId) {
        info!("[Voice] Initialised for shard {} as user {}", shard.id, user_id);
        *self.user_id.write() = Some(user_id);
    }

    async fn server_update(&self, guild_id: GuildId, endpoint: Option<&str>, token: &str) {
        let Some(endpoint) = endpoint else {
            debug!("[Voice {}] Voice server is being reallocated", guild_id);
            return;
        };

        if let Some(call) = self.get(guild_id) {
            call.inner.apply_server_update(endpoint.to_owned(), token.to_owned());
        }
    }

    async fn state_update(&self, guild_id: GuildId, voice_state: &VoiceState) {
        if !self.is_own(voice_state.user_id) {
            return;
        }

        let Some(call) = self.get(guild_id) else { return };

        if voice_state.channel_id.is_none() {
            info!("[Voice {}] Removed from the voice channel", guild_id);
            self.calls.remove_if(&guild_id, |_, stored| stored.ptr_eq(&call));
            spawn_named("voice::leave", async move { call.close().await });
            return;
        }

        call.inner.apply_state_update(voice_state.session_id.clone(), voice_state.channel_id);
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("calls", &self.calls.len())
            .field("user_id", &*self.user_id.read())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::json;

    const GUILD: GuildId = GuildId::new(1);
    const CHANNEL: ChannelId = ChannelId::new(2);
    const USER: UserId = UserId::new(3);

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

    async fn manager() -> (Arc<Manager>, mpsc::UnboundedReceiver<Option<ChannelId>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Manager::new(Recorder(tx), Config::default());
        manager.initialise(ShardInfo::new(0, 1), USER).await;
        (Arc::new(manager), rx)
    }

    fn state(user_id: u64, channel_id: Option<u64>) -> VoiceState {
        let channel_id = channel_id.map_or_else(|| "null".to_owned(), |id| format!("\"{id}\""));
        json::from_str(&format!(
            r#"{{"guild_id":"1","channel_id":{channel_id},"user_id":"{user_id}","session_id":"abc"}}"#
        ))
        .unwrap()
    }

    fn spawn_join(manager: &Arc<Manager>) -> tokio::task::JoinHandle<Result<Call>> {
        let manager = Arc::clone(manager);
        tokio::spawn(async move { manager.join(GUILD, CHANNEL).await })
    }

    #[tokio::test]
    async fn join_requires_ready_gateway() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = Manager::new(Recorder(tx), Config::default());

        assert!(matches!(
            manager.join(GUILD, CHANNEL).await,
            Err(Error::Voice(VoiceError::GatewayUnavailable))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn join_times_out_and_leaves() {
        let (manager, mut updates) = manager().await;

        let result = manager.join(GUILD, CHANNEL).await;

        assert!(matches!(result, Err(Error::Voice(VoiceError::JoinTimeout))));
        assert_eq!(updates.recv().await, Some(Some(CHANNEL)));
        assert_eq!(updates.recv().await, Some(None));
        assert!(manager.get(GUILD).is_none());
    }

    #[tokio::test]
    async fn duplicate_state_update_fails_join() {
        let (manager, mut updates) = manager().await;
        let joining = spawn_join(&manager);

        assert_eq!(updates.recv().await, Some(Some(CHANNEL)));
        manager.state_update(GUILD, &state(3, Some(2))).await;
        manager.state_update(GUILD, &state(3, Some(2))).await;

        let result = joining.await.unwrap();
        assert!(matches!(result, Err(Error::Voice(VoiceError::DuplicateStateUpdate))));
        assert!(manager.get(GUILD).is_none());
    }

    #[tokio::test]
    async fn second_join_while_signaling_is_rejected() {
        let (manager, mut updates) = manager().await;
        let joining = spawn_join(&manager);

        assert_eq!(updates.recv().await, Some(Some(CHANNEL)));
        assert!(matches!(
            manager.join(GUILD, CHANNEL).await,
            Err(Error::Voice(VoiceError::AlreadyJoining))
        ));

        manager.leave(GUILD).await.unwrap();
        assert!(joining.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn foreign_state_updates_are_ignored() {
        let (manager, mut updates) = manager().await;
        let joining = spawn_join(&manager);

        assert_eq!(updates.recv().await, Some(Some(CHANNEL)));

        // Another user's state twice would be a duplicate if it were applied.
        manager.state_update(GUILD, &state(99, Some(2))).await;
        manager.state_update(GUILD, &state(99, Some(2))).await;
        manager.server_update(GUILD, None, "token").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!joining.is_finished());
        assert!(manager.get(GUILD).is_some());

        manager.leave_all().await;
        assert!(joining.await.unwrap().is_err());
        assert!(manager.get(GUILD).is_none());
    }

    #[tokio::test]
    async fn leaving_without_a_call_fails() {
        let (manager, _updates) = manager().await;

        assert!(matches!(
            manager.leave(GUILD).await,
            Err(Error::Voice(VoiceError::NotConnected))
        ));
    }
}
