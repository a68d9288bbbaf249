use async_trait::async_trait;

use crate::model::gateway::ShardInfo;
use crate::model::id::{GuildId, UserId};
use crate::model::voice::VoiceState;

/// Interface for any compatible voice plugin.
///
/// The shard forwards the voice-specific dispatches to it before event handlers see them, so a
/// join waiting on those events is never raced by user code.
#[async_trait]
pub trait VoiceGatewayManager: Send + Sync {
    /// Performs setup once the session is identified.
    ///
    /// Called on every `READY`, with the shard and the bot's ID.
    async fn initialise(&self, shard: ShardInfo, user_id: UserId);

    /// Handler for VOICE_SERVER_UPDATE messages.
    ///
    /// These contain the endpoint and token needed to form a voice connection session.
    async fn server_update(&self, guild_id: GuildId, endpoint: Option<&str>, token: &str);

    /// Handler for VOICE_STATE_UPDATE messages.
    ///
    /// These contain the session ID needed to form a voice connection session.
    async fn state_update(&self, guild_id: GuildId, voice_state: &VoiceState);
}
