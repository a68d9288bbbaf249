//! Representations of voice information.

use serde::{Deserialize, Serialize};

use super::id::{ChannelId, GuildId, UserId};

/// A user's state within a voice channel.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct VoiceState {
    /// Absent when nested inside a `GUILD_CREATE` payload.
    pub guild_id: Option<GuildId>,
    /// `None` when the user has left voice.
    pub channel_id: Option<ChannelId>,
    pub user_id: UserId,
    pub session_id: String,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
    #[serde(default)]
    pub self_mute: bool,
}

/// The voice server a guild's voice connections should use.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct VoiceServerUpdateEvent {
    pub guild_id: GuildId,
    pub token: String,
    /// `None` while the previous server went away and a new one is being allocated.
    pub endpoint: Option<String>,
}
