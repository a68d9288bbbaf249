//! Models relating to guilds and their members.

use serde::{Deserialize, Serialize};

use super::channel::Channel;
use super::id::GuildId;
use super::user::User;
use super::voice::VoiceState;
use crate::json::JsonMap;

/// A guild, as sent by `GUILD_CREATE` and `GUILD_UPDATE`.
///
/// The collections are only filled by `GUILD_CREATE`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct Guild {
    pub id: GuildId,
    pub name: Option<String>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub voice_states: Vec<VoiceState>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// A guild which is not (or no longer) available to the current user.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub struct UnavailableGuild {
    pub id: GuildId,
    /// `false` when the user was removed from the guild, rather than the guild going offline.
    #[serde(default)]
    pub unavailable: bool,
}

/// A member of a guild.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct Member {
    /// Only present on the member events.
    pub guild_id: Option<GuildId>,
    pub user: User,
    pub nick: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// Sent when a user leaves, or is removed from, a guild.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct GuildMemberRemoveEvent {
    pub guild_id: GuildId,
    pub user: User,
}

/// A chunk of members, sent in answer to a request for guild members.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct GuildMembersChunkEvent {
    pub guild_id: GuildId,
    pub members: Vec<Member>,
    pub chunk_index: u32,
    pub chunk_count: u32,
    pub nonce: Option<String>,
}
