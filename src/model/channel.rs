//! Models relating to channels and messages.

use serde::{Deserialize, Serialize};

use super::id::{ChannelId, GuildId, MessageId};
use super::user::User;
use crate::json::JsonMap;

/// A channel, as sent by the channel events and inside `GUILD_CREATE`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct Channel {
    pub id: ChannelId,
    /// Absent for direct message channels, and for channels nested in a guild payload.
    pub guild_id: Option<GuildId>,
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// A message sent in a channel.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: JsonMap,
}
