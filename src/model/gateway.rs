//! Models pertaining to the gateway.

use std::fmt;

use bitflags::bitflags;
use serde::de::{Deserializer, Error as DeError};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};
use url::Url;

use super::guild::UnavailableGuild;
use super::id::UserId;

/// A representation of the data retrieved from the bot gateway endpoint.
///
/// This includes the number of shards that Discord recommends to use for a bot user.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct BotGateway {
    /// The gateway to connect to.
    pub url: String,
    /// The number of shards that is recommended to be used by the current bot user.
    #[serde(default)]
    pub shards: u32,
    /// Information describing how many gateway sessions you can initiate within a ratelimit
    /// period.
    pub session_start_limit: Option<SessionStartLimit>,
}

/// The current user's session start limits.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct SessionStartLimit {
    /// The number of session starts the current user is allowed.
    pub total: u64,
    /// The remaining number of session starts the current user is allowed.
    pub remaining: u64,
    /// The number of milliseconds until the limit resets.
    pub reset_after: u64,
    /// The number of identify requests allowed per 5 seconds.
    #[serde(default)]
    pub max_concurrency: u64,
}

/// Information about the shard a session belongs to, as `[id, total]` on the wire.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ShardInfo {
    pub id: u16,
    pub total: u16,
}

impl ShardInfo {
    #[must_use]
    pub const fn new(id: u16, total: u16) -> Self {
        Self {
            id,
            total,
        }
    }
}

impl Default for ShardInfo {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl fmt::Display for ShardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.total)
    }
}

impl<'de> Deserialize<'de> for ShardInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [id, total] = <[u16; 2]>::deserialize(deserializer)?;
        if total == 0 || id >= total {
            return Err(DeError::custom("shard id must be below the shard total"));
        }

        Ok(Self::new(id, total))
    }
}

impl Serialize for ShardInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_tuple(2)?;
        seq.serialize_element(&self.id)?;
        seq.serialize_element(&self.total)?;
        seq.end()
    }
}

/// The bot user a session is logged in as.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct CurrentUser {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

/// The data sent with the `READY` event, completing an identify.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct Ready {
    /// The gateway version.
    #[serde(rename = "v")]
    pub version: u8,
    pub user: CurrentUser,
    /// Guilds the user is in; they arrive as unavailable and are filled in by `GUILD_CREATE`.
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    pub session_id: String,
    /// The URL to use when resuming this session.
    pub resume_gateway_url: Option<String>,
    pub shard: Option<ShardInfo>,
}

enum_number! {
    /// The type of an activity.
    ///
    /// [Discord docs](https://discord.com/developers/docs/topics/gateway-events#activity-object-activity-types).
    #[derive(Default)]
    pub enum ActivityType: u8 {
        /// An indicator that the user is playing a game.
        #[default]
        Playing = 0,
        /// An indicator that the user is streaming to a service.
        Streaming = 1,
        /// An indicator that the user is listening to something.
        Listening = 2,
        /// An indicator that the user is watching something.
        Watching = 3,
        /// An indicator that the user uses custom statuses
        Custom = 4,
        /// An indicator that the user is competing somewhere.
        Competing = 5,
    }
}

/// Activity data of the current user, as sent in a presence update.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[non_exhaustive]
pub struct ActivityData {
    /// The name of the activity
    pub name: String,
    /// The type of the activity
    #[serde(rename = "type")]
    pub kind: ActivityType,
    /// The state of the activity, if the type is [`ActivityType::Custom`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// The url of the activity, if the type is [`ActivityType::Streaming`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
}

impl ActivityData {
    /// Creates an activity that appears as `Playing <name>`.
    #[must_use]
    pub fn playing(name: impl Into<String>) -> Self {
        Self::of(name, ActivityType::Playing)
    }

    /// Creates an activity that appears as `Streaming <name>`.
    #[must_use]
    pub fn streaming(name: impl Into<String>, url: Url) -> Self {
        Self {
            url: Some(url),
            ..Self::of(name, ActivityType::Streaming)
        }
    }

    /// Creates an activity that appears as `Listening to <name>`.
    #[must_use]
    pub fn listening(name: impl Into<String>) -> Self {
        Self::of(name, ActivityType::Listening)
    }

    /// Creates an activity that appears as `Watching <name>`.
    #[must_use]
    pub fn watching(name: impl Into<String>) -> Self {
        Self::of(name, ActivityType::Watching)
    }

    /// Creates an activity that appears as `Competing in <name>`.
    #[must_use]
    pub fn competing(name: impl Into<String>) -> Self {
        Self::of(name, ActivityType::Competing)
    }

    /// Creates an activity that appears as `<state>`.
    #[must_use]
    pub fn custom(state: impl Into<String>) -> Self {
        Self {
            state: Some(state.into()),
            ..Self::of("~", ActivityType::Custom)
        }
    }

    fn of(name: impl Into<String>, kind: ActivityType) -> Self {
        Self {
            name: name.into(),
            kind,
            state: None,
            url: None,
        }
    }
}

/// The online status of the current user.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[non_exhaustive]
pub enum OnlineStatus {
    #[serde(rename = "dnd")]
    DoNotDisturb,
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "invisible")]
    Invisible,
    #[serde(rename = "offline")]
    Offline,
    #[serde(rename = "online")]
    #[default]
    Online,
}

/// The presence the current user shows to others.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PresenceData {
    pub activity: Option<ActivityData>,
    pub status: OnlineStatus,
}

bitflags! {
    /// [Gateway Intents] will limit the events your bot will receive via the gateway. By default,
    /// all intents except [Privileged Intents] are selected.
    ///
    /// [Gateway Intents]: https://discord.com/developers/docs/topics/gateway#gateway-intents
    /// [Privileged Intents]: https://discord.com/developers/docs/topics/gateway#privileged-intents
    #[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord, Hash, Debug, Default)]
    pub struct GatewayIntents: u64 {
        /// Enables the following gateway events: GUILD_CREATE, GUILD_UPDATE, GUILD_DELETE,
        /// CHANNEL_CREATE, CHANNEL_UPDATE, CHANNEL_DELETE and more.
        const GUILDS = 1;
        /// Enables GUILD_MEMBER_ADD, GUILD_MEMBER_UPDATE and GUILD_MEMBER_REMOVE.
        ///
        /// **Info:** This intent is *privileged*.
        const GUILD_MEMBERS = 1 << 1;
        /// Enables GUILD_AUDIT_LOG_ENTRY_CREATE and the ban events.
        const GUILD_MODERATION = 1 << 2;
        /// Enables the emoji and sticker update events.
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        /// Enables the integration events.
        const GUILD_INTEGRATIONS = 1 << 4;
        /// Enables WEBHOOKS_UPDATE.
        const GUILD_WEBHOOKS = 1 << 5;
        /// Enables INVITE_CREATE and INVITE_DELETE.
        const GUILD_INVITES = 1 << 6;
        /// Enables VOICE_STATE_UPDATE.
        const GUILD_VOICE_STATES = 1 << 7;
        /// Enables PRESENCE_UPDATE.
        ///
        /// **Info:** This intent is *privileged*.
        const GUILD_PRESENCES = 1 << 8;
        /// Enables the message events in guilds.
        const GUILD_MESSAGES = 1 << 9;
        /// Enables the reaction events in guilds.
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        /// Enables TYPING_START in guilds.
        const GUILD_MESSAGE_TYPING = 1 << 11;
        /// Enables the message events in direct messages.
        const DIRECT_MESSAGES = 1 << 12;
        /// Enables the reaction events in direct messages.
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        /// Enables TYPING_START in direct messages.
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        /// Enables receiving message content.
        ///
        /// **Info:** This intent is *privileged*.
        const MESSAGE_CONTENT = 1 << 15;
        /// Enables the guild scheduled event events.
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        /// Enables the auto moderation configuration events.
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        /// Enables AUTO_MODERATION_ACTION_EXECUTION.
        const AUTO_MODERATION_EXECUTION = 1 << 21;
    }
}

impl GatewayIntents {
    /// Gets all of the intents that aren't considered privileged by Discord.
    #[must_use]
    pub const fn non_privileged() -> GatewayIntents {
        Self::privileged().complement()
    }

    /// Gets all of the intents that are considered privileged by Discord. Use of these intents
    /// will require explicitly whitelisting the bot.
    #[must_use]
    pub const fn privileged() -> GatewayIntents {
        Self::GUILD_MEMBERS.union(Self::GUILD_PRESENCES).union(Self::MESSAGE_CONTENT)
    }

    /// Checks if any of the included intents are privileged.
    #[must_use]
    pub const fn is_privileged(self) -> bool {
        self.intersects(Self::privileged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::{assert_json, from_str, json};

    #[test]
    fn shard_info_is_a_pair() {
        assert_json(&ShardInfo::new(1, 4), json!([1, 4]));
        assert!(from_str::<ShardInfo>("[4, 4]").is_err());
    }

    #[test]
    fn activity_wire_format() {
        assert_json(&ActivityData::listening("rain"), json!({"name": "rain", "type": 2}));
        assert_json(
            &ActivityData::custom("busy"),
            json!({"name": "~", "type": 4, "state": "busy"}),
        );
    }

    #[test]
    fn privileged_intents() {
        assert!(GatewayIntents::GUILD_MEMBERS.is_privileged());
        assert!(!GatewayIntents::GUILD_VOICE_STATES.is_privileged());
        assert!(!GatewayIntents::non_privileged().is_privileged());
    }

    #[test]
    fn ready_decodes() {
        let ready: Ready = from_str(
            r#"{
                "v": 10,
                "user": {"id": "1", "username": "bot", "bot": true},
                "guilds": [{"id": "2", "unavailable": true}],
                "session_id": "abc",
                "resume_gateway_url": "wss://resume.discord.gg",
                "shard": [0, 1]
            }"#,
        )
        .unwrap();

        assert_eq!(ready.session_id, "abc");
        assert_eq!(ready.user.id, UserId::new(1));
        assert_eq!(ready.guilds.len(), 1);
        assert_eq!(ready.shard, Some(ShardInfo::default()));
    }
}
