//! All the events this library handles.
//!
//! Every dispatch received on the gateway is decoded into an [`Event`], keyed by the dispatch
//! name. Names this library does not know about decode into [`Event::Unknown`], which keeps the
//! raw payload so that nothing is silently dropped.

use super::channel::{Channel, Message};
use super::gateway::Ready;
use super::guild::{Guild, GuildMemberRemoveEvent, GuildMembersChunkEvent, Member, UnavailableGuild};
use super::voice::{VoiceServerUpdateEvent, VoiceState};
use crate::json::{from_str, RawValue};
use crate::Result;

/// An event which was not recognized, with its raw data.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct UnknownEvent {
    pub name: String,
    pub raw: Box<RawValue>,
}

/// A decoded gateway dispatch.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Event {
    /// The first event of an identified session.
    Ready(Ready),
    /// Marks the end of the events replayed after a resume.
    Resumed,
    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),
    /// A guild became available, or the current user joined one.
    GuildCreate(Guild),
    GuildUpdate(Guild),
    GuildDelete(UnavailableGuild),
    GuildMemberAdd(Member),
    GuildMemberUpdate(Member),
    GuildMemberRemove(GuildMemberRemoveEvent),
    GuildMembersChunk(GuildMembersChunkEvent),
    MessageCreate(Message),
    VoiceStateUpdate(VoiceState),
    VoiceServerUpdate(VoiceServerUpdateEvent),
    Unknown(UnknownEvent),
}

impl Event {
    /// Decodes the raw `d` field of a dispatch named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a known event's data does not match its model, or if the data
    /// of an unknown event is not JSON at all.
    ///
    /// [`Error::Json`]: crate::Error::Json
    pub fn decode(name: &str, data: &str) -> Result<Self> {
        Ok(match name {
            "READY" => Self::Ready(from_str(data)?),
            "RESUMED" => Self::Resumed,
            "CHANNEL_CREATE" => Self::ChannelCreate(from_str(data)?),
            "CHANNEL_UPDATE" => Self::ChannelUpdate(from_str(data)?),
            "CHANNEL_DELETE" => Self::ChannelDelete(from_str(data)?),
            "GUILD_CREATE" => Self::GuildCreate(from_str(data)?),
            "GUILD_UPDATE" => Self::GuildUpdate(from_str(data)?),
            "GUILD_DELETE" => Self::GuildDelete(from_str(data)?),
            "GUILD_MEMBER_ADD" => Self::GuildMemberAdd(from_str(data)?),
            "GUILD_MEMBER_UPDATE" => Self::GuildMemberUpdate(from_str(data)?),
            "GUILD_MEMBER_REMOVE" => Self::GuildMemberRemove(from_str(data)?),
            "GUILD_MEMBERS_CHUNK" => Self::GuildMembersChunk(from_str(data)?),
            "MESSAGE_CREATE" => Self::MessageCreate(from_str(data)?),
            "VOICE_STATE_UPDATE" => Self::VoiceStateUpdate(from_str(data)?),
            "VOICE_SERVER_UPDATE" => Self::VoiceServerUpdate(from_str(data)?),
            _ => Self::Unknown(UnknownEvent {
                name: name.to_owned(),
                raw: RawValue::from_string(data.to_owned())?,
            }),
        })
    }

    /// The dispatch name this event was decoded from.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Ready(_) => "READY",
            Self::Resumed => "RESUMED",
            Self::ChannelCreate(_) => "CHANNEL_CREATE",
            Self::ChannelUpdate(_) => "CHANNEL_UPDATE",
            Self::ChannelDelete(_) => "CHANNEL_DELETE",
            Self::GuildCreate(_) => "GUILD_CREATE",
            Self::GuildUpdate(_) => "GUILD_UPDATE",
            Self::GuildDelete(_) => "GUILD_DELETE",
            Self::GuildMemberAdd(_) => "GUILD_MEMBER_ADD",
            Self::GuildMemberUpdate(_) => "GUILD_MEMBER_UPDATE",
            Self::GuildMemberRemove(_) => "GUILD_MEMBER_REMOVE",
            Self::GuildMembersChunk(_) => "GUILD_MEMBERS_CHUNK",
            Self::MessageCreate(_) => "MESSAGE_CREATE",
            Self::VoiceStateUpdate(_) => "VOICE_STATE_UPDATE",
            Self::VoiceServerUpdate(_) => "VOICE_SERVER_UPDATE",
            Self::Unknown(unknown) => &unknown.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::id::{ChannelId, GuildId};

    #[test]
    fn known_events_decode_by_name() {
        let event = Event::decode(
            "VOICE_SERVER_UPDATE",
            r#"{"guild_id":"41771983423143937","token":"my_token","endpoint":"sweetwater-12.discord.media:2048"}"#,
        )
        .unwrap();

        let Event::VoiceServerUpdate(update) = &event else { panic!("decoded {event:?}") };
        assert_eq!(update.guild_id, GuildId::new(41771983423143937));
        assert_eq!(update.endpoint.as_deref(), Some("sweetwater-12.discord.media:2048"));
        assert_eq!(event.name(), "VOICE_SERVER_UPDATE");
    }

    #[test]
    fn extra_fields_are_kept() {
        let event = Event::decode(
            "CHANNEL_CREATE",
            r#"{"id":"5","guild_id":"6","type":2,"name":"General","bitrate":64000}"#,
        )
        .unwrap();

        let Event::ChannelCreate(channel) = event else { panic!() };
        assert_eq!(channel.id, ChannelId::new(5));
        assert_eq!(channel.extra["bitrate"], 64000);
    }

    #[test]
    fn unknown_events_keep_raw_data() {
        let event = Event::decode("SOMETHING_NEW", r#"{"x":[1,2]}"#).unwrap();

        let Event::Unknown(unknown) = &event else { panic!() };
        assert_eq!(unknown.raw.get(), r#"{"x":[1,2]}"#);
        assert_eq!(event.name(), "SOMETHING_NEW");
    }

    #[test]
    fn malformed_known_event_is_an_error() {
        assert!(Event::decode("GUILD_DELETE", r#"{"unavailable":true}"#).is_err());
    }

    #[test]
    fn resumed_ignores_its_data() {
        assert!(matches!(Event::decode("RESUMED", "null").unwrap(), Event::Resumed));
    }
}
