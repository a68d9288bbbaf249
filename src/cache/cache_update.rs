use crate::model::prelude::*;

/// The interface through which dispatched events update a cache.
///
/// The gateway calls exactly one of these methods for every dispatch that changes cached state,
/// and does so before any [`EventHandler`] sees the event. Every method defaults to doing
/// nothing, so an implementation only needs to handle what it stores.
///
/// [`EventHandler`]: crate::client::EventHandler
pub trait CacheUpdate: Send + Sync {
    fn ready(&self, _ready: &Ready) {}

    fn channel_upsert(&self, _channel: &Channel) {}

    fn channel_remove(&self, _channel: &Channel) {}

    fn guild_upsert(&self, _guild: &Guild) {}

    fn guild_remove(&self, _guild: &UnavailableGuild) {}

    fn member_upsert(&self, _guild_id: GuildId, _member: &Member) {}

    fn member_remove(&self, _guild_id: GuildId, _user: &User) {}

    fn voice_state_update(&self, _guild_id: GuildId, _state: &VoiceState) {}
}

/// Feeds a single event into `cache`.
pub(crate) fn update(cache: &dyn CacheUpdate, event: &Event) {
    match event {
        Event::Ready(ready) => cache.ready(ready),
        Event::ChannelCreate(channel) | Event::ChannelUpdate(channel) => {
            cache.channel_upsert(channel);
        },
        Event::ChannelDelete(channel) => cache.channel_remove(channel),
        Event::GuildCreate(guild) | Event::GuildUpdate(guild) => cache.guild_upsert(guild),
        Event::GuildDelete(guild) => cache.guild_remove(guild),
        Event::GuildMemberAdd(member) | Event::GuildMemberUpdate(member) => {
            if let Some(guild_id) = member.guild_id {
                cache.member_upsert(guild_id, member);
            }
        },
        Event::GuildMemberRemove(removal) => cache.member_remove(removal.guild_id, &removal.user),
        Event::GuildMembersChunk(chunk) => {
            for member in &chunk.members {
                cache.member_upsert(chunk.guild_id, member);
            }
        },
        Event::VoiceStateUpdate(state) => {
            if let Some(guild_id) = state.guild_id {
                cache.voice_state_update(guild_id, state);
            }
        },
        Event::Resumed
        | Event::MessageCreate(_)
        | Event::VoiceServerUpdate(_)
        | Event::Unknown(_) => {},
    }
}
