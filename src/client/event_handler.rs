use async_trait::async_trait;

use super::context::Context;
use crate::json::RawValue;
use crate::model::prelude::*;

/// The core trait for handling events by sonority.
///
/// Every method defaults to doing nothing. Each dispatch runs its handler in a task of its own,
/// so a slow handler delays neither the gateway nor other handlers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Dispatched when the session is identified.
    ///
    /// Provides the current user and the guilds it is in, all unavailable until their
    /// [`Self::guild_create`] arrives.
    async fn ready(&self, _ctx: Context, _data_about_bot: &Ready) {}

    /// Dispatched when a session is resumed after a reconnect.
    async fn resume(&self, _ctx: Context) {}

    /// Dispatched when a channel is created.
    ///
    /// Provides said channel's data.
    async fn channel_create(&self, _ctx: Context, _channel: &Channel) {}

    /// Dispatched when a channel is updated.
    ///
    /// Provides the new data.
    async fn channel_update(&self, _ctx: Context, _new_data: &Channel) {}

    /// Dispatched when a channel is deleted.
    ///
    /// Provides said channel's data.
    async fn channel_delete(&self, _ctx: Context, _channel: &Channel) {}

    /// Dispatched when a guild becomes available, or an existing guild's data is sent to us.
    async fn guild_create(&self, _ctx: Context, _guild: &Guild) {}

    /// Dispatched when a guild is updated.
    async fn guild_update(&self, _ctx: Context, _new_data: &Guild) {}

    /// Dispatched when a guild is deleted, or becomes unavailable.
    async fn guild_delete(&self, _ctx: Context, _incomplete: &UnavailableGuild) {}

    /// Dispatched when a user joins a guild.
    async fn guild_member_addition(&self, _ctx: Context, _new_member: &Member) {}

    /// Dispatched when a member is updated (e.g their nickname is updated).
    async fn guild_member_update(&self, _ctx: Context, _new: &Member) {}

    /// Dispatched when a user's membership ends by leaving, getting kicked, or being banned.
    async fn guild_member_removal(&self, _ctx: Context, _guild_id: GuildId, _user: &User) {}

    /// Dispatched when the data for offline members was requested.
    async fn guild_members_chunk(&self, _ctx: Context, _chunk: &GuildMembersChunkEvent) {}

    /// Dispatched when a message is created.
    async fn message(&self, _ctx: Context, _new_message: &Message) {}

    /// Dispatched when a user joins, leaves or moves to a voice channel.
    async fn voice_state_update(&self, _ctx: Context, _new: &VoiceState) {}

    /// Dispatched when a guild's voice server was updated (or changed to another one).
    async fn voice_server_update(&self, _ctx: Context, _event: &VoiceServerUpdateEvent) {}

    /// Dispatched when an event this library does not know about is received.
    ///
    /// Provides the event name and its raw data.
    async fn unknown(&self, _ctx: Context, _name: &str, _raw: &RawValue) {}
}
