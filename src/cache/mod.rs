//! A cache containing data received from the [`Shard`].
//!
//! The gateway only ever talks to a cache through the [`CacheUpdate`] trait, so any store can be
//! plugged in. [`Cache`] is a small in-memory implementation of it.
//!
//! Following a policy to never hand out locks, the cache will clone all values when calling its
//! methods.
//!
//! [`Shard`]: crate::gateway::Shard

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::model::prelude::*;

mod cache_update;

pub(crate) use self::cache_update::update;
pub use self::cache_update::CacheUpdate;

#[derive(Debug, Default)]
struct CacheData {
    user: Option<CurrentUser>,
    guilds: HashMap<GuildId, Guild>,
    unavailable_guilds: HashSet<GuildId>,
    channels: HashMap<ChannelId, Channel>,
    members: HashMap<GuildId, HashMap<UserId, Member>>,
    voice_states: HashMap<GuildId, HashMap<UserId, VoiceState>>,
}

/// An in-memory store of the guilds, channels, members and voice states seen on the gateway.
#[derive(Debug, Default)]
pub struct Cache {
    data: RwLock<CacheData>,
}

impl Cache {
    /// Creates a new empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The user the session is logged in as, once `READY` has been received.
    #[must_use]
    pub fn current_user(&self) -> Option<CurrentUser> {
        self.data.read().user.clone()
    }

    /// Retrieves a guild, without its channels, members and voice states.
    #[must_use]
    pub fn guild(&self, id: GuildId) -> Option<Guild> {
        self.data.read().guilds.get(&id).cloned()
    }

    /// The ids of every guild known to the cache, available or not.
    #[must_use]
    pub fn guilds(&self) -> Vec<GuildId> {
        let data = self.data.read();
        data.guilds.keys().chain(&data.unavailable_guilds).copied().collect()
    }

    #[must_use]
    pub fn unavailable_guilds(&self) -> Vec<GuildId> {
        self.data.read().unavailable_guilds.iter().copied().collect()
    }

    #[must_use]
    pub fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.data.read().channels.get(&id).cloned()
    }

    #[must_use]
    pub fn member(&self, guild_id: GuildId, user_id: UserId) -> Option<Member> {
        self.data.read().members.get(&guild_id)?.get(&user_id).cloned()
    }

    #[must_use]
    pub fn voice_state(&self, guild_id: GuildId, user_id: UserId) -> Option<VoiceState> {
        self.data.read().voice_states.get(&guild_id)?.get(&user_id).cloned()
    }

    /// Every voice state in a guild.
    #[must_use]
    pub fn voice_states(&self, guild_id: GuildId) -> Vec<VoiceState> {
        self.data
            .read()
            .voice_states
            .get(&guild_id)
            .map(|states| states.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl CacheUpdate for Cache {
    fn ready(&self, ready: &Ready) {
        let mut data = self.data.write();
        data.user = Some(ready.user.clone());

        for guild in &ready.guilds {
            if !data.guilds.contains_key(&guild.id) {
                data.unavailable_guilds.insert(guild.id);
            }
        }
    }

    fn channel_upsert(&self, channel: &Channel) {
        self.data.write().channels.insert(channel.id, channel.clone());
    }

    fn channel_remove(&self, channel: &Channel) {
        self.data.write().channels.remove(&channel.id);
    }

    fn guild_upsert(&self, guild: &Guild) {
        let mut data = self.data.write();
        let mut guild = guild.clone();

        for mut channel in std::mem::take(&mut guild.channels) {
            channel.guild_id = Some(guild.id);
            data.channels.insert(channel.id, channel);
        }

        let members = std::mem::take(&mut guild.members);
        if !members.is_empty() {
            let cached = data.members.entry(guild.id).or_default();
            for mut member in members {
                member.guild_id = Some(guild.id);
                cached.insert(member.user.id, member);
            }
        }

        let states = std::mem::take(&mut guild.voice_states);
        if !states.is_empty() {
            let cached = data.voice_states.entry(guild.id).or_default();
            for mut state in states {
                state.guild_id = Some(guild.id);
                cached.insert(state.user_id, state);
            }
        }

        data.unavailable_guilds.remove(&guild.id);
        data.guilds.insert(guild.id, guild);
    }

    fn guild_remove(&self, guild: &UnavailableGuild) {
        let mut data = self.data.write();

        data.guilds.remove(&guild.id);
        data.members.remove(&guild.id);
        data.voice_states.remove(&guild.id);
        data.channels.retain(|_, channel| channel.guild_id != Some(guild.id));

        if guild.unavailable {
            data.unavailable_guilds.insert(guild.id);
        } else {
            data.unavailable_guilds.remove(&guild.id);
        }
    }

    fn member_upsert(&self, guild_id: GuildId, member: &Member) {
        self.data.write().members.entry(guild_id).or_default().insert(member.user.id, member.clone());
    }

    fn member_remove(&self, guild_id: GuildId, user: &User) {
        if let Some(members) = self.data.write().members.get_mut(&guild_id) {
            members.remove(&user.id);
        }
    }

    fn voice_state_update(&self, guild_id: GuildId, state: &VoiceState) {
        let mut data = self.data.write();
        let states = data.voice_states.entry(guild_id).or_default();

        if state.channel_id.is_some() {
            states.insert(state.user_id, state.clone());
        } else {
            states.remove(&state.user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, data: &str) -> Event {
        Event::decode(name, data).unwrap()
    }

    #[test]
    fn guild_create_fills_nested_collections() {
        let cache = Cache::new();
        update(
            &cache,
            &event(
                "GUILD_CREATE",
                r#"{
                    "id": "1",
                    "name": "guild",
                    "channels": [{"id": "10", "type": 2, "name": "voice"}],
                    "members": [{"user": {"id": "100", "username": "a"}, "nick": null}],
                    "voice_states": [{"channel_id": "10", "user_id": "100", "session_id": "s"}]
                }"#,
            ),
        );

        let guild_id = GuildId::new(1);
        assert!(cache.guild(guild_id).unwrap().channels.is_empty());
        assert_eq!(cache.channel(ChannelId::new(10)).unwrap().guild_id, Some(guild_id));
        assert!(cache.member(guild_id, UserId::new(100)).is_some());
        assert_eq!(cache.voice_states(guild_id).len(), 1);
    }

    #[test]
    fn leaving_voice_removes_state() {
        let cache = Cache::new();
        update(
            &cache,
            &event(
                "VOICE_STATE_UPDATE",
                r#"{"guild_id": "1", "channel_id": "2", "user_id": "3", "session_id": "s"}"#,
            ),
        );
        assert!(cache.voice_state(GuildId::new(1), UserId::new(3)).is_some());

        update(
            &cache,
            &event(
                "VOICE_STATE_UPDATE",
                r#"{"guild_id": "1", "channel_id": null, "user_id": "3", "session_id": "s"}"#,
            ),
        );
        assert!(cache.voice_state(GuildId::new(1), UserId::new(3)).is_none());
    }

    #[test]
    fn outage_marks_guild_unavailable() {
        let cache = Cache::new();
        update(&cache, &event("GUILD_CREATE", r#"{"id": "1", "name": "guild"}"#));
        update(&cache, &event("GUILD_DELETE", r#"{"id": "1", "unavailable": true}"#));

        assert!(cache.guild(GuildId::new(1)).is_none());
        assert_eq!(cache.unavailable_guilds(), vec![GuildId::new(1)]);
    }

    #[test]
    fn reads_are_copies() {
        let cache = Cache::new();
        update(&cache, &event("CHANNEL_CREATE", r#"{"id": "7", "type": 0, "name": "a"}"#));

        let mut copy = cache.channel(ChannelId::new(7)).unwrap();
        copy.name = Some("b".into());

        assert_eq!(cache.channel(ChannelId::new(7)).unwrap().name.as_deref(), Some("a"));
    }
}
