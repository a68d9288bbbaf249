use std::env::consts;

use tracing::{debug, trace};

use super::ChunkGuildFilter;
use crate::constants::{self, Opcode};
use crate::internal::prelude::*;
use crate::json::json;
use crate::model::gateway::{GatewayIntents, PresenceData, ShardInfo};
use crate::model::id::{ChannelId, GuildId};
use crate::ws::WsWriter;

fn presence_json(presence: &PresenceData) -> Value {
    json!({
        "afk": false,
        "since": null,
        "status": presence.status,
        "activities": presence.activity.iter().collect::<Vec<_>>(),
    })
}

/// Gateway commands, built on the shared websocket writer.
impl WsWriter {
    #[cfg_attr(feature = "tracing_instrument", tracing::instrument(skip(self, token)))]
    pub(crate) async fn send_identify(
        &self,
        shard: ShardInfo,
        token: &str,
        intents: GatewayIntents,
        large_threshold: u8,
        presence: Option<&PresenceData>,
    ) -> Result<()> {
        debug!("[Shard {shard}] Identifying");

        let mut data = json!({
            "token": token,
            "intents": intents.bits(),
            "compress": false,
            "large_threshold": large_threshold,
            "shard": shard,
            "properties": {
                "os": consts::OS,
                "browser": "sonority",
                "device": "sonority",
            },
        });

        if let Some(presence) = presence {
            data["presence"] = presence_json(presence);
        }

        self.send_json(Opcode::Identify, &data).await
    }

    #[cfg_attr(feature = "tracing_instrument", tracing::instrument(skip(self, token)))]
    pub(crate) async fn send_resume(
        &self,
        shard: ShardInfo,
        session_id: &str,
        seq: u64,
        token: &str,
    ) -> Result<()> {
        debug!("[Shard {shard}] Sending resume; seq: {seq}");

        self.send_json(
            Opcode::Resume,
            &json!({
                "token": token,
                "session_id": session_id,
                "seq": seq,
            }),
        )
        .await
    }

    pub(crate) async fn send_heartbeat(&self, shard: ShardInfo, seq: Option<u64>) -> Result<()> {
        trace!("[Shard {shard}] Sending heartbeat d: {seq:?}");

        self.send_json(Opcode::Heartbeat, &seq).await
    }

    pub(crate) async fn send_presence_update(
        &self,
        shard: ShardInfo,
        presence: &PresenceData,
    ) -> Result<()> {
        debug!("[Shard {shard}] Sending presence update");

        self.send_json(Opcode::PresenceUpdate, &presence_json(presence)).await
    }

    pub(crate) async fn send_chunk_guild(
        &self,
        shard: ShardInfo,
        guild_id: GuildId,
        limit: Option<u16>,
        filter: ChunkGuildFilter,
        nonce: Option<&str>,
    ) -> Result<()> {
        debug!("[Shard {shard}] Requesting member chunks");

        let mut data = json!({
            "guild_id": guild_id,
            "limit": limit.unwrap_or(0),
        });

        if let Some(nonce) = nonce {
            data["nonce"] = json!(nonce);
        }

        match filter {
            ChunkGuildFilter::None => data["query"] = json!(""),
            ChunkGuildFilter::Query(query) => data["query"] = json!(query),
            ChunkGuildFilter::UserIds(user_ids) => data["user_ids"] = json!(user_ids),
        }

        self.send_json(Opcode::RequestGuildMembers, &data).await
    }

    pub(crate) async fn send_voice_state(
        &self,
        shard: ShardInfo,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()> {
        debug!("[Shard {shard}] Updating voice state in {guild_id}: {channel_id:?}");

        self.send_json(
            Opcode::VoiceStateUpdate,
            &json!({
                "guild_id": guild_id,
                "channel_id": channel_id,
                "self_mute": self_mute,
                "self_deaf": self_deaf,
            }),
        )
        .await
    }
}
