//! The gateway connection: one authenticated, heartbeating websocket to Discord.
//!
//! A [`Shard`] is a cheap handle to a single session. [`Shard::connect`] performs the handshake
//! (Hello, then Identify or Resume) and returns once the session is usable; from then on a
//! supervisor task owns the socket. It runs three tasks per connection:
//!
//! - the heartbeater, which beats at the interval given by Hello and reports a stale connection
//!   when an acknowledgement is missed;
//! - the receiver, the only reader of the socket;
//! - the dispatcher, which decodes dispatches in arrival order, feeds the cache and the voice
//!   manager, and spawns the event handlers.
//!
//! When any of them fails, the supervisor tears the connection down and reconnects with
//! exponential backoff, resuming the session whenever Discord allows it. Close codes that mean the
//! configuration itself is refused (a bad token, disallowed intents) end the session instead.
//!
//! Commands such as presence updates go through a [`ShardMessenger`], which event handlers
//! receive inside their [`Context`].
//!
//! [`Context`]: crate::client::Context

mod config;
mod error;
mod runner;
mod shard;
mod stage;
mod voice;
mod ws;

pub use self::config::ShardConfig;
pub use self::error::Error as GatewayError;
pub use self::shard::{ErrorCallback, Shard, ShardMessenger};
pub use self::stage::ConnectionStage;
pub(crate) use self::stage::SessionState;
pub use self::voice::VoiceGatewayManager;
use crate::model::id::UserId;

/// [Discord docs](https://discord.com/developers/docs/topics/gateway-events#request-guild-members).
#[derive(Clone, Debug)]
pub enum ChunkGuildFilter {
    /// Returns all members of the guilds specified. Requires GUILD_MEMBERS intent.
    None,
    /// A common username prefix filter for the members returned.
    ///
    /// Will return a maximum of 100 members.
    Query(String),
    /// A set of exact user IDs to query for.
    ///
    /// Will return a maximum of 100 members.
    UserIds(Vec<UserId>),
}
