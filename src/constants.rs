//! A set of constants used by the library.

/// The base URL of Discord's REST API.
pub const API_BASE: &str = "https://discord.com/api/v10";

/// The gateway version used by the library. The gateway URL is retrieved via the REST API.
pub const GATEWAY_VERSION: u8 = 10;

/// The large threshold to send on identify.
pub const LARGE_THRESHOLD: u8 = 250;

/// The UserAgent sent along with every request.
pub const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/sonority-rs/sonority, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

enum_number! {
    /// An enum representing the [gateway opcodes].
    ///
    /// [gateway opcodes]: https://discord.com/developers/docs/topics/opcodes-and-status-codes#gateway-gateway-opcodes
    pub enum Opcode: u8 {
        /// Dispatches an event.
        Dispatch = 0,
        /// Used for ping checking.
        Heartbeat = 1,
        /// Used for client handshake.
        Identify = 2,
        /// Used to update the client status.
        PresenceUpdate = 3,
        /// Used to join/move/leave voice channels.
        VoiceStateUpdate = 4,
        /// Used to resume a closed connection.
        Resume = 6,
        /// Used to tell clients to reconnect to the gateway.
        Reconnect = 7,
        /// Used to request guild members.
        RequestGuildMembers = 8,
        /// Used to notify clients that they have an invalid session Id.
        InvalidSession = 9,
        /// Sent immediately after connection, contains heartbeat + server info.
        Hello = 10,
        /// Sent immediately following a client heartbeat that was received.
        HeartbeatAck = 11,
    }
}

/// The close codes the gateway may send when terminating a connection.
pub mod close_codes {
    /// A normal closure, which ends the session.
    pub const NORMAL: u16 = 1000;
    /// The websocket-level code for a policy violation.
    pub const POLICY_VIOLATION: u16 = 1008;

    /// Unknown error or something went wrong.
    pub const UNKNOWN_ERROR: u16 = 4000;
    /// An invalid opcode or payload for an opcode was sent.
    pub const UNKNOWN_OPCODE: u16 = 4001;
    /// An invalid payload was sent.
    pub const DECODE_ERROR: u16 = 4002;
    /// A payload was sent prior to identifying.
    pub const NOT_AUTHENTICATED: u16 = 4003;
    /// The account token sent with the identify payload was incorrect.
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    /// More than one identify payload was sent.
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    /// The sequence sent when resuming the session was invalid.
    pub const INVALID_SEQUENCE: u16 = 4007;
    /// Payloads were being sent too quickly.
    pub const RATE_LIMITED: u16 = 4008;
    /// A session timed out.
    pub const SESSION_TIMEOUT: u16 = 4009;
    /// An invalid shard when identifying was sent.
    pub const INVALID_SHARD: u16 = 4010;
    /// The session would have handled too many guilds.
    pub const SHARDING_REQUIRED: u16 = 4011;
    /// Undocumented gateway version was used.
    pub const INVALID_API_VERSION: u16 = 4012;
    /// Undocumented intent was provided.
    pub const INVALID_GATEWAY_INTENTS: u16 = 4013;
    /// Intent was provided which is disallowed for the bot user.
    pub const DISALLOWED_GATEWAY_INTENTS: u16 = 4014;
}
