//! Constants affecting voice connections and the audio they carry.

use std::time::Duration;

/// The voice gateway version used by the library.
pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// The only encryption mode the library negotiates.
pub const CRYPTO_MODE: &str = "xsalsa20_poly1305";

/// Sample rate of audio to be sent to Discord.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Number of audio frames/packets to be sent per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Number of samples in one complete frame of audio per channel.
pub const MONO_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Length of any audio frame.
pub const FRAME_LEN: Duration = Duration::from_millis(1000 / AUDIO_FRAME_RATE as u64);

/// Maximum packet size for a voice packet.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const VOICE_PACKET_MAX: usize = 1460;

/// The Opus frame announcing silence, which also prompts Discord to start sending audio.
pub const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// The size of the IP discovery request and response.
pub const IP_DISCOVERY_LEN: usize = 70;

/// The size of a UDP keepalive and of its echo.
pub const UDP_KEEPALIVE_LEN: usize = 8;

/// Discord's heartbeat interval is longer than it tolerates; beats are sent this much sooner.
pub const HEARTBEAT_INTERVAL_SCALE: f64 = 0.75;

/// The size of an RTP header without extensions.
pub const RTP_HEADER_LEN: usize = 12;

/// First RTP byte: version 2, no padding, no extension.
pub const RTP_VERSION: u8 = 0x80;

/// First RTP byte: version 2 with a header extension.
pub const RTP_VERSION_EXTENSION: u8 = 0x90;

/// Payload type Discord uses for Opus.
pub const RTP_PROFILE_TYPE: u8 = 0x78;

/// Number of bytes of a Poly1305 authentication tag.
pub const TAG_SIZE: usize = 16;

/// Number of bytes of an XSalsa20 nonce.
pub const NONCE_SIZE: usize = 24;

/// Number of bytes of the secret key given by the session description.
pub const KEY_SIZE: usize = 32;

enum_number! {
    /// An enum representing the [voice opcodes].
    ///
    /// [voice opcodes]: https://discord.com/developers/docs/topics/opcodes-and-status-codes#voice
    pub enum VoiceOpcode: u8 {
        /// Used to begin a voice websocket connection.
        Identify = 0,
        /// Used to select the voice protocol.
        SelectProtocol = 1,
        /// Used to complete the websocket handshake.
        Ready = 2,
        /// Used to keep the websocket connection alive.
        Heartbeat = 3,
        /// Server's confirmation of a negotiated encryption scheme.
        SessionDescription = 4,
        /// Used to indicate which users are speaking, or to inform Discord that the client is now
        /// speaking.
        Speaking = 5,
        /// Heartbeat ACK, received by the client to show the server's receipt of a heartbeat.
        HeartbeatAck = 6,
        /// Sent after a disconnect to attempt to resume a session.
        Resume = 7,
        /// Used to determine how often the client must send a heartbeat.
        Hello = 8,
        /// Sent by the server if a session could successfully be resumed.
        Resumed = 9,
        /// Message indicating that another user has disconnected from the voice channel.
        ClientDisconnect = 13,
    }
}
