//! Voice calls: joining a voice channel and exchanging encrypted Opus audio with it.
//!
//! A [`Manager`] receives the voice state and voice server of each guild from the gateway. Joining
//! a channel yields a [`Call`], which performs the voice handshake on its own websocket, discovers
//! its external UDP address and then keeps two pipelines running:
//!
//! - outgoing Opus frames queued on [`Call::audio_sender`] are sent every 20ms, RTP framed and
//!   encrypted with the session key;
//! - incoming packets are decrypted and queued on [`Call::receiver`].
//!
//! A dropped connection is resumed with a fixed delay, unless Discord closed it with a code that
//! rules out reconnecting; [`Call::events`] then reports [`VoiceEvent::Disconnected`].

mod call;
mod close_code;
mod config;
mod connection;
pub mod constants;
pub mod discovery;
mod error;
mod events;
mod info;
mod manager;
mod payload;
pub mod rtp;
mod tasks;

pub use self::call::{Call, VoiceStage};
pub use self::close_code::CloseCode;
pub use self::config::Config;
pub use self::constants::VoiceOpcode;
pub use self::error::Error as VoiceError;
pub use self::events::VoiceEvent;
pub use self::info::ConnectionInfo;
pub use self::manager::{Manager, VoiceUpdate};
pub use self::rtp::AudioPacket;
