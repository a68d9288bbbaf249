use std::error::Error as StdError;
use std::fmt;

use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use super::ConnectionStage;
use crate::constants::close_codes;
use crate::ws::close_code;

/// An error that occurred while attempting to deal with the gateway.
///
/// Note that - from a user standpoint - there should be no situation in which you manually handle
/// these, apart from the errors returned by an initial [`Shard::connect`] and the ones given to
/// the error callback.
///
/// [`Shard::connect`]: super::Shard::connect
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    /// [`Shard::connect`] was called while a session was already running.
    ///
    /// [`Shard::connect`]: super::Shard::connect
    AlreadyConnected,
    /// The connection closed, potentially uncleanly.
    Closed(Option<CloseFrame<'static>>),
    /// A compressed frame could not be inflated.
    Decompression(String),
    /// Expected a Hello during a handshake
    ExpectedHello,
    /// A handshake step did not complete in time.
    HandshakeTimeout,
    /// The last heartbeat was not acknowledged before the next one was due.
    HeartbeatStale,
    /// A session state change which the state machine does not allow was attempted.
    IllegalTransition { from: ConnectionStage, to: ConnectionStage },
    /// When invalid authentication (a bad token) was sent in the IDENTIFY.
    InvalidAuthentication,
    /// When an undocumented gateway version was requested.
    InvalidApiVersion,
    /// Expected a Ready, a Resumed or an InvalidateSession
    InvalidHandshake,
    /// When invalid sharding data was sent in the IDENTIFY.
    ///
    /// # Examples
    ///
    /// Sending a shard ID of 5 when sharding with 3 total is considered invalid.
    InvalidShardData,
    /// When undocumented gateway intents are provided.
    InvalidGatewayIntents,
    /// When disallowed gateway intents are provided.
    ///
    /// If an connection has been established but privileged gateway intents were provided
    /// without enabling them prior.
    DisallowedGatewayIntents,
    /// A command was sent while no connection was open.
    NotConnected,
    /// When the shard would have too many guilds assigned to it.
    ShardingRequired,
}

impl Error {
    /// Maps a close frame to the error it signals.
    #[must_use]
    pub fn from_close(frame: Option<CloseFrame<'static>>) -> Self {
        match close_code(frame.as_ref()) {
            Some(close_codes::AUTHENTICATION_FAILED) => Self::InvalidAuthentication,
            Some(close_codes::INVALID_SHARD) => Self::InvalidShardData,
            Some(close_codes::SHARDING_REQUIRED) => Self::ShardingRequired,
            Some(close_codes::INVALID_API_VERSION) => Self::InvalidApiVersion,
            Some(close_codes::INVALID_GATEWAY_INTENTS) => Self::InvalidGatewayIntents,
            Some(close_codes::DISALLOWED_GATEWAY_INTENTS) => Self::DisallowedGatewayIntents,
            _ => Self::Closed(frame),
        }
    }

    /// Whether retrying cannot help, because the configuration itself is being refused.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::InvalidAuthentication
            | Self::InvalidShardData
            | Self::ShardingRequired
            | Self::InvalidApiVersion
            | Self::InvalidGatewayIntents
            | Self::DisallowedGatewayIntents => true,
            Self::Closed(frame) => close_code(frame.as_ref()) == Some(close_codes::POLICY_VIOLATION),
            _ => false,
        }
    }

    /// Whether the session can no longer be resumed and must be identified afresh.
    #[must_use]
    pub fn invalidates_session(&self) -> bool {
        match self {
            Self::Closed(frame) => matches!(
                close_code(frame.as_ref()),
                Some(close_codes::INVALID_SEQUENCE | close_codes::SESSION_TIMEOUT)
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyConnected => f.write_str("Shard is already connected"),
            Self::Closed(Some(frame)) => {
                write!(f, "Connection closed with code {}: {}", u16::from(frame.code), frame.reason)
            },
            Self::Closed(None) => f.write_str("Connection closed"),
            Self::Decompression(why) => write!(f, "Failed to decompress a frame: {why}"),
            Self::ExpectedHello => f.write_str("Expected a Hello"),
            Self::HandshakeTimeout => f.write_str("Timed out during the handshake"),
            Self::HeartbeatStale => f.write_str("Heartbeat was not acknowledged"),
            Self::IllegalTransition {
                from,
                to,
            } => write!(f, "Illegal stage transition from {from} to {to}"),
            Self::InvalidAuthentication => f.write_str("Sent invalid authentication"),
            Self::InvalidApiVersion => f.write_str("Requested an invalid gateway version"),
            Self::InvalidHandshake => f.write_str("Expected a valid Handshake"),
            Self::InvalidShardData => f.write_str("Sent invalid shard data"),
            Self::InvalidGatewayIntents => f.write_str("Invalid gateway intents were provided"),
            Self::DisallowedGatewayIntents => {
                f.write_str("Disallowed gateway intents were provided")
            },
            Self::NotConnected => f.write_str("Shard is not connected"),
            Self::ShardingRequired => f.write_str("Shard has too many guilds"),
        }
    }
}

impl StdError for Error {}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use super::*;

    fn frame(code: u16) -> Option<CloseFrame<'static>> {
        Some(CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Borrowed(""),
        })
    }

    #[test]
    fn refused_configuration_is_permanent() {
        for code in [4004, 4010, 4011, 4012, 4013, 4014, 1008] {
            assert!(Error::from_close(frame(code)).is_permanent(), "{code}");
        }
    }

    #[test]
    fn transient_closes_are_retried() {
        for code in [1000, 1006, 4000, 4001, 4002, 4003, 4005, 4007, 4008, 4009, 4999] {
            assert!(!Error::from_close(frame(code)).is_permanent(), "{code}");
        }

        assert!(!Error::from_close(None).is_permanent());
        assert!(!Error::HeartbeatStale.is_permanent());
    }

    #[test]
    fn invalid_sequence_and_timeout_drop_the_session() {
        assert!(Error::from_close(frame(4007)).invalidates_session());
        assert!(Error::from_close(frame(4009)).invalidates_session());
        assert!(!Error::from_close(frame(4000)).invalidates_session());
    }
}
