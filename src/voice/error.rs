use std::error::Error as StdError;
use std::fmt;

use xsalsa20poly1305::aead::Error as CryptoError;

use super::CloseCode;

/// An error returned from the voice module.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A join was requested for a guild whose previous join has not completed yet.
    AlreadyJoining,
    /// Discord sent the bot's voice state twice before sending the voice server.
    DuplicateStateUpdate,
    /// Discord sent the voice server twice before sending the bot's voice state.
    DuplicateServerUpdate,
    /// The voice state and voice server did not both arrive in time.
    JoinTimeout,
    /// The gateway has not identified yet, or refused the voice state update.
    GatewayUnavailable,
    /// Discord hello/ready handshake was violated.
    ExpectedHandshake,
    /// A handshake step did not complete in time.
    HandshakeTimeout,
    /// The only supported crypto mode was not offered by the server.
    CryptoModeUnavailable,
    /// The session description carried a key of the wrong size.
    InvalidSecretKey,
    /// Discord failed to correctly respond to IP discovery.
    IllegalDiscoveryResponse,
    /// Could not parse Discord's view of our IP.
    IllegalIp,
    /// A received datagram is not a valid voice packet.
    IllegalVoicePacket,
    /// An error occurred during [en/de]cryption of voice packets.
    Crypto(CryptoError),
    /// The voice websocket closed, with the code it was closed with.
    Closed(Option<CloseCode>),
    /// The last heartbeat was not acknowledged before the next one was due.
    HeartbeatStale,
    /// The call has no live connection.
    NotConnected,
    /// An indicator that an endpoint URL was invalid.
    EndpointUrl,
}

impl Error {
    /// Whether the call must not try to reconnect after this error.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Closed(Some(code)) => code.is_permanent(),
            Self::EndpointUrl | Self::CryptoModeUnavailable => true,
            _ => false,
        }
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyJoining => f.write_str("A join is already in progress for this guild"),
            Self::DuplicateStateUpdate => {
                f.write_str("Received a second voice state before the voice server")
            },
            Self::DuplicateServerUpdate => {
                f.write_str("Received a second voice server before the voice state")
            },
            Self::JoinTimeout => f.write_str("Timed out waiting for the voice state and server"),
            Self::GatewayUnavailable => f.write_str("The gateway is not ready for voice"),
            Self::ExpectedHandshake => f.write_str("Expected a voice handshake payload"),
            Self::HandshakeTimeout => f.write_str("Timed out during the voice handshake"),
            Self::CryptoModeUnavailable => f.write_str("Voice server offers no supported crypto mode"),
            Self::InvalidSecretKey => f.write_str("Voice server sent an invalid secret key"),
            Self::IllegalDiscoveryResponse => f.write_str("Illegal IP discovery response"),
            Self::IllegalIp => f.write_str("IP discovery returned an invalid address"),
            Self::IllegalVoicePacket => f.write_str("Received an illegal voice packet"),
            Self::Crypto(_) => f.write_str("Voice packet encryption failed"),
            Self::Closed(Some(code)) => {
                write!(f, "Voice connection closed with code {}", u16::from(*code))
            },
            Self::Closed(None) => f.write_str("Voice connection closed"),
            Self::HeartbeatStale => f.write_str("Voice heartbeat was not acknowledged"),
            Self::NotConnected => f.write_str("Call is not connected"),
            Self::EndpointUrl => f.write_str("Voice endpoint URL is invalid"),
        }
    }
}

impl StdError for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_decide_permanence() {
        assert!(Error::Closed(Some(CloseCode::AuthenticationFailed)).is_permanent());
        assert!(!Error::Closed(Some(CloseCode::SessionTimeout)).is_permanent());
        assert!(!Error::Closed(Some(CloseCode::Unknown(4321))).is_permanent());
        assert!(!Error::Closed(None).is_permanent());
        assert!(!Error::HeartbeatStale.is_permanent());
    }
}
