use super::VoiceError;
use crate::model::id::UserId;

/// Something that happened on a call, received through [`Call::events`].
///
/// [`Call::events`]: super::Call::events
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum VoiceEvent {
    /// A user started or stopped speaking.
    ///
    /// Discord sends this once per user before their first audio packet, which makes it the way
    /// to map an SSRC to a user.
    Speaking { user_id: Option<UserId>, ssrc: u32, speaking: bool },
    /// A user left the voice channel.
    ClientDisconnect { user_id: UserId },
    /// The call was closed by Discord for good and will not reconnect.
    Disconnected(VoiceError),
}
